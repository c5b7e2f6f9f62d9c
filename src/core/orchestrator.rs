//! Per-turn coordination: ingest, assemble, dispatch, commit.
//!
//! A turn runs Assembling → Dispatching → (Streaming | Awaiting) →
//! Committing. Transient adapter errors are retried with exponential
//! backoff inside Dispatching; fatal errors surface as typed failures.
//! The user's message is committed before dispatch so retry history stays
//! visible, and a partial assistant reply is only ever committed when a
//! stream is cancelled, tagged as truncated.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::assembler::assemble;
use crate::core::config::{Config, ModelSpec, Persona, ProviderSpec};
use crate::core::error::ChatResult;
use crate::core::message::{Message, PartialReply, Reply};
use crate::core::registry::ProviderRegistry;
use crate::core::store::{Conversation, ConversationStore};
use crate::ingest::FileIngestor;
use crate::providers::{ProviderAdapter, SendOptions, SendRequest, StreamEvent};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

const DEFAULT_TEMPERATURE: f64 = 0.7;

fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    let backoff = BASE_BACKOFF * 2u32.saturating_pow(attempt.saturating_sub(1));
    match retry_after {
        Some(requested) if requested > backoff => requested,
        _ => backoff,
    }
}

/// Handle to an in-flight streamed turn. Dropping the handle without
/// cancelling lets the turn run to completion in the background.
pub struct TurnStream {
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
}

impl TurnStream {
    /// Stop forwarding chunks. Text received so far is committed to the
    /// conversation, tagged as truncated.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct ChatOrchestrator {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    store: Arc<ConversationStore>,
    ingestor: Arc<FileIngestor>,
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatOrchestrator {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<ProviderRegistry>,
        store: Arc<ConversationStore>,
        ingestor: FileIngestor,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            ingestor: Arc::new(ingestor),
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build the whole stack from configuration with an in-memory store.
    pub fn from_config(config: Config) -> ChatResult<Self> {
        let registry = ProviderRegistry::from_config(&config)?;
        let ingestor = FileIngestor::new(config.file_handling.clone());
        let config = Arc::new(config);
        Ok(Self::new(
            config,
            Arc::new(registry),
            Arc::new(ConversationStore::new_in_memory()),
            ingestor,
        ))
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn list_providers(&self) -> Vec<ProviderSpec> {
        self.registry.list().into_iter().cloned().collect()
    }

    pub fn list_models(&self, provider_id: &str) -> ChatResult<Vec<ModelSpec>> {
        let (spec, _) = self.registry.get(provider_id)?;
        Ok(spec.models.clone())
    }

    pub fn list_personas(&self) -> Vec<Persona> {
        self.config.personas.clone()
    }

    /// Create a conversation after validating the provider exists.
    pub fn create_session(
        &self,
        session_id: &str,
        provider_id: &str,
        model_id: &str,
        persona_id: &str,
    ) -> ChatResult<Conversation> {
        self.registry.get(provider_id)?;
        Ok(self
            .store
            .create(session_id, provider_id, model_id, persona_id))
    }

    /// Delete a conversation and release its turn lock entry.
    pub fn delete_session(&self, session_id: &str) -> ChatResult<()> {
        self.store.delete(session_id)?;
        self.turn_locks
            .lock()
            .expect("turn lock index poisoned")
            .remove(session_id);
        Ok(())
    }

    fn turn_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().expect("turn lock index poisoned");
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Everything that happens before dispatch: load, ingest, assemble,
    /// resolve, and commit the user's message.
    async fn prepare(
        &self,
        session_id: &str,
        user_text: &str,
        attachment_paths: &[PathBuf],
    ) -> ChatResult<(Arc<dyn ProviderAdapter>, bool, SendRequest)> {
        let conversation = self.store.get(session_id).await?;
        let (spec, adapter) = self.registry.get(&conversation.provider_id)?;
        let supports_streaming = spec.supports_streaming;

        let ingested = self.ingestor.ingest(attachment_paths)?;
        for skipped in &ingested.skipped {
            tracing::warn!(
                path = %skipped.path.display(),
                reason = %skipped.reason,
                "attachment skipped"
            );
        }

        let system_prompt = self.config.persona_system_prompt(&conversation.persona_id);
        let messages = assemble(
            &system_prompt,
            &conversation.turns,
            user_text,
            &ingested.attachments,
            self.config.context_budget_chars,
        )?;

        let options = SendOptions {
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: spec
                .find_model(&conversation.model_id)
                .and_then(|m| m.max_output_tokens),
        };

        // The assembled tail carries the (possibly truncated) attachments;
        // the stored user message keeps the raw text plus those refs.
        let attachments = messages
            .last()
            .map(|m| m.attachments.clone())
            .unwrap_or_default();
        self.store
            .append(
                session_id,
                Message::user(user_text).with_attachments(attachments),
            )
            .await?;

        Ok((
            adapter,
            supports_streaming,
            SendRequest {
                model_id: conversation.model_id,
                messages,
                options,
            },
        ))
    }

    /// Run one complete turn and return the assistant's reply.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        user_text: &str,
        attachment_paths: &[PathBuf],
    ) -> ChatResult<Reply> {
        let lock = self.turn_lock(session_id);
        let _turn = lock.lock().await;

        let (adapter, _, request) = self
            .prepare(session_id, user_text, attachment_paths)
            .await?;

        let mut attempt = 0;
        let reply = loop {
            attempt += 1;
            match adapter.send(request.clone()).await {
                Ok(reply) => break reply,
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff_delay(attempt, err.retry_after());
                    tracing::warn!(
                        session = %session_id,
                        attempt,
                        "transient dispatch failure ({}), retrying in {delay:?}",
                        err.kind()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(session = %session_id, "turn failed: {err}");
                    return Err(err);
                }
            }
        };

        self.store
            .append(session_id, Message::assistant(reply.content.clone()))
            .await?;
        Ok(reply)
    }

    /// Run one turn, streaming partial replies as they arrive. The
    /// assistant message is committed when the terminal `Done` event fires,
    /// or as a truncated message if the caller cancels mid-stream.
    pub async fn handle_turn_streaming(
        &self,
        session_id: &str,
        user_text: &str,
        attachment_paths: &[PathBuf],
    ) -> ChatResult<TurnStream> {
        let lock = self.turn_lock(session_id);
        let turn = lock.lock_owned().await;

        let (adapter, supports_streaming, request) = self
            .prepare(session_id, user_text, attachment_paths)
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let store = Arc::clone(&self.store);
        let session = session_id.to_string();

        tokio::spawn(async move {
            let _turn = turn;

            let mut attempt = 0;
            'attempts: loop {
                attempt += 1;
                let (inner_tx, mut inner_rx) = mpsc::unbounded_channel();
                let adapter_cancel = task_cancel.child_token();
                {
                    let adapter = Arc::clone(&adapter);
                    let request = request.clone();
                    let cancel = adapter_cancel.clone();
                    // A provider declared non-streaming never gets a
                    // streaming request, even if its adapter family could
                    // stream; the blocking reply is surfaced as one delta.
                    tokio::spawn(async move {
                        if supports_streaming {
                            adapter.send_streaming(request, inner_tx, cancel).await;
                            return;
                        }
                        if cancel.is_cancelled() {
                            return;
                        }
                        match adapter.send(request).await {
                            Ok(reply) => {
                                let _ = inner_tx.send(StreamEvent::Delta(PartialReply {
                                    delta_text: reply.content.clone(),
                                }));
                                let _ = inner_tx.send(StreamEvent::Done(reply));
                            }
                            Err(err) => {
                                let _ = inner_tx.send(StreamEvent::Failed(err));
                            }
                        }
                    });
                }

                let mut content = String::new();
                loop {
                    tokio::select! {
                        _ = task_cancel.cancelled() => {
                            adapter_cancel.cancel();
                            if !content.is_empty() {
                                if let Err(e) = store
                                    .append(&session, Message::assistant(content).truncated())
                                    .await
                                {
                                    tracing::warn!(session = %session, "failed to commit truncated reply: {e}");
                                }
                            }
                            return;
                        }
                        event = inner_rx.recv() => match event {
                            Some(StreamEvent::Delta(delta)) => {
                                content.push_str(&delta.delta_text);
                                let _ = tx.send(StreamEvent::Delta(delta));
                            }
                            Some(StreamEvent::Done(reply)) => {
                                match store
                                    .append(&session, Message::assistant(reply.content.clone()))
                                    .await
                                {
                                    Ok(()) => {
                                        let _ = tx.send(StreamEvent::Done(reply));
                                    }
                                    Err(e) => {
                                        let _ = tx.send(StreamEvent::Failed(e));
                                    }
                                }
                                return;
                            }
                            Some(StreamEvent::Failed(err)) => {
                                if err.is_transient() && content.is_empty() && attempt < MAX_ATTEMPTS {
                                    let delay = backoff_delay(attempt, err.retry_after());
                                    tracing::warn!(
                                        session = %session,
                                        attempt,
                                        "transient stream failure ({}), retrying in {delay:?}",
                                        err.kind()
                                    );
                                    tokio::time::sleep(delay).await;
                                    continue 'attempts;
                                }
                                let _ = tx.send(StreamEvent::Failed(err));
                                return;
                            }
                            // Adapter task ended without a terminal event.
                            None => return,
                        }
                    }
                }
            }
        });

        Ok(TurnStream { events: rx, cancel })
    }
}
