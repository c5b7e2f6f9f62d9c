//! Session-scoped conversation log with save/load/clear lifecycle.
//!
//! Conversations live in memory for the life of the process; with a
//! history directory configured they also persist as one JSON file per
//! session and survive restarts. Appends and clears are serialized per
//! session; distinct sessions never contend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::error::{ChatError, ChatResult};
use crate::core::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub provider_id: String,
    pub model_id: String,
    pub persona_id: String,
    pub turns: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lightweight listing entry, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session_id: String,
    pub provider_id: String,
    pub model_id: String,
    pub persona_id: String,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}

pub struct ConversationStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
    history_dir: Option<PathBuf>,
}

impl ConversationStore {
    pub fn new_in_memory() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_dir: None,
        }
    }

    /// Store that also writes each conversation to
    /// `<history_dir>/<session_id>.json` after every mutation.
    pub fn with_history_dir(history_dir: PathBuf) -> ChatResult<Self> {
        std::fs::create_dir_all(&history_dir)?;
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            history_dir: Some(history_dir),
        })
    }

    pub fn create(
        &self,
        session_id: &str,
        provider_id: &str,
        model_id: &str,
        persona_id: &str,
    ) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            session_id: session_id.to_string(),
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            persona_id: persona_id.to_string(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.sessions
            .write()
            .expect("session index poisoned")
            .insert(
                session_id.to_string(),
                Arc::new(Mutex::new(conversation.clone())),
            );
        self.persist(&conversation);
        conversation
    }

    fn entry(&self, session_id: &str) -> ChatResult<Arc<Mutex<Conversation>>> {
        if let Some(entry) = self
            .sessions
            .read()
            .expect("session index poisoned")
            .get(session_id)
        {
            return Ok(Arc::clone(entry));
        }

        // Not resident; a disk-backed store may still know it.
        if let Some(loaded) = self.load_from_disk(session_id) {
            let entry = Arc::new(Mutex::new(loaded));
            self.sessions
                .write()
                .expect("session index poisoned")
                .insert(session_id.to_string(), Arc::clone(&entry));
            return Ok(entry);
        }

        Err(ChatError::UnknownSession(session_id.to_string()))
    }

    pub async fn append(&self, session_id: &str, message: Message) -> ChatResult<()> {
        let entry = self.entry(session_id)?;
        let mut conversation = entry.lock().await;
        conversation.turns.push(message);
        conversation.updated_at = Utc::now();
        self.persist(&conversation);
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> ChatResult<Conversation> {
        let entry = self.entry(session_id)?;
        let conversation = entry.lock().await;
        Ok(conversation.clone())
    }

    /// Empty the turn sequence. The conversation record itself, including
    /// its provider/model/persona selection, survives.
    pub async fn clear(&self, session_id: &str) -> ChatResult<()> {
        let entry = self.entry(session_id)?;
        let mut conversation = entry.lock().await;
        conversation.turns.clear();
        conversation.updated_at = Utc::now();
        self.persist(&conversation);
        Ok(())
    }

    /// Switch the active provider/model pair. Past turns are untouched;
    /// only future dispatch is affected.
    pub async fn update_selection(
        &self,
        session_id: &str,
        provider_id: &str,
        model_id: &str,
    ) -> ChatResult<()> {
        let entry = self.entry(session_id)?;
        let mut conversation = entry.lock().await;
        conversation.provider_id = provider_id.to_string();
        conversation.model_id = model_id.to_string();
        conversation.updated_at = Utc::now();
        self.persist(&conversation);
        Ok(())
    }

    pub async fn update_persona(&self, session_id: &str, persona_id: &str) -> ChatResult<()> {
        let entry = self.entry(session_id)?;
        let mut conversation = entry.lock().await;
        conversation.persona_id = persona_id.to_string();
        conversation.updated_at = Utc::now();
        self.persist(&conversation);
        Ok(())
    }

    /// Summaries of every known conversation, newest first. For a
    /// disk-backed store this includes sessions from earlier runs.
    pub async fn list(&self) -> Vec<ConversationSummary> {
        if let Some(dir) = &self.history_dir {
            self.load_directory(dir);
        }

        let entries: Vec<Arc<Mutex<Conversation>>> = self
            .sessions
            .read()
            .expect("session index poisoned")
            .values()
            .cloned()
            .collect();

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            let conversation = entry.lock().await;
            summaries.push(ConversationSummary {
                session_id: conversation.session_id.clone(),
                provider_id: conversation.provider_id.clone(),
                model_id: conversation.model_id.clone(),
                persona_id: conversation.persona_id.clone(),
                turn_count: conversation.turns.len(),
                updated_at: conversation.updated_at,
            });
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Remove the conversation record and any on-disk file.
    pub fn delete(&self, session_id: &str) -> ChatResult<()> {
        let removed = self
            .sessions
            .write()
            .expect("session index poisoned")
            .remove(session_id)
            .is_some();

        let mut on_disk = false;
        if let Some(dir) = &self.history_dir {
            let path = dir.join(format!("{session_id}.json"));
            if path.exists() {
                std::fs::remove_file(&path)?;
                on_disk = true;
            }
        }

        if removed || on_disk {
            Ok(())
        } else {
            Err(ChatError::UnknownSession(session_id.to_string()))
        }
    }

    fn persist(&self, conversation: &Conversation) {
        let Some(dir) = &self.history_dir else {
            return;
        };
        let path = dir.join(format!("{}.json", conversation.session_id));
        match serde_json::to_string_pretty(conversation) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(
                        session = %conversation.session_id,
                        "failed to persist conversation: {e}"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    session = %conversation.session_id,
                    "failed to serialize conversation: {e}"
                );
            }
        }
    }

    fn load_from_disk(&self, session_id: &str) -> Option<Conversation> {
        let dir = self.history_dir.as_ref()?;
        let path = dir.join(format!("{session_id}.json"));
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(conversation) => Some(conversation),
            Err(e) => {
                tracing::warn!(session = %session_id, "unreadable conversation file: {e}");
                None
            }
        }
    }

    fn load_directory(&self, dir: &std::path::Path) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let resident = self
                .sessions
                .read()
                .expect("session index poisoned")
                .contains_key(session_id);
            if resident {
                continue;
            }
            if let Some(conversation) = self.load_from_disk(session_id) {
                self.sessions
                    .write()
                    .expect("session index poisoned")
                    .insert(
                        session_id.to_string(),
                        Arc::new(Mutex::new(conversation)),
                    );
            }
        }
    }
}
