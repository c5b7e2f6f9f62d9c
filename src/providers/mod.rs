//! The vendor seam: one adapter per provider family, all speaking the same
//! `(messages, model, options)` contract and normalizing replies and errors.

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai_compat;
pub mod sse;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{ChatError, ChatResult};
use crate::core::message::{Message, PartialReply, Reply};

/// Recognized request options. Adapters ignore what their vendor does not
/// support; unrecognized options are never an error.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// One fully assembled, budget-enforced request to a provider.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    pub options: SendOptions,
}

/// Events emitted on the streaming channel. `Done` always terminates the
/// sequence; restarting means re-issuing the whole request.
#[derive(Debug)]
pub enum StreamEvent {
    Delta(PartialReply),
    Done(Reply),
    Failed(ChatError),
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// One network round trip; no state retained between calls.
    async fn send(&self, request: SendRequest) -> ChatResult<Reply>;

    /// Stream a reply as deltas followed by a terminal `Done`. The default
    /// covers providers without streaming support: one blocking round trip
    /// surfaced as a single delta plus `Done`.
    async fn send_streaming(
        &self,
        request: SendRequest,
        tx: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }
        match self.send(request).await {
            Ok(reply) => {
                let _ = tx.send(StreamEvent::Delta(PartialReply {
                    delta_text: reply.content.clone(),
                }));
                let _ = tx.send(StreamEvent::Done(reply));
            }
            Err(err) => {
                let _ = tx.send(StreamEvent::Failed(err));
            }
        }
    }
}

/// Wall-clock bound for a single non-streaming round trip. Expiry is a
/// transient network error and follows the retry path.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

pub fn build_http_client() -> ChatResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))
}

/// Map a transport-level failure. Timeouts and connection problems are
/// transient; anything else about the request itself is not retryable.
pub(crate) fn map_transport_error(provider: &str, err: reqwest::Error) -> ChatError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ChatError::Network {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    } else {
        ChatError::ProviderResponse {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Translate a non-success HTTP response into the error taxonomy.
pub(crate) async fn error_from_response(
    provider: &str,
    response: reqwest::Response,
) -> ChatError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    let message = sse::error_summary(&body, status.as_u16());

    match status.as_u16() {
        401 | 403 => ChatError::Authentication {
            provider: provider.to_string(),
            message,
        },
        429 => ChatError::RateLimit {
            provider: provider.to_string(),
            retry_after,
        },
        500..=599 => ChatError::Network {
            provider: provider.to_string(),
            message,
        },
        _ => ChatError::ProviderResponse {
            provider: provider.to_string(),
            message,
        },
    }
}

/// Split assembled messages into the leading system prompt (if any) and the
/// remaining turns. Used by vendors that carry the system prompt out of
/// band (Anthropic, Google).
pub(crate) fn split_system(messages: &[Message]) -> (Option<String>, &[Message]) {
    match messages.first() {
        Some(first) if first.role == crate::core::message::Role::System => {
            (Some(first.content.clone()), &messages[1..])
        }
        _ => (None, messages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;

    #[test]
    fn split_system_peels_leading_system_message() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, Role::User);
    }

    #[test]
    fn split_system_passes_through_without_system() {
        let messages = vec![Message::user("hi")];
        let (system, rest) = split_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }
}
