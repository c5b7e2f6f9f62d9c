//! Adapter for Anthropic-style message APIs. Authentication uses the
//! `x-api-key` header plus a pinned `anthropic-version`; the system prompt
//! travels out of band in the `system` field.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{ChatError, ChatResult};
use crate::core::message::{PartialReply, Reply, Role, Usage};
use crate::providers::sse::{extract_data_payload, LineBuffer};
use crate::providers::{
    error_from_response, map_transport_error, split_system, ProviderAdapter, SendRequest,
    StreamEvent, REQUEST_TIMEOUT,
};
use crate::utils::url::construct_api_url;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

/// Streamed event payloads, discriminated by `type`. Only the variants the
/// adapter acts on are modeled; everything else is skipped.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamPayload {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: TextDelta },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: StopDelta },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    Error { error: StreamError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct StopDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

pub struct AnthropicAdapter {
    client: reqwest::Client,
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
    credential_env: String,
}

impl AnthropicAdapter {
    pub fn new(
        client: reqwest::Client,
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        credential_env: impl Into<String>,
    ) -> Self {
        Self {
            client,
            provider_id: provider_id.into(),
            base_url: base_url.into(),
            api_key,
            credential_env: credential_env.into(),
        }
    }

    fn build_request<'a>(request: &'a SendRequest, stream: bool) -> MessagesRequest<'a> {
        let (_, turns) = split_system(&request.messages);
        MessagesRequest {
            model: &request.model_id,
            max_tokens: request.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            // Anthropic accepts only user/assistant roles; anything else
            // is folded into user, as the original client did.
            messages: turns
                .iter()
                .map(|m| WireMessage {
                    role: if m.role == Role::Assistant {
                        "assistant"
                    } else {
                        "user"
                    },
                    content: &m.content,
                })
                .collect(),
            system: match request.messages.first() {
                Some(first) if first.role == Role::System => Some(first.content.as_str()),
                _ => None,
            },
            temperature: request.options.temperature,
            stream,
        }
    }

    async fn post(&self, request: &SendRequest, stream: bool) -> ChatResult<reqwest::Response> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ChatError::Authentication {
            provider: self.provider_id.clone(),
            message: format!("{} not set in environment", self.credential_env),
        })?;
        let url = construct_api_url(&self.base_url, "v1/messages");
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::build_request(request, stream));
        if !stream {
            builder = builder.timeout(REQUEST_TIMEOUT);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| map_transport_error(&self.provider_id, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(&self.provider_id, response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn send(&self, request: SendRequest) -> ChatResult<Reply> {
        let response = self.post(&request, false).await?;
        let body: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| ChatError::ProviderResponse {
                    provider: self.provider_id.clone(),
                    message: format!("undecodable response body: {e}"),
                })?;

        let content = body
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if body.content.is_empty() {
            return Err(ChatError::ProviderResponse {
                provider: self.provider_id.clone(),
                message: "response contained no content blocks".to_string(),
            });
        }

        Ok(Reply {
            content,
            finish_reason: body.stop_reason,
            usage: body.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
        })
    }

    async fn send_streaming(
        &self,
        request: SendRequest,
        tx: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let response = match self.post(&request, true).await {
            Ok(response) => response,
            Err(err) => {
                let _ = tx.send(StreamEvent::Failed(err));
                return;
            }
        };

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut content = String::new();
        let mut finish_reason = None;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return;
            }
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed(map_transport_error(
                        &self.provider_id,
                        e,
                    )));
                    return;
                }
            };
            lines.push(&chunk);

            while let Some(line) = lines.next_line() {
                let Some(payload) = extract_data_payload(&line) else {
                    continue;
                };
                match serde_json::from_str::<StreamPayload>(payload) {
                    Ok(StreamPayload::ContentBlockDelta { delta }) => {
                        if let Some(text) = delta.text {
                            content.push_str(&text);
                            let _ = tx.send(StreamEvent::Delta(PartialReply { delta_text: text }));
                        }
                    }
                    Ok(StreamPayload::MessageDelta { delta }) => {
                        if delta.stop_reason.is_some() {
                            finish_reason = delta.stop_reason;
                        }
                    }
                    Ok(StreamPayload::MessageStop) => {
                        let _ = tx.send(StreamEvent::Done(Reply {
                            content,
                            finish_reason,
                            usage: None,
                        }));
                        return;
                    }
                    Ok(StreamPayload::Error { error }) => {
                        let _ = tx.send(StreamEvent::Failed(ChatError::ProviderResponse {
                            provider: self.provider_id.clone(),
                            message: error.message,
                        }));
                        return;
                    }
                    Ok(StreamPayload::Other) => {}
                    Err(_) => {}
                }
            }
        }

        let _ = tx.send(StreamEvent::Done(Reply {
            content,
            finish_reason,
            usage: None,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Message;
    use crate::providers::SendOptions;

    #[test]
    fn system_prompt_moves_out_of_band() {
        let request = SendRequest {
            model_id: "claude-sonnet".to_string(),
            messages: vec![
                Message::system("be terse"),
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("again"),
            ],
            options: SendOptions::default(),
        };
        let wire = AnthropicAdapter::build_request(&request, false);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["system"], "be terse");
        assert_eq!(json["max_tokens"], DEFAULT_MAX_TOKENS);
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn response_sums_usage_tokens() {
        let body = r#"{
            "content": [{"type": "text", "text": "Hi there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.content[0].text.as_deref(), Some("Hi there"));
        assert_eq!(parsed.usage.unwrap().input_tokens, 10);
    }

    #[test]
    fn stream_payloads_discriminate_on_type() {
        let delta: StreamPayload = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        )
        .unwrap();
        assert!(matches!(
            delta,
            StreamPayload::ContentBlockDelta { delta: TextDelta { text: Some(ref t) } } if t == "Hel"
        ));

        let stop: StreamPayload = serde_json::from_str(r#"{"type":"message_stop"}"#).unwrap();
        assert!(matches!(stop, StreamPayload::MessageStop));

        let ping: StreamPayload = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, StreamPayload::Other));
    }
}
