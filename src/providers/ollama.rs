//! Adapter for a local Ollama-style inference server. No credential; the
//! base URL points at the local network. Streaming arrives as NDJSON with
//! a `done: true` terminator.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{ChatError, ChatResult};
use crate::core::message::{PartialReply, Reply, Usage};
use crate::providers::sse::LineBuffer;
use crate::providers::{
    error_from_response, map_transport_error, ProviderAdapter, SendRequest, StreamEvent,
    REQUEST_TIMEOUT,
};
use crate::utils::url::construct_api_url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    options: WireOptions,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl ChatResponse {
    fn usage(&self) -> Option<Usage> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (input, output) => {
                let input = input.unwrap_or(0);
                let output = output.unwrap_or(0);
                Some(Usage {
                    input_tokens: input,
                    output_tokens: output,
                    total_tokens: input + output,
                })
            }
        }
    }
}

pub struct OllamaAdapter {
    client: reqwest::Client,
    provider_id: String,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(
        client: reqwest::Client,
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            provider_id: provider_id.into(),
            base_url: if base_url.is_empty() {
                DEFAULT_BASE_URL.to_string()
            } else {
                base_url
            },
        }
    }

    fn build_request<'a>(request: &'a SendRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &request.model_id,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
            options: WireOptions {
                temperature: request.options.temperature,
                num_predict: request.options.max_tokens,
            },
        }
    }

    async fn post(&self, request: &SendRequest, stream: bool) -> ChatResult<reqwest::Response> {
        let url = construct_api_url(&self.base_url, "api/chat");
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
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
impl ProviderAdapter for OllamaAdapter {
    async fn send(&self, request: SendRequest) -> ChatResult<Reply> {
        let response = self.post(&request, false).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChatError::ProviderResponse {
                provider: self.provider_id.clone(),
                message: format!("undecodable response body: {e}"),
            })?;

        let message = body.message.as_ref().ok_or_else(|| ChatError::ProviderResponse {
            provider: self.provider_id.clone(),
            message: "response contained no message".to_string(),
        })?;

        Ok(Reply {
            content: message.content.clone(),
            finish_reason: body.done_reason.clone(),
            usage: body.usage(),
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
                if line.is_empty() {
                    continue;
                }
                let parsed: ChatResponse = match serde_json::from_str(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Failed(ChatError::ProviderResponse {
                            provider: self.provider_id.clone(),
                            message: format!("undecodable stream line: {e}"),
                        }));
                        return;
                    }
                };
                if let Some(message) = &parsed.message {
                    if !message.content.is_empty() {
                        content.push_str(&message.content);
                        let _ = tx.send(StreamEvent::Delta(PartialReply {
                            delta_text: message.content.clone(),
                        }));
                    }
                }
                if parsed.done {
                    let _ = tx.send(StreamEvent::Done(Reply {
                        content,
                        finish_reason: parsed.done_reason.clone(),
                        usage: parsed.usage(),
                    }));
                    return;
                }
            }
        }

        let _ = tx.send(StreamEvent::Done(Reply {
            content,
            finish_reason: None,
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
    fn empty_base_url_falls_back_to_localhost() {
        let adapter = OllamaAdapter::new(reqwest::Client::new(), "ollama", "");
        assert_eq!(adapter.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn request_nests_options() {
        let request = SendRequest {
            model_id: "llama3".to_string(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            options: SendOptions {
                temperature: Some(0.7),
                max_tokens: Some(256),
            },
        };
        let wire = OllamaAdapter::build_request(&request, true);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["options"]["temperature"], 0.7);
        assert_eq!(json["options"]["num_predict"], 256);
        assert_eq!(json["messages"][0]["role"], "system");
    }

    #[test]
    fn stream_lines_accumulate_until_done() {
        let first: ChatResponse =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#)
                .unwrap();
        assert!(!first.done);
        assert_eq!(first.message.unwrap().content, "Hel");

        let last: ChatResponse = serde_json::from_str(
            r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":9,"eval_count":4}"#,
        )
        .unwrap();
        assert!(last.done);
        assert_eq!(last.done_reason.as_deref(), Some("stop"));
        assert_eq!(last.usage().unwrap().total_tokens, 13);
    }
}
