//! Adapter for OpenAI-compatible chat APIs (IONOS-style and OpenAI-style
//! hosted endpoints). Bearer authentication, `/chat/completions`, SSE
//! streaming with a `[DONE]` terminator.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{ChatError, ChatResult};
use crate::core::message::{PartialReply, Reply, Usage};
use crate::providers::sse::{extract_data_payload, LineBuffer};
use crate::providers::{
    error_from_response, map_transport_error, ProviderAdapter, SendRequest, StreamEvent,
    REQUEST_TIMEOUT,
};
use crate::utils::url::construct_api_url;

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
    credential_env: String,
}

impl OpenAiCompatAdapter {
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

    fn api_key(&self) -> ChatResult<&str> {
        self.api_key.as_deref().ok_or_else(|| ChatError::Authentication {
            provider: self.provider_id.clone(),
            message: format!("{} not set in environment", self.credential_env),
        })
    }

    fn build_request<'a>(&self, request: &'a SendRequest, stream: bool) -> ChatRequest<'a> {
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
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
        }
    }

    async fn post(
        &self,
        request: &SendRequest,
        stream: bool,
        streaming_call: bool,
    ) -> ChatResult<reqwest::Response> {
        let api_key = self.api_key()?;
        let url = construct_api_url(&self.base_url, "chat/completions");
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&self.build_request(request, stream));
        if !streaming_call {
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
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn send(&self, request: SendRequest) -> ChatResult<Reply> {
        let response = self.post(&request, false, false).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChatError::ProviderResponse {
                provider: self.provider_id.clone(),
                message: format!("undecodable response body: {e}"),
            })?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::ProviderResponse {
                provider: self.provider_id.clone(),
                message: "response contained no choices".to_string(),
            })?;

        Ok(Reply {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: body.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn send_streaming(
        &self,
        request: SendRequest,
        tx: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let response = match self.post(&request, true, true).await {
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
                if payload == "[DONE]" {
                    let _ = tx.send(StreamEvent::Done(Reply {
                        content,
                        finish_reason,
                        usage: None,
                    }));
                    return;
                }
                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(parsed) => {
                        if let Some(choice) = parsed.choices.first() {
                            if let Some(reason) = &choice.finish_reason {
                                finish_reason = Some(reason.clone());
                            }
                            if let Some(delta) = &choice.delta.content {
                                content.push_str(delta);
                                let _ = tx.send(StreamEvent::Delta(PartialReply {
                                    delta_text: delta.clone(),
                                }));
                            }
                        }
                    }
                    Err(_) if payload.trim().is_empty() => {}
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Failed(ChatError::ProviderResponse {
                            provider: self.provider_id.clone(),
                            message: format!("undecodable stream chunk: {e}"),
                        }));
                        return;
                    }
                }
            }
        }

        // Stream ended without [DONE]; surface what we have.
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

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::new(
            reqwest::Client::new(),
            "ionos",
            "https://example.test/v1",
            Some("sk-test".to_string()),
            "IONOS_API_KEY",
        )
    }

    #[test]
    fn request_serializes_roles_and_skips_absent_options() {
        let adapter = adapter();
        let request = SendRequest {
            model_id: "llama".to_string(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            options: SendOptions {
                temperature: Some(0.7),
                max_tokens: None,
            },
        };
        let wire = adapter.build_request(&request, true);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["model"], "llama");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["temperature"], 0.7);
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn response_body_decodes_usage() {
        let body = r#"{
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let choice = &parsed.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("hello"));
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn stream_chunk_decodes_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let parsed: StreamChunk = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hel"));
    }

    #[tokio::test]
    async fn missing_credential_is_an_authentication_error() {
        let adapter = OpenAiCompatAdapter::new(
            reqwest::Client::new(),
            "ionos",
            "https://example.test/v1",
            None,
            "IONOS_API_KEY",
        );
        let err = adapter
            .send(SendRequest {
                model_id: "llama".to_string(),
                messages: vec![Message::user("hi")],
                options: SendOptions::default(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "authentication");
    }
}
