//! Adapter for Google-style generative language APIs. The credential rides
//! as a query parameter, roles are `user`/`model`, and the system prompt
//! becomes a `systemInstruction`. Streaming is not offered; callers fall
//! back to the blocking round trip.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::{ChatError, ChatResult};
use crate::core::message::{Reply, Role, Usage};
use crate::providers::{
    error_from_response, map_transport_error, split_system, ProviderAdapter, SendRequest,
    REQUEST_TIMEOUT,
};
use crate::utils::url::normalize_base_url;

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

pub struct GoogleAdapter {
    client: reqwest::Client,
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
    credential_env: String,
}

impl GoogleAdapter {
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

    fn build_request(request: &SendRequest) -> GenerateContentRequest<'_> {
        let (_, turns) = split_system(&request.messages);
        GenerateContentRequest {
            contents: turns
                .iter()
                .map(|m| Content {
                    role: if m.role == Role::Assistant {
                        "model"
                    } else {
                        "user"
                    },
                    parts: vec![Part { text: &m.content }],
                })
                .collect(),
            system_instruction: match request.messages.first() {
                Some(first) if first.role == Role::System => Some(SystemInstruction {
                    parts: vec![Part {
                        text: &first.content,
                    }],
                }),
                _ => None,
            },
            generation_config: GenerationConfig {
                temperature: request.options.temperature,
                max_output_tokens: request.options.max_tokens,
            },
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    async fn send(&self, request: SendRequest) -> ChatResult<Reply> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ChatError::Authentication {
            provider: self.provider_id.clone(),
            message: format!("{} not set in environment", self.credential_env),
        })?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            normalize_base_url(&self.base_url),
            request.model_id
        );
        let response = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .header("Content-Type", "application/json")
            .json(&Self::build_request(&request))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| map_transport_error(&self.provider_id, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(&self.provider_id, response).await);
        }

        let body: GenerateContentResponse =
            response
                .json()
                .await
                .map_err(|e| ChatError::ProviderResponse {
                    provider: self.provider_id.clone(),
                    message: format!("undecodable response body: {e}"),
                })?;

        let candidate = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::ProviderResponse {
                provider: self.provider_id.clone(),
                message: "response contained no candidates".to_string(),
            })?;
        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(Reply {
            content,
            finish_reason: candidate.finish_reason,
            usage: body.usage_metadata.map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Message;
    use crate::providers::SendOptions;

    #[test]
    fn assistant_turns_become_model_role() {
        let request = SendRequest {
            model_id: "gemini-pro".to_string(),
            messages: vec![
                Message::system("be kind"),
                Message::user("hi"),
                Message::assistant("hello"),
            ],
            options: SendOptions {
                temperature: None,
                max_tokens: Some(2048),
            },
        };
        let wire = GoogleAdapter::build_request(&request);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be kind");
        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn response_joins_candidate_parts() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "world"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let candidate = &parsed.candidates[0];
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
        let text: String = candidate
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        assert_eq!(text, "Hello world");
        assert_eq!(parsed.usage_metadata.unwrap().total_token_count, 6);
    }
}
