//! Maps provider ids to their specs and adapters.
//!
//! Populated once at startup from configuration and read-only afterwards;
//! the orchestrator shares it behind an `Arc` with no further locking.

use std::sync::Arc;

use crate::core::config::{Config, ProviderKind, ProviderSpec};
use crate::core::error::{ChatError, ChatResult};
use crate::providers::anthropic::AnthropicAdapter;
use crate::providers::google::GoogleAdapter;
use crate::providers::ollama::OllamaAdapter;
use crate::providers::openai_compat::OpenAiCompatAdapter;
use crate::providers::{build_http_client, ProviderAdapter};

const GOOGLE_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct ProviderRegistry {
    entries: Vec<(ProviderSpec, Arc<dyn ProviderAdapter>)>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, spec: ProviderSpec, adapter: Arc<dyn ProviderAdapter>) {
        self.entries.push((spec, adapter));
    }

    pub fn get(
        &self,
        provider_id: &str,
    ) -> ChatResult<(&ProviderSpec, Arc<dyn ProviderAdapter>)> {
        self.entries
            .iter()
            .find(|(spec, _)| spec.id == provider_id)
            .map(|(spec, adapter)| (spec, Arc::clone(adapter)))
            .ok_or_else(|| ChatError::UnknownProvider(provider_id.to_string()))
    }

    /// Registered specs in registration order.
    pub fn list(&self) -> Vec<&ProviderSpec> {
        self.entries.iter().map(|(spec, _)| spec).collect()
    }

    /// Build the full registry from configuration, resolving credentials
    /// from the environment once. Providers missing a credential still
    /// register; they fail with an authentication error at dispatch.
    pub fn from_config(config: &Config) -> ChatResult<Self> {
        let client = build_http_client()?;
        let mut registry = Self::new();

        for spec in &config.providers {
            let credential = spec.resolve_credential();
            let credential_env = spec.credential_env_name();
            let adapter: Arc<dyn ProviderAdapter> = match spec.kind {
                ProviderKind::Ionos | ProviderKind::Openai => Arc::new(OpenAiCompatAdapter::new(
                    client.clone(),
                    spec.id.clone(),
                    spec.base_url.clone(),
                    credential,
                    credential_env,
                )),
                ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(
                    client.clone(),
                    spec.id.clone(),
                    spec.base_url.clone(),
                    credential,
                    credential_env,
                )),
                ProviderKind::Google => {
                    let base_url = if spec.base_url.is_empty() {
                        GOOGLE_DEFAULT_BASE_URL.to_string()
                    } else {
                        spec.base_url.clone()
                    };
                    Arc::new(GoogleAdapter::new(
                        client.clone(),
                        spec.id.clone(),
                        base_url,
                        credential,
                        credential_env,
                    ))
                }
                ProviderKind::Ollama => Arc::new(OllamaAdapter::new(
                    client.clone(),
                    spec.id.clone(),
                    spec.base_url.clone(),
                )),
            };
            registry.register(spec.clone(), adapter);
        }

        Ok(registry)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[providers]]
id = "ionos"
display_name = "IONOS"
kind = "ionos"
base_url = "https://inference.example/v1"
supports_streaming = true

[[providers]]
id = "ollama"
display_name = "Ollama"
kind = "ollama"
requires_credential = false
supports_streaming = true
"#;

    #[test]
    fn lookup_preserves_order_and_rejects_unknown_ids() {
        let config = Config::parse(SAMPLE).unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();

        let listed: Vec<&str> = registry.list().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(listed, vec!["ionos", "ollama"]);

        let (spec, _) = registry.get("ollama").unwrap();
        assert!(!spec.requires_credential);

        let err = registry.get("mystery").err().unwrap();
        assert_eq!(err.kind(), "unknown-provider");
    }

    #[test]
    fn list_is_idempotent() {
        let config = Config::parse(SAMPLE).unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();
        let first: Vec<String> = registry.list().iter().map(|s| s.id.clone()).collect();
        let second: Vec<String> = registry.list().iter().map(|s| s.id.clone()).collect();
        assert_eq!(first, second);
    }
}
