//! Configuration model for providers, personas, and file handling.
//!
//! The configuration is a TOML document read once at startup. The core
//! never re-reads or mutates it while serving turns.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{ChatError, ChatResult};

/// Adapter family a provider dispatches through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ionos,
    Openai,
    Anthropic,
    Google,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub context_window_tokens: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub display_name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_true")]
    pub requires_credential: bool,
    /// Environment variable the API key is read from. Defaults to
    /// `<ID>_API_KEY` with the id uppercased.
    #[serde(default)]
    pub credential_env: Option<String>,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

fn default_true() -> bool {
    true
}

impl ProviderSpec {
    pub fn credential_env_name(&self) -> String {
        self.credential_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_KEY", self.id.to_uppercase().replace('-', "_")))
    }

    /// Resolve the credential from the process environment. `None` when the
    /// provider declares it does not need one.
    pub fn resolve_credential(&self) -> Option<String> {
        if !self.requires_credential {
            return None;
        }
        std::env::var(self.credential_env_name()).ok()
    }

    pub fn find_model(&self, model_id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == model_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub display_name: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHandlingConfig {
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_files_per_upload")]
    pub max_files_per_upload: usize,
    #[serde(default = "default_max_text_size_mb")]
    pub max_text_size_mb: u64,
}

fn default_allowed_extensions() -> Vec<String> {
    [
        ".py", ".js", ".html", ".css", ".json", ".md", ".txt", ".csv", ".xml", ".yml", ".yaml",
        ".ini", ".cfg", ".conf", ".rs", ".toml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_max_files_per_upload() -> usize {
    100
}

fn default_max_text_size_mb() -> u64 {
    5
}

impl Default for FileHandlingConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            max_file_size_mb: default_max_file_size_mb(),
            max_files_per_upload: default_max_files_per_upload(),
            max_text_size_mb: default_max_text_size_mb(),
        }
    }
}

impl FileHandlingConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn max_text_size_bytes(&self) -> u64 {
        self.max_text_size_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub welcome_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
    #[serde(default)]
    pub personas: Vec<Persona>,
    /// Settings appended to every persona's system prompt.
    #[serde(default)]
    pub generic_settings: Option<String>,
    #[serde(default)]
    pub file_handling: FileHandlingConfig,
    #[serde(default)]
    pub ui: UiConfig,
    /// Character budget for assembled context. Adapters never see more.
    #[serde(default = "default_context_budget")]
    pub context_budget_chars: usize,
}

fn default_context_budget() -> usize {
    48_000
}

impl Config {
    pub fn load(path: &Path) -> ChatResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ChatResult<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| ChatError::Config(format!("invalid configuration: {e}")))?;
        for provider in &mut config.providers {
            provider.base_url = expand_env(&provider.base_url);
        }
        Ok(config)
    }

    /// Default configuration file location under the platform config dir.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "permacommons", "parley")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn find_provider(&self, provider_id: &str) -> Option<&ProviderSpec> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    pub fn find_persona(&self, persona_id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == persona_id)
    }

    /// Effective system prompt for a persona: its own prompt with the
    /// shared generic settings appended after a blank line.
    pub fn persona_system_prompt(&self, persona_id: &str) -> String {
        let base = self
            .find_persona(persona_id)
            .map(|p| p.system_prompt.clone())
            .unwrap_or_default();
        match self.generic_settings.as_deref() {
            Some(generic) if !generic.is_empty() => {
                if base.is_empty() {
                    generic.to_string()
                } else {
                    format!("{base}\n\n{generic}")
                }
            }
            _ => base,
        }
    }
}

/// Expand `${VAR}` placeholders from the process environment. Unset
/// variables expand to the empty string.
pub fn expand_env(value: &str) -> String {
    if !value.contains("${") {
        return value.to_string();
    }

    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                if let Ok(val) = std::env::var(name) {
                    result.push_str(&val);
                }
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}
