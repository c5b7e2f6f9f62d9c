//! Typed failures surfaced by the chat core.
//!
//! Every variant carries a stable kind tag so callers can decide
//! retry-vs-abort without parsing display strings.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("authentication failed for {provider}: {message}")]
    Authentication { provider: String, message: String },

    #[error("rate limited by {provider}")]
    RateLimit {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("network error talking to {provider}: {message}")]
    Network { provider: String, message: String },

    #[error("unexpected response from {provider}: {message}")]
    ProviderResponse { provider: String, message: String },

    #[error("unsupported file type: {}", path.display())]
    UnsupportedFileType { path: PathBuf },

    #[error("file too large: {} ({size_bytes} bytes, max {max_bytes})", path.display())]
    FileTooLarge {
        path: PathBuf,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("too many files in upload: {count} (max {max})")]
    TooManyFiles { count: usize, max: usize },

    #[error("context budget exceeded: need {required} of {budget} available")]
    BudgetExceeded { required: usize, budget: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Stable tag identifying the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::UnknownProvider(_) => "unknown-provider",
            ChatError::UnknownSession(_) => "unknown-session",
            ChatError::Authentication { .. } => "authentication",
            ChatError::RateLimit { .. } => "rate-limit",
            ChatError::Network { .. } => "network",
            ChatError::ProviderResponse { .. } => "provider-response",
            ChatError::UnsupportedFileType { .. } => "unsupported-file-type",
            ChatError::FileTooLarge { .. } => "file-too-large",
            ChatError::TooManyFiles { .. } => "too-many-files",
            ChatError::BudgetExceeded { .. } => "budget-exceeded",
            ChatError::Config(_) => "config",
            ChatError::Io(_) => "io",
        }
    }

    /// Whether the orchestrator may retry the operation after backing off.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatError::RateLimit { .. } | ChatError::Network { .. }
        )
    }

    /// Suggested delay before the next attempt, when the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ChatError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_exactly_rate_limit_and_network() {
        let transient = [
            ChatError::RateLimit {
                provider: "ionos".into(),
                retry_after: None,
            },
            ChatError::Network {
                provider: "ionos".into(),
                message: "timed out".into(),
            },
        ];
        for err in &transient {
            assert!(err.is_transient(), "{} should be transient", err.kind());
        }

        let fatal = [
            ChatError::Authentication {
                provider: "ionos".into(),
                message: "bad key".into(),
            },
            ChatError::ProviderResponse {
                provider: "ionos".into(),
                message: "no choices".into(),
            },
            ChatError::UnknownProvider("nope".into()),
        ];
        for err in &fatal {
            assert!(!err.is_transient(), "{} should be fatal", err.kind());
        }
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ChatError::UnknownSession("s".into()).kind(), "unknown-session");
        assert_eq!(
            ChatError::BudgetExceeded {
                required: 10,
                budget: 5
            }
            .kind(),
            "budget-exceeded"
        );
    }
}
