use std::path::PathBuf;
use thiserror::Error;

/// HTTP-like status the detection service uses for an exhausted usage allowance.
pub const QUOTA_EXHAUSTED_STATUS: u16 = 402;

const GENERIC_TRANSPORT_MESSAGE: &str = "Network error, please check the connection and retry";

#[derive(Error, Debug)]
pub enum MarkwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Detection error: {0}")]
    Detect(#[from] DetectError),
}

/// Errors raised while talking to the remote detection service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl DetectError {
    /// Classifies a non-success status reported by the service.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == QUOTA_EXHAUSTED_STATUS {
            DetectError::QuotaExhausted(message)
        } else {
            DetectError::Service { status, message }
        }
    }

    /// Returns true if the error is transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DetectError::Transport(_))
    }

    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, DetectError::QuotaExhausted(_))
    }

    /// Text suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            DetectError::Transport(_) => GENERIC_TRANSPORT_MESSAGE.to_string(),
            DetectError::Service { message, status } => {
                if message.trim().is_empty() {
                    format!("Detection failed (status {})", status)
                } else {
                    message.clone()
                }
            }
            DetectError::QuotaExhausted(message) => {
                if message.trim().is_empty() {
                    "Your detection quota is used up".to_string()
                } else {
                    message.clone()
                }
            }
            DetectError::MalformedResponse(message) => {
                format!("Unexpected response from the detection service: {}", message)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store lock was poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

pub type Result<T> = std::result::Result<T, MarkwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_402_maps_to_quota_exhausted() {
        let err = DetectError::from_status(402, "quota used up (20/20)");
        assert!(err.is_quota_exhausted());
        assert!(!err.is_retryable());
        assert_eq!(err.user_message(), "quota used up (20/20)");
    }

    #[test]
    fn test_other_status_is_service_error() {
        let err = DetectError::from_status(500, "boom");
        assert_eq!(
            err,
            DetectError::Service {
                status: 500,
                message: "boom".to_string()
            }
        );
        assert!(!err.is_quota_exhausted());
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(DetectError::Transport("timeout".into()).is_retryable());
        assert!(!DetectError::MalformedResponse("no id".into()).is_retryable());
    }

    #[test]
    fn test_user_message_fallbacks() {
        let err = DetectError::Transport("connection reset".into());
        assert_eq!(err.user_message(), GENERIC_TRANSPORT_MESSAGE);

        let err = DetectError::Service {
            status: 503,
            message: "  ".into(),
        };
        assert_eq!(err.user_message(), "Detection failed (status 503)");
    }
}
