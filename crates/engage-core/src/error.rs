use thiserror::Error;

/// Unified error type for the entire Engage agent.
#[derive(Error, Debug)]
pub enum EngageError {
    // ── Platform errors ────────────────────────────────────────
    #[error("platform error: {platform}: {reason}")]
    Platform { platform: String, reason: String },

    #[error("platform session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("operation not supported by {platform}: {operation}")]
    Unsupported { platform: String, operation: String },

    // ── Generator errors ───────────────────────────────────────
    #[error("response generator error: {0}")]
    Generator(String),

    #[error("response generator rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── Speech errors ──────────────────────────────────────────
    #[error("speech io error: {0}")]
    Speech(String),

    // ── Memory errors ──────────────────────────────────────────
    #[error("memory error: {0}")]
    Memory(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Execution errors ───────────────────────────────────────
    #[error("{operation} failed after {attempts} attempts: {reason}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        reason: String,
    },

    #[error("fatal: {0}")]
    Fatal(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngageError {
    /// Fatal errors stop the agent instead of being retried or skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngageError::Fatal(_) | EngageError::SessionUnavailable(_))
    }

    /// Whether trying the same call again could succeed.
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
            && !matches!(
                self,
                EngageError::Unsupported { .. }
                    | EngageError::Config(_)
                    | EngageError::ConfigValidation { .. }
            )
    }

    /// Server-suggested wait before the next attempt.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EngageError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Shorthand for a platform failure.
    pub fn platform(platform: impl Into<String>, reason: impl ToString) -> Self {
        EngageError::Platform {
            platform: platform.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngageError>;
