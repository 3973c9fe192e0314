//! Error types shared by the radar, the archive relay and the CLI.

use thiserror::Error;

/// Failure talking to the activity source.
///
/// `NotFound` means the caller should skip the entity; everything else is
/// either already retried (`Transient`) or a hard answer from the server.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("transient failure on {resource} after {attempts} attempts: {reason}")]
    Transient {
        resource: String,
        attempts: u32,
        reason: String,
    },

    #[error("unexpected status {status} from {resource}")]
    Status { resource: String, status: u16 },

    #[error("malformed response from {resource}: {reason}")]
    Malformed { resource: String, reason: String },
}

impl FetchError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn malformed(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum RadarError {
    #[error("config: {0}")]
    Config(String),

    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
}

impl RadarError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T, E = RadarError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        let transient = FetchError::Transient {
            resource: "repos/a/b".into(),
            attempts: 3,
            reason: "timeout".into(),
        };
        assert!(transient.is_retryable());
        assert!(!FetchError::not_found("repos/a/b").is_retryable());
        assert!(FetchError::not_found("repos/a/b").is_not_found());
        assert!(!FetchError::malformed("repos/a/b", "no body").is_retryable());
    }

    #[test]
    fn fetch_errors_convert_into_radar_errors() {
        let err: RadarError = FetchError::not_found("users/ghost").into();
        assert_eq!(err.to_string(), "fetch: not found: users/ghost");
    }
}
