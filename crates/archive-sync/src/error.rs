use std::time::Duration;

use thiserror::Error;

use archive_types::AUTH_ERROR_CODES;

/// Errors raised while synchronizing a team.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The platform asked us to slow down. Always retried, never surfaced
    /// past the rate-limited client unless the wait is cancelled.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The platform answered with `ok: false`.
    #[error("platform error: {0}")]
    Api(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("real-time connection error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed platform response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A single record could not be turned into a row. Callers log and skip it.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Revoked, invalid or inactive credential. Fatal for the team.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Api(code) if AUTH_ERROR_CODES.contains(&code.as_str()))
    }

    /// Errors that end the whole pass rather than one channel of it.
    pub fn aborts_pass(&self) -> bool {
        self.is_auth() || matches!(self, Self::Storage(_) | Self::Cancelled | Self::Join(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_classification() {
        assert!(SyncError::Api("invalid_auth".into()).is_auth());
        assert!(SyncError::Api("account_inactive".into()).is_auth());
        assert!(!SyncError::Api("channel_not_found".into()).is_auth());
        assert!(!SyncError::Cancelled.is_auth());
    }

    #[test]
    fn test_pass_aborting_errors() {
        assert!(SyncError::Storage(anyhow::anyhow!("disk full")).aborts_pass());
        assert!(SyncError::Api("token_revoked".into()).aborts_pass());
        assert!(SyncError::Cancelled.aborts_pass());
        assert!(!SyncError::Api("is_archived".into()).aborts_pass());
        assert!(!SyncError::InvalidRecord("no id".into()).aborts_pass());
    }

    #[test]
    fn test_rate_limit_display() {
        let err = SyncError::RateLimited { retry_after: Duration::from_secs(3) };
        assert!(err.is_rate_limit());
        assert_eq!(err.to_string(), "rate limited, retry after 3s");
    }
}
