use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to convert persisted error {guid}: {reason}")]
    Conversion { guid: Uuid, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl StoreError {
    /// Errors that mean "the backend is not reachable right now" rather than
    /// "this request is wrong". Only these are absorbed by the backup buffer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Timeout(_) | Self::IoError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::BackendUnavailable("down".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(StoreError::IoError("disk".into()).is_transient());
        assert!(!StoreError::Configuration("no type".into()).is_transient());
        assert!(
            !StoreError::Conversion {
                guid: Uuid::nil(),
                reason: "bad json".into()
            }
            .is_transient()
        );
    }
}
