//! Error types for discord-fleet

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the fleet collaborators.
///
/// None of these end a background loop: the loops log them and carry on with
/// the next tick. Only [`Error::Config`] surfaced at startup is fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report sink '{sink}' failed: {reason}")]
    Sink { sink: String, reason: String },

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Discord API error: {0}")]
    Discord(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn sink(sink: impl Into<String>, reason: impl ToString) -> Self {
        Self::Sink {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nats_error_display() {
        let err = Error::Nats("no responders".to_string());
        assert_eq!(err.to_string(), "NATS error: no responders");
    }

    #[test]
    fn test_sink_error_display() {
        let err = Error::sink("top.gg", "HTTP 401");
        assert_eq!(err.to_string(), "Report sink 'top.gg' failed: HTTP 401");
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::Config("cluster id 0 out of range".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: cluster id 0 out of range"
        );
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(err.to_string().starts_with("Store error:"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<u64>("not_a_number").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.to_string().starts_with("Serialization error:"));
    }
}
