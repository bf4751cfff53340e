//! Error taxonomy for micropipe.

use thiserror::Error;

/// Errors raised by the engine and by stage handlers.
///
/// `Config` errors are programmer errors surfaced synchronously at
/// construction time. Everything else is recovered at item level: a handler
/// error drops the item into the lost-value ledger and the stage keeps going.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid pipeline or stage configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A handler reported a failure for a single item.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The other side of a flow channel went away.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// An HTTP call failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broken engine invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = PipelineError::Config("batch size of 1".into());
        assert_eq!(err.to_string(), "configuration error: batch size of 1");
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> PipelineResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }

        let err = open().unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
