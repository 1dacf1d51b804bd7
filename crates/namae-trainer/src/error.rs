use thiserror::Error;

/// Errors raised while training or batching.
#[derive(Debug, Error)]
pub enum TrainError {
    /// An error from the CRF core (configuration, data, numeric, I/O).
    #[error(transparent)]
    Core(#[from] namae_core::NamaeError),

    /// Candle ML framework error (neural path).
    #[error("ML error: {0}")]
    Candle(#[from] candle_core::Error),

    /// The quasi-Newton optimizer failed to make progress.
    #[error("optimization error: {0}")]
    Optimizer(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for trainer operations.
pub type Result<T> = std::result::Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_pass_through() {
        let err: TrainError = namae_core::NamaeError::data("bad record").into();
        assert!(err.to_string().contains("bad record"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TrainError>();
    }
}
