use thiserror::Error;

/// Errors that can occur during Namae core operations.
#[derive(Debug, Error)]
pub enum NamaeError {
    /// Invalid configuration or a model/vocabulary mismatch. Always fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// A malformed sequence, record or tag symbol. Carries enough context
    /// to locate the offending input. Recoverable only in lenient mode.
    #[error("data error: {message}{}", .location.as_ref().map(|l| format!(" ({l})")).unwrap_or_default())]
    Data {
        /// What was wrong with the input.
        message: String,
        /// Where it was found (file line, sentence index).
        location: Option<String>,
    },

    /// NaN or overflow inside the forward/Viterbi lattice. This must never
    /// happen with log-sum-exp stabilization; if it does, the run aborts.
    #[error("numeric invariant violated: {0}")]
    Numeric(String),

    /// A checkpoint artifact that cannot be read, parsed or trusted.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NamaeError {
    /// Shorthand for a data error without location context.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
            location: None,
        }
    }

    /// Shorthand for a data error with location context.
    pub fn data_at(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
            location: Some(location.into()),
        }
    }
}

/// Result type alias for Namae operations.
pub type Result<T> = std::result::Result<T, NamaeError>;
