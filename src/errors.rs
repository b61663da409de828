use thiserror::Error;

/// Main error type for the bandit agents.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid or missing construction parameter. Fix the inputs and reconstruct.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A supplied matrix or vector has the wrong shape.
    #[error("Dimension error: {what} expected {expected}, got {actual}")]
    Dimension {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Action/Update called out of turn, or the agent has used up its horizon.
    #[error("Sequence error: {0}")]
    Sequence(String),

    /// A reward passed to `update` was NaN or infinite.
    #[error("Invalid reward: {0} is not finite")]
    InvalidReward(f64),

    /// The confidence matrix could not be inverted.
    #[error("Singular matrix: confidence matrix ({dimension}x{dimension}) is not invertible")]
    SingularMatrix { dimension: usize },
}

// Convenience constructors for common error patterns
impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Create a dimension error
    pub fn dimension(what: &'static str, expected: usize, actual: usize) -> Self {
        Error::Dimension {
            what,
            expected,
            actual,
        }
    }

    /// Create a sequence error
    pub fn sequence(message: impl Into<String>) -> Self {
        Error::Sequence(message.into())
    }

    /// Whether the error was caused by the caller driving the agent incorrectly.
    ///
    /// These errors never touch agent state, so the caller can correct the
    /// call and continue with the same instance.
    pub fn is_caller_misuse(&self) -> bool {
        matches!(
            self,
            Error::Dimension { .. } | Error::Sequence(_) | Error::InvalidReward(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
