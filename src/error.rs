use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, FormerError>;

/// Errors raised while building or running transformer components.
///
/// Every variant is fatal for the call that produced it: the forward
/// computation either returns a complete tensor or fails before producing one.
#[derive(Debug, Error)]
pub enum FormerError {
    /// Invalid construction parameters (zero widths, bad dropout probability, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// A tensor did not have the shape an operation requires
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Zero-sized batch or sequence
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Sequence longer than the configured maximum
    #[error("sequence length {got} exceeds configured maximum {max}")]
    SequenceTooLong { got: usize, max: usize },

    /// Named weight absent from a weight store
    #[error("tensor '{0}' not found in weight store")]
    MissingTensor(String),

    #[error("backend error: {0}")]
    Backend(#[from] ndarray::ShapeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FormerError {
    pub(crate) fn shape(context: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        FormerError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}
