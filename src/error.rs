use crate::bridge::Stage;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Every variant is terminal for the invocation that raised it. A tensor that
/// has already been masked cannot be rolled back, so callers restart from a
/// fresh, unmasked copy.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown function name {0:?}")]
    UnknownFunction(String),
    #[error("malformed function descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
    #[error("element {index} is not a ciphertext")]
    NotCiphertext { index: usize },
    #[error("scale {found} of element {index} does not match first scale {expected}")]
    ScaleMismatch {
        index: usize,
        expected: f64,
        found: f64,
    },
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("HE backend: {0}")]
    Backend(String),
    #[error("secure evaluation failed: {0}")]
    Protocol(String),
    #[error("invocation is {found:?}, expected {expected:?}")]
    Stage { expected: Stage, found: Stage },
}
