//! Bridge between an additively homomorphic ciphertext domain and boolean circuit evaluation.
//! Ciphertext elements are masked, handed to a two-party boolean circuit evaluating ReLU, and the
//! output mask is removed again homomorphically.

pub mod bridge;
pub mod error;
pub mod function;
/// Boolean circuit IR and evaluation engines. The `tfhe` engine builds on `tfhe-rs` boolean keys.
pub mod gc;
pub mod he;
pub mod logger;
pub mod mask;
mod util;

pub use bridge::{BridgeConfig, Invocation, ServerExecutor, Stage, UnmaskLevel};
pub use error::{BridgeError, Result};
pub use function::SecureFunction;
