//! Boolean circuit side of the bridge. Circuits are described once as a gate list and evaluated
//! by an engine, either in the clear or over `tfhe` boolean ciphertexts.

/// Gate list representation, builder and integer gadgets
pub mod circuit;
/// Cleartext evaluation, reference for the encrypted engines
pub mod plain;
/// Two-party session driving circuit construction and execution
pub mod session;
/// Evaluation over `tfhe::boolean` ciphertexts
pub mod tfhe_boolean;

/// Key of the party supplying the masked share. Encrypts its input bits and decrypts the
/// (output masked) result bits.
pub trait ClientKeyT: Send + Sync {
    type Bit: Send + Sync;

    fn encrypt(&self, bit: bool) -> Self::Bit;

    fn decrypt(&self, bit: &Self::Bit) -> bool;
}

/// Evaluation context of the party holding the masks
pub trait ContextT: Send + Sync {
    type Bit: Clone + Send + Sync;

    /// Returns unencrypted ciphertext
    fn trivial(&self, bit: bool) -> Self::Bit;

    fn xor(&self, lhs: &Self::Bit, rhs: &Self::Bit) -> Self::Bit;

    fn and(&self, lhs: &Self::Bit, rhs: &Self::Bit) -> Self::Bit;

    fn not(&self, bit: &Self::Bit) -> Self::Bit;

    /// `select ? when_true : when_false`
    fn mux(&self, select: &Self::Bit, when_true: &Self::Bit, when_false: &Self::Bit) -> Self::Bit;
}
