//! Interface to the additively homomorphic backend and the tensor container the bridge operates on.

use crate::error::{BridgeError, Result};
use std::fmt::Debug;

/// Reference RNS backend used by tests and the binary
pub mod rns;

/// Exclusive bound on the lowest modulus. Masks reach [`HeBackend::scalar_subtract`] as `f64`
/// values divided by a scale and are rounded back on encoding, which is exact only well inside
/// the 53 bit mantissa.
pub const MAX_LOWEST_MODULUS: u64 = 1 << 50;

/// Fails unless masks drawn below `modulus` survive the `f64` plaintext path
pub fn validate_lowest_modulus(modulus: u64) -> Result<()> {
    if modulus < 3 || modulus >= MAX_LOWEST_MODULUS {
        return Err(BridgeError::Config(format!(
            "lowest modulus {} outside [3, 2^50)",
            modulus
        )));
    }
    Ok(())
}

/// Server side view of the homomorphic backend.
pub trait HeBackend {
    type Ciphertext: Clone + Debug + Send + Sync;

    /// Smallest modulus in the modulus chain, fixed for the backend lifetime
    fn lowest_modulus(&self) -> u64;

    /// Switch the ciphertext down to the lowest modulus. Idempotent.
    fn mod_switch_to_lowest(&self, ct: &mut Self::Ciphertext);

    /// Homomorphically subtract `values` (one per slot), encoded at the ciphertext scale
    fn scalar_subtract(
        &self,
        ct: &mut Self::Ciphertext,
        values: &[f64],
        complex_packing: bool,
    ) -> Result<()>;

    /// Number of plaintext slots the ciphertext packs
    fn slot_count(&self, ct: &Self::Ciphertext) -> usize;

    /// Encoding scale of the given ciphertext
    fn ciphertext_scale(&self, ct: &Self::Ciphertext) -> f64;

    /// Current global encoding scale
    fn scale(&self) -> f64;

    fn mask_gc_inputs(&self) -> bool;

    fn mask_gc_outputs(&self) -> bool;
}

/// Hooks of the party holding the secret key. The circuit session uses them to turn masked
/// ciphertexts into circuit inputs and circuit outputs back into ciphertexts.
pub trait HeClient<C>: Send + Sync {
    /// Decrypt to unsigned residues modulo the lowest modulus, one per slot
    fn decrypt_residues(&self, ct: &C) -> Result<Vec<u64>>;

    /// Encrypt residues modulo the lowest modulus at the global scale
    fn encrypt_residues(&self, residues: &[u64], complex_packing: bool) -> Result<C>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Packing {
    /// Slots of one element hold the batch dimension
    pub plaintext_packing: bool,
    /// Real and imaginary parts packed into one slot
    pub complex_packing: bool,
}

#[derive(Debug, Clone)]
pub enum HeValue<C> {
    Plaintext(Vec<f64>),
    Ciphertext(C),
}

impl<C> HeValue<C> {
    pub fn is_ciphertext(&self) -> bool {
        matches!(self, HeValue::Ciphertext(_))
    }

    pub fn ciphertext(&self) -> Option<&C> {
        match self {
            HeValue::Ciphertext(ct) => Some(ct),
            HeValue::Plaintext(_) => None,
        }
    }

    pub fn ciphertext_mut(&mut self) -> Option<&mut C> {
        match self {
            HeValue::Ciphertext(ct) => Some(ct),
            HeValue::Plaintext(_) => None,
        }
    }
}

/// Shaped collection of HE elements. With plaintext packing the first dimension of the shape is
/// the batch dimension and is packed into the slots of each element.
#[derive(Debug, Clone)]
pub struct HeTensor<C> {
    shape: Vec<usize>,
    packing: Packing,
    data: Vec<HeValue<C>>,
}

impl<C> HeTensor<C> {
    pub fn new(shape: Vec<usize>, packing: Packing, data: Vec<HeValue<C>>) -> Result<Self> {
        let (batch_size, element_count) = batch_layout(&shape, packing.plaintext_packing)?;
        if data.len() != element_count {
            return Err(BridgeError::InvalidBatch(format!(
                "shape {:?} (batch size {}) needs {} elements, got {}",
                shape,
                batch_size,
                element_count,
                data.len()
            )));
        }
        Ok(Self {
            shape,
            packing,
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn packing(&self) -> Packing {
        self.packing
    }

    pub fn batch_size(&self) -> usize {
        if self.packing.plaintext_packing {
            self.shape[0]
        } else {
            1
        }
    }

    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[HeValue<C>] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [HeValue<C>] {
        &mut self.data
    }
}

/// Returns `(batch_size, element_count)` for a shape
pub fn batch_layout(shape: &[usize], plaintext_packing: bool) -> Result<(usize, usize)> {
    let total: usize = shape.iter().product();
    if shape.is_empty() || total == 0 {
        return Err(BridgeError::InvalidBatch(format!(
            "degenerate shape {:?}",
            shape
        )));
    }
    if plaintext_packing {
        Ok((shape[0], total / shape[0]))
    } else {
        Ok((1, total))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_batch_layout() {
        assert_eq!(batch_layout(&[4, 3], true).unwrap(), (4, 3));
        assert_eq!(batch_layout(&[4, 3], false).unwrap(), (1, 12));
        assert_eq!(batch_layout(&[2, 3, 5], true).unwrap(), (2, 15));
        assert!(batch_layout(&[4, 0], true).is_err());
        assert!(batch_layout(&[], false).is_err());
    }

    #[test]
    fn test_tensor_element_count_checked() {
        let data: Vec<HeValue<()>> = vec![HeValue::Plaintext(vec![0.0; 4]); 3];
        let packing = Packing {
            plaintext_packing: true,
            complex_packing: false,
        };
        let tensor = HeTensor::new(vec![4, 3], packing, data.clone()).unwrap();
        assert_eq!(tensor.batch_size(), 4);
        assert_eq!(tensor.element_count(), 3);
        assert!(!tensor.data()[0].is_ciphertext());

        assert!(HeTensor::new(vec![4, 2], packing, data).is_err());
    }
}
