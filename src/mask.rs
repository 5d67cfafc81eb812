//! One-time pad masks hiding values while they cross from the HE domain into the boolean circuit.

use crate::error::{BridgeError, Result};
use crate::he::{batch_layout, Packing};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::trace;

/// Integer tensor of shape `{batch_size, element_count}` matching an
/// [`HeTensor`](crate::he::HeTensor): one entry per element, each holding `batch_size` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskTensor {
    shape: [usize; 2],
    elements: Vec<Vec<u64>>,
}

impl MaskTensor {
    /// `[batch_size, element_count]`
    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    pub fn batch_size(&self) -> usize {
        self.shape[0]
    }

    pub fn element_count(&self) -> usize {
        self.shape[1]
    }

    /// Batch values of element `index`
    pub fn element(&self, index: usize) -> &[u64] {
        &self.elements[index]
    }

    /// All values in row-major `{batch_size, element_count}` order
    pub fn read(&self) -> Vec<u64> {
        crate::util::flatten_batch(&self.elements)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.elements.iter().flatten().copied()
    }
}

/// Source of masks drawn from `[0, modulus)`. The generator is seeded once at construction and
/// never reseeded, callers needing reproducible masks construct it with [`MaskGenerator::from_seed`].
#[derive(Debug, Clone)]
pub struct MaskGenerator {
    modulus: u64,
    rng: ChaCha20Rng,
}

impl MaskGenerator {
    pub fn new(modulus: u64, rng: ChaCha20Rng) -> Result<Self> {
        if modulus == 0 {
            return Err(BridgeError::Config("mask modulus must be positive".to_string()));
        }
        Ok(Self { modulus, rng })
    }

    pub fn from_seed(modulus: u64, seed: u64) -> Result<Self> {
        Self::new(modulus, ChaCha20Rng::seed_from_u64(seed))
    }

    /// Mask for a tensor of the given shape and packing. Either fills every value uniformly from
    /// `[0, modulus)` or sets every value to `default_value`.
    pub fn generate_mask(
        &mut self,
        name: &'static str,
        shape: &[usize],
        packing: Packing,
        random: bool,
        default_value: u64,
    ) -> Result<MaskTensor> {
        let (batch_size, element_count) = batch_layout(shape, packing.plaintext_packing)?;
        let elements = (0..element_count)
            .map(|_| {
                (0..batch_size)
                    .map(|_| {
                        if random {
                            self.rng.random_range(0..self.modulus)
                        } else {
                            default_value
                        }
                    })
                    .collect()
            })
            .collect();
        trace!(name, batch_size, element_count, random, "generated mask");
        Ok(MaskTensor {
            shape: [batch_size, element_count],
            elements,
        })
    }
}
