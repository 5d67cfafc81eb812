//! Additively homomorphic symmetric scheme over an RNS modulus chain.
//!
//! A value `x` is encoded as `m = round(x * scale)` and encrypted slot-wise as
//! `c_l = m + k_l mod q_l` for every limb `l` still present, where `k_l` is a ChaCha20 key stream
//! derived from the secret seed and a per-ciphertext nonce. Subtracting a plaintext works limb-wise,
//! and switching to the lowest modulus drops every limb but `q_0`. Decryption only needs limb 0.

use crate::error::{BridgeError, Result};
use crate::he::{self, HeBackend, HeClient};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RnsParams {
    /// Modulus chain, `moduli[0]` is the lowest modulus
    pub moduli: Vec<u64>,
    pub scale: f64,
    pub mask_gc_inputs: bool,
    pub mask_gc_outputs: bool,
}

impl Default for RnsParams {
    fn default() -> Self {
        Self {
            moduli: vec![2_147_483_647, 1_000_000_007, 998_244_353],
            scale: 65536.0,
            mask_gc_inputs: true,
            mask_gc_outputs: true,
        }
    }
}

impl RnsParams {
    pub fn validate(&self) -> Result<()> {
        if self.moduli.is_empty() {
            return Err(BridgeError::Config("empty modulus chain".to_string()));
        }
        for &q in &self.moduli {
            if q < 3 || q % 2 == 0 || q >= 1 << 62 {
                return Err(BridgeError::Config(format!(
                    "modulus {} must be odd and in [3, 2^62)",
                    q
                )));
            }
        }
        he::validate_lowest_modulus(self.lowest_modulus())?;
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(BridgeError::Config(format!(
                "scale {} must be positive and finite",
                self.scale
            )));
        }
        Ok(())
    }

    pub fn lowest_modulus(&self) -> u64 {
        self.moduli[0]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RnsCiphertext {
    /// One residue vector per limb still in the chain
    limbs: Vec<Vec<u64>>,
    nonce: u64,
    scale: f64,
    complex_packing: bool,
}

impl RnsCiphertext {
    pub fn slot_count(&self) -> usize {
        self.limbs[0].len()
    }

    /// Index of the top limb, 0 once switched to the lowest modulus
    pub fn level(&self) -> usize {
        self.limbs.len() - 1
    }
}

#[inline(always)]
fn mod_add(a: u64, b: u64, q: u64) -> u64 {
    ((a as u128 + b as u128) % q as u128) as u64
}

#[inline(always)]
fn mod_sub(a: u64, b: u64, q: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        q - b + a
    }
}

fn encode(value: f64, scale: f64, q: u64) -> Result<u64> {
    let scaled = (value * scale).round();
    if !scaled.is_finite() {
        return Err(BridgeError::Backend(format!(
            "cannot encode {} at scale {}",
            value, scale
        )));
    }
    Ok((scaled as i128).rem_euclid(q as i128) as u64)
}

fn decode(residue: u64, scale: f64, q: u64) -> f64 {
    let centered = if residue > q / 2 {
        residue as i128 - q as i128
    } else {
        residue as i128
    };
    centered as f64 / scale
}

/// Server side of the scheme, holds no key material
#[derive(Debug, Clone)]
pub struct RnsBackend {
    params: Arc<RnsParams>,
}

impl RnsBackend {
    pub fn new(params: Arc<RnsParams>) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }
}

impl HeBackend for RnsBackend {
    type Ciphertext = RnsCiphertext;

    fn lowest_modulus(&self) -> u64 {
        self.params.lowest_modulus()
    }

    fn mod_switch_to_lowest(&self, ct: &mut RnsCiphertext) {
        ct.limbs.truncate(1);
    }

    fn scalar_subtract(
        &self,
        ct: &mut RnsCiphertext,
        values: &[f64],
        complex_packing: bool,
    ) -> Result<()> {
        if ct.complex_packing != complex_packing {
            return Err(BridgeError::Backend(format!(
                "complex packing {} does not match ciphertext packing {}",
                complex_packing, ct.complex_packing
            )));
        }
        if values.len() != ct.slot_count() {
            return Err(BridgeError::Backend(format!(
                "{} values for ciphertext with {} slots",
                values.len(),
                ct.slot_count()
            )));
        }
        for (limb, &q) in ct.limbs.iter_mut().zip(&self.params.moduli) {
            for (c, &value) in limb.iter_mut().zip(values) {
                *c = mod_sub(*c, encode(value, ct.scale, q)?, q);
            }
        }
        Ok(())
    }

    fn slot_count(&self, ct: &RnsCiphertext) -> usize {
        ct.slot_count()
    }

    fn ciphertext_scale(&self, ct: &RnsCiphertext) -> f64 {
        ct.scale
    }

    fn scale(&self) -> f64 {
        self.params.scale
    }

    fn mask_gc_inputs(&self) -> bool {
        self.params.mask_gc_inputs
    }

    fn mask_gc_outputs(&self) -> bool {
        self.params.mask_gc_outputs
    }
}

/// Secret key of the scheme
pub struct RnsClientKey {
    params: Arc<RnsParams>,
    seed: [u8; 32],
    /// Counter for issuing nonces to fresh ciphertexts
    nonce: AtomicU64,
}

impl std::fmt::Debug for RnsClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RnsClientKey").finish()
    }
}

pub fn generate_keys<R: Rng>(
    params: RnsParams,
    rng: &mut R,
) -> Result<(RnsClientKey, RnsBackend)> {
    let params = Arc::new(params);
    let backend = RnsBackend::new(params.clone())?;
    let mut seed = [0u8; 32];
    rng.fill(&mut seed);
    let client_key = RnsClientKey {
        params,
        seed,
        nonce: AtomicU64::new(0),
    };
    Ok((client_key, backend))
}

impl RnsClientKey {
    pub fn params(&self) -> &RnsParams {
        &self.params
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }

    /// Key stream for the first `limbs` limbs. Limbs are drawn in chain order so a prefix is
    /// independent of how many limbs are requested.
    fn key_stream(&self, nonce: u64, limbs: usize, slots: usize) -> Vec<Vec<u64>> {
        let mut rng = ChaCha20Rng::from_seed(self.seed);
        rng.set_stream(nonce);
        self.params.moduli[..limbs]
            .iter()
            .map(|&q| (0..slots).map(|_| rng.random_range(0..q)).collect())
            .collect()
    }

    /// Encrypt at the top of the modulus chain and the global scale
    pub fn encrypt(&self, values: &[f64], complex_packing: bool) -> Result<RnsCiphertext> {
        self.encrypt_at_scale(values, self.params.scale, complex_packing)
    }

    pub fn encrypt_at_scale(
        &self,
        values: &[f64],
        scale: f64,
        complex_packing: bool,
    ) -> Result<RnsCiphertext> {
        if values.is_empty() {
            return Err(BridgeError::Backend("no values to encrypt".to_string()));
        }
        let nonce = self.next_nonce();
        let keys = self.key_stream(nonce, self.params.moduli.len(), values.len());
        let limbs = keys
            .iter()
            .zip(&self.params.moduli)
            .map(|(key, &q)| {
                values
                    .iter()
                    .zip(key)
                    .map(|(&value, &k)| Ok(mod_add(encode(value, scale, q)?, k, q)))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RnsCiphertext {
            limbs,
            nonce,
            scale,
            complex_packing,
        })
    }

    pub fn decrypt(&self, ct: &RnsCiphertext) -> Vec<f64> {
        let q = self.params.lowest_modulus();
        self.limb0_residues(ct)
            .into_iter()
            .map(|residue| decode(residue, ct.scale, q))
            .collect()
    }

    fn limb0_residues(&self, ct: &RnsCiphertext) -> Vec<u64> {
        let q = self.params.lowest_modulus();
        let key = self.key_stream(ct.nonce, 1, ct.slot_count());
        ct.limbs[0]
            .iter()
            .zip(&key[0])
            .map(|(&c, &k)| mod_sub(c, k, q))
            .collect()
    }
}

impl HeClient<RnsCiphertext> for RnsClientKey {
    fn decrypt_residues(&self, ct: &RnsCiphertext) -> Result<Vec<u64>> {
        Ok(self.limb0_residues(ct))
    }

    fn encrypt_residues(&self, residues: &[u64], complex_packing: bool) -> Result<RnsCiphertext> {
        let q = self.params.lowest_modulus();
        if residues.is_empty() {
            return Err(BridgeError::Backend("no residues to encrypt".to_string()));
        }
        if let Some(residue) = residues.iter().find(|&&r| r >= q) {
            return Err(BridgeError::Backend(format!(
                "residue {} not below lowest modulus {}",
                residue, q
            )));
        }
        let nonce = self.next_nonce();
        let key = self.key_stream(nonce, 1, residues.len());
        let limb = residues
            .iter()
            .zip(&key[0])
            .map(|(&r, &k)| mod_add(r, k, q))
            .collect();
        trace!(slots = residues.len(), "encrypted residues at lowest modulus");
        Ok(RnsCiphertext {
            limbs: vec![limb],
            nonce,
            scale: self.params.scale,
            complex_packing,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn keys(params: RnsParams) -> (RnsClientKey, RnsBackend) {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        generate_keys(params, &mut rng).unwrap()
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() < 1e-4, "slot {i}: {a} != {e}");
        }
    }

    #[test]
    fn test_encrypt_decrypt() {
        let (client_key, _backend) = keys(RnsParams::default());
        let values = [1.5, -2.25, 0.0, 1000.125, -0.5];
        let ct = client_key.encrypt(&values, false).unwrap();
        assert_eq!(ct.level(), 2);
        assert_close(&client_key.decrypt(&ct), &values);
    }

    #[test]
    fn test_ciphertexts_use_fresh_key_stream() {
        let (client_key, _backend) = keys(RnsParams::default());
        let ct1 = client_key.encrypt(&[3.0], false).unwrap();
        let ct2 = client_key.encrypt(&[3.0], false).unwrap();
        assert_ne!(ct1.limbs, ct2.limbs);
    }

    #[test]
    fn test_scalar_subtract() {
        let (client_key, backend) = keys(RnsParams::default());
        let mut ct = client_key.encrypt(&[1.5, -2.0, 4.0], false).unwrap();
        backend
            .scalar_subtract(&mut ct, &[0.5, 1.0, 8.0], false)
            .unwrap();
        assert_close(&client_key.decrypt(&ct), &[1.0, -3.0, -4.0]);
    }

    #[test]
    fn test_scalar_subtract_rejects_mismatch() {
        let (client_key, backend) = keys(RnsParams::default());
        let mut ct = client_key.encrypt(&[1.5, -2.0], false).unwrap();
        assert!(backend.scalar_subtract(&mut ct, &[0.5], false).is_err());
        assert!(backend.scalar_subtract(&mut ct, &[0.5, 1.0], true).is_err());
    }

    #[test]
    fn test_mod_switch_idempotent() {
        let (client_key, backend) = keys(RnsParams::default());
        let values = [7.25, -1.0];
        let mut once = client_key.encrypt(&values, false).unwrap();
        backend.mod_switch_to_lowest(&mut once);
        let mut twice = once.clone();
        backend.mod_switch_to_lowest(&mut twice);

        assert_eq!(once, twice);
        assert_eq!(once.level(), 0);
        assert_close(&client_key.decrypt(&once), &values);
    }

    #[test]
    fn test_subtract_after_mod_switch() {
        let (client_key, backend) = keys(RnsParams::default());
        let mut ct = client_key.encrypt(&[2.0], false).unwrap();
        backend.mod_switch_to_lowest(&mut ct);
        backend.scalar_subtract(&mut ct, &[5.0], false).unwrap();
        assert_close(&client_key.decrypt(&ct), &[-3.0]);
    }

    #[test]
    fn test_residues() {
        let (client_key, _backend) = keys(RnsParams::default());
        let q = client_key.params().lowest_modulus();

        let ct = client_key.encrypt(&[1.0, -1.0], false).unwrap();
        let residues = client_key.decrypt_residues(&ct).unwrap();
        assert_eq!(residues, vec![65536, q - 65536]);

        let ct = client_key.encrypt_residues(&[65536 * 3, q - 1], false).unwrap();
        assert_eq!(ct.level(), 0);
        assert_close(&client_key.decrypt(&ct), &[3.0, -1.0 / 65536.0]);

        assert!(client_key.encrypt_residues(&[q], false).is_err());
    }

    #[test]
    fn test_params_validation() {
        assert!(RnsParams::default().validate().is_ok());

        let mut params = RnsParams::default();
        params.moduli = vec![];
        assert!(params.validate().is_err());

        let mut params = RnsParams::default();
        params.moduli = vec![1024];
        assert!(params.validate().is_err());

        // lowest modulus must stay below 2^50, upper limbs may be larger
        let mut params = RnsParams::default();
        params.moduli = vec![(1 << 50) - 1, (1 << 61) - 1];
        assert!(params.validate().is_ok());
        params.moduli = vec![(1 << 61) - 1];
        assert!(matches!(params.validate(), Err(BridgeError::Config(_))));
        params.moduli = vec![(1 << 50) + 1];
        assert!(params.validate().is_err());

        let mut params = RnsParams::default();
        params.scale = 0.0;
        assert!(params.validate().is_err());
    }
}
