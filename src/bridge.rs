//! Server side of the HE to boolean circuit bridge.
//!
//! An invocation runs in three phases. [`ServerExecutor::prepare`] switches every element to the
//! lowest modulus and subtracts a fresh random input mask, so the key holder only ever decrypts
//! masked values. [`ServerExecutor::run`] has the circuit add the input mask back, apply the
//! function and add an output mask before the result is encrypted again.
//! [`ServerExecutor::post_process`] removes the output mask homomorphically.
//!
//! The phases can be interleaved with other ciphertext operations, but an [`Invocation`] holds the
//! tensor exclusively from `prepare` until `post_process`. Masks live in the invocation and are
//! dropped with it.

use crate::error::{BridgeError, Result};
use crate::function::SecureFunction;
use crate::gc::session::{self, ReluInputs, SecureEvaluator};
use crate::he::{self, HeBackend, HeTensor};
use crate::mask::{MaskGenerator, MaskTensor};
use itertools::Itertools;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Absolute tolerance between element scales of one batch
pub const SCALE_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Input mask subtracted, circuit not yet run
    Masked,
    /// Circuit run, elements hold output masked results
    Evaluated,
    Complete,
    /// A phase failed after it may have mutated the tensor. Terminal.
    Failed,
}

/// Where the output mask is removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmaskLevel {
    /// Switch to the lowest modulus, then subtract modulo the lowest modulus
    #[default]
    Lowest,
    /// Subtract at the current level of the ciphertext, then switch
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Width of the circuit words
    pub bit_length: u32,
    pub unmask_level: UnmaskLevel,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bit_length: 32,
            unmask_level: UnmaskLevel::default(),
        }
    }
}

/// Exclusive lease on a tensor for one secure function call
#[derive(Debug)]
pub struct Invocation<'a, C> {
    function: SecureFunction,
    tensor: &'a mut HeTensor<C>,
    input_mask: MaskTensor,
    output_mask: MaskTensor,
    stage: Stage,
}

impl<'a, C> Invocation<'a, C> {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn tensor(&self) -> &HeTensor<C> {
        &*self.tensor
    }

    pub fn input_mask(&self) -> &MaskTensor {
        &self.input_mask
    }

    pub fn output_mask(&self) -> &MaskTensor {
        &self.output_mask
    }

    fn expect_stage(&self, expected: Stage) -> Result<()> {
        if self.stage != expected {
            return Err(BridgeError::Stage {
                expected,
                found: self.stage,
            });
        }
        Ok(())
    }

    /// Moves to `next` on success. Any error poisons the invocation, a retry would apply masks
    /// twice to elements already processed.
    fn advance(&mut self, result: Result<()>, next: Stage) -> Result<()> {
        match result {
            Ok(()) => {
                self.stage = next;
                Ok(())
            }
            Err(err) => {
                self.stage = Stage::Failed;
                Err(err)
            }
        }
    }

    fn expect_function(&self, function: SecureFunction) -> Result<()> {
        if self.function != function {
            return Err(BridgeError::Protocol(format!(
                "invocation prepared for {}, called with {}",
                self.function, function
            )));
        }
        Ok(())
    }
}

pub struct ServerExecutor<B, S> {
    backend: B,
    evaluator: S,
    masks: MaskGenerator,
    config: BridgeConfig,
    lowest_modulus: u64,
}

impl<B, S> ServerExecutor<B, S>
where
    B: HeBackend,
    S: SecureEvaluator<B::Ciphertext>,
{
    /// Masks are drawn from `rng`. Pass a seeded generator for reproducible runs.
    pub fn new(backend: B, evaluator: S, rng: ChaCha20Rng, config: BridgeConfig) -> Result<Self> {
        let lowest_modulus = backend.lowest_modulus();
        he::validate_lowest_modulus(lowest_modulus)?;
        session::validate_bit_length(config.bit_length, lowest_modulus)?;
        let masks = MaskGenerator::new(lowest_modulus, rng)?;
        Ok(Self {
            backend,
            evaluator,
            masks,
            config,
            lowest_modulus,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn evaluator(&self) -> &S {
        &self.evaluator
    }

    fn half_modulus(&self) -> u64 {
        self.lowest_modulus / 2
    }

    /// Uniform over `[0, q)`, or all zero when the backend disables input masking
    pub fn generate_gc_input_mask(&mut self, tensor: &HeTensor<B::Ciphertext>) -> Result<MaskTensor> {
        self.masks.generate_mask(
            "input_mask",
            tensor.shape(),
            tensor.packing(),
            self.backend.mask_gc_inputs(),
            0,
        )
    }

    /// Uniform over `[0, q)`, or all `q / 2` when the backend disables output masking. The circuit
    /// subtracts `q / 2` again so an unmasked output is the plain result.
    pub fn generate_gc_output_mask(
        &mut self,
        tensor: &HeTensor<B::Ciphertext>,
    ) -> Result<MaskTensor> {
        let half = self.half_modulus();
        self.masks.generate_mask(
            "output_mask",
            tensor.shape(),
            tensor.packing(),
            self.backend.mask_gc_outputs(),
            half,
        )
    }

    /// Checks every element is a ciphertext with the batch's slot count and the scale of the first
    /// element. Nothing is mutated.
    fn validate_batch(&self, tensor: &HeTensor<B::Ciphertext>) -> Result<()> {
        let batch_size = tensor.batch_size();
        let mut expected = None;
        for (index, value) in tensor.data().iter().enumerate() {
            let ct = value
                .ciphertext()
                .ok_or(BridgeError::NotCiphertext { index })?;

            let slots = self.backend.slot_count(ct);
            if slots != batch_size {
                return Err(BridgeError::InvalidBatch(format!(
                    "element {} has {} slots, batch size is {}",
                    index, slots, batch_size
                )));
            }

            let scale = self.backend.ciphertext_scale(ct);
            match expected {
                None => expected = Some(scale),
                Some(expected) if (scale - expected).abs() > SCALE_TOLERANCE => {
                    return Err(BridgeError::ScaleMismatch {
                        index,
                        expected,
                        found: scale,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Switches every element to the lowest modulus and subtracts its input mask, scaled to the
    /// element's encoding.
    pub fn mask_input_relu(
        &self,
        tensor: &mut HeTensor<B::Ciphertext>,
        input_mask: &MaskTensor,
    ) -> Result<()> {
        self.validate_batch(tensor)?;
        let complex_packing = tensor.packing().complex_packing;

        for (index, value) in tensor.data_mut().iter_mut().enumerate() {
            let ct = value
                .ciphertext_mut()
                .ok_or(BridgeError::NotCiphertext { index })?;
            self.backend.mod_switch_to_lowest(ct);
            let scale = self.backend.ciphertext_scale(ct);
            let scaled = input_mask
                .element(index)
                .iter()
                .map(|&mask| mask as f64 / scale)
                .collect_vec();
            self.backend.scalar_subtract(ct, &scaled, complex_packing)?;
        }
        debug!(
            elements = tensor.element_count(),
            batch_size = tensor.batch_size(),
            "inputs masked"
        );
        Ok(())
    }

    /// Builds the ReLU circuit for the batch and runs it. The session is reset whether or not the
    /// run succeeds.
    pub fn run_relu(
        &mut self,
        tensor: &mut HeTensor<B::Ciphertext>,
        input_mask: &MaskTensor,
        output_mask: &MaskTensor,
    ) -> Result<()> {
        let num_vals = tensor.batch_size() * tensor.element_count();
        let inputs = ReluInputs {
            num_vals,
            input_mask: input_mask.read(),
            zeros: vec![0; num_vals],
            output_mask: output_mask.read(),
            bit_length: self.config.bit_length,
            modulus: self.lowest_modulus,
        };

        let start = Instant::now();
        let complex_packing = tensor.packing().complex_packing;
        let result = self
            .evaluator
            .build_relu_circuit(inputs)
            .and_then(|()| {
                self.evaluator
                    .exec_circuit(tensor.data_mut(), complex_packing)
            });
        self.evaluator.reset();
        result?;

        debug!(num_vals, "relu evaluated {:?}", start.elapsed());
        Ok(())
    }

    /// Subtracts `(output_mask - q / 2) / scale` from every element. No-op when the backend
    /// disables output masking.
    pub fn unmask_relu_output(
        &self,
        tensor: &mut HeTensor<B::Ciphertext>,
        output_mask: &MaskTensor,
    ) -> Result<()> {
        if !self.backend.mask_gc_outputs() {
            return Ok(());
        }
        let half = self.half_modulus() as i128;
        let scale = self.backend.scale();
        let complex_packing = tensor.packing().complex_packing;

        for (index, value) in tensor.data_mut().iter_mut().enumerate() {
            let ct = value
                .ciphertext_mut()
                .ok_or(BridgeError::NotCiphertext { index })?;
            let adjusted = output_mask
                .element(index)
                .iter()
                .map(|&mask| (mask as i128 - half) as f64 / scale)
                .collect_vec();

            match self.config.unmask_level {
                UnmaskLevel::Lowest => {
                    self.backend.mod_switch_to_lowest(ct);
                    self.backend.scalar_subtract(ct, &adjusted, complex_packing)?;
                }
                UnmaskLevel::Current => {
                    self.backend.scalar_subtract(ct, &adjusted, complex_packing)?;
                    self.backend.mod_switch_to_lowest(ct);
                }
            }
        }
        debug!(elements = tensor.element_count(), "outputs unmasked");
        Ok(())
    }

    /// Masks `tensor` for the function named by `descriptor`. On error the tensor is untouched
    /// unless the backend itself failed mid-batch.
    pub fn prepare<'a>(
        &mut self,
        descriptor: &str,
        tensor: &'a mut HeTensor<B::Ciphertext>,
    ) -> Result<Invocation<'a, B::Ciphertext>> {
        let function = SecureFunction::from_descriptor(descriptor)?;
        match function {
            SecureFunction::Relu => {
                let input_mask = self.generate_gc_input_mask(tensor)?;
                self.mask_input_relu(tensor, &input_mask)?;
                let output_mask = self.generate_gc_output_mask(tensor)?;
                info!(%function, shape = ?tensor.shape(), "prepared");
                Ok(Invocation {
                    function,
                    tensor,
                    input_mask,
                    output_mask,
                    stage: Stage::Masked,
                })
            }
        }
    }

    pub fn run(
        &mut self,
        descriptor: &str,
        invocation: &mut Invocation<'_, B::Ciphertext>,
    ) -> Result<()> {
        let function = SecureFunction::from_descriptor(descriptor)?;
        invocation.expect_function(function)?;
        invocation.expect_stage(Stage::Masked)?;
        let result = match function {
            SecureFunction::Relu => self.run_relu(
                invocation.tensor,
                &invocation.input_mask,
                &invocation.output_mask,
            ),
        };
        invocation.advance(result, Stage::Evaluated)
    }

    pub fn post_process(
        &mut self,
        descriptor: &str,
        invocation: &mut Invocation<'_, B::Ciphertext>,
    ) -> Result<()> {
        let function = SecureFunction::from_descriptor(descriptor)?;
        invocation.expect_function(function)?;
        invocation.expect_stage(Stage::Evaluated)?;
        let result = match function {
            SecureFunction::Relu => {
                self.unmask_relu_output(invocation.tensor, &invocation.output_mask)
            }
        };
        invocation.advance(result, Stage::Complete)?;
        info!(%function, "post processed");
        Ok(())
    }

    /// All three phases back to back
    pub fn evaluate(&mut self, descriptor: &str, tensor: &mut HeTensor<B::Ciphertext>) -> Result<()> {
        let mut invocation = self.prepare(descriptor, tensor)?;
        self.run(descriptor, &mut invocation)?;
        self.post_process(descriptor, &mut invocation)
    }
}
