use crate::error::{BridgeError, Result};
use crate::gc::circuit::{self, Circuit};
use crate::gc::{ClientKeyT, ContextT};
use crate::he::{HeClient, HeValue};
use crate::util;
use itertools::{izip, Itertools};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use std::time::Instant;
use tracing::debug;

/// Parameters of the ReLU circuit for one batch, all value vectors in row-major
/// `{batch_size, element_count}` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReluInputs {
    pub num_vals: usize,
    pub input_mask: Vec<u64>,
    pub zeros: Vec<u64>,
    pub output_mask: Vec<u64>,
    pub bit_length: u32,
    pub modulus: u64,
}

impl ReluInputs {
    pub fn validate(&self) -> Result<()> {
        validate_bit_length(self.bit_length, self.modulus)?;
        if self.num_vals == 0 {
            return Err(BridgeError::Protocol("circuit needs at least one value".to_string()));
        }
        for (name, values) in [
            ("input mask", &self.input_mask),
            ("zeros", &self.zeros),
            ("output mask", &self.output_mask),
        ] {
            if values.len() != self.num_vals {
                return Err(BridgeError::Protocol(format!(
                    "{} has {} values, expected {}",
                    name,
                    values.len(),
                    self.num_vals
                )));
            }
            if values.iter().any(|&value| value >= self.modulus) {
                return Err(BridgeError::Protocol(format!(
                    "{} value not below modulus {}",
                    name, self.modulus
                )));
            }
        }
        Ok(())
    }
}

/// Words must hold the sum of two residues
pub fn validate_bit_length(bit_length: u32, modulus: u64) -> Result<()> {
    let needed = util::bit_width(modulus) + 1;
    if bit_length < needed || bit_length > 64 {
        return Err(BridgeError::Config(format!(
            "bit length {} outside [{}, 64] for modulus {}",
            bit_length, needed, modulus
        )));
    }
    Ok(())
}

/// Session with the party holding the HE secret key.
pub trait SecureEvaluator<C> {
    fn build_relu_circuit(&mut self, inputs: ReluInputs) -> Result<()>;

    /// Runs the protocol over the masked `batch` to completion, replacing every element with the
    /// encryption of its output masked circuit result.
    fn exec_circuit(&mut self, batch: &mut [HeValue<C>], complex_packing: bool) -> Result<()>;

    /// Drops the circuit and all inputs so the session can be reused
    fn reset(&mut self);
}

#[derive(Debug)]
struct PendingCircuit {
    circuit: Circuit,
    bit_length: usize,
    /// Input mask, zero and output mask per value
    server_values: Vec<[u64; 3]>,
}

/// Both parties of the protocol in one process. The client side decrypts the masked elements and
/// re-encrypts the circuit outputs, the server side evaluates the circuit under `context`.
#[derive(Debug)]
pub struct LocalParty<HC, CK, Ctx> {
    he_client: HC,
    client_key: CK,
    context: Ctx,
    pending: Option<PendingCircuit>,
}

impl<HC, CK, Ctx> LocalParty<HC, CK, Ctx> {
    pub fn new(he_client: HC, client_key: CK, context: Ctx) -> Self {
        Self {
            he_client,
            client_key,
            context,
            pending: None,
        }
    }

    pub fn he_client(&self) -> &HC {
        &self.he_client
    }

    /// No circuit built or left over from a previous execution
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }
}

impl<HC, CK, Ctx> LocalParty<HC, CK, Ctx>
where
    CK: ClientKeyT<Bit = Ctx::Bit>,
    Ctx: ContextT,
{
    fn evaluate_value(&self, pending: &PendingCircuit, share: u64, server: &[u64; 3]) -> Result<u64> {
        let width = pending.bit_length;
        let client_bits = util::u64_to_bits(share, width)
            .map(|bit| self.client_key.encrypt(bit))
            .collect_vec();
        let server_bits = server
            .iter()
            .flat_map(|&value| util::u64_to_bits(value, width))
            .map(|bit| self.context.trivial(bit))
            .collect_vec();

        let output = pending
            .circuit
            .evaluate(&self.context, &client_bits, &server_bits)?;

        Ok(util::bits_to_u64(
            output.iter().map(|bit| self.client_key.decrypt(bit)),
        ))
    }
}

impl<C, HC, CK, Ctx> SecureEvaluator<C> for LocalParty<HC, CK, Ctx>
where
    C: Send + Sync,
    HC: HeClient<C>,
    CK: ClientKeyT<Bit = Ctx::Bit>,
    Ctx: ContextT,
{
    fn build_relu_circuit(&mut self, inputs: ReluInputs) -> Result<()> {
        inputs.validate()?;
        let circuit = circuit::relu_circuit(inputs.bit_length as usize, inputs.modulus);
        debug!(
            num_vals = inputs.num_vals,
            gates = circuit.gate_count(),
            and_gates = circuit.and_count(),
            "relu circuit built"
        );
        let server_values = izip!(&inputs.input_mask, &inputs.zeros, &inputs.output_mask)
            .map(|(&input_mask, &zero, &output_mask)| [input_mask, zero, output_mask])
            .collect();
        self.pending = Some(PendingCircuit {
            circuit,
            bit_length: inputs.bit_length as usize,
            server_values,
        });
        Ok(())
    }

    fn exec_circuit(&mut self, batch: &mut [HeValue<C>], complex_packing: bool) -> Result<()> {
        let this = &*self;
        let pending = this
            .pending
            .as_ref()
            .ok_or_else(|| BridgeError::Protocol("no circuit built".to_string()))?;
        let start = Instant::now();

        // client side: masked shares
        let shares: Vec<Vec<u64>> = batch
            .par_iter()
            .enumerate()
            .map(|(index, value)| {
                let ct = value
                    .ciphertext()
                    .ok_or(BridgeError::NotCiphertext { index })?;
                this.he_client.decrypt_residues(ct)
            })
            .collect::<Result<_>>()?;
        if !shares.iter().map(Vec::len).all_equal() {
            return Err(BridgeError::Protocol(
                "elements decrypt to different batch sizes".to_string(),
            ));
        }
        let shares = util::flatten_batch(&shares);
        if shares.len() != pending.server_values.len() {
            return Err(BridgeError::Protocol(format!(
                "batch holds {} values, circuit built for {}",
                shares.len(),
                pending.server_values.len()
            )));
        }

        let outputs: Vec<u64> = shares
            .par_iter()
            .zip(pending.server_values.par_iter())
            .map(|(&share, server)| this.evaluate_value(pending, share, server))
            .collect::<Result<_>>()?;
        debug!("circuit executed over {} values {:?}", outputs.len(), start.elapsed());

        // client side: results back into the ciphertext domain
        let outputs = util::scatter_batch(&outputs, batch.len());
        let cts: Vec<C> = outputs
            .par_iter()
            .map(|residues| this.he_client.encrypt_residues(residues, complex_packing))
            .collect::<Result<_>>()?;
        for (value, ct) in batch.iter_mut().zip(cts) {
            *value = HeValue::Ciphertext(ct);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}
