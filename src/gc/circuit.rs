//! Boolean circuits as topologically ordered gate lists.
//!
//! [`CircuitBuilder`] folds constants and hashes structurally identical gates, so public values
//! (the modulus, the zero point) cost no gates. Integer words are little endian and all integer
//! gadgets are modular in `2^width`.

use crate::error::{BridgeError, Result};
use crate::gc::ContextT;
use crate::util;
use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Party {
    /// Holds the masks
    Server,
    /// Holds the masked shares
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wire(u32);

impl Wire {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    /// Input bit number `n` of the party
    Input(Party, u32),
    Const(bool),
    Xor(Wire, Wire),
    And(Wire, Wire),
    Not(Wire),
    Mux {
        select: Wire,
        when_true: Wire,
        when_false: Wire,
    },
}

/// Little endian integer word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word(Vec<Wire>);

impl Word {
    pub fn width(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone)]
pub struct Circuit {
    gates: Vec<Gate>,
    client_inputs: usize,
    server_inputs: usize,
    outputs: Vec<Wire>,
}

impl Circuit {
    pub fn client_input_count(&self) -> usize {
        self.client_inputs
    }

    pub fn server_input_count(&self) -> usize {
        self.server_inputs
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Number of gates that need evaluation, i.e. excluding inputs and constants
    pub fn gate_count(&self) -> usize {
        self.gates
            .iter()
            .filter(|gate| !matches!(gate, Gate::Input(..) | Gate::Const(_)))
            .count()
    }

    pub fn and_count(&self) -> usize {
        self.gates
            .iter()
            .filter(|gate| matches!(gate, Gate::And(..) | Gate::Mux { .. }))
            .count()
    }

    pub fn evaluate<Ctx: ContextT>(
        &self,
        context: &Ctx,
        client: &[Ctx::Bit],
        server: &[Ctx::Bit],
    ) -> Result<Vec<Ctx::Bit>> {
        if client.len() != self.client_inputs || server.len() != self.server_inputs {
            return Err(BridgeError::Protocol(format!(
                "circuit expects {} client and {} server input bits, got {} and {}",
                self.client_inputs,
                self.server_inputs,
                client.len(),
                server.len()
            )));
        }

        let mut values: Vec<Ctx::Bit> = Vec::with_capacity(self.gates.len());
        for gate in &self.gates {
            let value = match *gate {
                Gate::Input(Party::Client, n) => client[n as usize].clone(),
                Gate::Input(Party::Server, n) => server[n as usize].clone(),
                Gate::Const(bit) => context.trivial(bit),
                Gate::Xor(lhs, rhs) => context.xor(&values[lhs.index()], &values[rhs.index()]),
                Gate::And(lhs, rhs) => context.and(&values[lhs.index()], &values[rhs.index()]),
                Gate::Not(wire) => context.not(&values[wire.index()]),
                Gate::Mux {
                    select,
                    when_true,
                    when_false,
                } => context.mux(
                    &values[select.index()],
                    &values[when_true.index()],
                    &values[when_false.index()],
                ),
            };
            values.push(value);
        }

        Ok(self
            .outputs
            .iter()
            .map(|wire| values[wire.index()].clone())
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct CircuitBuilder {
    gates: Vec<Gate>,
    cache: HashMap<Gate, Wire>,
    client_inputs: u32,
    server_inputs: u32,
    outputs: Vec<Wire>,
}

impl CircuitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, gate: Gate) -> Wire {
        if let Some(&wire) = self.cache.get(&gate) {
            return wire;
        }
        let wire = Wire(self.gates.len() as u32);
        self.gates.push(gate);
        self.cache.insert(gate, wire);
        wire
    }

    fn constant_value(&self, wire: Wire) -> Option<bool> {
        match self.gates[wire.index()] {
            Gate::Const(bit) => Some(bit),
            _ => None,
        }
    }

    pub fn constant(&mut self, bit: bool) -> Wire {
        self.push(Gate::Const(bit))
    }

    pub fn input(&mut self, party: Party) -> Wire {
        let counter = match party {
            Party::Server => &mut self.server_inputs,
            Party::Client => &mut self.client_inputs,
        };
        let n = *counter;
        *counter += 1;
        self.push(Gate::Input(party, n))
    }

    pub fn xor(&mut self, lhs: Wire, rhs: Wire) -> Wire {
        if lhs == rhs {
            return self.constant(false);
        }
        match (self.constant_value(lhs), self.constant_value(rhs)) {
            (Some(a), Some(b)) => self.constant(a ^ b),
            (Some(false), None) => rhs,
            (None, Some(false)) => lhs,
            (Some(true), None) => self.not(rhs),
            (None, Some(true)) => self.not(lhs),
            (None, None) => self.push(Gate::Xor(lhs.min(rhs), lhs.max(rhs))),
        }
    }

    pub fn and(&mut self, lhs: Wire, rhs: Wire) -> Wire {
        if lhs == rhs {
            return lhs;
        }
        match (self.constant_value(lhs), self.constant_value(rhs)) {
            (Some(a), Some(b)) => self.constant(a & b),
            (Some(false), None) | (None, Some(false)) => self.constant(false),
            (Some(true), None) => rhs,
            (None, Some(true)) => lhs,
            (None, None) => self.push(Gate::And(lhs.min(rhs), lhs.max(rhs))),
        }
    }

    pub fn or(&mut self, lhs: Wire, rhs: Wire) -> Wire {
        let xor = self.xor(lhs, rhs);
        let and = self.and(lhs, rhs);
        self.xor(xor, and)
    }

    pub fn not(&mut self, wire: Wire) -> Wire {
        match self.gates[wire.index()] {
            Gate::Const(bit) => self.constant(!bit),
            Gate::Not(inner) => inner,
            _ => self.push(Gate::Not(wire)),
        }
    }

    pub fn mux(&mut self, select: Wire, when_true: Wire, when_false: Wire) -> Wire {
        if when_true == when_false {
            return when_true;
        }
        if let Some(select) = self.constant_value(select) {
            return if select { when_true } else { when_false };
        }
        match (
            self.constant_value(when_true),
            self.constant_value(when_false),
        ) {
            (Some(true), Some(false)) => select,
            (Some(false), Some(true)) => self.not(select),
            (Some(false), None) => {
                let not_select = self.not(select);
                self.and(not_select, when_false)
            }
            (None, Some(false)) => self.and(select, when_true),
            _ => self.push(Gate::Mux {
                select,
                when_true,
                when_false,
            }),
        }
    }

    pub fn input_word(&mut self, party: Party, width: usize) -> Word {
        Word((0..width).map(|_| self.input(party)).collect())
    }

    pub fn constant_word(&mut self, value: u64, width: usize) -> Word {
        Word(
            util::u64_to_bits(value, width)
                .map(|bit| self.constant(bit))
                .collect(),
        )
    }

    /// Returns `(sum, carry)`
    fn full_adder(&mut self, a: Wire, b: Wire, carry: Wire) -> (Wire, Wire) {
        let a_xor_c = self.xor(a, carry);
        let b_xor_c = self.xor(b, carry);
        let sum = self.xor(a_xor_c, b);
        let and = self.and(a_xor_c, b_xor_c);
        let carry = self.xor(and, carry);
        (sum, carry)
    }

    /// `lhs + rhs mod 2^width`
    pub fn add(&mut self, lhs: &Word, rhs: &Word) -> Word {
        debug_assert_eq!(lhs.width(), rhs.width());
        let mut carry = self.constant(false);
        let mut sum = Vec::with_capacity(lhs.width());
        for (&a, &b) in lhs.0.iter().zip(&rhs.0) {
            let (s, c) = self.full_adder(a, b, carry);
            sum.push(s);
            carry = c;
        }
        Word(sum)
    }

    /// Returns `(lhs - rhs mod 2^width, lhs < rhs)`
    pub fn sub(&mut self, lhs: &Word, rhs: &Word) -> (Word, Wire) {
        debug_assert_eq!(lhs.width(), rhs.width());
        let mut carry = self.constant(true);
        let mut difference = Vec::with_capacity(lhs.width());
        for (&a, &b) in lhs.0.iter().zip(&rhs.0) {
            let not_b = self.not(b);
            let (s, c) = self.full_adder(a, not_b, carry);
            difference.push(s);
            carry = c;
        }
        let borrow = self.not(carry);
        (Word(difference), borrow)
    }

    /// `lhs < rhs`, computing only the borrow chain of `lhs - rhs`
    pub fn less_than(&mut self, lhs: &Word, rhs: &Word) -> Wire {
        debug_assert_eq!(lhs.width(), rhs.width());
        let mut carry = self.constant(true);
        for (&a, &b) in lhs.0.iter().zip(&rhs.0) {
            let not_b = self.not(b);
            let a_xor_c = self.xor(a, carry);
            let b_xor_c = self.xor(not_b, carry);
            let and = self.and(a_xor_c, b_xor_c);
            carry = self.xor(and, carry);
        }
        self.not(carry)
    }

    pub fn greater_than(&mut self, lhs: &Word, rhs: &Word) -> Wire {
        self.less_than(rhs, lhs)
    }

    pub fn mux_word(&mut self, select: Wire, when_true: &Word, when_false: &Word) -> Word {
        debug_assert_eq!(when_true.width(), when_false.width());
        Word(
            when_true
                .0
                .iter()
                .zip(&when_false.0)
                .map(|(&t, &f)| self.mux(select, t, f))
                .collect(),
        )
    }

    /// `value mod modulus` for `value < 2 * modulus`
    pub fn mod_reduce(&mut self, value: &Word, modulus: &Word) -> Word {
        let (reduced, borrow) = self.sub(value, modulus);
        self.mux_word(borrow, value, &reduced)
    }

    pub fn output(&mut self, wire: Wire) {
        self.outputs.push(wire);
    }

    pub fn output_word(&mut self, word: &Word) {
        self.outputs.extend_from_slice(&word.0);
    }

    pub fn build(self) -> Circuit {
        Circuit {
            gates: self.gates,
            client_inputs: self.client_inputs as usize,
            server_inputs: self.server_inputs as usize,
            outputs: self.outputs,
        }
    }
}

/// Circuit computing the output masked ReLU of one value. All words are `bit_length` wide and
/// hold residues modulo `modulus`, with `h = modulus / 2` as the zero point of the signed range.
///
/// Client input: the masked share. Server inputs, in order: input mask, zero, output mask.
/// Output: `(relu(share + input_mask) + output_mask - h) mod modulus`.
pub fn relu_circuit(bit_length: usize, modulus: u64) -> Circuit {
    let half = modulus / 2;
    let mut builder = CircuitBuilder::new();

    let share = builder.input_word(Party::Client, bit_length);
    let input_mask = builder.input_word(Party::Server, bit_length);
    let zero = builder.input_word(Party::Server, bit_length);
    let output_mask = builder.input_word(Party::Server, bit_length);

    let modulus_word = builder.constant_word(modulus, bit_length);
    let half_word = builder.constant_word(half, bit_length);
    let unbias_word = builder.constant_word(modulus - half, bit_length);

    let sum = builder.add(&share, &input_mask);
    let value = builder.mod_reduce(&sum, &modulus_word);
    let negative = builder.greater_than(&value, &half_word);
    let relu = builder.mux_word(negative, &zero, &value);

    let masked = builder.add(&relu, &output_mask);
    let masked = builder.mod_reduce(&masked, &modulus_word);
    let unbiased = builder.add(&masked, &unbias_word);
    let output = builder.mod_reduce(&unbiased, &modulus_word);

    builder.output_word(&output);
    builder.build()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gc::plain::PlainContext;
    use itertools::Itertools;

    const WIDTH: usize = 6;

    fn eval_binary(circuit: &Circuit, a: u64, b: u64) -> Vec<bool> {
        let client = util::u64_to_bits(a, WIDTH).collect_vec();
        let server = util::u64_to_bits(b, WIDTH).collect_vec();
        circuit.evaluate(&PlainContext, &client, &server).unwrap()
    }

    fn binary_circuit(op: impl FnOnce(&mut CircuitBuilder, &Word, &Word)) -> Circuit {
        let mut builder = CircuitBuilder::new();
        let a = builder.input_word(Party::Client, WIDTH);
        let b = builder.input_word(Party::Server, WIDTH);
        op(&mut builder, &a, &b);
        builder.build()
    }

    #[test]
    fn test_add_sub() {
        let add = binary_circuit(|builder, a, b| {
            let sum = builder.add(a, b);
            builder.output_word(&sum);
        });
        let sub = binary_circuit(|builder, a, b| {
            let (difference, borrow) = builder.sub(a, b);
            builder.output_word(&difference);
            builder.output(borrow);
        });

        for (a, b) in (0..64).cartesian_product(0..64) {
            let sum = util::bits_to_u64(eval_binary(&add, a, b));
            assert_eq!(sum, (a + b) % 64, "{a} + {b}");

            let out = eval_binary(&sub, a, b);
            let difference = util::bits_to_u64(out[..WIDTH].iter().copied());
            assert_eq!(difference, a.wrapping_sub(b) % 64, "{a} - {b}");
            assert_eq!(out[WIDTH], a < b, "borrow {a} - {b}");
        }
    }

    #[test]
    fn test_comparisons() {
        let circuit = binary_circuit(|builder, a, b| {
            let lt = builder.less_than(a, b);
            let gt = builder.greater_than(a, b);
            builder.output(lt);
            builder.output(gt);
        });

        for (a, b) in (0..64).cartesian_product(0..64) {
            let out = eval_binary(&circuit, a, b);
            assert_eq!(out, [a < b, a > b], "{a} vs {b}");
        }
    }

    #[test]
    fn test_mod_reduce() {
        let modulus = 29;
        let circuit = binary_circuit(|builder, a, _b| {
            let modulus = builder.constant_word(modulus, WIDTH);
            let reduced = builder.mod_reduce(a, &modulus);
            builder.output_word(&reduced);
        });

        for a in 0..2 * modulus {
            let reduced = util::bits_to_u64(eval_binary(&circuit, a, 0));
            assert_eq!(reduced, a % modulus, "{a} mod {modulus}");
        }
    }

    #[test]
    fn test_constant_folding() {
        let mut builder = CircuitBuilder::new();
        let a = builder.input(Party::Client);
        let b = builder.input(Party::Server);
        let zero = builder.constant(false);
        let one = builder.constant(true);

        assert_eq!(builder.xor(a, zero), a);
        assert_eq!(builder.and(a, one), a);
        assert_eq!(builder.and(a, zero), zero);
        assert_eq!(builder.mux(one, a, b), a);
        assert_eq!(builder.mux(a, one, zero), a);
        let not_a = builder.xor(a, one);
        assert_eq!(builder.not(not_a), a);
        assert_eq!(builder.xor(a, a), zero);

        let circuit = builder.build();
        // only the inverter survives
        assert_eq!(circuit.gate_count(), 1);
    }

    #[test]
    fn test_structural_hashing() {
        let mut builder = CircuitBuilder::new();
        let a = builder.input(Party::Client);
        let b = builder.input(Party::Server);
        let first = builder.xor(a, b);
        assert_eq!(builder.xor(b, a), first);
        let first = builder.and(a, b);
        assert_eq!(builder.and(b, a), first);
        assert_eq!(builder.build().gate_count(), 2);
    }

    #[test]
    fn test_input_length_checked() {
        let circuit = relu_circuit(5, 13);
        assert_eq!(circuit.client_input_count(), 5);
        assert_eq!(circuit.server_input_count(), 15);
        assert_eq!(circuit.output_count(), 5);
        assert!(circuit
            .evaluate(&PlainContext, &[false; 4], &[false; 15])
            .is_err());
    }

    #[test]
    fn test_relu_circuit_exhaustive() {
        let modulus = 13;
        let half = modulus / 2;
        let width = 5;
        let circuit = relu_circuit(width, modulus);

        for ((share, input_mask), output_mask) in (0..modulus)
            .cartesian_product(0..modulus)
            .cartesian_product(0..modulus)
        {
            let client = util::u64_to_bits(share, width).collect_vec();
            let server = [input_mask, 0, output_mask]
                .into_iter()
                .flat_map(|value| util::u64_to_bits(value, width))
                .collect_vec();
            let output = util::bits_to_u64(
                circuit
                    .evaluate(&PlainContext, &client, &server)
                    .unwrap(),
            );

            let value = (share + input_mask) % modulus;
            let relu = if value > half { 0 } else { value };
            let expected = (relu + output_mask + modulus - half) % modulus;
            assert_eq!(
                output, expected,
                "share {share} input mask {input_mask} output mask {output_mask}"
            );
        }
    }

    #[test]
    fn test_relu_circuit_unmasked_output() {
        let modulus = 2_147_483_647;
        let width = 32;
        let circuit = relu_circuit(width, modulus);
        let half = modulus / 2;

        for value in [0, 1, 12345, half, half + 1, modulus - 1] {
            let client = util::u64_to_bits(value, width).collect_vec();
            let server = [0, 0, half]
                .into_iter()
                .flat_map(|v| util::u64_to_bits(v, width))
                .collect_vec();
            let output = util::bits_to_u64(
                circuit
                    .evaluate(&PlainContext, &client, &server)
                    .unwrap(),
            );
            let expected = if value > half { 0 } else { value };
            assert_eq!(output, expected, "value {value}");
        }
    }
}
