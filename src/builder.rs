use anyhow::{Result, bail};

use crate::circuit::{Circuit, Gate, GateOp, IoArg, ValueType, WireId};

/// Incremental construction of a circuit in canonical wire order
///
/// Inputs are declared first (party 0, then party 1), the two constant
/// wires follow, and every gate allocates the next free wire for its
/// output. `build` appends free copy gates so the declared outputs occupy
/// the tail of the wire space.
#[derive(Debug)]
pub struct CircuitBuilder {
    party0_inputs: Vec<IoArg>,
    party1_inputs: Vec<IoArg>,
    outputs: Vec<IoArg>,
    output_wires: Vec<WireId>,
    gates: Vec<Gate>,
    next_wire: WireId,
    const_wires: Option<(WireId, WireId)>,
}

impl CircuitBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        CircuitBuilder {
            party0_inputs: Vec::new(),
            party1_inputs: Vec::new(),
            outputs: Vec::new(),
            output_wires: Vec::new(),
            gates: Vec::new(),
            next_wire: 0,
            const_wires: None,
        }
    }

    /// Declare an input argument for a party and return its wires, LSB first
    ///
    /// Panics if called after the first gate or constant has been created,
    /// because the input region of the wire space is closed by then.
    pub fn add_input(&mut self, party: u8, name: &str, ty: ValueType, bits: u32) -> Vec<WireId> {
        assert!(
            self.const_wires.is_none() && self.gates.is_empty(),
            "inputs must be declared before gates"
        );
        assert!(party < 2, "party must be 0 or 1");
        assert!(bits > 0 && (ty != ValueType::Bool || bits == 1));
        // party-1 wires sit after all party-0 wires
        if party == 0 {
            assert!(
                self.party1_inputs.is_empty(),
                "party 0 inputs must be declared before party 1 inputs"
            );
        }
        let arg = IoArg { name: name.to_string(), ty, bits };
        if party == 0 {
            self.party0_inputs.push(arg);
        } else {
            self.party1_inputs.push(arg);
        }
        let first = self.next_wire;
        self.next_wire += bits;
        (first..first + bits).collect()
    }

    fn freeze_inputs(&mut self) -> (WireId, WireId) {
        match self.const_wires {
            Some(pair) => pair,
            None => {
                let zero = self.next_wire;
                let one = self.next_wire + 1;
                self.next_wire += 2;
                self.const_wires = Some((zero, one));
                (zero, one)
            }
        }
    }

    /// Wire carrying constant 0
    pub fn const_zero(&mut self) -> WireId {
        self.freeze_inputs().0
    }

    /// Wire carrying constant 1
    pub fn const_one(&mut self) -> WireId {
        self.freeze_inputs().1
    }

    fn push_gate(&mut self, op: GateOp, in0: WireId, in1: WireId) -> WireId {
        self.freeze_inputs();
        let out = self.next_wire;
        self.next_wire += 1;
        self.gates.push(Gate { op, in0, in1, out });
        out
    }

    /// a XOR b
    pub fn xor(&mut self, a: WireId, b: WireId) -> WireId {
        self.push_gate(GateOp::Xor, a, b)
    }

    /// NOT (a XOR b)
    pub fn xnor(&mut self, a: WireId, b: WireId) -> WireId {
        self.push_gate(GateOp::Xnor, a, b)
    }

    /// a AND b
    pub fn and(&mut self, a: WireId, b: WireId) -> WireId {
        self.push_gate(GateOp::And, a, b)
    }

    /// a OR b
    pub fn or(&mut self, a: WireId, b: WireId) -> WireId {
        self.push_gate(GateOp::Or, a, b)
    }

    /// NOT a
    pub fn inv(&mut self, a: WireId) -> WireId {
        self.push_gate(GateOp::Inv, a, 0)
    }

    /// Declare an output argument over existing wires, LSB first
    pub fn set_output(&mut self, name: &str, ty: ValueType, wires: &[WireId]) {
        assert!(!wires.is_empty() && (ty != ValueType::Bool || wires.len() == 1));
        self.outputs.push(IoArg {
            name: name.to_string(),
            ty,
            bits: wires.len() as u32,
        });
        self.output_wires.extend_from_slice(wires);
    }

    /// Finish the circuit
    ///
    /// Copies every declared output onto a fresh tail wire through a free
    /// XOR with constant 0, so the last wires are the outputs in canonical
    /// order regardless of construction order.
    pub fn build(mut self) -> Result<Circuit> {
        if self.outputs.is_empty() {
            bail!("circuit has no outputs");
        }
        self.freeze_inputs();
        let zero = self.const_wires.expect("constants frozen above").0;
        for i in 0..self.output_wires.len() {
            let wire = self.output_wires[i];
            self.push_gate(GateOp::Xor, wire, zero);
        }
        let circuit = Circuit {
            num_wires: self.next_wire,
            party0_inputs: self.party0_inputs,
            party1_inputs: self.party1_inputs,
            outputs: self.outputs,
            has_constants: true,
            xnor_free: true,
            gates: self.gates,
        };
        circuit.verify()?;
        Ok(circuit)
    }

    // Word-level combinators. All words are LSB first.

    fn full_add(&mut self, a: WireId, b: WireId, carry: WireId) -> (WireId, WireId) {
        let axb = self.xor(a, b);
        let sum = self.xor(axb, carry);
        let t0 = self.and(a, b);
        let t1 = self.and(carry, axb);
        let carry_out = self.or(t0, t1);
        (sum, carry_out)
    }

    /// Ripple-carry addition, returning the sum word and the carry-out bit
    pub fn add_words(&mut self, a: &[WireId], b: &[WireId]) -> (Vec<WireId>, WireId) {
        assert_eq!(a.len(), b.len());
        let mut carry = self.const_zero();
        let mut sum = Vec::with_capacity(a.len());
        for (&ai, &bi) in a.iter().zip(b) {
            let (s, c) = self.full_add(ai, bi, carry);
            sum.push(s);
            carry = c;
        }
        (sum, carry)
    }

    /// Wrapping subtraction `a - b` via addition of the complement with
    /// carry-in 1
    pub fn sub_words(&mut self, a: &[WireId], b: &[WireId]) -> Vec<WireId> {
        assert_eq!(a.len(), b.len());
        let mut carry = self.const_one();
        let mut diff = Vec::with_capacity(a.len());
        for (&ai, &bi) in a.iter().zip(b) {
            let nb = self.inv(bi);
            let (s, c) = self.full_add(ai, nb, carry);
            diff.push(s);
            carry = c;
        }
        diff
    }

    /// Unsigned `a > b`
    pub fn gt_unsigned(&mut self, a: &[WireId], b: &[WireId]) -> WireId {
        assert_eq!(a.len(), b.len());
        assert!(!a.is_empty());
        let mut result = self.const_zero();
        for (&ai, &bi) in a.iter().zip(b) {
            // from LSB to MSB: gt = (a_i AND NOT b_i) OR (eq_i AND gt_so_far)
            let nb = self.inv(bi);
            let gt_here = self.and(ai, nb);
            let eq_here = self.xnor(ai, bi);
            let keep = self.and(eq_here, result);
            result = self.or(gt_here, keep);
        }
        result
    }

    /// Two's-complement signed `a > b`, by biasing the sign bits into
    /// unsigned order
    pub fn gt_signed(&mut self, a: &[WireId], b: &[WireId]) -> WireId {
        assert_eq!(a.len(), b.len());
        assert!(!a.is_empty());
        let msb = a.len() - 1;
        let mut a_biased = a.to_vec();
        let mut b_biased = b.to_vec();
        a_biased[msb] = self.inv(a[msb]);
        b_biased[msb] = self.inv(b[msb]);
        self.gt_unsigned(&a_biased, &b_biased)
    }

    /// Bitwise select: `sel ? a : b`
    pub fn mux_words(&mut self, sel: WireId, a: &[WireId], b: &[WireId]) -> Vec<WireId> {
        assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b)
            .map(|(&ai, &bi)| {
                let diff = self.xor(ai, bi);
                let gated = self.and(sel, diff);
                self.xor(bi, gated)
            })
            .collect()
    }

    /// Signed maximum of two words
    pub fn max_signed(&mut self, a: &[WireId], b: &[WireId]) -> Vec<WireId> {
        let sel = self.gt_signed(a, b);
        self.mux_words(sel, a, b)
    }

    /// Shift-and-add multiplier keeping the low `a.len()` product bits
    pub fn mul_words(&mut self, a: &[WireId], b: &[WireId]) -> Vec<WireId> {
        assert_eq!(a.len(), b.len());
        let n = a.len();
        // accumulator starts as a AND b_0
        let mut acc: Vec<WireId> = a.iter().map(|&ai| self.and(ai, b[0])).collect();
        for j in 1..n {
            // partial product of the surviving low bits, shifted by j
            let partial: Vec<WireId> = a[..n - j].iter().map(|&ai| self.and(ai, b[j])).collect();
            let mut carry = self.const_zero();
            for (k, &p) in partial.iter().enumerate() {
                let (s, c) = self.full_add(acc[j + k], p, carry);
                acc[j + k] = s;
                carry = c;
            }
        }
        acc
    }
}

impl Default for CircuitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Yao's millionaires circuit: signed `a > b` over the given width
pub fn millionaires(bits: u32) -> Result<Circuit> {
    let mut builder = CircuitBuilder::new();
    let a = builder.add_input(0, "a", ValueType::Int, bits);
    let b = builder.add_input(1, "b", ValueType::Int, bits);
    let gt = builder.gt_signed(&a, &b);
    builder.set_output("richer", ValueType::Bool, &[gt]);
    builder.build()
}

/// Signed maximum of two words
pub fn max(bits: u32) -> Result<Circuit> {
    let mut builder = CircuitBuilder::new();
    let a = builder.add_input(0, "a", ValueType::Int, bits);
    let b = builder.add_input(1, "b", ValueType::Int, bits);
    let out = builder.max_signed(&a, &b);
    builder.set_output("max", ValueType::Int, &out);
    builder.build()
}

/// Wrapping unsigned addition of two words
pub fn adder(bits: u32) -> Result<Circuit> {
    let mut builder = CircuitBuilder::new();
    let a = builder.add_input(0, "a", ValueType::Uint, bits);
    let b = builder.add_input(1, "b", ValueType::Uint, bits);
    let (sum, _carry) = builder.add_words(&a, &b);
    builder.set_output("sum", ValueType::Uint, &sum);
    builder.build()
}

/// Wrapping unsigned subtraction of two words
pub fn subtractor(bits: u32) -> Result<Circuit> {
    let mut builder = CircuitBuilder::new();
    let a = builder.add_input(0, "a", ValueType::Uint, bits);
    let b = builder.add_input(1, "b", ValueType::Uint, bits);
    let diff = builder.sub_words(&a, &b);
    builder.set_output("diff", ValueType::Uint, &diff);
    builder.build()
}

/// Unsigned multiplication keeping the low word of the product
pub fn multiplier(bits: u32) -> Result<Circuit> {
    let mut builder = CircuitBuilder::new();
    let a = builder.add_input(0, "a", ValueType::Uint, bits);
    let b = builder.add_input(1, "b", ValueType::Uint, bits);
    let product = builder.mul_words(&a, &b);
    builder.set_output("product", ValueType::Uint, &product);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::encode_values;

    fn eval_u(circuit: &Circuit, a: i128, b: i128) -> Vec<bool> {
        let p0 = encode_values(&circuit.party0_inputs, &[a]).unwrap();
        let p1 = encode_values(&circuit.party1_inputs, &[b]).unwrap();
        circuit.eval_plain(&p0, &p1).unwrap()
    }

    fn bits_to_u64(bits: &[bool]) -> u64 {
        bits.iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << i))
    }

    #[test]
    fn test_adder_exhaustive_4bit() {
        let circuit = adder(4).unwrap();
        for a in 0..16 {
            for b in 0..16 {
                let out = eval_u(&circuit, a, b);
                assert_eq!(bits_to_u64(&out), ((a + b) & 0xF) as u64, "{} + {}", a, b);
            }
        }
    }

    #[test]
    fn test_subtractor_exhaustive_4bit() {
        let circuit = subtractor(4).unwrap();
        for a in 0..16i128 {
            for b in 0..16i128 {
                let out = eval_u(&circuit, a, b);
                assert_eq!(
                    bits_to_u64(&out),
                    ((a - b) & 0xF) as u64,
                    "{} - {}", a, b
                );
            }
        }
    }

    #[test]
    fn test_multiplier_exhaustive_4bit() {
        let circuit = multiplier(4).unwrap();
        for a in 0..16 {
            for b in 0..16 {
                let out = eval_u(&circuit, a, b);
                assert_eq!(bits_to_u64(&out), ((a * b) & 0xF) as u64, "{} * {}", a, b);
            }
        }
    }

    #[test]
    fn test_millionaires_signed_4bit() {
        let circuit = millionaires(4).unwrap();
        for a in -8..8 {
            for b in -8..8 {
                let out = eval_u(&circuit, a, b);
                assert_eq!(out, vec![a > b], "{} > {}", a, b);
            }
        }
    }

    #[test]
    fn test_max_signed_4bit() {
        let circuit = max(4).unwrap();
        for a in -8..8i128 {
            for b in -8..8i128 {
                let out = eval_u(&circuit, a, b);
                let decoded = crate::circuit::decode_values(&circuit.outputs, &out).unwrap();
                assert_eq!(decoded, vec![a.max(b)], "max({}, {})", a, b);
            }
        }
    }

    #[test]
    fn test_subtractor_64bit_values() {
        let circuit = subtractor(64).unwrap();
        let out = eval_u(&circuit, 0xFFFF, 0x0001);
        assert_eq!(bits_to_u64(&out), 0xFFFE);
    }

    #[test]
    fn test_multiplier_32bit_values() {
        let circuit = multiplier(32).unwrap();
        let out = eval_u(&circuit, 0xFFFF, 0x1111);
        assert_eq!(bits_to_u64(&out), 0x1110_EEEF);
    }

    #[test]
    fn test_outputs_occupy_tail_wires() {
        let circuit = max(4).unwrap();
        let tail: Vec<_> = circuit.output_wires().collect();
        assert_eq!(tail.len(), 4);
        assert_eq!(*tail.last().unwrap(), circuit.num_wires - 1);
    }
}
