use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Wire identifier inside a circuit
pub type WireId = u32;

/// Magic bytes opening the serialized circuit format
pub const CIRCUIT_MAGIC: [u8; 4] = *b"TPC1";

/// Boolean gate operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateOp {
    /// XOR gate, linear (free under free-XOR)
    Xor,
    /// XNOR gate, linear (XOR plus a garbler-side offset)
    Xnor,
    /// AND gate, garbled into two ciphertext rows
    And,
    /// OR gate, garbled into two ciphertext rows
    Or,
    /// Inverter, linear, single input
    Inv,
}

impl GateOp {
    /// Whether the gate is evaluated by label XOR alone, with no ciphertext
    pub fn is_linear(&self) -> bool {
        matches!(self, GateOp::Xor | GateOp::Xnor | GateOp::Inv)
    }

    /// Number of input wires
    pub fn arity(&self) -> usize {
        match self {
            GateOp::Inv => 1,
            _ => 2,
        }
    }

    /// Wire-format op code
    pub fn code(&self) -> u8 {
        match self {
            GateOp::Xor => 0,
            GateOp::Xnor => 1,
            GateOp::And => 2,
            GateOp::Or => 3,
            GateOp::Inv => 4,
        }
    }

    /// Decode a wire-format op code
    pub fn from_code(code: u8) -> Result<GateOp> {
        Ok(match code {
            0 => GateOp::Xor,
            1 => GateOp::Xnor,
            2 => GateOp::And,
            3 => GateOp::Or,
            4 => GateOp::Inv,
            _ => bail!("unknown gate op code {}", code),
        })
    }

    /// Cleartext semantics of the gate
    pub fn apply(&self, a: bool, b: bool) -> bool {
        match self {
            GateOp::Xor => a ^ b,
            GateOp::Xnor => !(a ^ b),
            GateOp::And => a && b,
            GateOp::Or => a || b,
            GateOp::Inv => !a,
        }
    }
}

impl std::fmt::Display for GateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GateOp::Xor => "XOR",
            GateOp::Xnor => "XNOR",
            GateOp::And => "AND",
            GateOp::Or => "OR",
            GateOp::Inv => "INV",
        };
        write!(f, "{}", name)
    }
}

/// One gate: operation, input wires and the single output wire
///
/// `in1` is ignored for INV. Every output wire is assigned exactly once
/// across the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    /// Gate operation
    pub op: GateOp,
    /// First input wire
    pub in0: WireId,
    /// Second input wire (unused for INV)
    pub in1: WireId,
    /// Output wire
    pub out: WireId,
}

/// Declared type of a circuit input or output value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    /// Single bit
    Bool,
    /// Unsigned integer of the declared width
    Uint,
    /// Two's-complement signed integer of the declared width
    Int,
}

impl ValueType {
    fn code(&self) -> u8 {
        match self {
            ValueType::Bool => 0,
            ValueType::Uint => 1,
            ValueType::Int => 2,
        }
    }

    fn from_code(code: u8) -> Result<ValueType> {
        Ok(match code {
            0 => ValueType::Bool,
            1 => ValueType::Uint,
            2 => ValueType::Int,
            _ => bail!("unknown value type code {}", code),
        })
    }
}

/// Named, typed bit group making up a party input or a circuit output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoArg {
    /// Argument name, informational
    pub name: String,
    /// Declared value type
    pub ty: ValueType,
    /// Width in bits
    pub bits: u32,
}

/// Per-operation gate counts derived from a circuit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    /// XOR gate count
    pub xor: u64,
    /// XNOR gate count
    pub xnor: u64,
    /// AND gate count
    pub and: u64,
    /// OR gate count
    pub or: u64,
    /// INV gate count
    pub inv: u64,
}

impl GateStats {
    /// Total gate count
    pub fn total(&self) -> u64 {
        self.xor + self.xnor + self.and + self.or + self.inv
    }

    /// Gates that are not plain XOR; XNOR joins the count only when the
    /// circuit does not treat it as free
    pub fn non_xor(&self, xnor_free: bool) -> u64 {
        let base = self.and + self.or + self.inv;
        if xnor_free { base } else { base + self.xnor }
    }

    /// Gates that produce ciphertext rows on the wire
    pub fn garbled(&self) -> u64 {
        self.and + self.or
    }
}

/// A Boolean circuit in topological gate order
///
/// Wire layout: party-0 (garbler) input bits first, then party-1
/// (evaluator) input bits, then the constant-0 and constant-1 wires when
/// `has_constants` is set, then gate outputs. The last `output_bits()`
/// wires are the circuit outputs in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circuit {
    /// Total number of wires
    pub num_wires: u32,
    /// Garbler input descriptors
    pub party0_inputs: Vec<IoArg>,
    /// Evaluator input descriptors
    pub party1_inputs: Vec<IoArg>,
    /// Output descriptors
    pub outputs: Vec<IoArg>,
    /// Whether the two constant wires are allocated after the inputs
    pub has_constants: bool,
    /// Whether XNOR is accounted as a free gate
    pub xnor_free: bool,
    /// Gates in execution order
    pub gates: Vec<Gate>,
}

fn bit_sum(args: &[IoArg]) -> u32 {
    args.iter().map(|a| a.bits).sum()
}

impl Circuit {
    /// Number of garbler input bits
    pub fn party0_bits(&self) -> u32 {
        bit_sum(&self.party0_inputs)
    }

    /// Number of evaluator input bits
    pub fn party1_bits(&self) -> u32 {
        bit_sum(&self.party1_inputs)
    }

    /// Number of input bits across both parties
    pub fn input_bits(&self) -> u32 {
        self.party0_bits() + self.party1_bits()
    }

    /// Number of output bits
    pub fn output_bits(&self) -> u32 {
        bit_sum(&self.outputs)
    }

    /// Wire carrying constant 0, if allocated
    pub fn const_zero_wire(&self) -> Option<WireId> {
        self.has_constants.then(|| self.input_bits())
    }

    /// Wire carrying constant 1, if allocated
    pub fn const_one_wire(&self) -> Option<WireId> {
        self.has_constants.then(|| self.input_bits() + 1)
    }

    /// Output wires, the tail of the wire space in declaration order
    pub fn output_wires(&self) -> impl Iterator<Item = WireId> + '_ {
        (self.num_wires - self.output_bits())..self.num_wires
    }

    /// Count gates per operation
    pub fn stats(&self) -> GateStats {
        let mut stats = GateStats::default();
        for gate in &self.gates {
            match gate.op {
                GateOp::Xor => stats.xor += 1,
                GateOp::Xnor => stats.xnor += 1,
                GateOp::And => stats.and += 1,
                GateOp::Or => stats.or += 1,
                GateOp::Inv => stats.inv += 1,
            }
        }
        stats
    }

    /// Structural validation: wire ranges, single assignment, topological
    /// order and fully-assigned outputs
    pub fn verify(&self) -> Result<()> {
        let fixed = self.input_bits() + if self.has_constants { 2 } else { 0 };
        if self.num_wires < fixed + self.output_bits() {
            bail!(
                "circuit declares {} wires but needs at least {}",
                self.num_wires,
                fixed + self.output_bits()
            );
        }

        let mut assigned = vec![false; self.num_wires as usize];
        for slot in assigned.iter_mut().take(fixed as usize) {
            *slot = true;
        }

        for (index, gate) in self.gates.iter().enumerate() {
            let both = [gate.in0, gate.in1];
            let inputs: &[WireId] = if gate.op.arity() == 1 {
                std::slice::from_ref(&gate.in0)
            } else {
                &both
            };
            for &wire in inputs {
                if wire >= self.num_wires {
                    bail!("gate {} reads out-of-range wire {}", index, wire);
                }
                if !assigned[wire as usize] {
                    bail!("gate {} reads wire {} before it is assigned", index, wire);
                }
            }
            if gate.out >= self.num_wires {
                bail!("gate {} writes out-of-range wire {}", index, gate.out);
            }
            if assigned[gate.out as usize] {
                bail!("wire {} assigned twice (gate {})", gate.out, index);
            }
            assigned[gate.out as usize] = true;
        }

        for wire in self.output_wires() {
            if !assigned[wire as usize] {
                bail!("output wire {} is never assigned", wire);
            }
        }
        Ok(())
    }

    /// Cleartext reference evaluation
    ///
    /// Used by tests and the `check` subcommand to compare against the
    /// garbled protocol output.
    pub fn eval_plain(&self, party0: &[bool], party1: &[bool]) -> Result<Vec<bool>> {
        if party0.len() != self.party0_bits() as usize {
            bail!(
                "party 0 supplied {} input bits, circuit expects {}",
                party0.len(),
                self.party0_bits()
            );
        }
        if party1.len() != self.party1_bits() as usize {
            bail!(
                "party 1 supplied {} input bits, circuit expects {}",
                party1.len(),
                self.party1_bits()
            );
        }

        let mut values: Vec<Option<bool>> = vec![None; self.num_wires as usize];
        for (i, &bit) in party0.iter().chain(party1.iter()).enumerate() {
            values[i] = Some(bit);
        }
        if let (Some(zero), Some(one)) = (self.const_zero_wire(), self.const_one_wire()) {
            values[zero as usize] = Some(false);
            values[one as usize] = Some(true);
        }

        for (index, gate) in self.gates.iter().enumerate() {
            let a = values[gate.in0 as usize]
                .ok_or_else(|| anyhow::anyhow!("gate {} reads unset wire {}", index, gate.in0))?;
            let b = if gate.op.arity() == 2 {
                values[gate.in1 as usize]
                    .ok_or_else(|| anyhow::anyhow!("gate {} reads unset wire {}", index, gate.in1))?
            } else {
                false
            };
            values[gate.out as usize] = Some(gate.op.apply(a, b));
        }

        self.output_wires()
            .map(|wire| {
                values[wire as usize]
                    .ok_or_else(|| anyhow::anyhow!("output wire {} is unset", wire))
            })
            .collect()
    }

    /// Serialize to the binary circuit format
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&CIRCUIT_MAGIC)?;
        writer.write_all(&self.num_wires.to_be_bytes())?;
        writer.write_all(&(self.gates.len() as u32).to_be_bytes())?;
        let mut flags = 0u8;
        if self.has_constants {
            flags |= 1;
        }
        if self.xnor_free {
            flags |= 2;
        }
        writer.write_all(&[flags])?;
        write_io_args(writer, &self.party0_inputs)?;
        write_io_args(writer, &self.party1_inputs)?;
        write_io_args(writer, &self.outputs)?;
        for gate in &self.gates {
            writer.write_all(&[gate.op.code()])?;
            writer.write_all(&gate.in0.to_be_bytes())?;
            if gate.op.arity() == 2 {
                writer.write_all(&gate.in1.to_be_bytes())?;
            }
            writer.write_all(&gate.out.to_be_bytes())?;
        }
        Ok(())
    }

    /// Deserialize from the binary circuit format and verify the result
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Circuit> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != CIRCUIT_MAGIC {
            bail!("not a circuit file: bad magic {:02x?}", magic);
        }
        let num_wires = read_u32(reader)?;
        let num_gates = read_u32(reader)?;
        let mut flags = [0u8; 1];
        reader.read_exact(&mut flags)?;
        let party0_inputs = read_io_args(reader)?;
        let party1_inputs = read_io_args(reader)?;
        let outputs = read_io_args(reader)?;

        let mut gates = Vec::with_capacity(num_gates as usize);
        for _ in 0..num_gates {
            let mut code = [0u8; 1];
            reader.read_exact(&mut code)?;
            let op = GateOp::from_code(code[0])?;
            let in0 = read_u32(reader)?;
            let in1 = if op.arity() == 2 { read_u32(reader)? } else { 0 };
            let out = read_u32(reader)?;
            gates.push(Gate { op, in0, in1, out });
        }

        let circuit = Circuit {
            num_wires,
            party0_inputs,
            party1_inputs,
            outputs,
            has_constants: flags[0] & 1 != 0,
            xnor_free: flags[0] & 2 != 0,
            gates,
        };
        circuit.verify()?;
        Ok(circuit)
    }

    /// Serialize to an owned byte vector
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// SHA-256 digest of the serialized circuit, exchanged during session setup
    pub fn digest(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes()?);
        Ok(hasher.finalize().into())
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

pub(crate) fn write_io_args<W: Write>(writer: &mut W, args: &[IoArg]) -> Result<()> {
    if args.len() > u16::MAX as usize {
        bail!("too many IO arguments: {}", args.len());
    }
    writer.write_all(&(args.len() as u16).to_be_bytes())?;
    for arg in args {
        let name = arg.name.as_bytes();
        writer.write_all(&(name.len() as u32).to_be_bytes())?;
        writer.write_all(name)?;
        writer.write_all(&[arg.ty.code()])?;
        writer.write_all(&arg.bits.to_be_bytes())?;
    }
    Ok(())
}

pub(crate) fn read_io_args<R: Read>(reader: &mut R) -> Result<Vec<IoArg>> {
    let mut count_bytes = [0u8; 2];
    reader.read_exact(&mut count_bytes)?;
    let count = u16::from_be_bytes(count_bytes);
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = read_u32(reader)? as usize;
        if name_len > 4096 {
            bail!("IO argument name too long: {} bytes", name_len);
        }
        let mut name_bytes = vec![0u8; name_len];
        reader.read_exact(&mut name_bytes)?;
        let name = String::from_utf8(name_bytes)?;
        let mut ty_code = [0u8; 1];
        reader.read_exact(&mut ty_code)?;
        let ty = ValueType::from_code(ty_code[0])?;
        let bits = read_u32(reader)?;
        args.push(IoArg { name, ty, bits });
    }
    Ok(args)
}

/// Encode declared argument values into input bits, LSB first per argument
pub fn encode_values(args: &[IoArg], values: &[i128]) -> Result<Vec<bool>> {
    if values.len() != args.len() {
        bail!("expected {} input values, got {}", args.len(), values.len());
    }
    let mut bits = Vec::new();
    for (arg, &value) in args.iter().zip(values) {
        match arg.ty {
            ValueType::Bool => {
                if value != 0 && value != 1 {
                    bail!("argument {} is a bool, got {}", arg.name, value);
                }
            }
            ValueType::Uint => {
                if value < 0 || (arg.bits < 127 && value >> arg.bits != 0) {
                    bail!("argument {} does not fit in {} unsigned bits", arg.name, arg.bits);
                }
            }
            ValueType::Int => {
                if arg.bits < 128 {
                    let min = -(1i128 << (arg.bits - 1));
                    let max = (1i128 << (arg.bits - 1)) - 1;
                    if value < min || value > max {
                        bail!("argument {} does not fit in {} signed bits", arg.name, arg.bits);
                    }
                }
            }
        }
        for i in 0..arg.bits {
            bits.push((value >> i) & 1 == 1);
        }
    }
    Ok(bits)
}

/// Decode output bits back into declared argument values
pub fn decode_values(args: &[IoArg], bits: &[bool]) -> Result<Vec<i128>> {
    if bits.len() != bit_sum(args) as usize {
        bail!("expected {} output bits, got {}", bit_sum(args), bits.len());
    }
    let mut values = Vec::with_capacity(args.len());
    let mut offset = 0usize;
    for arg in args {
        let width = arg.bits as usize;
        let mut value = 0i128;
        for i in 0..width {
            if bits[offset + i] {
                value |= 1i128 << i;
            }
        }
        if arg.ty == ValueType::Int && width < 128 && bits[offset + width - 1] {
            // sign extension for two's complement outputs
            value -= 1i128 << width;
        }
        values.push(value);
        offset += width;
    }
    Ok(values)
}
