use anyhow::{Result, bail};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use crate::circuit::{Gate, GateOp, WireId};
use crate::garble::{GarbledTable, GateHasher, OutputDecode, garble_and, garble_or};
use crate::label::{Label, WirePair};

/// Garbler-side session state
///
/// Owns the global free-XOR offset Δ and the 0-label of every live wire.
/// Δ is generated at session start and never leaves the session.
pub struct GarblerSession {
    delta: Label,
    hasher: GateHasher,
    labels: Vec<Option<Label>>,
    rng: ChaCha12Rng,
    nonlinear_index: u64,
}

impl std::fmt::Debug for GarblerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarblerSession")
            .field("wires", &self.labels.len())
            .field("nonlinear_index", &self.nonlinear_index)
            .finish_non_exhaustive()
    }
}

impl GarblerSession {
    /// Start a session for a circuit with `num_wires` wires, drawing Δ and
    /// all wire labels from the seeded CSPRNG
    pub fn new(num_wires: u32, seed: [u8; 32]) -> Self {
        let mut rng = ChaCha12Rng::from_seed(seed);
        let delta = Label::random_delta(&mut rng);
        GarblerSession {
            delta,
            hasher: GateHasher::new(),
            labels: vec![None; num_wires as usize],
            rng,
            nonlinear_index: 0,
        }
    }

    pub(crate) fn delta(&self) -> &Label {
        &self.delta
    }

    fn get(&self, wire: WireId) -> Result<Label> {
        match self.labels.get(wire as usize) {
            Some(Some(label)) => Ok(*label),
            Some(None) => bail!("wire {} is not live", wire),
            None => bail!("wire {} is out of range", wire),
        }
    }

    fn set(&mut self, wire: WireId, label: Label) -> Result<()> {
        match self.labels.get_mut(wire as usize) {
            Some(slot @ None) => {
                *slot = Some(label);
                Ok(())
            }
            Some(Some(_)) => bail!("wire {} assigned twice", wire),
            None => bail!("wire {} is out of range", wire),
        }
    }

    /// Draw a fresh label pair for an input or constant wire
    pub fn assign_input(&mut self, wire: WireId) -> Result<WirePair> {
        let zero = Label::random(&mut self.rng);
        self.set(wire, zero)?;
        Ok(WirePair::from_zero(zero, &self.delta))
    }

    /// Both labels of a live wire
    pub fn wire_pair(&self, wire: WireId) -> Result<WirePair> {
        Ok(WirePair::from_zero(self.get(wire)?, &self.delta))
    }

    /// The label standing for `bit` on a live wire
    pub fn active_label(&self, wire: WireId, bit: bool) -> Result<Label> {
        Ok(self.wire_pair(wire)?.select(bit))
    }

    /// Garble one gate, assigning the output wire's 0-label
    ///
    /// Linear gates return no ciphertext; AND/OR return the two rows to
    /// stream to the evaluator.
    pub fn garble_gate(&mut self, gate: &Gate) -> Result<Option<GarbledTable>> {
        let a0 = self.get(gate.in0)?;
        let result = match gate.op {
            GateOp::Xor => (a0.xor(&self.get(gate.in1)?), None),
            GateOp::Xnor => (a0.xor(&self.get(gate.in1)?).xor(&self.delta), None),
            GateOp::Inv => (a0.xor(&self.delta), None),
            GateOp::And => {
                let b0 = self.get(gate.in1)?;
                let (out0, table) =
                    garble_and(&self.hasher, &a0, &b0, &self.delta, self.nonlinear_index);
                self.nonlinear_index += 1;
                (out0, Some(table))
            }
            GateOp::Or => {
                let b0 = self.get(gate.in1)?;
                let (out0, table) =
                    garble_or(&self.hasher, &a0, &b0, &self.delta, self.nonlinear_index);
                self.nonlinear_index += 1;
                (out0, Some(table))
            }
        };
        self.set(gate.out, result.0)?;
        Ok(result.1)
    }

    /// Number of non-linear gates garbled so far
    pub fn nonlinear_count(&self) -> u64 {
        self.nonlinear_index
    }

    /// Drop the labels of wires that will not be read again
    pub fn free_wires(&mut self, wires: &[WireId]) {
        for &wire in wires {
            if let Some(slot) = self.labels.get_mut(wire as usize) {
                *slot = None;
            }
        }
    }

    /// Decode information for an output wire: its 0-label and the truth
    /// value 0
    pub fn output_decode(&self, wire: WireId) -> Result<OutputDecode> {
        Ok(OutputDecode {
            label: self.get(wire)?,
            value: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_xor_invariant_over_assignments() {
        let mut session = GarblerSession::new(8, [0x51; 32]);
        for wire in 0..4 {
            let pair = session.assign_input(wire).unwrap();
            assert_eq!(pair.one, pair.zero.xor(session.delta()));
            assert_ne!(pair.zero.permute_bit(), pair.one.permute_bit());
        }
    }

    #[test]
    fn test_double_assignment_rejected() {
        let mut session = GarblerSession::new(4, [0x52; 32]);
        session.assign_input(0).unwrap();
        let err = session.assign_input(0).unwrap_err();
        assert!(err.to_string().contains("assigned twice"));
    }

    #[test]
    fn test_gate_on_dead_wire_rejected() {
        let mut session = GarblerSession::new(4, [0x53; 32]);
        session.assign_input(0).unwrap();
        session.assign_input(1).unwrap();
        session.free_wires(&[1]);
        let gate = Gate { op: GateOp::Xor, in0: 0, in1: 1, out: 2 };
        let err = session.garble_gate(&gate).unwrap_err();
        assert!(err.to_string().contains("not live"));
    }

    #[test]
    fn test_linear_gates_produce_no_tables() {
        let mut session = GarblerSession::new(8, [0x54; 32]);
        session.assign_input(0).unwrap();
        session.assign_input(1).unwrap();
        let xor = Gate { op: GateOp::Xor, in0: 0, in1: 1, out: 2 };
        let xnor = Gate { op: GateOp::Xnor, in0: 0, in1: 1, out: 3 };
        let inv = Gate { op: GateOp::Inv, in0: 0, in1: 0, out: 4 };
        assert!(session.garble_gate(&xor).unwrap().is_none());
        assert!(session.garble_gate(&xnor).unwrap().is_none());
        assert!(session.garble_gate(&inv).unwrap().is_none());
        let and = Gate { op: GateOp::And, in0: 0, in1: 1, out: 5 };
        assert!(session.garble_gate(&and).unwrap().is_some());
        assert_eq!(session.nonlinear_count(), 1);
    }

    #[test]
    fn test_xnor_output_pair_is_complement_of_xor() {
        let mut session = GarblerSession::new(8, [0x55; 32]);
        session.assign_input(0).unwrap();
        session.assign_input(1).unwrap();
        let xor = Gate { op: GateOp::Xor, in0: 0, in1: 1, out: 2 };
        let xnor = Gate { op: GateOp::Xnor, in0: 0, in1: 1, out: 3 };
        session.garble_gate(&xor).unwrap();
        session.garble_gate(&xnor).unwrap();
        let xor_pair = session.wire_pair(2).unwrap();
        let xnor_pair = session.wire_pair(3).unwrap();
        assert_eq!(xor_pair.zero, xnor_pair.one);
        assert_eq!(xor_pair.one, xnor_pair.zero);
    }
}
