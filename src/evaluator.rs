use anyhow::{Result, bail};

use crate::circuit::{Gate, GateOp, WireId};
use crate::garble::{GarbledTable, GateHasher, OutputDecode, eval_and};
use crate::label::Label;

/// Evaluator-side session state
///
/// Holds the single active label per live wire and walks the gate stream
/// in the order the garbler emits it.
#[derive(Debug)]
pub struct EvaluatorSession {
    hasher: GateHasher,
    active: Vec<Option<Label>>,
    nonlinear_index: u64,
}

impl EvaluatorSession {
    /// Start a session for a circuit with `num_wires` wires
    pub fn new(num_wires: u32) -> Self {
        EvaluatorSession {
            hasher: GateHasher::new(),
            active: vec![None; num_wires as usize],
            nonlinear_index: 0,
        }
    }

    fn get(&self, wire: WireId) -> Result<Label> {
        match self.active.get(wire as usize) {
            Some(Some(label)) => Ok(*label),
            Some(None) => bail!("wire {} is not live", wire),
            None => bail!("wire {} is out of range", wire),
        }
    }

    fn set(&mut self, wire: WireId, label: Label) -> Result<()> {
        match self.active.get_mut(wire as usize) {
            Some(slot @ None) => {
                *slot = Some(label);
                Ok(())
            }
            Some(Some(_)) => bail!("wire {} assigned twice", wire),
            None => bail!("wire {} is out of range", wire),
        }
    }

    /// Install the active label of an input or constant wire
    pub fn set_active(&mut self, wire: WireId, label: Label) -> Result<()> {
        self.set(wire, label)
    }

    /// The active label of a live wire
    pub fn active_label(&self, wire: WireId) -> Result<Label> {
        self.get(wire)
    }

    /// Evaluate one gate
    ///
    /// Linear gates work on labels alone; AND/OR consume the ciphertext
    /// rows streamed for this gate, in emission order.
    pub fn eval_gate(&mut self, gate: &Gate, table: Option<&GarbledTable>) -> Result<()> {
        let a = self.get(gate.in0)?;
        let out = match gate.op {
            GateOp::Xor | GateOp::Xnor => a.xor(&self.get(gate.in1)?),
            GateOp::Inv => a,
            GateOp::And | GateOp::Or => {
                let b = self.get(gate.in1)?;
                let Some(table) = table else {
                    bail!("no ciphertext rows for non-linear gate onto wire {}", gate.out);
                };
                let out = eval_and(&self.hasher, &a, &b, table, self.nonlinear_index);
                self.nonlinear_index += 1;
                out
            }
        };
        self.set(gate.out, out)
    }

    /// Number of non-linear gates consumed so far
    pub fn nonlinear_count(&self) -> u64 {
        self.nonlinear_index
    }

    /// Drop the labels of wires the garbler marked dead
    pub fn free_wires(&mut self, wires: &[WireId]) {
        for &wire in wires {
            if let Some(slot) = self.active.get_mut(wire as usize) {
                *slot = None;
            }
        }
    }

    /// Decode an output wire against the garbler's decode information
    pub fn decode_output(&self, wire: WireId, decode: &OutputDecode) -> Result<bool> {
        Ok(decode.decode(&self.get(wire)?))
    }
}
