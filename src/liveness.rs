use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::circuit::Circuit;

/// Usage count marking a wire that must never be freed
pub const PERMANENT: u32 = u32::MAX;

/// Wire usage analysis driving the garbage-collection markers in the gate
/// stream
///
/// A wire's count is the number of gates reading it; it reaches zero at the
/// wire's last use, at which point both parties may drop its label.
/// Output wires are pinned with [`PERMANENT`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUsageReport {
    /// Total number of wires in the circuit
    pub total_wires: usize,
    /// Number of primary input wires (both parties)
    pub primary_inputs: usize,
    /// Number of intermediate wires
    pub intermediate_wires: usize,
    /// Number of primary output wires
    pub primary_outputs: usize,
    /// Wire usage counts: index = wire id, value = remaining reads
    pub wire_usage_counts: Vec<u32>,
}

impl WireUsageReport {
    /// Save the report to a binary file for fast loading in processing pipelines
    pub fn save_binary<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded = bincode::serialize(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Load a report from a binary file
    pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let report = bincode::deserialize(&data)?;
        Ok(report)
    }

    /// Export summary as JSON for human inspection
    pub fn export_summary_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let summary = serde_json::json!({
            "total_wires": self.total_wires,
            "primary_inputs": self.primary_inputs,
            "intermediate_wires": self.intermediate_wires,
            "primary_outputs": self.primary_outputs,
        });
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        Ok(())
    }
}

/// Tracks remaining wire reads during a streamed run and collects wires
/// whose last read has passed
#[derive(Debug)]
pub struct LivenessTracker {
    remaining: Vec<u32>,
    pending_free: Vec<u32>,
}

impl LivenessTracker {
    /// Start tracking from an analysis report
    pub fn new(report: &WireUsageReport) -> Self {
        LivenessTracker {
            remaining: report.wire_usage_counts.clone(),
            pending_free: Vec::new(),
        }
    }

    /// Record one read of a wire; dead wires accumulate until [`Self::take_dead`]
    pub fn consume(&mut self, wire: u32) {
        let count = &mut self.remaining[wire as usize];
        if *count == 0 || *count == PERMANENT {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.pending_free.push(wire);
        }
    }

    /// Wires whose labels can be dropped since the previous call
    pub fn take_dead(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.pending_free)
    }

    /// Whether any wires are waiting to be announced as dead
    pub fn has_dead(&self) -> bool {
        !self.pending_free.is_empty()
    }
}

/// Analyze wire usage patterns of a circuit
pub fn analyze_wire_usage(circuit: &Circuit) -> Result<WireUsageReport> {
    let mut wire_usage_counts = vec![0u32; circuit.num_wires as usize];

    for gate in &circuit.gates {
        wire_usage_counts[gate.in0 as usize] += 1;
        if gate.op.arity() == 2 {
            wire_usage_counts[gate.in1 as usize] += 1;
        }
    }

    // Outputs stay live until the run ends
    for wire in circuit.output_wires() {
        wire_usage_counts[wire as usize] = PERMANENT;
    }

    let primary_inputs = circuit.input_bits() as usize;
    let primary_outputs = circuit.output_bits() as usize;
    let total_wires = circuit.num_wires as usize;

    Ok(WireUsageReport {
        total_wires,
        primary_inputs,
        intermediate_wires: total_wires - primary_inputs - primary_outputs,
        primary_outputs,
        wire_usage_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;

    #[test]
    fn test_usage_counts() {
        let circuit = builder::adder(4).unwrap();
        let report = analyze_wire_usage(&circuit).unwrap();
        assert_eq!(report.total_wires, circuit.num_wires as usize);
        assert_eq!(report.primary_inputs, 8);
        assert_eq!(report.primary_outputs, 4);
        for wire in circuit.output_wires() {
            assert_eq!(report.wire_usage_counts[wire as usize], PERMANENT);
        }
    }

    #[test]
    fn test_tracker_frees_after_last_use() {
        let circuit = builder::adder(4).unwrap();
        let report = analyze_wire_usage(&circuit).unwrap();
        let mut tracker = LivenessTracker::new(&report);

        let mut freed = Vec::new();
        for gate in &circuit.gates {
            tracker.consume(gate.in0);
            if gate.op.arity() == 2 {
                tracker.consume(gate.in1);
            }
            freed.extend(tracker.take_dead());
        }

        // every non-permanent used wire is freed exactly once
        for (wire, &count) in report.wire_usage_counts.iter().enumerate() {
            let expected = count != PERMANENT && count > 0;
            assert_eq!(
                freed.iter().filter(|&&w| w as usize == wire).count(),
                expected as usize,
                "wire {}", wire
            );
        }
        // outputs are never freed
        for wire in circuit.output_wires() {
            assert!(!freed.contains(&wire));
        }
    }

    #[test]
    fn test_report_binary_round_trip() {
        let circuit = builder::max(4).unwrap();
        let report = analyze_wire_usage(&circuit).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        report.save_binary(file.path()).unwrap();
        let restored = WireUsageReport::load_binary(file.path()).unwrap();
        assert_eq!(restored.wire_usage_counts, report.wire_usage_counts);
        assert_eq!(restored.total_wires, report.total_wires);
    }
}
