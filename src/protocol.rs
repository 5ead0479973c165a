//! The garbler-evaluator protocol: session handshake, input-label OT,
//! gate streaming with garbage-collection markers, and output decoding.
//!
//! The garbler never materializes the garbled circuit; each gate's rows go
//! straight to the wire (streaming mode) or into one replayable frame
//! (batched mode, same bytes). Both drivers track per-phase time and the
//! connection counters.

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;
use serde::Serialize;
use std::io::Read;
use std::time::Instant;

use crate::circuit::{Circuit, Gate, GateOp, IoArg, WireId, read_io_args, write_io_args};
use crate::conn::{ConnStats, Connection};
use crate::constants::{
    GARBLING_VARIANT_HALF_GATES, GC_INTERVAL, IKNP_THRESHOLD, PROGRESS_UPDATE_INTERVAL,
    PROTOCOL_VERSION,
};
use crate::evaluator::EvaluatorSession;
use crate::garble::GarbledTable;
use crate::garbler::GarblerSession;
use crate::label::{Label, WirePair};
use crate::liveness::{LivenessTracker, analyze_wire_usage};
use crate::ot::{OtReceiver, OtSender};
use crate::ot_ext::{IknpReceiver, IknpSender};

/// Op code opening an input-label transfer request
pub const OP_OT: u32 = 0;
/// Op code closing the OT phase and requesting the gate stream
pub const OP_RESULT: u32 = 1;

const ROLE_GARBLER: u8 = 0;
const ROLE_EVALUATOR: u8 = 1;
const MARKER_TAG: u8 = 0xFF;
const MODE_BATCHED: u8 = 0;
const MODE_STREAMING: u8 = 1;

/// Per-run configuration shared by both drivers
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stream gates as they are garbled instead of batching one frame
    pub streaming: bool,
    /// Gates between garbage-collection markers
    pub gc_interval: u32,
    /// Seed for the session CSPRNG
    pub seed: [u8; 32],
    /// Render a progress bar while the gate stream runs
    pub progress: bool,
}

impl SessionConfig {
    /// Streaming defaults with the given seed
    pub fn new(seed: [u8; 32]) -> Self {
        SessionConfig {
            streaming: true,
            gc_interval: GC_INTERVAL,
            seed,
            progress: false,
        }
    }
}

/// Wall-clock seconds spent per protocol phase
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PhaseTimes {
    /// Handshake and header exchange
    pub init: f64,
    /// Input-label delivery
    pub ot: f64,
    /// Gate garbling/evaluation
    pub garble: f64,
    /// Output decoding
    pub result: f64,
}

/// Observability snapshot of one protocol run
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProtocolStats {
    /// Per-phase wall-clock time
    pub phases: PhaseTimes,
    /// Connection byte counters at the end of the run
    pub conn: ConnStats,
    /// Total gates processed
    pub gates: u64,
    /// Gates that shipped ciphertext rows
    pub nonlinear_gates: u64,
}

/// Circuit header received by the evaluator during the handshake
#[derive(Debug, Clone)]
pub struct SessionHeader {
    /// SHA-256 digest of the garbler's circuit
    pub digest: [u8; 32],
    /// Total wires
    pub num_wires: u32,
    /// Total gates
    pub num_gates: u32,
    /// Constant wires allocated after the inputs
    pub has_constants: bool,
    /// XNOR accounted as free
    pub xnor_free: bool,
    /// Gate stream arrives gate-by-gate rather than as one frame
    pub streaming: bool,
    /// Garbler input descriptors
    pub party0_inputs: Vec<IoArg>,
    /// Evaluator input descriptors
    pub party1_inputs: Vec<IoArg>,
    /// Output descriptors
    pub outputs: Vec<IoArg>,
}

/// Outcome of one driver run
#[derive(Debug, Clone)]
pub struct ProtocolRun {
    /// Decoded output bits, identical on both parties
    pub outputs: Vec<bool>,
    /// Per-phase timing and transfer counters
    pub stats: ProtocolStats,
    /// Header describing the evaluated circuit
    pub header: SessionHeader,
}

fn bit_count(args: &[IoArg]) -> u32 {
    args.iter().map(|a| a.bits).sum()
}

fn send_io_args<R: Read>(conn: &mut Connection<R>, args: &[IoArg]) -> Result<()> {
    let mut buf = Vec::new();
    write_io_args(&mut buf, args)?;
    conn.send_data(&buf)
}

fn receive_io_args<R: Read>(conn: &mut Connection<R>) -> Result<Vec<IoArg>> {
    let data = conn.receive_data()?;
    read_io_args(&mut data.as_slice())
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i >> 3] |= 1 << (i & 7);
        }
    }
    bytes
}

fn unpack_bits(bytes: &[u8], count: usize) -> Result<Vec<bool>> {
    if bytes.len() != count.div_ceil(8) {
        bail!("expected {} packed bytes, got {}", count.div_ceil(8), bytes.len());
    }
    Ok((0..count).map(|i| bytes[i >> 3] >> (i & 7) & 1 == 1).collect())
}

fn gate_progress(enabled: bool, gates: u64, message: &'static str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new(gates);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );
    pb.set_message(message);
    Some(pb)
}

// Gate stream encoding: a tag byte (the gate op code or the GC marker tag),
// wire ids big-endian, then the ciphertext rows for non-linear gates. The
// session header pinned the garbling variant, so no per-gate length prefix
// travels.

fn encode_gate(buf: &mut Vec<u8>, gate: &Gate, table: Option<&GarbledTable>) {
    buf.push(gate.op.code());
    buf.extend_from_slice(&gate.in0.to_be_bytes());
    if gate.op.arity() == 2 {
        buf.extend_from_slice(&gate.in1.to_be_bytes());
    }
    buf.extend_from_slice(&gate.out.to_be_bytes());
    if let Some(table) = table {
        for row in &table.rows {
            buf.extend_from_slice(row.as_bytes());
        }
    }
}

fn encode_marker(buf: &mut Vec<u8>, wires: &[WireId]) {
    buf.push(MARKER_TAG);
    buf.extend_from_slice(&(wires.len() as u32).to_be_bytes());
    for wire in wires {
        buf.extend_from_slice(&wire.to_be_bytes());
    }
}

/// Byte source the evaluator reads the gate stream from: the connection in
/// streaming mode, the replayed frame in batched mode
trait GateStreamSource {
    fn next_u8(&mut self) -> Result<u8>;
    fn next_u32(&mut self) -> Result<u32>;
    fn next_label(&mut self) -> Result<Label>;
}

struct ConnSource<'a, R: Read>(&'a mut Connection<R>);

impl<R: Read> GateStreamSource for ConnSource<'_, R> {
    fn next_u8(&mut self) -> Result<u8> {
        self.0.receive_byte()
    }
    fn next_u32(&mut self) -> Result<u32> {
        self.0.receive_u32()
    }
    fn next_label(&mut self) -> Result<Label> {
        self.0.receive_label()
    }
}

struct SliceSource<'a>(&'a [u8]);

impl SliceSource<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.0.len() < n {
            bail!("gate frame truncated: wanted {} more bytes, have {}", n, self.0.len());
        }
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        Ok(head)
    }
}

impl GateStreamSource for SliceSource<'_> {
    fn next_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn next_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }
    fn next_label(&mut self) -> Result<Label> {
        Ok(Label::new(self.take(16)?.try_into().expect("16 bytes")))
    }
}

fn consume_gate_stream<S: GateStreamSource>(
    source: &mut S,
    session: &mut EvaluatorSession,
    num_wires: u32,
    num_gates: u32,
    progress: Option<&ProgressBar>,
) -> Result<()> {
    let mut processed = 0u32;
    while processed < num_gates {
        let tag = source.next_u8()?;
        if tag == MARKER_TAG {
            let count = source.next_u32()?;
            if count > num_wires {
                bail!("garbage-collection marker names {} wires, circuit has {}", count, num_wires);
            }
            let mut wires = Vec::with_capacity(count as usize);
            for _ in 0..count {
                wires.push(source.next_u32()?);
            }
            session.free_wires(&wires);
            continue;
        }
        let op = GateOp::from_code(tag)?;
        let in0 = source.next_u32()?;
        let in1 = if op.arity() == 2 { source.next_u32()? } else { 0 };
        let out = source.next_u32()?;
        let table = if op.is_linear() {
            None
        } else {
            Some(GarbledTable {
                rows: [source.next_label()?, source.next_label()?],
            })
        };
        session.eval_gate(&Gate { op, in0, in1, out }, table.as_ref())?;
        processed += 1;
        if let Some(pb) = progress {
            if processed as u64 % PROGRESS_UPDATE_INTERVAL == 0 {
                pb.set_position(processed as u64);
            }
        }
    }
    Ok(())
}

/// Run the garbler side of the protocol over an established connection
///
/// `inputs` are the garbler's own input bits in canonical order. Returns
/// the decoded outputs (reported back by the evaluator) and the run stats.
pub fn run_garbler<R: Read>(
    conn: &mut Connection<R>,
    circuit: &Circuit,
    inputs: &[bool],
    config: &SessionConfig,
) -> Result<ProtocolRun> {
    circuit.verify().context("init phase failed")?;
    if inputs.len() != circuit.party0_bits() as usize {
        bail!(
            "init phase failed: garbler got {} input bits, circuit expects {}",
            inputs.len(),
            circuit.party0_bits()
        );
    }

    let mut rng = ChaCha12Rng::from_seed(config.seed);
    let mut session_seed = [0u8; 32];
    rng.fill_bytes(&mut session_seed);
    let mut session = GarblerSession::new(circuit.num_wires, session_seed);
    let mut times = PhaseTimes::default();

    // init: version/role handshake and circuit header
    let start = Instant::now();
    let digest = (|| -> Result<[u8; 32]> {
        let digest = circuit.digest()?;
        conn.send_u32(PROTOCOL_VERSION)?;
        conn.send_byte(ROLE_GARBLER)?;
        conn.send_u32(0)?;
        conn.send_data(&digest)?;
        conn.send_u32(circuit.num_wires)?;
        conn.send_u32(circuit.gates.len() as u32)?;
        let mut flags = 0u8;
        if circuit.has_constants {
            flags |= 1;
        }
        if circuit.xnor_free {
            flags |= 2;
        }
        conn.send_byte(flags)?;
        conn.send_byte(GARBLING_VARIANT_HALF_GATES)?;
        conn.send_byte(if config.streaming { MODE_STREAMING } else { MODE_BATCHED })?;
        conn.send_u32(config.gc_interval)?;
        send_io_args(conn, &circuit.party0_inputs)?;
        send_io_args(conn, &circuit.party1_inputs)?;
        send_io_args(conn, &circuit.outputs)?;
        conn.flush()?;

        let peer_version = conn.receive_u32()?;
        if peer_version != PROTOCOL_VERSION {
            bail!("protocol version mismatch: ours {}, peer {}", PROTOCOL_VERSION, peer_version);
        }
        let peer_role = conn.receive_byte()?;
        if peer_role != ROLE_EVALUATOR {
            bail!("peer claims role {}, expected the evaluator", peer_role);
        }
        let _peer_party = conn.receive_u32()?;
        Ok(digest)
    })()
    .context("init phase failed")?;
    times.init = start.elapsed().as_secs_f64();

    // ot: direct labels for our inputs, OT for the evaluator's
    let start = Instant::now();
    (|| -> Result<()> {
        for wire in 0..circuit.input_bits() {
            session.assign_input(wire)?;
        }
        if let (Some(zero), Some(one)) = (circuit.const_zero_wire(), circuit.const_one_wire()) {
            session.assign_input(zero)?;
            session.assign_input(one)?;
        }

        for (i, &bit) in inputs.iter().enumerate() {
            let label = session.active_label(i as u32, bit)?;
            conn.send_label(&label)?;
        }
        if let (Some(zero), Some(one)) = (circuit.const_zero_wire(), circuit.const_one_wire()) {
            conn.send_label(&session.active_label(zero, false)?)?;
            conn.send_label(&session.active_label(one, true)?)?;
        }
        conn.flush()?;

        let eval_bits = circuit.party1_bits() as usize;
        let first_eval_wire = circuit.party0_bits();
        if eval_bits > 0 {
            let op = conn.receive_u32()?;
            if op != OP_OT {
                bail!("unexpected op code {} while waiting for an OT request", op);
            }
            let wire = conn.receive_u32()?;
            if wire != first_eval_wire {
                bail!("peer requested labels from wire {}, expected {}", wire, first_eval_wire);
            }
            let wires: Vec<WirePair> = (0..eval_bits)
                .map(|i| session.wire_pair(first_eval_wire + i as u32))
                .collect::<Result<_>>()?;
            if eval_bits >= IKNP_THRESHOLD {
                let ext = IknpSender::setup(conn, &mut rng)?;
                let pairs = ext.extend(conn, eval_bits)?;
                ext.send_wires(conn, &wires, &pairs)?;
            } else {
                let ot = OtSender::init(conn, &mut rng)?;
                ot.send(conn, &wires)?;
            }
        }

        let op = conn.receive_u32()?;
        if op != OP_RESULT {
            bail!("unexpected op code {} while waiting for the gate stream request", op);
        }
        let _wire = conn.receive_u32()?;
        Ok(())
    })()
    .context("ot phase failed")?;
    times.ot = start.elapsed().as_secs_f64();

    // garble: walk the circuit, streaming rows and GC markers
    let start = Instant::now();
    (|| -> Result<()> {
        let report = analyze_wire_usage(circuit)?;
        let mut tracker = LivenessTracker::new(&report);
        let progress = gate_progress(
            config.progress,
            circuit.gates.len() as u64,
            "Garbling circuit...",
        );
        let mut chunk = Vec::new();
        let mut frame = Vec::new();

        for (index, gate) in circuit.gates.iter().enumerate() {
            let table = session.garble_gate(gate)?;
            chunk.clear();
            encode_gate(&mut chunk, gate, table.as_ref());

            tracker.consume(gate.in0);
            if gate.op.arity() == 2 {
                tracker.consume(gate.in1);
            }
            // no marker after the final gate: the evaluator stops reading
            // the stream once every gate is consumed, and the stores are
            // torn down at circuit end anyway
            let at_interval = (index as u32 + 1) % config.gc_interval.max(1) == 0;
            let last_gate = index + 1 == circuit.gates.len();
            if at_interval && !last_gate && tracker.has_dead() {
                let dead = tracker.take_dead();
                session.free_wires(&dead);
                encode_marker(&mut chunk, &dead);
            }

            if config.streaming {
                conn.send_bytes(&chunk)?;
            } else {
                frame.extend_from_slice(&chunk);
            }
            if let Some(pb) = &progress {
                if (index as u64 + 1) % PROGRESS_UPDATE_INTERVAL == 0 {
                    pb.set_position(index as u64 + 1);
                }
            }
        }
        if !config.streaming {
            conn.send_data(&frame)?;
        }
        conn.flush()?;
        if let Some(pb) = progress {
            pb.finish_with_message(format!(
                "Garbled {} gates, {} tables",
                circuit.gates.len(),
                session.nonlinear_count()
            ));
        }
        Ok(())
    })()
    .context("garble phase failed")?;
    times.garble = start.elapsed().as_secs_f64();

    // result: decode info out, decoded bits back
    let start = Instant::now();
    let outputs = (|| -> Result<Vec<bool>> {
        for wire in circuit.output_wires() {
            let decode = session.output_decode(wire)?;
            conn.send_label(&decode.label)?;
            conn.send_byte(decode.value as u8)?;
        }
        conn.flush()?;
        let packed = conn.receive_data()?;
        unpack_bits(&packed, circuit.output_bits() as usize)
    })()
    .context("result phase failed")?;
    times.result = start.elapsed().as_secs_f64();

    let stats = ProtocolStats {
        phases: times,
        conn: conn.stats(),
        gates: circuit.gates.len() as u64,
        nonlinear_gates: session.nonlinear_count(),
    };
    let header = SessionHeader {
        digest,
        num_wires: circuit.num_wires,
        num_gates: circuit.gates.len() as u32,
        has_constants: circuit.has_constants,
        xnor_free: circuit.xnor_free,
        streaming: config.streaming,
        party0_inputs: circuit.party0_inputs.clone(),
        party1_inputs: circuit.party1_inputs.clone(),
        outputs: circuit.outputs.clone(),
    };
    Ok(ProtocolRun { outputs, stats, header })
}

/// Run the evaluator side of the protocol over an established connection
///
/// The circuit arrives inline through the session header and gate stream;
/// `inputs` are the evaluator's own input bits in canonical order.
pub fn run_evaluator<R: Read>(
    conn: &mut Connection<R>,
    inputs: &[bool],
    config: &SessionConfig,
) -> Result<ProtocolRun> {
    let mut rng = ChaCha12Rng::from_seed(config.seed);
    let mut times = PhaseTimes::default();

    // init
    let start = Instant::now();
    let header = (|| -> Result<SessionHeader> {
        conn.send_u32(PROTOCOL_VERSION)?;
        conn.send_byte(ROLE_EVALUATOR)?;
        conn.send_u32(1)?;
        conn.flush()?;

        let peer_version = conn.receive_u32()?;
        if peer_version != PROTOCOL_VERSION {
            bail!("protocol version mismatch: ours {}, peer {}", PROTOCOL_VERSION, peer_version);
        }
        let peer_role = conn.receive_byte()?;
        if peer_role != ROLE_GARBLER {
            bail!("peer claims role {}, expected the garbler", peer_role);
        }
        let _peer_party = conn.receive_u32()?;

        let digest_bytes = conn.receive_data()?;
        if digest_bytes.len() != 32 {
            bail!("circuit digest has {} bytes, expected 32", digest_bytes.len());
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&digest_bytes);
        let num_wires = conn.receive_u32()?;
        let num_gates = conn.receive_u32()?;
        let flags = conn.receive_byte()?;
        let variant = conn.receive_byte()?;
        if variant != GARBLING_VARIANT_HALF_GATES {
            bail!("peer uses garbling variant {}, we support {}", variant, GARBLING_VARIANT_HALF_GATES);
        }
        let mode = conn.receive_byte()?;
        if mode != MODE_STREAMING && mode != MODE_BATCHED {
            bail!("peer announced unknown transfer mode {}", mode);
        }
        let _gc_interval = conn.receive_u32()?;
        let party0_inputs = receive_io_args(conn)?;
        let party1_inputs = receive_io_args(conn)?;
        let outputs = receive_io_args(conn)?;

        let header = SessionHeader {
            digest,
            num_wires,
            num_gates,
            has_constants: flags & 1 != 0,
            xnor_free: flags & 2 != 0,
            streaming: mode == MODE_STREAMING,
            party0_inputs,
            party1_inputs,
            outputs,
        };
        if inputs.len() != bit_count(&header.party1_inputs) as usize {
            bail!(
                "evaluator got {} input bits, circuit expects {}",
                inputs.len(),
                bit_count(&header.party1_inputs)
            );
        }
        Ok(header)
    })()
    .context("init phase failed")?;
    times.init = start.elapsed().as_secs_f64();

    let mut session = EvaluatorSession::new(header.num_wires);
    let garbler_bits = bit_count(&header.party0_inputs);
    let first_eval_wire = garbler_bits;

    // ot
    let start = Instant::now();
    (|| -> Result<()> {
        for wire in 0..garbler_bits {
            let label = conn.receive_label()?;
            session.set_active(wire, label)?;
        }
        if header.has_constants {
            let base = garbler_bits + inputs.len() as u32;
            let zero_label = conn.receive_label()?;
            let one_label = conn.receive_label()?;
            session.set_active(base, zero_label)?;
            session.set_active(base + 1, one_label)?;
        }

        if !inputs.is_empty() {
            conn.send_u32(OP_OT)?;
            conn.send_u32(first_eval_wire)?;
            conn.flush()?;
            let labels = if inputs.len() >= IKNP_THRESHOLD {
                let ext = IknpReceiver::setup(conn, &mut rng)?;
                let chosen = ext.extend(conn, inputs)?;
                ext.receive_wires(conn, inputs, &chosen)?
            } else {
                let ot = OtReceiver::init(conn)?;
                let mut labels = vec![Label::ZERO; inputs.len()];
                ot.receive(conn, &mut rng, inputs, &mut labels)?;
                labels
            };
            for (i, label) in labels.into_iter().enumerate() {
                session.set_active(first_eval_wire + i as u32, label)?;
            }
        }

        conn.send_u32(OP_RESULT)?;
        conn.send_u32(0)?;
        conn.flush()?;
        Ok(())
    })()
    .context("ot phase failed")?;
    times.ot = start.elapsed().as_secs_f64();

    // eval: consume the gate stream
    let start = Instant::now();
    (|| -> Result<()> {
        let progress = gate_progress(
            config.progress,
            header.num_gates as u64,
            "Evaluating circuit...",
        );
        if header.streaming {
            let mut source = ConnSource(conn);
            consume_gate_stream(
                &mut source,
                &mut session,
                header.num_wires,
                header.num_gates,
                progress.as_ref(),
            )?;
        } else {
            let frame = conn.receive_data()?;
            let mut source = SliceSource(&frame);
            consume_gate_stream(
                &mut source,
                &mut session,
                header.num_wires,
                header.num_gates,
                progress.as_ref(),
            )?;
            if !source.0.is_empty() {
                bail!("{} trailing bytes after the batched gate frame", source.0.len());
            }
        }
        if let Some(pb) = progress {
            pb.finish_with_message(format!(
                "Evaluated {} gates, {} tables",
                header.num_gates,
                session.nonlinear_count()
            ));
        }
        Ok(())
    })()
    .context("eval phase failed")?;
    times.garble = start.elapsed().as_secs_f64();

    // result
    let start = Instant::now();
    let outputs = (|| -> Result<Vec<bool>> {
        let output_bits = bit_count(&header.outputs);
        let first_output = header.num_wires - output_bits;
        let mut bits = Vec::with_capacity(output_bits as usize);
        for wire in first_output..header.num_wires {
            let label = conn.receive_label()?;
            let value = match conn.receive_byte()? {
                0 => false,
                1 => true,
                other => bail!("output truth bit must be 0 or 1, got {}", other),
            };
            let decode = crate::garble::OutputDecode { label, value };
            bits.push(session.decode_output(wire, &decode)?);
        }
        conn.send_data(&pack_bits(&bits))?;
        conn.flush()?;
        Ok(bits)
    })()
    .context("result phase failed")?;
    times.result = start.elapsed().as_secs_f64();

    let stats = ProtocolStats {
        phases: times,
        conn: conn.stats(),
        gates: header.num_gates as u64,
        nonlinear_gates: session.nonlinear_count(),
    };
    Ok(ProtocolRun { outputs, stats, header })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use std::net::{TcpListener, TcpStream};

    fn tcp_pair() -> (Connection<TcpStream>, Connection<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (
            Connection::tcp(client).unwrap(),
            Connection::tcp(server).unwrap(),
        )
    }

    fn run_both(
        circuit: &Circuit,
        p0: &[bool],
        p1: &[bool],
        garbler_cfg: SessionConfig,
        evaluator_cfg: SessionConfig,
    ) -> (ProtocolRun, ProtocolRun) {
        let (mut garbler_conn, mut evaluator_conn) = tcp_pair();
        let circuit = circuit.clone();
        let p0 = p0.to_vec();
        let garbler = std::thread::spawn(move || {
            run_garbler(&mut garbler_conn, &circuit, &p0, &garbler_cfg).unwrap()
        });
        let evaluator_run = run_evaluator(&mut evaluator_conn, p1, &evaluator_cfg).unwrap();
        let garbler_run = garbler.join().unwrap();
        (garbler_run, evaluator_run)
    }

    #[test]
    fn test_streamed_run_matches_plain() {
        let circuit = builder::adder(8).unwrap();
        let a = 0b1011_0101u64;
        let b = 0b0110_1100u64;
        let p0: Vec<bool> = (0..8).map(|i| a >> i & 1 == 1).collect();
        let p1: Vec<bool> = (0..8).map(|i| b >> i & 1 == 1).collect();
        let expected = circuit.eval_plain(&p0, &p1).unwrap();

        let cfg = SessionConfig::new([0x71; 32]);
        let (garbler_run, evaluator_run) = run_both(&circuit, &p0, &p1, cfg.clone(), cfg);
        assert_eq!(garbler_run.outputs, expected);
        assert_eq!(evaluator_run.outputs, expected);
        assert_eq!(
            garbler_run.stats.nonlinear_gates,
            evaluator_run.stats.nonlinear_gates
        );
    }

    #[test]
    fn test_streaming_and_batched_agree() {
        let circuit = builder::multiplier(8).unwrap();
        let p0: Vec<bool> = (0..8).map(|i| 0xAB_u64 >> i & 1 == 1).collect();
        let p1: Vec<bool> = (0..8).map(|i| 0x37_u64 >> i & 1 == 1).collect();

        let mut streamed_cfg = SessionConfig::new([0x72; 32]);
        streamed_cfg.streaming = true;
        let (streamed, _) = run_both(&circuit, &p0, &p1, streamed_cfg.clone(), streamed_cfg);

        let mut batched_cfg = SessionConfig::new([0x72; 32]);
        batched_cfg.streaming = false;
        let (batched, _) = run_both(&circuit, &p0, &p1, batched_cfg.clone(), batched_cfg);

        assert_eq!(streamed.outputs, batched.outputs);
    }

    #[test]
    fn test_gc_markers_shrink_both_stores() {
        // a tiny gc interval forces markers between nearly every gate
        let circuit = builder::multiplier(8).unwrap();
        let p0 = vec![true; 8];
        let p1 = vec![false; 8];
        let mut cfg = SessionConfig::new([0x73; 32]);
        cfg.gc_interval = 1;
        let expected = circuit.eval_plain(&p0, &p1).unwrap();
        let (garbler_run, evaluator_run) = run_both(&circuit, &p0, &p1, cfg.clone(), cfg);
        assert_eq!(garbler_run.outputs, expected);
        assert_eq!(evaluator_run.outputs, expected);
    }

    #[test]
    fn test_version_mismatch_aborts() {
        let (mut garbler_conn, mut evaluator_conn) = tcp_pair();
        let feeder = std::thread::spawn(move || {
            // a peer speaking a future protocol version
            garbler_conn.send_u32(PROTOCOL_VERSION + 9).unwrap();
            garbler_conn.send_byte(ROLE_GARBLER).unwrap();
            garbler_conn.send_u32(0).unwrap();
            garbler_conn.flush().unwrap();
            garbler_conn
        });
        let cfg = SessionConfig::new([0x74; 32]);
        let err = run_evaluator(&mut evaluator_conn, &[], &cfg).unwrap_err();
        assert!(err.to_string().contains("init phase failed"), "{err:#}");
        assert!(format!("{err:#}").contains("version mismatch"), "{err:#}");
        drop(feeder.join().unwrap());
    }

    #[test]
    fn test_garbler_rejects_wrong_input_width() {
        let circuit = builder::adder(8).unwrap();
        let (mut conn, _peer) = tcp_pair();
        let cfg = SessionConfig::new([0x75; 32]);
        let err = run_garbler(&mut conn, &circuit, &[true; 3], &cfg).unwrap_err();
        assert!(err.to_string().contains("input bits"), "{err}");
    }
}
