//! End-to-end protocol tests: both parties run over a real socket pair and
//! the decoded outputs are compared against cleartext evaluation.

use anyhow::Result;
use std::net::{TcpListener, TcpStream};

use twopc::builder;
use twopc::circuit::{Circuit, decode_values, encode_values};
use twopc::conn::Connection;
use twopc::protocol::{ProtocolRun, SessionConfig, run_evaluator, run_garbler};

// Fixed seeds for reproducible tests
const GARBLER_SEED: [u8; 32] = [42; 32];
const EVALUATOR_SEED: [u8; 32] = [43; 32];

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

/// Run the full protocol for one circuit and input pair, in the given mode
fn run_protocol(
    circuit: &Circuit,
    garbler_values: &[i128],
    evaluator_values: &[i128],
    streaming: bool,
) -> Result<(ProtocolRun, ProtocolRun)> {
    let p0 = encode_values(&circuit.party0_inputs, garbler_values)?;
    let p1 = encode_values(&circuit.party1_inputs, evaluator_values)?;

    let (mut garbler_conn, mut evaluator_conn) = tcp_pair();
    let garbler_circuit = circuit.clone();
    let garbler = std::thread::spawn(move || {
        let mut config = SessionConfig::new(GARBLER_SEED);
        config.streaming = streaming;
        let run = run_garbler(&mut garbler_conn, &garbler_circuit, &p0, &config)?;
        garbler_conn.close()?;
        Ok::<_, anyhow::Error>(run)
    });

    let config = SessionConfig::new(EVALUATOR_SEED);
    let evaluator_run = run_evaluator(&mut evaluator_conn, &p1, &config)?;
    evaluator_conn.close()?;
    let garbler_run = garbler.join().expect("garbler thread")?;
    Ok((garbler_run, evaluator_run))
}

/// Protocol output must match plain evaluation and be identical on both
/// parties
fn check_against_plain(
    circuit: &Circuit,
    garbler_values: &[i128],
    evaluator_values: &[i128],
) -> Vec<i128> {
    let p0 = encode_values(&circuit.party0_inputs, garbler_values).unwrap();
    let p1 = encode_values(&circuit.party1_inputs, evaluator_values).unwrap();
    let expected_bits = circuit.eval_plain(&p0, &p1).unwrap();

    let (garbler_run, evaluator_run) =
        run_protocol(circuit, garbler_values, evaluator_values, true).unwrap();
    assert_eq!(garbler_run.outputs, expected_bits);
    assert_eq!(evaluator_run.outputs, expected_bits);

    decode_values(&circuit.outputs, &garbler_run.outputs).unwrap()
}

#[test]
fn test_millionaires_int64() {
    let circuit = builder::millionaires(64).unwrap();
    assert_eq!(check_against_plain(&circuit, &[750_000], &[800_000]), vec![0]);
    assert_eq!(check_against_plain(&circuit, &[900_000], &[800_000]), vec![1]);
}

#[test]
fn test_max_int4() {
    let circuit = builder::max(4).unwrap();
    assert_eq!(check_against_plain(&circuit, &[5], &[3]), vec![5]);
    assert_eq!(check_against_plain(&circuit, &[3], &[5]), vec![5]);
}

#[test]
fn test_subtraction_uint64() {
    let circuit = builder::subtractor(64).unwrap();
    assert_eq!(
        check_against_plain(&circuit, &[0x0000_FFFF], &[0x0000_0001]),
        vec![0x0000_FFFE]
    );
}

#[test]
fn test_multiplication_uint32() {
    let circuit = builder::multiplier(32).unwrap();
    assert_eq!(
        check_against_plain(&circuit, &[0x0000_FFFF], &[0x0000_1111]),
        vec![0x1110_EEEF]
    );
}

#[test]
fn test_adder_with_iknp_input_delivery() {
    // 128 evaluator input bits push the input-label transfer onto the
    // extension path
    let circuit = builder::adder(128).unwrap();
    let a = 0x0123_4567_89AB_CDEFi128;
    let b = 0x0FED_CBA9_8765_4321i128;
    assert_eq!(check_against_plain(&circuit, &[a], &[b]), vec![a + b]);
}

#[test]
fn test_streaming_and_batched_runs_agree() {
    let circuit = builder::multiplier(16).unwrap();
    let (streamed, _) = run_protocol(&circuit, &[0x0123], &[0x0456], true).unwrap();
    let (batched, _) = run_protocol(&circuit, &[0x0123], &[0x0456], false).unwrap();
    assert_eq!(streamed.outputs, batched.outputs);
    assert_eq!(
        streamed.stats.nonlinear_gates,
        batched.stats.nonlinear_gates
    );
}

#[test]
fn test_output_values_agree_between_parties() {
    let circuit = builder::max(16).unwrap();
    let (garbler_run, evaluator_run) = run_protocol(&circuit, &[-3], &[-17], true).unwrap();
    assert_eq!(garbler_run.outputs, evaluator_run.outputs);
    let values = decode_values(&circuit.outputs, &evaluator_run.outputs).unwrap();
    assert_eq!(values, vec![-3]);
}

#[test]
fn test_transfer_counters_match_across_parties() {
    let circuit = builder::adder(32).unwrap();
    let (garbler_run, evaluator_run) = run_protocol(&circuit, &[7], &[35], true).unwrap();
    assert_eq!(
        garbler_run.stats.conn.sent,
        evaluator_run.stats.conn.received
    );
    assert_eq!(
        garbler_run.stats.conn.received,
        evaluator_run.stats.conn.sent
    );
}

#[test]
fn test_circuit_file_round_trip_through_protocol() {
    // serialize, reload, then run the reloaded circuit
    let circuit = builder::subtractor(16).unwrap();
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut handle = std::fs::File::create(file.path()).unwrap();
    circuit.write_to(&mut handle).unwrap();
    drop(handle);

    let mut handle = std::fs::File::open(file.path()).unwrap();
    let reloaded = Circuit::read_from(&mut handle).unwrap();
    assert_eq!(reloaded.digest().unwrap(), circuit.digest().unwrap());

    assert_eq!(check_against_plain(&reloaded, &[500], &[123]), vec![377]);
}

#[test]
fn test_random_inputs_against_plain() {
    use rand::{RngCore, SeedableRng};
    let mut rng = rand_chacha::ChaCha12Rng::from_seed([7; 32]);
    let circuit = builder::adder(16).unwrap();
    for _ in 0..4 {
        let a = (rng.next_u32() & 0xFFFF) as i128;
        let b = (rng.next_u32() & 0xFFFF) as i128;
        assert_eq!(
            check_against_plain(&circuit, &[a], &[b]),
            vec![(a + b) & 0xFFFF]
        );
    }
}
