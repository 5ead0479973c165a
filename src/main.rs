use anyhow::{Context, Result, bail};
use clap::Parser;
use rand::RngCore;
use rand::rngs::OsRng;
use std::fs::File;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};

use twopc::builder;
use twopc::circuit::{Circuit, decode_values, encode_values};
use twopc::conn::Connection;
use twopc::liveness::analyze_wire_usage;
use twopc::protocol::{ProtocolRun, SessionConfig, run_evaluator, run_garbler};

/// Two-party computation over garbled circuits
#[derive(Parser, Debug)]
#[command(name = "twopc")]
#[command(about = "Streaming two-party computation over garbled circuits")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Garble a circuit and drive the protocol against a listening evaluator
    Garble {
        /// Evaluator address to dial (host:port)
        #[arg(short = 'c', long = "connect")]
        connect: String,
        /// Comma-separated input values for this party
        #[arg(short = 'i', long = "inputs")]
        inputs: String,
        /// File containing a 32-byte seed for deterministic runs
        #[arg(short = 's', long = "seed-file")]
        seed_file: Option<PathBuf>,
        /// Send the whole gate stream as one frame instead of streaming
        #[arg(long = "batched")]
        batched: bool,
        /// Print the run statistics as JSON
        #[arg(long = "stats")]
        stats: bool,
        /// Circuit file to evaluate
        circuit: PathBuf,
    },
    /// Listen for a garbler and evaluate its circuit
    Evaluate {
        /// Address to listen on (host:port)
        #[arg(short = 'l', long = "listen")]
        listen: String,
        /// Comma-separated input values for this party
        #[arg(short = 'i', long = "inputs")]
        inputs: String,
        /// File containing a 32-byte seed for deterministic runs
        #[arg(short = 's', long = "seed-file")]
        seed_file: Option<PathBuf>,
        /// Print the run statistics as JSON
        #[arg(long = "stats")]
        stats: bool,
        /// Optional circuit file to cross-check against the peer's digest
        circuit: Option<PathBuf>,
    },
    /// Write one of the stock circuits to a file
    New {
        /// Circuit family: millionaires, max, adder, subtractor or multiplier
        kind: String,
        /// Word width in bits
        #[arg(short = 'b', long = "bits", default_value_t = 64)]
        bits: u32,
        /// Output file
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Print gate statistics of a circuit file as JSON
    Stats {
        /// Circuit file to analyze
        circuit: PathBuf,
    },
    /// Analyze wire usage patterns and connectivity
    WireAnalysis {
        /// Output file for wire analysis (default: <input>.wire_analysis)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Circuit file to analyze
        circuit: PathBuf,
    },
    /// Evaluate a circuit in cleartext with both parties' inputs
    Check {
        /// Comma-separated party-0 input values
        #[arg(long = "inputs")]
        inputs: String,
        /// Comma-separated party-1 input values
        #[arg(long = "inputs2")]
        inputs2: String,
        /// Circuit file to evaluate
        circuit: PathBuf,
    },
}

fn load_circuit(path: &Path) -> Result<Circuit> {
    let mut file =
        File::open(path).with_context(|| format!("opening circuit file {}", path.display()))?;
    Circuit::read_from(&mut file)
        .with_context(|| format!("parsing circuit file {}", path.display()))
}

fn parse_values(text: &str) -> Result<Vec<i128>> {
    text.split(',')
        .map(|item| {
            let item = item.trim();
            if let Some(hex) = item.strip_prefix("0x") {
                i128::from_str_radix(hex, 16).with_context(|| format!("parsing input '{}'", item))
            } else {
                item.parse()
                    .with_context(|| format!("parsing input '{}'", item))
            }
        })
        .collect()
}

fn load_seed(seed_file: Option<&Path>) -> Result<[u8; 32]> {
    let mut seed = [0u8; 32];
    match seed_file {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("reading seed file {}", path.display()))?;
            if data.len() < 32 {
                bail!("seed file {} holds {} bytes, need 32", path.display(), data.len());
            }
            seed.copy_from_slice(&data[..32]);
        }
        None => {
            OsRng
                .try_fill_bytes(&mut seed)
                .context("reading entropy for the session seed")?;
        }
    }
    Ok(seed)
}

fn print_outputs(run: &ProtocolRun) -> Result<()> {
    let values = decode_values(&run.header.outputs, &run.outputs)?;
    for (arg, value) in run.header.outputs.iter().zip(values) {
        println!("{} = {}", arg.name, value);
    }
    Ok(())
}

fn print_stats(run: &ProtocolRun) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&run.stats)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Garble { connect, inputs, seed_file, batched, stats, circuit } => {
            let circuit = load_circuit(&circuit)?;
            let values = parse_values(&inputs)?;
            let bits = encode_values(&circuit.party0_inputs, &values)?;
            let mut config = SessionConfig::new(load_seed(seed_file.as_deref())?);
            config.streaming = !batched;
            config.progress = true;

            let stream = TcpStream::connect(&connect)
                .with_context(|| format!("connecting to evaluator at {}", connect))?;
            let mut conn = Connection::tcp(stream)?;
            let run = run_garbler(&mut conn, &circuit, &bits, &config)?;
            conn.close()?;

            print_outputs(&run)?;
            if stats {
                print_stats(&run)?;
            }
        }
        Commands::Evaluate { listen, inputs, seed_file, stats, circuit } => {
            let circuit_path = circuit;
            let local_circuit = circuit_path
                .as_deref()
                .map(load_circuit)
                .transpose()?;
            let values = parse_values(&inputs)?;
            let mut config = SessionConfig::new(load_seed(seed_file.as_deref())?);
            config.progress = true;

            let listener = TcpListener::bind(&listen)
                .with_context(|| format!("listening on {}", listen))?;
            println!("listening on {}", listen);
            let (stream, peer) = listener.accept().context("accepting the garbler")?;
            println!("garbler connected from {}", peer);
            let mut conn = Connection::tcp(stream)?;

            // typed encoding needs the input descriptors, which arrive in
            // the session header unless a local circuit file supplies them
            let bits = match &local_circuit {
                Some(circuit) => encode_values(&circuit.party1_inputs, &values)?,
                None => {
                    // without a circuit file, inputs must be given in bits
                    values
                        .iter()
                        .map(|&v| match v {
                            0 => Ok(false),
                            1 => Ok(true),
                            other => bail!(
                                "without a circuit file, inputs must be bits (0/1), got {}",
                                other
                            ),
                        })
                        .collect::<Result<Vec<bool>>>()?
                }
            };

            let run = run_evaluator(&mut conn, &bits, &config)?;
            conn.close()?;

            if let Some(circuit) = &local_circuit {
                if circuit.digest()? != run.header.digest {
                    bail!(
                        "peer's circuit digest does not match {}",
                        circuit_path.as_deref().unwrap_or(Path::new("?")).display()
                    );
                }
            }
            print_outputs(&run)?;
            if stats {
                print_stats(&run)?;
            }
        }
        Commands::New { kind, bits, output } => {
            let circuit = match kind.as_str() {
                "millionaires" => builder::millionaires(bits)?,
                "max" => builder::max(bits)?,
                "adder" => builder::adder(bits)?,
                "subtractor" => builder::subtractor(bits)?,
                "multiplier" => builder::multiplier(bits)?,
                other => bail!("unknown circuit family '{}'", other),
            };
            let mut file = File::create(&output)
                .with_context(|| format!("creating circuit file {}", output.display()))?;
            circuit.write_to(&mut file)?;
            println!(
                "wrote {} ({} gates, {} wires)",
                output.display(),
                circuit.gates.len(),
                circuit.num_wires
            );
        }
        Commands::Stats { circuit } => {
            let circuit = load_circuit(&circuit)?;
            let stats = circuit.stats();
            let document = serde_json::json!({
                "num_wires": circuit.num_wires,
                "num_gates": stats.total(),
                "xor": stats.xor,
                "xnor": stats.xnor,
                "and": stats.and,
                "or": stats.or,
                "inv": stats.inv,
                "non_xor": stats.non_xor(circuit.xnor_free),
                "garbled": stats.garbled(),
            });
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Commands::WireAnalysis { output, circuit } => {
            let path = circuit;
            let circuit = load_circuit(&path)?;
            let report = analyze_wire_usage(&circuit)?;

            let output_path = output.unwrap_or_else(|| {
                let mut path = path.clone();
                path.set_extension("wire_analysis");
                path
            });
            report.save_binary(&output_path)?;

            println!("Wire analysis saved to: {}", output_path.display());
            println!("Total wires: {}", report.total_wires);
            println!("Primary inputs: {}", report.primary_inputs);
            println!("Intermediate wires: {}", report.intermediate_wires);
            println!("Primary outputs: {}", report.primary_outputs);
        }
        Commands::Check { inputs, inputs2, circuit } => {
            let circuit = load_circuit(&circuit)?;
            let p0 = encode_values(&circuit.party0_inputs, &parse_values(&inputs)?)?;
            let p1 = encode_values(&circuit.party1_inputs, &parse_values(&inputs2)?)?;
            let outputs = circuit.eval_plain(&p0, &p1)?;
            let values = decode_values(&circuit.outputs, &outputs)?;
            for (arg, value) in circuit.outputs.iter().zip(values) {
                println!("{} = {}", arg.name, value);
            }
        }
    }
    Ok(())
}
