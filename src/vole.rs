//! Packed vector oblivious linear evaluation over a prime field, built on
//! one IKNP batch.
//!
//! The receiver holds a scalar `x` and obtains the vector `u`; the sender
//! obtains vectors `y` and `r` with `u[j] = r[j] + x * y[j] (mod p)`. This
//! correlation feeds Beaver-triple preprocessing for arithmetic circuits;
//! it does not participate in the per-gate garbling path.

use anyhow::{Result, bail};
use rand::RngCore;
use std::io::Read;

use crate::conn::Connection;
use crate::constants::BASE_OT_COUNT;
use crate::label::Label;
use crate::ot_ext::{IknpReceiver, IknpSender, prg};

/// Field modulus, the Mersenne prime 2^61 - 1
pub const FIELD_PRIME: u64 = (1 << 61) - 1;

/// Bits needed to cover every field element
pub const FIELD_BITS: usize = 61;

pub(crate) fn field_add(a: u64, b: u64) -> u64 {
    ((a as u128 + b as u128) % FIELD_PRIME as u128) as u64
}

pub(crate) fn field_sub(a: u64, b: u64) -> u64 {
    ((a as u128 + FIELD_PRIME as u128 - b as u128) % FIELD_PRIME as u128) as u64
}

pub(crate) fn field_mul(a: u64, b: u64) -> u64 {
    ((a as u128 * b as u128) % FIELD_PRIME as u128) as u64
}

/// Expand a label into `len` field elements
fn expand_field_row(seed: &Label, len: usize) -> Vec<u64> {
    let bytes = prg(seed, len * 8);
    bytes
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("8 bytes")) % FIELD_PRIME)
        .collect()
}

/// Sender share of one VOLE batch
#[derive(Debug, Clone)]
pub struct VoleSenderOutput {
    /// Multiplier vector, drawn uniformly
    pub y: Vec<u64>,
    /// Blinding vector satisfying `u = r + x * y`
    pub r: Vec<u64>,
}

/// Run the sender side of one batch of `len` OLEs
///
/// Uses the extension's label pairs per scalar bit as Gilboa masks and
/// ships one field correction per (bit, index).
pub fn vole_send<R, RNG>(
    conn: &mut Connection<R>,
    ext: &IknpSender,
    rng: &mut RNG,
    len: usize,
) -> Result<VoleSenderOutput>
where
    R: Read,
    RNG: RngCore,
{
    if len == 0 {
        bail!("VOLE batch length must be positive");
    }
    let pairs = ext.extend(conn, BASE_OT_COUNT)?;

    let y: Vec<u64> = (0..len).map(|_| rng.next_u64() % FIELD_PRIME).collect();
    let mut r = vec![0u64; len];
    let mut corrections = Vec::with_capacity(FIELD_BITS * len * 8);

    for (bit, pair) in pairs.iter().take(FIELD_BITS).enumerate() {
        let masks0 = expand_field_row(&pair.zero, len);
        let masks1 = expand_field_row(&pair.one, len);
        let weight = (1u64 << bit) % FIELD_PRIME;
        for j in 0..len {
            // receiver picking bit 1 recovers t + 2^bit * y[j]
            let target = field_add(masks0[j], field_mul(weight, y[j]));
            let correction = field_sub(target, masks1[j]);
            corrections.extend_from_slice(&correction.to_be_bytes());
            r[j] = field_add(r[j], masks0[j]);
        }
    }
    conn.send_data(&corrections)?;
    conn.flush()?;

    // the receiver's per-bit share is masks0 + flag * 2^bit * y, so the
    // accumulated masks0 total is exactly the blinding vector
    Ok(VoleSenderOutput { y, r })
}

/// Run the receiver side of one batch of `len` OLEs with scalar `x`
pub fn vole_receive<R: Read>(
    conn: &mut Connection<R>,
    ext: &IknpReceiver,
    x: u64,
    len: usize,
) -> Result<Vec<u64>> {
    if len == 0 {
        bail!("VOLE batch length must be positive");
    }
    if x >= FIELD_PRIME {
        bail!("scalar {} is not a field element", x);
    }

    let mut flags = vec![false; BASE_OT_COUNT];
    for (bit, flag) in flags.iter_mut().take(FIELD_BITS).enumerate() {
        *flag = x >> bit & 1 == 1;
    }
    let chosen = ext.extend(conn, &flags)?;

    let corrections = conn.receive_data()?;
    if corrections.len() != FIELD_BITS * len * 8 {
        bail!(
            "correction frame has {} bytes, expected {}",
            corrections.len(),
            FIELD_BITS * len * 8
        );
    }

    let mut u = vec![0u64; len];
    for (bit, label) in chosen.iter().take(FIELD_BITS).enumerate() {
        let masks = expand_field_row(label, len);
        for j in 0..len {
            let share = if flags[bit] {
                let offset = (bit * len + j) * 8;
                let correction =
                    u64::from_be_bytes(corrections[offset..offset + 8].try_into().expect("8 bytes"));
                if correction >= FIELD_PRIME {
                    bail!("correction {} is not a field element", correction);
                }
                field_add(masks[j], correction)
            } else {
                masks[j]
            };
            u[j] = field_add(u[j], share);
        }
    }
    Ok(u)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;
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

    #[test]
    fn test_field_ops() {
        assert_eq!(field_add(FIELD_PRIME - 1, 2), 1);
        assert_eq!(field_sub(1, 2), FIELD_PRIME - 1);
        assert_eq!(field_mul(FIELD_PRIME - 1, FIELD_PRIME - 1), 1);
        assert_eq!(field_sub(0, 0), 0);
    }

    #[test]
    fn test_vole_correlation_holds() {
        let (mut sender_conn, mut receiver_conn) = tcp_pair();
        let len = 24usize;
        let x = 0x1234_5678_9ABC_u64 % FIELD_PRIME;

        let receiver = std::thread::spawn(move || {
            let mut rng = ChaCha12Rng::from_seed([0x81; 32]);
            let ext = IknpReceiver::setup(&mut receiver_conn, &mut rng).unwrap();
            vole_receive(&mut receiver_conn, &ext, x, len).unwrap()
        });

        let mut rng = ChaCha12Rng::from_seed([0x82; 32]);
        let ext = IknpSender::setup(&mut sender_conn, &mut rng).unwrap();
        let sender_out = vole_send(&mut sender_conn, &ext, &mut rng, len).unwrap();
        let u = receiver.join().unwrap();

        assert_eq!(u.len(), len);
        for j in 0..len {
            assert_eq!(
                u[j],
                field_add(sender_out.r[j], field_mul(x, sender_out.y[j])),
                "index {}", j
            );
        }
    }

    #[test]
    fn test_vole_zero_scalar() {
        let (mut sender_conn, mut receiver_conn) = tcp_pair();
        let len = 8usize;

        let receiver = std::thread::spawn(move || {
            let mut rng = ChaCha12Rng::from_seed([0x83; 32]);
            let ext = IknpReceiver::setup(&mut receiver_conn, &mut rng).unwrap();
            vole_receive(&mut receiver_conn, &ext, 0, len).unwrap()
        });

        let mut rng = ChaCha12Rng::from_seed([0x84; 32]);
        let ext = IknpSender::setup(&mut sender_conn, &mut rng).unwrap();
        let sender_out = vole_send(&mut sender_conn, &ext, &mut rng, len).unwrap();
        let u = receiver.join().unwrap();

        // with x = 0 the receiver holds exactly the blinding vector
        assert_eq!(u, sender_out.r);
    }

    #[test]
    fn test_zero_length_rejected() {
        let (mut sender_conn, mut receiver_conn) = tcp_pair();

        let receiver = std::thread::spawn(move || {
            let mut rng = ChaCha12Rng::from_seed([0x85; 32]);
            let ext = IknpReceiver::setup(&mut receiver_conn, &mut rng).unwrap();
            // rejected before any extension traffic
            vole_receive(&mut receiver_conn, &ext, 1, 0).unwrap_err()
        });

        let mut rng = ChaCha12Rng::from_seed([0x86; 32]);
        let ext = IknpSender::setup(&mut sender_conn, &mut rng).unwrap();
        let err = vole_send(&mut sender_conn, &ext, &mut rng, 0).unwrap_err();
        assert!(err.to_string().contains("must be positive"));
        let peer = receiver.join().unwrap();
        assert!(peer.to_string().contains("must be positive"));
    }

    #[test]
    fn test_oversized_scalar_rejected() {
        let (mut sender_conn, mut receiver_conn) = tcp_pair();

        let receiver = std::thread::spawn(move || {
            let mut rng = ChaCha12Rng::from_seed([0x87; 32]);
            let ext = IknpReceiver::setup(&mut receiver_conn, &mut rng).unwrap();
            vole_receive(&mut receiver_conn, &ext, FIELD_PRIME, 4).unwrap_err()
        });

        let mut rng = ChaCha12Rng::from_seed([0x88; 32]);
        let ext = IknpSender::setup(&mut sender_conn, &mut rng).unwrap();
        drop(ext);
        drop(sender_conn);
        let peer = receiver.join().unwrap();
        assert!(peer.to_string().contains("not a field element"));
    }
}
