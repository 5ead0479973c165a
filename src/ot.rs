//! Chou-Orlandi style 1-out-of-2 oblivious transfer on 128-bit messages,
//! following the version from [ABKLX21].
//!
//! [ABKLX21]: https://eprint.iacr.org/2021/1218.pdf

use anyhow::{Result, bail};
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use std::io::Read;

use crate::conn::Connection;
use crate::label::{LABEL_BYTES, Label, WirePair};

const POINT_BYTES: usize = 32;

/// Derive a 16-byte message mask from the session key and the shared point
fn mask_for(session_key: &RistrettoPoint, shared: &RistrettoPoint) -> Label {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&session_key.compress().to_bytes());
    hasher.update(&shared.compress().to_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; LABEL_BYTES];
    bytes.copy_from_slice(&hash.as_bytes()[..LABEL_BYTES]);
    Label::new(bytes)
}

fn receive_point<R: Read>(conn: &mut Connection<R>) -> Result<RistrettoPoint> {
    let data = conn.receive_data()?;
    if data.len() != POINT_BYTES {
        bail!("expected a {}-byte curve point, got {} bytes", POINT_BYTES, data.len());
    }
    let mut bytes = [0u8; POINT_BYTES];
    bytes.copy_from_slice(&data);
    match CompressedRistretto(bytes).decompress() {
        Some(point) => Ok(point),
        None => bail!("peer sent an invalid curve point"),
    }
}

/// The party offering two labels per transfer, of which the receiver
/// recovers exactly one
#[derive(Debug)]
pub struct OtSender {
    private_key: Scalar,
    pub_key: RistrettoPoint,
    pub_key_times_secret: RistrettoPoint,
}

impl OtSender {
    /// Establish per-session material and publish the session key `A = yG`
    pub fn init<R, RNG>(conn: &mut Connection<R>, rng: &mut RNG) -> Result<Self>
    where
        R: Read,
        RNG: RngCore + CryptoRng,
    {
        let private_key = Scalar::random(rng);
        let pub_key = RISTRETTO_BASEPOINT_TABLE * &private_key;
        let pub_key_times_secret = pub_key * private_key;
        conn.send_data(&pub_key.compress().to_bytes())?;
        conn.flush()?;
        Ok(OtSender {
            private_key,
            pub_key,
            pub_key_times_secret,
        })
    }

    /// Run `wires.len()` transfers, masking both labels of each pair so the
    /// peer can unmask only its chosen one
    pub fn send<R: Read>(&self, conn: &mut Connection<R>, wires: &[WirePair]) -> Result<()> {
        if wires.is_empty() {
            bail!("base OT batch must not be empty");
        }
        // read the whole batch of blinded points before answering, so the
        // peer's buffered writes never interleave with ours
        let mut points = Vec::with_capacity(wires.len());
        for _ in 0..wires.len() {
            points.push(receive_point(conn)?);
        }
        for (pair, point) in wires.iter().zip(&points) {
            // k_b = H(A, yB - b * yA)
            let shared0 = point * self.private_key;
            let shared1 = shared0 - self.pub_key_times_secret;
            let e0 = pair.zero.xor(&mask_for(&self.pub_key, &shared0));
            let e1 = pair.one.xor(&mask_for(&self.pub_key, &shared1));
            conn.send_label(&e0)?;
            conn.send_label(&e1)?;
        }
        conn.flush()?;
        Ok(())
    }
}

/// The party choosing one of two labels per transfer without revealing the
/// choice
#[derive(Debug)]
pub struct OtReceiver {
    upstream_pub_key: RistrettoPoint,
}

impl OtReceiver {
    /// Read the sender's session key
    pub fn init<R: Read>(conn: &mut Connection<R>) -> Result<Self> {
        let upstream_pub_key = receive_point(conn)?;
        Ok(OtReceiver { upstream_pub_key })
    }

    /// Run `choices.len()` transfers, filling `out` with the chosen labels
    pub fn receive<R, RNG>(
        &self,
        conn: &mut Connection<R>,
        rng: &mut RNG,
        choices: &[bool],
        out: &mut [Label],
    ) -> Result<()>
    where
        R: Read,
        RNG: RngCore + CryptoRng,
    {
        if choices.is_empty() {
            bail!("base OT batch must not be empty");
        }
        if choices.len() != out.len() {
            bail!(
                "choice vector holds {} bits but output expects {}",
                choices.len(),
                out.len()
            );
        }

        let mut secrets = Vec::with_capacity(choices.len());
        for &choice in choices {
            let secret = Scalar::random(rng);
            let blinded = RISTRETTO_BASEPOINT_TABLE * &secret;
            let point = if choice {
                self.upstream_pub_key + blinded
            } else {
                blinded
            };
            conn.send_data(&point.compress().to_bytes())?;
            secrets.push(secret);
        }
        conn.flush()?;

        for ((&choice, secret), slot) in choices.iter().zip(&secrets).zip(out.iter_mut()) {
            let e0 = conn.receive_label()?;
            let e1 = conn.receive_label()?;
            let masked = if choice { e1 } else { e0 };
            // k = H(A, xA), independent of the choice bit
            let shared = self.upstream_pub_key * secret;
            *slot = masked.xor(&mask_for(&self.upstream_pub_key, &shared));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::WirePair;
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
    fn test_receiver_gets_chosen_labels() {
        let (mut sender_conn, mut receiver_conn) = tcp_pair();

        let mut sender_rng = ChaCha12Rng::from_seed([0x21; 32]);
        let mut receiver_rng = ChaCha12Rng::from_seed([0x22; 32]);
        let delta = Label::random_delta(&mut sender_rng);
        let wires: Vec<WirePair> = (0..32)
            .map(|_| WirePair::from_zero(Label::random(&mut sender_rng), &delta))
            .collect();
        let choices: Vec<bool> = (0..32).map(|i| i % 3 == 0).collect();

        let wires_for_thread = wires.clone();
        let sender = std::thread::spawn(move || {
            let ot = OtSender::init(&mut sender_conn, &mut sender_rng).unwrap();
            ot.send(&mut sender_conn, &wires_for_thread).unwrap();
        });

        let ot = OtReceiver::init(&mut receiver_conn).unwrap();
        let mut out = vec![Label::ZERO; choices.len()];
        ot.receive(&mut receiver_conn, &mut receiver_rng, &choices, &mut out)
            .unwrap();
        sender.join().unwrap();

        for ((pair, &choice), label) in wires.iter().zip(&choices).zip(&out) {
            assert_eq!(*label, pair.select(choice));
            assert_ne!(*label, pair.select(!choice));
        }
    }

    #[test]
    fn test_empty_batch_rejected() {
        let (mut sender_conn, mut receiver_conn) = tcp_pair();
        let mut rng = ChaCha12Rng::from_seed([0x23; 32]);

        let receiver = std::thread::spawn(move || {
            let ot = OtReceiver::init(&mut receiver_conn).unwrap();
            let mut rng = ChaCha12Rng::from_seed([0x24; 32]);
            ot.receive(&mut receiver_conn, &mut rng, &[], &mut [])
                .unwrap_err()
        });

        let ot = OtSender::init(&mut sender_conn, &mut rng).unwrap();
        let err = ot.send(&mut sender_conn, &[]).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
        let peer_err = receiver.join().unwrap();
        assert!(peer_err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_garbage_point_rejected() {
        let (mut sender_conn, mut receiver_conn) = tcp_pair();
        sender_conn.send_data(&[0xFFu8; 32]).unwrap();
        sender_conn.flush().unwrap();
        let err = OtReceiver::init(&mut receiver_conn).unwrap_err();
        assert!(err.to_string().contains("invalid curve point"));
    }
}
