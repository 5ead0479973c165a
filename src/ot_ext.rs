//! IKNP OT extension: k = 128 base OTs amortized into arbitrarily many
//! correlated transfers at AES-CTR cost.

use anyhow::{Result, bail};
use rand::{CryptoRng, RngCore};
use std::io::Read;

use crate::conn::Connection;
use crate::constants::BASE_OT_COUNT;
use crate::label::{LABEL_BYTES, Label, WirePair};
use crate::ot::{OtReceiver, OtSender};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

/// Expand a label seed into `len` pseudorandom bytes with AES-CTR and a
/// zero IV
pub(crate) fn prg(seed: &Label, len: usize) -> Vec<u8> {
    use ctr::cipher::{KeyIvInit, StreamCipher};
    let mut out = vec![0u8; len];
    let mut cipher = Aes128Ctr::new(seed.as_bytes().into(), (&[0u8; LABEL_BYTES]).into());
    cipher.apply_keystream(&mut out);
    out
}

fn row_bit(row: &[u8], j: usize) -> bool {
    row[j >> 3] >> (j & 7) & 1 == 1
}

fn set_label_bit(bytes: &mut [u8; LABEL_BYTES], i: usize, bit: bool) {
    if bit {
        bytes[i >> 3] |= 1 << (i & 7);
    }
}

/// Extension sender: ends up with a `WirePair` per transfer
///
/// Runs the base OT as receiver, with its k secret choice bits selecting
/// one seed of every base pair.
#[derive(Debug)]
pub struct IknpSender {
    choice_bits: Vec<bool>,
    seeds: Vec<Label>,
}

impl IknpSender {
    /// Consume k base OTs as their receiver
    pub fn setup<R, RNG>(conn: &mut Connection<R>, rng: &mut RNG) -> Result<Self>
    where
        R: Read,
        RNG: RngCore + CryptoRng,
    {
        let choice_bits: Vec<bool> = (0..BASE_OT_COUNT)
            .map(|_| rng.next_u32() & 1 == 1)
            .collect();
        let base = OtReceiver::init(conn)?;
        let mut seeds = vec![Label::ZERO; BASE_OT_COUNT];
        base.receive(conn, rng, &choice_bits, &mut seeds)?;
        Ok(IknpSender { choice_bits, seeds })
    }

    /// Produce `n` label pairs from one matrix exchange
    pub fn extend<R: Read>(&self, conn: &mut Connection<R>, n: usize) -> Result<Vec<WirePair>> {
        if n == 0 {
            bail!("extension batch size must be positive");
        }
        let row_bytes = n.div_ceil(8);
        let u = conn.receive_data()?;
        if u.len() < BASE_OT_COUNT * row_bytes {
            bail!(
                "extension matrix too short: {} bytes, expected {}",
                u.len(),
                BASE_OT_COUNT * row_bytes
            );
        }

        // after unmasking, every row equals the peer's T0 row
        let mut rows = Vec::with_capacity(BASE_OT_COUNT);
        for i in 0..BASE_OT_COUNT {
            let mut row = prg(&self.seeds[i], row_bytes);
            if self.choice_bits[i] {
                let u_row = &u[i * row_bytes..(i + 1) * row_bytes];
                for (byte, &mask) in row.iter_mut().zip(u_row) {
                    *byte ^= mask;
                }
            }
            rows.push(row);
        }

        let mut pairs = Vec::with_capacity(n);
        for j in 0..n {
            let mut zero = [0u8; LABEL_BYTES];
            let mut one = [0u8; LABEL_BYTES];
            for (i, row) in rows.iter().enumerate() {
                let bit = row_bit(row, j);
                let u_row = &u[i * row_bytes..(i + 1) * row_bytes];
                set_label_bit(&mut zero, i, bit);
                set_label_bit(&mut one, i, bit ^ row_bit(u_row, j));
            }
            pairs.push(WirePair {
                zero: Label::new(zero),
                one: Label::new(one),
            });
        }
        Ok(pairs)
    }

    /// Derandomize: deliver concrete wire labels over the random pairs by
    /// sending one correction pair per transfer
    pub fn send_wires<R: Read>(
        &self,
        conn: &mut Connection<R>,
        wires: &[WirePair],
        pairs: &[WirePair],
    ) -> Result<()> {
        if wires.len() != pairs.len() {
            bail!(
                "have {} wire pairs but {} extension pairs",
                wires.len(),
                pairs.len()
            );
        }
        for (wire, pair) in wires.iter().zip(pairs) {
            conn.send_label(&wire.zero.xor(&pair.zero))?;
            conn.send_label(&wire.one.xor(&pair.one))?;
        }
        conn.flush()?;
        Ok(())
    }
}

/// Extension receiver: supplies a flag per transfer and recovers the
/// matching label of the sender's pair
///
/// Runs the base OT as sender with k fresh seed pairs.
#[derive(Debug)]
pub struct IknpReceiver {
    seed_pairs: Vec<WirePair>,
}

impl IknpReceiver {
    /// Serve k base OTs as their sender
    pub fn setup<R, RNG>(conn: &mut Connection<R>, rng: &mut RNG) -> Result<Self>
    where
        R: Read,
        RNG: RngCore + CryptoRng,
    {
        let seed_pairs: Vec<WirePair> = (0..BASE_OT_COUNT)
            .map(|_| WirePair {
                zero: Label::random(rng),
                one: Label::random(rng),
            })
            .collect();
        let base = OtSender::init(conn, rng)?;
        base.send(conn, &seed_pairs)?;
        Ok(IknpReceiver { seed_pairs })
    }

    /// Recover one label per flag from one matrix exchange
    pub fn extend<R: Read>(&self, conn: &mut Connection<R>, flags: &[bool]) -> Result<Vec<Label>> {
        let n = flags.len();
        if n == 0 {
            bail!("extension flag vector must not be empty");
        }
        let row_bytes = n.div_ceil(8);

        let mut t0 = Vec::with_capacity(BASE_OT_COUNT);
        let mut t1 = Vec::with_capacity(BASE_OT_COUNT);
        for pair in &self.seed_pairs {
            t0.push(prg(&pair.zero, row_bytes));
            t1.push(prg(&pair.one, row_bytes));
        }

        let mut u = Vec::with_capacity(BASE_OT_COUNT * row_bytes);
        for (row0, row1) in t0.iter().zip(&t1) {
            u.extend(row0.iter().zip(row1).map(|(&a, &b)| a ^ b));
        }
        conn.send_data(&u)?;
        conn.flush()?;

        let mut chosen = Vec::with_capacity(n);
        for (j, &flag) in flags.iter().enumerate() {
            let source = if flag { &t1 } else { &t0 };
            let mut bytes = [0u8; LABEL_BYTES];
            for (i, row) in source.iter().enumerate() {
                set_label_bit(&mut bytes, i, row_bit(row, j));
            }
            chosen.push(Label::new(bytes));
        }
        Ok(chosen)
    }

    /// Derandomize: apply the sender's correction pairs to the recovered
    /// extension labels
    pub fn receive_wires<R: Read>(
        &self,
        conn: &mut Connection<R>,
        flags: &[bool],
        chosen: &[Label],
    ) -> Result<Vec<Label>> {
        if flags.len() != chosen.len() {
            bail!(
                "have {} flags but {} extension labels",
                flags.len(),
                chosen.len()
            );
        }
        let mut labels = Vec::with_capacity(chosen.len());
        for (&flag, label) in flags.iter().zip(chosen) {
            let c0 = conn.receive_label()?;
            let c1 = conn.receive_label()?;
            let correction = if flag { c1 } else { c0 };
            labels.push(correction.xor(label));
        }
        Ok(labels)
    }
}
