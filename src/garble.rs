//! Garbling primitives: free XOR, point-and-permute and the two-row
//! half-gates construction from ZRE15 <https://eprint.iacr.org/2014/756>.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use serde::{Deserialize, Serialize};

use crate::label::{LABEL_BYTES, Label};

/// Fixed AES key for the correlation-robust hash; both parties share it
const HASH_KEY: [u8; LABEL_BYTES] = [
    0x9d, 0x2c, 0x4f, 0x81, 0x07, 0xe5, 0x3a, 0xc6,
    0x58, 0xb0, 0x1e, 0x72, 0xfa, 0x44, 0x8b, 0x13,
];

/// Number of ciphertext rows per garbled AND/OR gate
pub const TABLE_ROWS: usize = 2;

/// Ciphertext rows of one garbled non-linear gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarbledTable {
    /// Generator row followed by evaluator row
    pub rows: [Label; TABLE_ROWS],
}

/// Tweakable correlation-robust hash over fixed-key AES
///
/// `H(L, t) = E(L ⊕ T) ⊕ L ⊕ T` with `T` the big-endian tweak block, the
/// Matyas-Meyer-Oseas shape used throughout garbling.
#[derive(Debug, Clone)]
pub struct GateHasher {
    cipher: Aes128,
}

impl GateHasher {
    /// Instantiate with the shared fixed key
    pub fn new() -> Self {
        GateHasher {
            cipher: Aes128::new(GenericArray::from_slice(&HASH_KEY)),
        }
    }

    /// Hash a label under a tweak
    pub fn hash(&self, label: &Label, tweak: u64) -> Label {
        let tweak_block = Label::new((tweak as u128).to_be_bytes());
        let masked = label.xor(&tweak_block);
        let mut block = GenericArray::clone_from_slice(masked.as_bytes());
        self.cipher.encrypt_block(&mut block);
        let mut out = [0u8; LABEL_BYTES];
        out.copy_from_slice(&block);
        Label::new(out).xor(&masked)
    }
}

impl Default for GateHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Garble one AND gate at non-linear index `t`
///
/// Returns the output 0-label and the two ciphertext rows. Tweaks `2t` and
/// `2t+1` keep every hash invocation unique across the circuit.
pub fn garble_and(
    hasher: &GateHasher,
    a0: &Label,
    b0: &Label,
    delta: &Label,
    t: u64,
) -> (Label, GarbledTable) {
    let j = 2 * t;
    let k = 2 * t + 1;
    let a1 = a0.xor(delta);
    let b1 = b0.xor(delta);
    let pa = a0.permute_bit();
    let pb = b0.permute_bit();

    let ha0 = hasher.hash(a0, j);
    let ha1 = hasher.hash(&a1, j);
    let hb0 = hasher.hash(b0, k);
    let hb1 = hasher.hash(&b1, k);

    // generator half-gate
    let mut row_g = ha0.xor(&ha1);
    if pb {
        row_g = row_g.xor(delta);
    }
    let w_g = if pa { ha0.xor(&row_g) } else { ha0 };

    // evaluator half-gate
    let row_e = hb0.xor(&hb1).xor(a0);
    let w_e = if pb { hb0.xor(&row_e).xor(a0) } else { hb0 };

    (w_g.xor(&w_e), GarbledTable { rows: [row_g, row_e] })
}

/// Recover the active output label of an AND gate from its two active
/// input labels and the ciphertext rows
pub fn eval_and(
    hasher: &GateHasher,
    a: &Label,
    b: &Label,
    table: &GarbledTable,
    t: u64,
) -> Label {
    let sa = a.permute_bit();
    let sb = b.permute_bit();
    let ha = hasher.hash(a, 2 * t);
    let hb = hasher.hash(b, 2 * t + 1);
    let w_g = if sa { ha.xor(&table.rows[0]) } else { ha };
    let w_e = if sb { hb.xor(&table.rows[1]).xor(a) } else { hb };
    w_g.xor(&w_e)
}

/// Garble one OR gate as a relabeled AND: `a OR b = NOT(AND(NOT a, NOT b))`
///
/// Inverting a wire costs nothing for the garbler (swap which label stands
/// for 0), so the evaluator runs the plain AND recipe on the same rows.
pub fn garble_or(
    hasher: &GateHasher,
    a0: &Label,
    b0: &Label,
    delta: &Label,
    t: u64,
) -> (Label, GarbledTable) {
    let (not_out0, table) = garble_and(hasher, &a0.xor(delta), &b0.xor(delta), delta, t);
    (not_out0.xor(delta), table)
}

/// Decode information for one output wire: a label and the truth value it
/// stands for
#[derive(Debug, Clone, Copy)]
pub struct OutputDecode {
    /// One of the wire's two labels
    pub label: Label,
    /// The cleartext bit that label encodes
    pub value: bool,
}

impl OutputDecode {
    /// Map an active label to its cleartext bit
    ///
    /// Equality with the published label yields its truth value, any other
    /// (honest) active label is the complement.
    pub fn decode(&self, active: &Label) -> bool {
        if self.label.ct_eq(active) { self.value } else { !self.value }
    }
}
