use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of a wire label in bytes (128 bits, the security parameter)
pub const LABEL_BYTES: usize = 16;

/// 128-bit wire label for garbled circuits
///
/// Each wire carries one of two labels standing in for the cleartext bit.
/// The low bit of the first byte is the permute bit used to index garbled
/// table rows without trial decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Label([u8; LABEL_BYTES]);

impl Label {
    /// The all-zero label, the identity of the XOR algebra
    pub const ZERO: Label = Label([0u8; LABEL_BYTES]);

    /// Create a new wire label from 16 bytes
    pub fn new(bytes: [u8; LABEL_BYTES]) -> Self {
        Label(bytes)
    }

    /// Generate a random wire label using the provided RNG
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; LABEL_BYTES];
        rng.fill_bytes(&mut bytes);
        Label(bytes)
    }

    /// Generate a random free-XOR offset with the permute bit forced to 1,
    /// so the two labels of every wire have complementary permute bits
    pub fn random_delta<R: RngCore>(rng: &mut R) -> Self {
        let mut delta = Self::random(rng);
        delta.0[0] |= 1;
        delta
    }

    /// XOR this wire label with another wire label
    pub fn xor(&self, other: &Label) -> Label {
        let mut result = [0u8; LABEL_BYTES];
        for (i, result_byte) in result.iter_mut().enumerate() {
            *result_byte = self.0[i] ^ other.0[i];
        }
        Label(result)
    }

    /// The permute bit: low bit of the first 64-bit half
    pub fn permute_bit(&self) -> bool {
        self.0[0] & 1 == 1
    }

    /// Get the raw bytes of this wire label
    pub fn as_bytes(&self) -> &[u8; LABEL_BYTES] {
        &self.0
    }

    /// Constant-time equality for secret-carrying comparisons
    ///
    /// Folds the XOR of both values down to one byte so the comparison does
    /// not branch on label contents.
    pub fn ct_eq(&self, other: &Label) -> bool {
        let mut acc = 0u8;
        for i in 0..LABEL_BYTES {
            acc |= self.0[i] ^ other.0[i];
        }
        acc == 0
    }
}

/// The two labels of one wire: `one` always equals `zero ⊕ Δ`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirePair {
    /// Label standing in for cleartext 0
    pub zero: Label,
    /// Label standing in for cleartext 1
    pub one: Label,
}

impl WirePair {
    /// Build the pair for a 0-label under the global offset
    pub fn from_zero(zero: Label, delta: &Label) -> Self {
        WirePair {
            zero,
            one: zero.xor(delta),
        }
    }

    /// Select the label for a cleartext bit
    pub fn select(&self, bit: bool) -> Label {
        if bit { self.one } else { self.zero }
    }
}
