//! Per-chunk nonce derivation
//!
//! Chunk `i` is sealed under the initial nonce plus `i`, treating the whole
//! nonce buffer as one big-endian unsigned integer. The counter wraps to zero
//! after all bytes are 0xFF; at 96 bits that is far beyond any dump size.

use crate::NONCE_SIZE;

/// The nonce counter for one stream. One sequence per (key, initial nonce).
#[derive(Clone, PartialEq, Eq)]
pub struct NonceSequence {
    current: [u8; NONCE_SIZE],
    issued: u64,
}

impl NonceSequence {
    pub fn new(initial: [u8; NONCE_SIZE]) -> Self {
        Self {
            current: initial,
            issued: 0,
        }
    }

    /// Nonce for the next chunk
    pub fn current(&self) -> &[u8; NONCE_SIZE] {
        &self.current
    }

    /// Number of nonces consumed so far (= index of the next chunk)
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Move to the next nonce.
    pub fn advance(&mut self) {
        increment_be(&mut self.current);
        self.issued += 1;
    }
}

impl std::fmt::Debug for NonceSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceSequence")
            .field("issued", &self.issued)
            .finish_non_exhaustive()
    }
}

/// Add one to `buf` as a big-endian integer, carrying through every byte.
pub fn increment_be(buf: &mut [u8]) {
    for byte in buf.iter_mut().rev() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            return;
        }
    }
}

/// Nonce used for chunk `index` of a stream that started at `initial`.
pub fn nonce_at(initial: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut out = *initial;
    let mut carry = index as u128;
    for byte in out.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = *byte as u128 + (carry & 0xFF);
        *byte = sum as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
    out
}
