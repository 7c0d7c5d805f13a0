//! Forging order within a round.
//!
//! The active set is permuted with a seed chain derived from the round
//! number, so every node computes the same order without communication.

use sha2::{Digest, Sha256};

/// Deterministically permute `delegates` for `round`.
///
/// The seed starts as SHA-256 of the decimal round number. Each seed drives
/// four swaps, then is rehashed. The position following each batch of four
/// is left in place.
pub fn shuffle_delegates<T>(round: u64, delegates: &mut [T]) {
    let len = delegates.len();
    if len == 0 {
        return;
    }
    let mut seed: [u8; 32] = Sha256::digest(round.to_string().as_bytes()).into();
    let mut i = 0;
    while i < len {
        for byte in seed.iter().take(4) {
            if i >= len {
                break;
            }
            let target = usize::from(*byte) % len;
            delegates.swap(i, target);
            i += 1;
        }
        i += 1;
        seed = Sha256::digest(seed).into();
    }
}

/// The delegate expected to forge in `slot`, given the round's forging order.
pub fn expected_generator<T>(delegates: &[T], slot: u64) -> Option<&T> {
    if delegates.is_empty() {
        return None;
    }
    let index = (slot % delegates.len() as u64) as usize;
    delegates.get(index)
}
