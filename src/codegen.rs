use sha2::{Digest, Sha256};
use std::ops::Range;
use xxhash_rust::xxh32::xxh32;

/// Characters a code may contain.
pub const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Width of the hex-rendered SHA-256 digest. Every code character needs at
/// least one hex character, so this is also the longest supported code.
pub const MAX_CODE_LEN: usize = 64;

/// Turns (owner, long URL, salt) into a fixed-length code.
///
/// The mapping is deterministic: the same triple always yields the same
/// code, so resubmitting a URL reproduces its code, while a different salt
/// moves to an unrelated point of the code space.
#[derive(Debug, Clone, Copy)]
pub struct CodeGenerator {
    len: usize,
}

impl CodeGenerator {
    /// `len` must be in `1..=MAX_CODE_LEN`; the config layer checks this.
    pub fn new(len: usize) -> Self {
        debug_assert!((1..=MAX_CODE_LEN).contains(&len));
        Self {
            len: len.clamp(1, MAX_CODE_LEN),
        }
    }

    pub fn generate(&self, owner_id: &str, long_url: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(owner_id.as_bytes());
        hasher.update(long_url.as_bytes());
        hasher.update(salt.as_bytes());
        let hex = format!("{:x}", hasher.finalize());

        segments(hex.len(), self.len)
            .map(|range| {
                let h = xxh32(hex[range].as_bytes(), 0);
                ALPHABET[h as usize % ALPHABET.len()] as char
            })
            .collect()
    }
}

/// Split `total` characters into `parts` contiguous ranges of equal width,
/// with the leftover characters appended to the last range.
fn segments(total: usize, parts: usize) -> impl Iterator<Item = Range<usize>> {
    let step = total / parts;
    (0..parts).map(move |i| {
        let start = i * step;
        let end = if i + 1 == parts { total } else { start + step };
        start..end
    })
}
