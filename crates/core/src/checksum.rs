//! Checksum sets: algorithm name → lowercase hex digest
//!
//! A driver may return digests for several algorithms at once. Comparison
//! only considers algorithms both sides share.

use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Algorithm name → hex digest, as returned by a driver listing
pub type ChecksumSet = BTreeMap<String, String>;

/// Compare two checksum sets over their shared algorithms.
///
/// Returns `None` when the sets share no algorithm (or either is empty);
/// otherwise whether every shared digest matches.
pub fn checksums_match(a: &ChecksumSet, b: &ChecksumSet) -> Option<bool> {
    let mut shared = false;
    for (algo, digest) in a {
        if let Some(other) = b.get(algo) {
            shared = true;
            if !digest.eq_ignore_ascii_case(other) {
                return Some(false);
            }
        }
    }
    if shared {
        Some(true)
    } else {
        None
    }
}

/// SHA-1 digest of a byte slice as lowercase hex
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789abcdef";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
    }
    hex
}
