//! 25-character, case-insensitive alphanumeric identifiers with >= 128 bits of entropy.
//!
//! 36^25 is approximately 2^129.3, comfortably above the 128-bit target. The alphabet is
//! upper-case only so the identifiers are stable under case-folding (filesystems, URLs).

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const UID_LEN: usize = 25;

/// Generate a new uid, preferring a cryptographically strong RNG and falling back to a
/// general-purpose PRNG if the strong source is unavailable.
///
/// Each character is drawn with `gen_range(0..ALPHABET.len())` rather than reducing a random
/// byte mod the alphabet size, so every symbol is equally likely (a raw-byte-mod-36 reduction
/// would over-represent the first four alphabet characters).
pub fn generate() -> String {
    let mut probe = [0u8; 1];
    if OsRng.try_fill_bytes(&mut probe).is_ok() {
        let mut rng = OsRng;
        (0..UID_LEN).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
    } else {
        let mut rng = rand::thread_rng();
        (0..UID_LEN).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
    }
}
