//! Room key generation

use rand::rngs::OsRng;
use rand::Rng;

/// Longest key handed out to peers.
pub const MAX_KEY_LEN: usize = 4;

/// Produces a short decimal room key.
///
/// The key is the leading digits of a non-negative random `i32` drawn from the
/// operating system CSPRNG, so small values yield keys shorter than
/// [`MAX_KEY_LEN`]. Uniqueness is the registry's job, not the generator's.
pub fn generate() -> String {
    let value = OsRng.gen_range(0..=i32::MAX as u32);
    truncate(value)
}

fn truncate(value: u32) -> String {
    let mut key = value.to_string();
    key.truncate(MAX_KEY_LEN);
    key
}
