use sha2::{Digest, Sha256};

/// Deterministic entropy seed in [0, 1) derived from a commit hash.
/// Repeated runs over the same commit render identical artifacts.
pub fn entropy_seed(commit_hash: &str) -> f64 {
    let digest = Sha256::digest(commit_hash.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head as f64 / (u32::MAX as f64 + 1.0)
}

/// Seed for the selector's RNG: full first eight bytes of the digest.
pub fn rng_seed(commit_hash: &str) -> u64 {
    let digest = Sha256::digest(commit_hash.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
