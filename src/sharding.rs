//! Deterministic channel-name to shard-index mapping.
//!
//! Must be stable across processes and releases: it is part of the wire
//! contract that lets any sender route directly to the shard holding a
//! given channel without a lookup.

use sha2::{Digest, Sha256};

use crate::naming::shard_key;

/// Maps `name` to a shard index in `0..n_shards`.
///
/// Hashes the routable part of the name (see [`shard_key`]) with SHA-256,
/// takes the first 12 bytes as a big-endian integer, and reduces mod
/// `n_shards`.
pub fn shard_for(name: &str, n_shards: usize) -> usize {
    assert!(n_shards > 0, "n_shards must be positive");
    let key = shard_key(name);
    let digest = Sha256::digest(key.as_bytes());
    let mut buf = [0u8; 16];
    buf[4..16].copy_from_slice(&digest[..12]);
    let value = u128::from_be_bytes(buf);
    (value % n_shards as u128) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = shard_for("specific.abc!suffix123", 5);
        let b = shard_for("specific.abc!suffix123", 5);
        assert_eq!(a, b);
    }

    #[test]
    fn shards_by_suffix_not_full_name() {
        let a = shard_for("foo.one!shared-suffix", 7);
        let b = shard_for("bar.two!shared-suffix", 7);
        assert_eq!(a, b, "names sharing a shard suffix must land on the same shard");
    }

    #[test]
    fn distributes_across_range() {
        let n = 4;
        let mut seen = [false; 4];
        for i in 0..200 {
            let name = format!("chan-{i}");
            seen[shard_for(&name, n)] = true;
        }
        assert!(seen.iter().all(|&s| s), "expected all shards to be hit over 200 samples");
    }

    #[test]
    #[should_panic]
    fn zero_shards_panics() {
        shard_for("x", 0);
    }
}
