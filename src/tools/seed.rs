//! Seed policy for synthetic data
//!
//! Every generator derives its RNG from the semantic key it was called
//! with, never from the clock or call order.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;

/// 2025-01-01T00:00:00Z. Synthetic timestamps are offsets from here.
pub const SYNTHETIC_EPOCH_SECS: i64 = 1_735_689_600;

pub fn synthetic_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(SYNTHETIC_EPOCH_SECS, 0).unwrap_or_default()
}

/// First eight bytes (big-endian) of SHA-256 over the `:`-joined key fields.
pub fn seed_from_key(parts: &[&str]) -> u64 {
    let joined = parts
        .iter()
        .map(|p| p.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(":");
    let digest = Sha256::digest(joined.as_bytes());

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

pub fn seeded_rng(parts: &[&str]) -> StdRng {
    StdRng::seed_from_u64(seed_from_key(parts))
}

/// SHA-256 hex digest of a value's JSON encoding.
///
/// Streams the serializer straight into the hasher.
pub fn fingerprint<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seed_is_stable_and_case_insensitive() {
        assert_eq!(seed_from_key(&["LaptopX", "EU"]), seed_from_key(&["laptopx", " eu "]));
        assert_ne!(seed_from_key(&["LaptopX", "EU"]), seed_from_key(&["LaptopX", "US"]));
    }

    #[test]
    fn test_field_boundaries_matter() {
        assert_ne!(seed_from_key(&["ab", "c"]), seed_from_key(&["a", "bc"]));
    }

    #[test]
    fn test_seeded_rng_repeats() {
        let a: Vec<u32> = (0..4).map({
            let mut rng = seeded_rng(&["x"]);
            move |_| rng.gen()
        }).collect();
        let b: Vec<u32> = (0..4).map({
            let mut rng = seeded_rng(&["x"]);
            move |_| rng.gen()
        }).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_epoch_value() {
        assert_eq!(synthetic_epoch().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&serde_json::json!({"a": 1}));
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint(&serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(519.999, 2), 520.0);
    }
}
