use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::FingerprintConfig;
use crate::error::FingerprintError;
use crate::hash::spectral_hash;
use crate::spectrum::frames;

/// Catalog identity attached to reference fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: i64,
    pub title: String,
    pub artist: String,
}

/// Ordered spectral hashes of one audio source plus a content digest.
///
/// `track` is only set for fingerprints loaded from the catalog; query
/// fingerprints carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(flatten)]
    pub track: Option<TrackInfo>,
    pub digest: String,
    pub hash_segments: Vec<String>,
}

impl Fingerprint {
    /// Build a fingerprint from already computed segments, deriving the digest.
    pub fn from_segments(hash_segments: Vec<String>) -> Self {
        let digest = digest_segments(&hash_segments);
        Self {
            track: None,
            digest,
            hash_segments,
        }
    }

    pub fn with_track(mut self, track: TrackInfo) -> Self {
        self.track = Some(track);
        self
    }

    pub fn len(&self) -> usize {
        self.hash_segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hash_segments.is_empty()
    }
}

pub fn generate_fingerprint(
    samples: &[f64],
    config: &FingerprintConfig,
) -> Result<Fingerprint, FingerprintError> {
    if samples.len() < config.min_samples {
        return Err(FingerprintError::InsufficientInput {
            len: samples.len(),
            min: config.min_samples,
        });
    }

    let mut hash_segments = Vec::new();
    for (_, spectrum) in frames(samples, config)? {
        hash_segments.push(spectral_hash(&spectrum, config)?);
    }

    if hash_segments.is_empty() {
        return Err(FingerprintError::InsufficientSegments);
    }

    debug!(
        "Fingerprinted {} samples into {} hash segments",
        samples.len(),
        hash_segments.len()
    );

    Ok(Fingerprint::from_segments(hash_segments))
}

/// Lowercase hex SHA-256 over the concatenated segments, in order.
///
/// Only meant for exact-duplicate detection; similar audio gives unrelated digests.
pub fn digest_segments(segments: &[String]) -> String {
    let mut hasher = Sha256::new();
    for segment in segments {
        hasher.update(segment.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn test_audio(len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| {
                let t = i as f64 / 22050.0;
                0.6 * (2.0 * PI * 440.0 * t).sin()
                    + 0.3 * (2.0 * PI * 1320.0 * t).sin()
                    + 0.1 * (2.0 * PI * 5000.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_rejects_short_buffer() {
        let config = FingerprintConfig::default();
        let result = generate_fingerprint(&test_audio(1023), &config);
        assert_eq!(
            result,
            Err(FingerprintError::InsufficientInput { len: 1023, min: 1024 })
        );
    }

    #[test]
    fn test_buffer_without_a_full_window() {
        let config = FingerprintConfig::default();
        let result = generate_fingerprint(&test_audio(1500), &config);
        assert_eq!(result, Err(FingerprintError::InsufficientSegments));
    }

    #[test]
    fn test_silence_yields_no_segments() {
        let config = FingerprintConfig::default();
        let result = generate_fingerprint(&vec![0.0; 22050], &config);
        assert_eq!(result, Err(FingerprintError::InsufficientSegments));
    }

    #[test]
    fn test_segments_are_sixteen_hex_chars() {
        let config = FingerprintConfig::default();
        let fp = generate_fingerprint(&test_audio(1024 + 2048), &config).unwrap();

        assert!(!fp.hash_segments.is_empty());
        for segment in &fp.hash_segments {
            assert_eq!(segment.len(), 16);
            assert!(segment.chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert!(fp.track.is_none());
    }

    #[test]
    fn test_deterministic() {
        let config = FingerprintConfig::default();
        let audio = test_audio(22050);
        let fp1 = generate_fingerprint(&audio, &config).unwrap();
        let fp2 = generate_fingerprint(&audio, &config).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn test_digest_is_sha256_of_concatenation() {
        let segments = vec!["0123456789abcdef".to_string(), "fedcba9876543210".to_string()];
        let digest = digest_segments(&segments);

        let mut hasher = Sha256::new();
        hasher.update(b"0123456789abcdeffedcba9876543210");
        assert_eq!(digest, hex::encode(hasher.finalize()));
        assert_eq!(digest.len(), 64);
        assert!(!digest.chars().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let a = vec!["0000000000000000".to_string(), "1111111111111111".to_string()];
        let b = vec!["1111111111111111".to_string(), "0000000000000000".to_string()];
        assert_ne!(digest_segments(&a), digest_segments(&b));
    }

    #[test]
    fn test_json_shape() {
        let query = Fingerprint::from_segments(vec!["8888888888888888".to_string()]);
        let json = serde_json::to_value(&query).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["hash_segments"][0], "8888888888888888");

        let reference = query.with_track(TrackInfo {
            id: 7,
            title: "Song".to_string(),
            artist: "Band".to_string(),
        });
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["artist"], "Band");
    }
}
