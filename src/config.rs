//! Calibration knobs for fingerprinting and matching, plus the server's
//! environment-driven settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::FingerprintError;

pub const SAMPLE_RATE: u32 = 22_050;
pub const WINDOW_SIZE: usize = 2048;
pub const HOP_SIZE: usize = 512;
pub const MIN_SAMPLES: usize = 1024;
pub const BAND_COUNT: usize = 16;

/// Parameters of the spectral hash pipeline.
///
/// The defaults are the values the existing catalogs were built with. Changing
/// any of them makes new fingerprints incomparable with stored ones.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintConfig {
    /// Samples per analysis window. Must be a power of two (default: 2048)
    pub window_size: usize,

    /// Stride between window starts (default: 512, i.e. 75% overlap)
    pub hop_size: usize,

    /// Rate the decoder is expected to deliver, in Hz (default: 22050)
    pub sample_rate: u32,

    /// Buffers shorter than this are rejected outright (default: 1024)
    pub min_samples: usize,

    /// Windows with RMS below this are skipped (default: 1e-5)
    pub rms_silence_threshold: f64,

    /// Added to every magnitude before averaging (default: 1e-12)
    pub magnitude_floor: f64,

    /// Frequency bands per hash, one hex symbol each (default: 16)
    pub band_count: usize,

    /// Median-relative band levels are clipped to +/- this many dB (default: 24.0)
    pub clip_db: f64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            hop_size: HOP_SIZE,
            sample_rate: SAMPLE_RATE,
            min_samples: MIN_SAMPLES,
            rms_silence_threshold: 1e-5,
            magnitude_floor: 1e-12,
            band_count: BAND_COUNT,
            clip_db: 24.0,
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> Result<(), FingerprintError> {
        if !self.window_size.is_power_of_two() {
            return Err(FingerprintError::NotPowerOfTwo(self.window_size));
        }
        if self.hop_size == 0 {
            return Err(FingerprintError::InvalidConfig("hop size must be non-zero".into()));
        }
        if self.band_count == 0 || self.band_count > self.window_size / 2 {
            return Err(FingerprintError::InvalidConfig(format!(
                "band count {} does not fit a half-spectrum of {} bins",
                self.band_count,
                self.window_size / 2
            )));
        }
        if self.clip_db <= 0.0 {
            return Err(FingerprintError::InvalidConfig("clip range must be positive".into()));
        }
        if self.sample_rate == 0 {
            return Err(FingerprintError::InvalidConfig("sample rate must be non-zero".into()));
        }
        Ok(())
    }
}

/// Matching policy.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    /// A hash pair counts as aligned when at most this many symbols differ (default: 8)
    pub max_nibble_mismatches: usize,

    /// Minimum confidence reported as a match (default: 0.35)
    pub match_threshold: f64,

    // Used only to turn an offset into seconds.
    pub hop_size: usize,
    pub sample_rate: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_nibble_mismatches: BAND_COUNT / 2,
            match_threshold: 0.35,
            hop_size: HOP_SIZE,
            sample_rate: SAMPLE_RATE,
        }
    }
}

impl MatchConfig {
    /// Default policy with timing taken from the fingerprint configuration.
    pub fn aligned_with(fingerprint: &FingerprintConfig) -> Self {
        Self {
            max_nibble_mismatches: fingerprint.band_count / 2,
            hop_size: fingerprint.hop_size,
            sample_rate: fingerprint.sample_rate,
            ..Self::default()
        }
    }

    pub fn offset_to_seconds(&self, offset: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        offset as f64 * (self.hop_size as f64 / self.sample_rate as f64)
    }
}

/// Settings for the HTTP service, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub database_path: String,
    pub database_max_connections: u32,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            database_path: "songs.db".to_string(),
            database_max_connections: 5,
            request_timeout: Duration::from_secs(30),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset or empty keys keep
    /// their defaults, unparseable ones are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            bind_addr: parse_or(get("BIND_ADDR"), "BIND_ADDR", defaults.bind_addr),
            port: parse_or(get("PORT"), "PORT", defaults.port),
            database_path: get("DATABASE_PATH").unwrap_or(defaults.database_path),
            database_max_connections: parse_or(
                get("DATABASE_MAX_CONNECTIONS"),
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            request_timeout: Duration::from_secs(parse_or(
                get("REQUEST_TIMEOUT_SECS"),
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            max_upload_bytes: parse_or(
                get("MAX_UPLOAD_BYTES"),
                "MAX_UPLOAD_BYTES",
                defaults.max_upload_bytes,
            ),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> T {
    match value {
        Some(raw) => match raw.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}, using default", key, raw);
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FingerprintConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_power_of_two_window() {
        let config = FingerprintConfig {
            window_size: 2000,
            ..FingerprintConfig::default()
        };
        assert_eq!(config.validate(), Err(FingerprintError::NotPowerOfTwo(2000)));
    }

    #[test]
    fn test_rejects_too_many_bands() {
        let config = FingerprintConfig {
            window_size: 16,
            band_count: 16,
            ..FingerprintConfig::default()
        };
        assert!(matches!(config.validate(), Err(FingerprintError::InvalidConfig(_))));
    }

    #[test]
    fn test_offset_to_seconds_uses_hop_over_rate() {
        let config = MatchConfig::default();
        assert!((config.offset_to_seconds(0)).abs() < 1e-12);
        assert!((config.offset_to_seconds(43) - 43.0 * 512.0 / 22050.0).abs() < 1e-12);
    }

    #[test]
    fn test_match_config_follows_band_count() {
        let fp = FingerprintConfig {
            band_count: 8,
            hop_size: 256,
            ..FingerprintConfig::default()
        };
        let config = MatchConfig::aligned_with(&fp);
        assert_eq!(config.max_nibble_mismatches, 4);
        assert_eq!(config.hop_size, 256);
        assert!((config.match_threshold - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_server_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "8080"),
            ("DATABASE_PATH", "data/songs.db"),
            ("REQUEST_TIMEOUT_SECS", "not-a-number"),
            ("BIND_ADDR", ""),
        ]
        .into_iter()
        .collect();

        let config = ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_path, "data/songs.db");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.bind_addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.database_max_connections, 5);
    }
}
