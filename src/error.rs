//! Errors raised by the fingerprinting core.
//!
//! Decoder and catalog failures are collaborator errors and travel as
//! `anyhow::Error`; only input problems the core itself detects live here.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FingerprintError {
    /// The sample buffer is shorter than the configured minimum.
    #[error("insufficient audio samples: got {len}, need at least {min}")]
    InsufficientInput { len: usize, min: usize },

    /// Every window was rejected by the silence gate (or none fit).
    #[error("no hash segments generated; audio is silent or too short for one window")]
    InsufficientSegments,

    #[error("transform length {0} is not a power of two")]
    NotPowerOfTwo(usize),

    #[error("invalid fingerprint configuration: {0}")]
    InvalidConfig(String),
}
