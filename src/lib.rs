//! Audio identification by spectral-hash fingerprints.
//!
//! Samples go through [`fingerprint::generate_fingerprint`] to become a
//! [`Fingerprint`], which [`matching::find_best_match`] aligns against a
//! catalog snapshot to produce a [`MatchResult`].

pub mod audio;
pub mod config;
pub mod database;
pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod matching;
pub mod spectrum;

pub use config::{FingerprintConfig, MatchConfig, ServerConfig};
pub use error::FingerprintError;
pub use fingerprint::{generate_fingerprint, Fingerprint, TrackInfo};
pub use matching::{find_best_match, top_matches, MatchResult};
