//! Sliding-offset comparison of a query fingerprint against catalog entries.
//!
//! Every candidate is scored independently, so scoring runs on the rayon pool
//! and the results are reduced in catalog order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MatchConfig;
use crate::fingerprint::{Fingerprint, TrackInfo};

/// Distance returned for hashes that cannot be compared.
pub const INCOMPARABLE: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub is_match: bool,
    pub confidence: f64,
    /// Index into the reference hash sequence; `None` when nothing aligned.
    pub offset: Option<usize>,
    pub time_in_song: f64,
    pub song: Option<TrackInfo>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            is_match: false,
            confidence: 0.0,
            offset: None,
            time_in_song: 0.0,
            song: None,
        }
    }
}

/// Best alignment of one query against one reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub offset: Option<usize>,
    pub confidence: f64,
    pub is_match: bool,
}

impl Alignment {
    fn none() -> Self {
        Self {
            offset: None,
            confidence: 0.0,
            is_match: false,
        }
    }

    fn into_result(self, reference: &Fingerprint, config: &MatchConfig) -> MatchResult {
        MatchResult {
            is_match: self.is_match,
            confidence: self.confidence,
            offset: self.offset,
            time_in_song: self.offset.map_or(0.0, |o| config.offset_to_seconds(o)),
            song: reference.track.clone(),
        }
    }
}

/// Number of positions at which two hash strings differ.
///
/// Hashes of different length come from an incompatible source and are
/// reported as [`INCOMPARABLE`].
pub fn hamming_hex(a: &str, b: &str) -> usize {
    if a.len() != b.len() {
        return INCOMPARABLE;
    }
    a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count()
}

/// Slide `query` across `reference` and keep the offset with the highest
/// fraction of aligned hashes. Ties go to the earliest offset.
pub fn slide_hamming(reference: &[String], query: &[String], config: &MatchConfig) -> Alignment {
    if reference.is_empty() || query.is_empty() {
        return Alignment::none();
    }

    let max_offset = reference.len().saturating_sub(query.len());
    let mut best = Alignment::none();

    for offset in 0..=max_offset {
        let matches = query
            .iter()
            .zip(&reference[offset..])
            .filter(|(q, r)| hamming_hex(r, q) <= config.max_nibble_mismatches)
            .count();

        let confidence = matches as f64 / query.len() as f64;
        if confidence > best.confidence {
            best = Alignment {
                offset: Some(offset),
                confidence,
                is_match: confidence >= config.match_threshold,
            };
        }
    }

    best
}

fn score_all(query: &Fingerprint, candidates: &[Fingerprint], config: &MatchConfig) -> Vec<MatchResult> {
    candidates
        .par_iter()
        .map(|candidate| {
            slide_hamming(&candidate.hash_segments, &query.hash_segments, config)
                .into_result(candidate, config)
        })
        .collect()
}

/// Best-scoring candidate for `query`. The first candidate wins ties.
///
/// `candidates` is a snapshot; an empty one yields [`MatchResult::no_match`].
pub fn find_best_match(
    query: &Fingerprint,
    candidates: &[Fingerprint],
    config: &MatchConfig,
) -> MatchResult {
    if candidates.is_empty() {
        info!("Catalog is empty, nothing to match against");
        return MatchResult::no_match();
    }

    info!("Comparing query of {} segments against {} songs", query.len(), candidates.len());

    let mut best = MatchResult::no_match();
    for (i, result) in score_all(query, candidates, config).into_iter().enumerate() {
        debug!(
            "  [{}/{}] {}: {:.1}%",
            i + 1,
            candidates.len(),
            describe(result.song.as_ref()),
            result.confidence * 100.0
        );
        if result.confidence > best.confidence {
            best = result;
        }
    }

    info!(
        "Best candidate {} at {:.1}% (match: {})",
        describe(best.song.as_ref()),
        best.confidence * 100.0,
        best.is_match
    );

    best
}

/// All candidates ranked by descending confidence, truncated to `limit`.
pub fn top_matches(
    query: &Fingerprint,
    candidates: &[Fingerprint],
    limit: usize,
    config: &MatchConfig,
) -> Vec<MatchResult> {
    let mut results = score_all(query, candidates, config);
    results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    results.truncate(limit);
    results
}

fn describe(track: Option<&TrackInfo>) -> String {
    match track {
        Some(t) => format!("{} - {}", t.artist, t.title),
        None => "<untitled>".to_string(),
    }
}
