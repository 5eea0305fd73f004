//! Per-window spectral hash.
//!
//! A window's half-spectrum is averaged into equal-width bands, converted to
//! decibels and expressed relative to the median band. Subtracting the median
//! removes absolute loudness, so gain changes between a reference and a query
//! recording leave the hash unchanged.

use ndarray::{s, Array1};
use rustfft::num_complex::Complex;

use crate::config::FingerprintConfig;
use crate::error::FingerprintError;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Hash one window's complex spectrum into `band_count` hex symbols.
pub fn spectral_hash(
    spectrum: &[Complex<f64>],
    config: &FingerprintConfig,
) -> Result<String, FingerprintError> {
    let levels = band_levels_db(spectrum, config)?;
    let center = median(levels.as_slice().unwrap_or(&[]));

    let hash = levels
        .iter()
        .map(|&level| HEX_DIGITS[quantize(level - center, config.clip_db)] as char)
        .collect();

    Ok(hash)
}

/// Mean magnitude of each band, in dB.
fn band_levels_db(
    spectrum: &[Complex<f64>],
    config: &FingerprintConfig,
) -> Result<Array1<f64>, FingerprintError> {
    let half = spectrum.len() / 2;
    let bands = config.band_count;
    if bands == 0 || half < bands {
        return Err(FingerprintError::InvalidConfig(format!(
            "cannot split {} bins into {} bands",
            half, bands
        )));
    }

    let magnitudes: Array1<f64> = spectrum[..half]
        .iter()
        .map(|bin| bin.norm() + config.magnitude_floor)
        .collect();

    let band_size = half / bands;
    let levels = (0..bands)
        .map(|band| {
            let start = band * band_size;
            // Last band absorbs the remainder.
            let end = if band == bands - 1 { half } else { start + band_size };
            let avg = magnitudes.slice(s![start..end]).mean().unwrap_or(config.magnitude_floor);
            20.0 * avg.log10()
        })
        .collect();

    Ok(levels)
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Map a median-relative level in `[-clip, clip]` dB linearly onto `0..=15`.
fn quantize(level: f64, clip_db: f64) -> usize {
    let clipped = level.clamp(-clip_db, clip_db);
    let q = ((clipped + clip_db) / (2.0 * clip_db) * 15.0).round();
    q as usize
}
