//! Windowed spectral transform.
//!
//! Walks a sample buffer in overlapping windows, drops silent ones, applies a
//! Hamming taper and hands back each window's full complex spectrum.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;

use crate::config::FingerprintConfig;
use crate::error::FingerprintError;

/// Root-mean-square level of a window.
pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s * s).sum();
    (sum / samples.len() as f64).sqrt()
}

pub fn apply_hamming_window(buffer: &mut [f64]) {
    let len = buffer.len();
    if len < 2 {
        return;
    }
    let denom = (len - 1) as f64;
    for (j, sample) in buffer.iter_mut().enumerate() {
        *sample *= 0.54 - 0.46 * (2.0 * PI * j as f64 / denom).cos();
    }
}

/// In-place radix-2 Cooley-Tukey FFT.
///
/// The length must be a power of two; lengths 0 and 1 are returned untouched.
pub fn fft(buffer: &mut [Complex<f64>]) -> Result<(), FingerprintError> {
    let n = buffer.len();
    if n <= 1 {
        return Ok(());
    }
    if !n.is_power_of_two() {
        return Err(FingerprintError::NotPowerOfTwo(n));
    }
    radix2(buffer);
    Ok(())
}

fn radix2(buffer: &mut [Complex<f64>]) {
    let n = buffer.len();
    let bits = n.trailing_zeros();

    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - bits);
        if i < j {
            buffer.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let step = -2.0 * PI / len as f64;
        let twiddles: Vec<Complex<f64>> = (0..half)
            .map(|k| Complex::from_polar(1.0, step * k as f64))
            .collect();

        for start in (0..n).step_by(len) {
            for (k, twiddle) in twiddles.iter().enumerate() {
                let even = buffer[start + k];
                let odd = buffer[start + k + half] * *twiddle;
                buffer[start + k] = even + odd;
                buffer[start + k + half] = even - odd;
            }
        }
        len <<= 1;
    }
}

/// Lazy sequence of `(window_index, spectrum)` pairs over a sample buffer.
///
/// `window_index` is the position of the window in the unfiltered sequence
/// (`start / hop`), so gaps appear where silent windows were dropped.
pub struct SpectralFrames<'a> {
    samples: &'a [f64],
    window_size: usize,
    hop_size: usize,
    silence_threshold: f64,
    next_start: usize,
}

impl<'a> SpectralFrames<'a> {
    pub fn new(samples: &'a [f64], config: &FingerprintConfig) -> Result<Self, FingerprintError> {
        config.validate()?;
        Ok(Self {
            samples,
            window_size: config.window_size,
            hop_size: config.hop_size,
            silence_threshold: config.rms_silence_threshold,
            next_start: 0,
        })
    }
}

impl Iterator for SpectralFrames<'_> {
    type Item = (usize, Vec<Complex<f64>>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_start + self.window_size <= self.samples.len() {
            let start = self.next_start;
            self.next_start += self.hop_size;

            let window = &self.samples[start..start + self.window_size];
            if rms(window) < self.silence_threshold {
                continue;
            }

            let mut tapered = window.to_vec();
            apply_hamming_window(&mut tapered);

            let mut spectrum: Vec<Complex<f64>> =
                tapered.into_iter().map(|s| Complex::new(s, 0.0)).collect();
            radix2(&mut spectrum);

            return Some((start / self.hop_size, spectrum));
        }
        None
    }
}

pub fn frames<'a>(
    samples: &'a [f64],
    config: &FingerprintConfig,
) -> Result<SpectralFrames<'a>, FingerprintError> {
    SpectralFrames::new(samples, config)
}
