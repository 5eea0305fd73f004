use anyhow::{anyhow, bail, Result};
use hound::{SampleFormat, WavReader};
use std::io::Cursor;
use tracing::debug;

/// Decode a WAV payload into mono samples at `target_rate`.
pub fn decode_audio(audio_data: &[u8], target_rate: u32) -> Result<Vec<f64>> {
    let cursor = Cursor::new(audio_data);
    let mut reader = WavReader::new(cursor)
        .map_err(|e| anyhow!("Failed to read WAV file: {}", e))?;

    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => {
            let samples: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
            samples.map_err(|e| anyhow!("Failed to read float samples: {}", e))?
        }
        SampleFormat::Int => {
            let samples: Result<Vec<i32>, _> = reader.samples::<i32>().collect();
            let samples = samples.map_err(|e| anyhow!("Failed to read int samples: {}", e))?;

            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            samples.into_iter().map(|s| s as f32 / max_value).collect()
        }
    };

    if interleaved.is_empty() {
        bail!("WAV file contains no samples");
    }

    let mono = downmix(&interleaved, spec.channels);
    debug!(
        "Decoded {} frames at {} Hz ({} channels), resampling to {} Hz",
        mono.len(),
        spec.sample_rate,
        spec.channels,
        target_rate
    );

    Ok(resample(&mono, spec.sample_rate, target_rate))
}

/// Average interleaved channels into one.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f64> {
    let channels = channels.max(1) as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().map(|&s| s as f64).sum::<f64>() / channels as f64)
        .collect()
}

/// Nearest-index rate conversion.
pub fn resample(samples: &[f64], original_rate: u32, target_rate: u32) -> Vec<f64> {
    if original_rate == target_rate || original_rate == 0 || target_rate == 0 {
        return samples.to_vec();
    }

    let ratio = original_rate as f64 / target_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;

    (0..new_len)
        .map(|i| {
            let original_index = (i as f64 * ratio) as usize;
            samples.get(original_index).copied().unwrap_or(0.0)
        })
        .collect()
}
