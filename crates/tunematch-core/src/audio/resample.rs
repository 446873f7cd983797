//! Audio resampling with rubato's FFT resampler

use anyhow::{Context, Result};
use rubato::{FftFixedIn, Resampler};

const CHUNK_SIZE: usize = 1024;

/// Resample mono audio to the target sample rate
pub fn resample_to_target(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .context("Failed to build resampler")?;

    let expected_len =
        (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected_len + delay + CHUNK_SIZE);

    let mut pos = 0;
    // Keep feeding (zero-padded) chunks until the delayed tail is flushed
    while output.len() < expected_len + delay {
        let needed = resampler.input_frames_next();
        let mut chunk = vec![0.0f32; needed];
        if pos < samples.len() {
            let end = (pos + needed).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += needed;

        let input = vec![chunk];
        let out = resampler
            .process(&input[..], None)
            .context("Resampling failed")?;
        output.extend_from_slice(&out[0]);
    }

    Ok(output[delay..delay + expected_len].to_vec())
}
