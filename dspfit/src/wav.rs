//! WAV file I/O for reference recordings and rendered model output.
//!
//! Uses `hound` to read multi-channel PCM recordings into mono `f64`
//! buffers and to write model output back out for auditioning.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WavError {
    #[error("Failed to open WAV file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: hound::Error,
    },
    #[error("WAV decode error: {0}")]
    Decode(#[from] hound::Error),
    #[error("Unsupported WAV format: {0}")]
    Unsupported(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn float_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Read a WAV file as a mono signal.
///
/// Channels are averaged. Integer samples are scaled by `2^(bits-1)`, so the
/// negative full-scale value maps to exactly `-1.0`. When `max_length` is
/// given, at most `ceil(max_length * rate)` samples are returned.
///
/// Returns the samples and the sample rate.
pub fn read_wav(path: impl AsRef<Path>, max_length: Option<f64>) -> Result<(Vec<f64>, u32), WavError> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path).map_err(|source| WavError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(WavError::Unsupported("zero channels".to_string()));
    }

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(WavError::Unsupported(format!(
                    "{}-bit integer samples",
                    spec.bits_per_sample
                )));
            }
            let full_scale = full_scale(spec.bits_per_sample);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / full_scale))
                .collect::<Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<_, _>>()?,
    };

    let mut mono: Vec<f64> = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f64>() / channels as f64)
        .collect();

    if let Some(max_length) = max_length {
        let max_samples = (max_length * spec.sample_rate as f64).ceil().max(0.0) as usize;
        mono.truncate(max_samples);
    }

    Ok((mono, spec.sample_rate))
}

/// Full-scale magnitude of a signed integer sample with the given bit depth.
pub fn full_scale(bits_per_sample: u16) -> f64 {
    (1u64 << (bits_per_sample - 1)) as f64
}

/// Write samples to a mono 32-bit float WAV file.
pub fn write_wav(path: impl AsRef<Path>, samples: &[f64], sample_rate: u32) -> Result<(), WavError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WavWriter::create(path, float_spec(sample_rate))?;
    for &s in samples {
        writer.write_sample(s as f32)?;
    }
    writer.finalize()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
