//! Deterministic probe signals.
//!
//! | Signal | Use |
//! |--------|-----|
//! | [`impulse`] | Impulse response of a model |
//! | [`silence`] | Self-noise, DC offset, instability on an empty buffer |
//! | [`sine`] | Calibration and test stimuli |

use std::f64::consts::PI;

/// A unit-height impulse at sample `position` of an otherwise silent buffer.
///
/// Positions past the end give pure silence.
pub fn impulse(n_samples: usize, position: usize, amplitude: f64) -> Vec<f64> {
    let mut signal = vec![0.0; n_samples];
    if let Some(s) = signal.get_mut(position) {
        *s = amplitude;
    }
    signal
}

/// An impulse in the middle of the buffer, leaving room to see pre-ringing.
pub fn centred_impulse(n_samples: usize) -> Vec<f64> {
    impulse(n_samples, n_samples / 2, 1.0)
}

pub fn silence(n_samples: usize) -> Vec<f64> {
    vec![0.0; n_samples]
}

/// Generate a sine wave.
pub fn sine(sample_rate: f64, frequency: f64, duration: f64, amplitude: f64) -> Vec<f64> {
    let n_samples = (duration * sample_rate) as usize;
    (0..n_samples)
        .map(|i| {
            let t = i as f64 / sample_rate;
            amplitude * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}
