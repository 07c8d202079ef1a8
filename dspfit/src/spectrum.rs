//! Power spectra for diagnostic plots.
//!
//! # Example
//!
//! ```rust
//! use dspfit::spectrum::{power_spectrum, SpectrumOptions};
//!
//! let fs = 48000.0;
//! let tone: Vec<f64> = (0..4800)
//!     .map(|i| (2.0 * std::f64::consts::PI * 1000.0 * i as f64 / fs).sin())
//!     .collect();
//!
//! let (db, freqs) = power_spectrum(&tone, fs, SpectrumOptions::plot());
//! assert_eq!(db.len(), freqs.len());
//! ```

use realfft::RealFftPlanner;
use rustfft::num_complex::Complex;
use std::f64::consts::PI;

/// How a spectrum is computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumOptions {
    /// Apply a symmetric Hann window before the FFT.
    pub window: bool,
    /// Convert power to decibels.
    pub db: bool,
    /// Shift the dB spectrum so its peak sits at 0 dB. Only used with `db`.
    pub rezero: bool,
}

impl Default for SpectrumOptions {
    fn default() -> Self {
        Self {
            window: true,
            db: true,
            rezero: false,
        }
    }
}

impl SpectrumOptions {
    /// Settings used for comparison plots: windowed, dB, peak at 0 dB.
    pub fn plot() -> Self {
        Self {
            window: true,
            db: true,
            rezero: true,
        }
    }

    /// Settings used for impulse responses: no window, absolute dB.
    pub fn impulse_response() -> Self {
        Self {
            window: false,
            db: true,
            rezero: false,
        }
    }
}

/// Symmetric Hann window of length `n` (matches `numpy.hanning`).
pub fn hann(n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![1.0],
        _ => (0..n)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
            .collect(),
    }
}

/// Bin centre frequencies of a real FFT of length `n` at rate `fs`.
pub fn rfft_freqs(n: usize, fs: f64) -> Vec<f64> {
    if n == 0 {
        return vec![];
    }
    (0..n / 2 + 1).map(|k| k as f64 * fs / n as f64).collect()
}

/// Compute the power spectrum `|FFT(x)|²` of a real signal.
///
/// Returns the spectrum values and the matching bin frequencies.
pub fn power_spectrum(signal: &[f64], fs: f64, options: SpectrumOptions) -> (Vec<f64>, Vec<f64>) {
    let n = signal.len();
    if n == 0 {
        return (vec![], vec![]);
    }

    let mut buffer: Vec<f64> = if options.window {
        signal.iter().zip(hann(n)).map(|(&x, w)| x * w).collect()
    } else {
        signal.to_vec()
    };

    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut spectrum = vec![Complex::new(0.0, 0.0); n / 2 + 1];
    // Both buffers are sized by the plan
    let processed = fft.process(&mut buffer, &mut spectrum);
    debug_assert!(processed.is_ok(), "{processed:?}");

    let mut values: Vec<f64> = spectrum.iter().map(|c| c.norm_sqr()).collect();

    if options.db {
        let reference = if options.rezero {
            values.iter().cloned().fold(0.0_f64, f64::max)
        } else {
            1.0
        };
        for v in &mut values {
            *v = 10.0 * (*v / reference).log10();
        }
    }

    (values, rfft_freqs(n, fs))
}

/// Index of the largest finite value.
pub fn dominant_bin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn sinusoid_maps_to_single_dominant_bin() {
        let fs = 48000.0;
        let n = 4800; // 10 Hz bins
        let (power, freqs) = power_spectrum(&tone(1000.0, fs, n), fs, SpectrumOptions {
            window: true,
            db: false,
            rezero: false,
        });

        let peak = dominant_bin(&power).unwrap();
        assert_eq!(freqs[peak], 1000.0);

        // Hann leakage reaches only the neighbouring bins
        let total: f64 = power.iter().sum();
        let near: f64 = power[peak - 1..=peak + 1].iter().sum();
        assert!(near / total > 0.999, "energy outside main lobe: {}", 1.0 - near / total);
    }

    #[test]
    fn unwindowed_parseval() {
        let fs = 1000.0;
        let n = 1000;
        let x = tone(50.0, fs, n);
        let (power, _) = power_spectrum(&x, fs, SpectrumOptions {
            window: false,
            db: false,
            rezero: false,
        });

        let time_energy: f64 = x.iter().map(|v| v * v).sum();
        // One-sided: double everything except DC and Nyquist
        let freq_energy: f64 = power
            .iter()
            .enumerate()
            .map(|(k, p)| if k == 0 || k == n / 2 { *p } else { 2.0 * p })
            .sum::<f64>()
            / n as f64;
        assert!((time_energy - freq_energy).abs() / time_energy < 1e-9);
    }

    #[test]
    fn rezero_puts_peak_at_zero_db() {
        let fs = 48000.0;
        let (db, _) = power_spectrum(&tone(440.0, fs, 4096), fs, SpectrumOptions::plot());
        let peak = db.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(peak.abs() < 1e-9);
    }

    #[test]
    fn freqs_follow_rfftfreq() {
        let freqs = rfft_freqs(8, 8.0);
        assert_eq!(freqs, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let freqs = rfft_freqs(7, 7.0);
        assert_eq!(freqs, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn hann_matches_numpy_endpoints() {
        let w = hann(5);
        assert_eq!(w[0], 0.0);
        assert!((w[2] - 1.0).abs() < 1e-12);
        assert!(w[4].abs() < 1e-12);
    }

    #[test]
    fn empty_signal_gives_empty_spectrum() {
        let (v, f) = power_spectrum(&[], 48000.0, SpectrumOptions::default());
        assert!(v.is_empty() && f.is_empty());
    }
}
