//! Shared models and fixtures for the fit integration tests.
#![allow(dead_code)]

use dspfit::prelude::*;

pub const SAMPLE_RATE: u32 = 8000;

/// One-pole lowpass `y += a * (x - y)` with `a` taken from the `smoothing`
/// parameter.
pub fn one_pole(_fs: u32, input: &[f64], params: &ParamSet) -> Result<Vec<f64>, ModelError> {
    let a = *params
        .get("smoothing")
        .ok_or_else(|| ModelError::MissingParameter("smoothing".to_string()))?;
    let gain = params.get("gain").copied().unwrap_or(1.0);
    let mut y = 0.0;
    Ok(input
        .iter()
        .map(|&x| {
            y += a * (x - y);
            gain * y
        })
        .collect())
}

/// A two-tone stimulus, `duration` seconds long.
pub fn stimulus(duration: f64) -> Vec<f64> {
    let fs = SAMPLE_RATE as f64;
    let low = signals::sine(fs, 110.0, duration, 0.6);
    let high = signals::sine(fs, 1250.0, duration, 0.3);
    low.iter().zip(&high).map(|(a, b)| a + b).collect()
}

pub fn params(pairs: &[(&str, f64)]) -> ParamSet {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}
