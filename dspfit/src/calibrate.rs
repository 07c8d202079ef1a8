//! Level-compensation calibration.
//!
//! Sweeping a drive-style parameter changes how loud a model is. The sweep
//! measures, at evenly spaced parameter values in `[-1, 1]`, the factor that
//! brings the output back to the input level. The factors are printed as a
//! C++ initializer list and pasted into the amp's compensation tables.

use crate::fit::{Model, ModelError};
use crate::params::ParamSet;

/// Number of sweep points when none is configured.
pub const DEFAULT_POINTS: usize = 11;

/// `points` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    match points {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (points - 1) as f64;
            (0..points)
                .map(|i| if i == points - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
}

/// Sweep `parameter` over `[-1, 1]` with everything else at `baseline`.
///
/// Returns `std(signal) / std(output)` for each sweep value.
pub fn sweep<M: Model + ?Sized>(
    model: &M,
    baseline: &ParamSet,
    parameter: &str,
    signal: &[f64],
    fs: u32,
    points: usize,
) -> Result<Vec<f64>, ModelError> {
    let level_in = std_dev(signal);
    let mut params = baseline.clone();
    let mut factors = Vec::with_capacity(points);

    for value in linspace(-1.0, 1.0, points) {
        params.insert(parameter.to_string(), value);
        let output = model.run(fs, signal, &params)?;
        let level_out = std_dev(&output);
        log::debug!("{parameter} = {value:+.2}: output level {level_out:.4e}");
        factors.push(level_in / level_out);
    }

    Ok(factors)
}

/// Format values as a C++ float initializer list body, e.g.
/// `1.000000e+00f,2.500000e-01f`.
pub fn format_cpp_floats(values: &[f64]) -> String {
    values.iter().map(|&v| cpp_float(v)).collect::<Vec<_>>().join(",")
}

/// `v` in C `%e` style with an `f` suffix: signed exponent of at least two
/// digits.
fn cpp_float(v: f64) -> String {
    let s = format!("{v:.6e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}f")
        }
        None => format!("{s}f"),
    }
}
