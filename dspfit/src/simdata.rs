//! Circuit-simulation reference data.
//!
//! A simulation run is exported as a structured `.npy` file named
//! `<signal>_<amplitude>.npy`, e.g. `sine_0.5.npy`, holding a `time` field
//! and one field per probed node. The simulator's time steps are adaptive, so
//! data is resampled onto a uniform grid before it is compared with a DSP
//! model.

use crate::fit::{FitError, FitRecord};
use crate::npy::{self, NpyError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimDataError {
    #[error("Failed to read simulation directory {0}: {1}")]
    Directory(PathBuf, #[source] std::io::Error),
    #[error("Failed to load {0}: {1}")]
    Npy(PathBuf, #[source] NpyError),
    #[error("Simulation file {0} has no 'time' field")]
    MissingTime(PathBuf),
    #[error("Simulation '{0}' has no signal '{1}'")]
    MissingSignal(String, String),
    #[error("Simulation '{0}' is not resampled to a uniform rate")]
    NotResampled(String),
    #[error("Simulation '{0}' is too short to resample at {1} Hz")]
    TooShort(String, u32),
    #[error(transparent)]
    Record(#[from] FitError),
}

/// One simulation run: a stimulus and the probed node voltages over time.
#[derive(Debug, Clone, PartialEq)]
pub struct SimData {
    /// Stimulus label, e.g. `sine`.
    pub signal: String,
    /// Stimulus amplitude.
    pub amplitude: f64,
    pub time: Vec<f64>,
    /// Node voltages keyed by field name.
    pub vs: BTreeMap<String, Vec<f64>>,
    /// Uniform sample rate, once resampled.
    pub fs: Option<u32>,
}

/// Split `sine_0.5` into `("sine", 0.5)`.
fn parse_stem(stem: &str) -> Option<(&str, f64)> {
    let mut parts = stem.split('_');
    let signal = parts.next()?;
    let amplitude = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((signal, amplitude))
}

/// Load every `<signal>_<amplitude>.npy` file in `path`, in file-name order.
///
/// Files whose names don't follow the pattern are skipped. When `keep` is
/// given, only those node fields are retained.
pub fn load_dir(path: impl AsRef<Path>, keep: Option<&[&str]>) -> Result<Vec<SimData>, SimDataError> {
    let path = path.as_ref();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
        .map_err(|e| SimDataError::Directory(path.to_path_buf(), e))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|x| x == "npy").unwrap_or(false))
        .collect();
    entries.sort();

    let mut datas = Vec::new();
    for file in entries {
        let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((signal, amplitude)) = parse_stem(stem) else {
            log::debug!("skipping {}: not <signal>_<amplitude>", file.display());
            continue;
        };
        datas.push(load_file(&file, signal, amplitude, keep)?);
    }

    Ok(datas)
}

/// Load a single simulation file with an explicit label.
pub fn load_file(
    file: &Path,
    signal: &str,
    amplitude: f64,
    keep: Option<&[&str]>,
) -> Result<SimData, SimDataError> {
    let records = npy::read_records(file).map_err(|e| SimDataError::Npy(file.to_path_buf(), e))?;
    let time = records
        .column("time")
        .ok_or_else(|| SimDataError::MissingTime(file.to_path_buf()))?
        .to_vec();

    let vs = records
        .iter()
        .filter(|(name, _)| *name != "time")
        .filter(|(name, _)| keep.map(|k| k.contains(name)).unwrap_or(true))
        .map(|(name, values)| (name.to_string(), values.to_vec()))
        .collect();

    Ok(SimData {
        signal: signal.to_string(),
        amplitude,
        time,
        vs,
        fs: None,
    })
}

/// Linear interpolation of `(xs, ys)` at `x`, clamped at both ends.
///
/// `xs` must be sorted ascending.
pub fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }

    // Binary search for bracket
    let mut lo = 0;
    let mut hi = n - 1;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if xs[mid] <= x {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let (x0, y0) = (xs[lo], ys[lo]);
    let (x1, y1) = (xs[hi], ys[hi]);
    if x1 == x0 {
        return y0;
    }
    let alpha = (x - x0) / (x1 - x0);
    y0 + alpha * (y1 - y0)
}

/// Interpolate a whole series onto new sample times.
pub fn resample_series(time: &[f64], values: &[f64], new_time: &[f64]) -> Vec<f64> {
    new_time.iter().map(|&t| interpolate(time, values, t)).collect()
}

impl SimData {
    /// Re-sample every series onto a uniform grid at `sample_rate`.
    ///
    /// The grid is `t0 + i / sample_rate` for `i` in
    /// `0..floor((t1 - t0) * sample_rate)`.
    pub fn resample(&self, sample_rate: u32) -> Result<SimData, SimDataError> {
        let (Some(&t0), Some(&t1)) = (self.time.first(), self.time.last()) else {
            return Err(SimDataError::TooShort(self.label(), sample_rate));
        };
        let num_points = ((t1 - t0) * sample_rate as f64).floor() as usize;
        if num_points == 0 {
            return Err(SimDataError::TooShort(self.label(), sample_rate));
        }

        let time: Vec<f64> = (0..num_points)
            .map(|i| t0 + i as f64 / sample_rate as f64)
            .collect();
        let vs = self
            .vs
            .iter()
            .map(|(name, values)| (name.clone(), resample_series(&self.time, values, &time)))
            .collect();

        Ok(SimData {
            signal: self.signal.clone(),
            amplitude: self.amplitude,
            time,
            vs,
            fs: Some(sample_rate),
        })
    }

    /// `<signal>_<amplitude>`, the file stem this data came from.
    pub fn label(&self) -> String {
        format!("{}_{}", self.signal, self.amplitude)
    }

    /// Values of one probed node.
    pub fn node(&self, name: &str) -> Result<&[f64], SimDataError> {
        self.vs
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| SimDataError::MissingSignal(self.label(), name.to_string()))
    }

    /// Turn a resampled simulation into a fit record.
    ///
    /// The mask selects `window = (start, end)` seconds measured from the
    /// first sample; `None` selects everything.
    pub fn to_record(
        &self,
        input: &str,
        output: &str,
        window: Option<(f64, f64)>,
        name: impl Into<String>,
    ) -> Result<FitRecord, SimDataError> {
        let fs = self.fs.ok_or_else(|| SimDataError::NotResampled(self.label()))?;
        let t0 = self.time.first().copied().unwrap_or(0.0);
        let time: Vec<f64> = self.time.iter().map(|t| t - t0).collect();
        let mask = crate::fit::window_mask(&time, window);

        Ok(FitRecord::new(
            fs,
            time,
            self.node(input)?.to_vec(),
            self.node(output)?.to_vec(),
            mask,
            name,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npy::{write_records, RecordArray};
    use tempfile::TempDir;

    fn sim(time: Vec<f64>, v: Vec<f64>) -> SimData {
        let mut vs = BTreeMap::new();
        vs.insert("v_out".to_string(), v);
        SimData {
            signal: "sine".to_string(),
            amplitude: 0.5,
            time,
            vs,
            fs: None,
        }
    }

    #[test]
    fn interpolation_works() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [0.0, 10.0, 20.0];
        assert!((interpolate(&xs, &ys, 0.5) - 5.0).abs() < 1e-10);
        assert!((interpolate(&xs, &ys, 1.5) - 15.0).abs() < 1e-10);
        assert_eq!(interpolate(&xs, &ys, -1.0), 0.0);
        assert_eq!(interpolate(&xs, &ys, 3.0), 20.0);
    }

    #[test]
    fn stem_parsing() {
        assert_eq!(parse_stem("sine_0.5"), Some(("sine", 0.5)));
        assert_eq!(parse_stem("sine"), None);
        assert_eq!(parse_stem("sine_loud"), None);
        assert_eq!(parse_stem("two_tone_0.5"), None);
    }

    #[test]
    fn resample_grid_is_uniform() {
        let data = sim(vec![0.0, 0.3, 1.0], vec![0.0, 3.0, 10.0]);
        let resampled = data.resample(10).unwrap();
        assert_eq!(resampled.fs, Some(10));
        assert_eq!(resampled.time.len(), 10);
        for (i, t) in resampled.time.iter().enumerate() {
            assert!((t - i as f64 / 10.0).abs() < 1e-12);
        }
        // Series is linear in time, so interpolation is exact
        for (t, v) in resampled.time.iter().zip(resampled.node("v_out").unwrap()) {
            assert!((v - 10.0 * t).abs() < 1e-9);
        }
    }

    #[test]
    fn resample_up_then_down_recovers_values() {
        let fs = 1000.0;
        let time: Vec<f64> = (0..=1000).map(|i| i as f64 / fs).collect();
        let v: Vec<f64> = time
            .iter()
            .map(|t| (2.0 * std::f64::consts::PI * 5.0 * t).sin())
            .collect();
        let data = sim(time, v);

        let up = data.resample(4000).unwrap();
        let back = up.resample(1000).unwrap();
        let original = data.node("v_out").unwrap();
        let restored = back.node("v_out").unwrap();

        // Linear interpolation error bound: h² / 8 · max|f''|
        let h = 1.0 / fs;
        let bound = h * h / 8.0 * (2.0 * std::f64::consts::PI * 5.0_f64).powi(2) + 1e-12;
        for (i, r) in restored.iter().enumerate() {
            assert!((r - original[i]).abs() <= bound, "sample {i}: {r} vs {}", original[i]);
        }
    }

    #[test]
    fn record_requires_resampling() {
        let data = sim(vec![0.0, 1.0], vec![0.0, 1.0]);
        let err = data.to_record("v_out", "v_out", None, "x").unwrap_err();
        assert!(matches!(err, SimDataError::NotResampled(_)));
    }

    #[test]
    fn load_dir_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        let records = RecordArray::new(vec![
            ("time".to_string(), vec![0.0, 0.5, 1.0]),
            ("v_in".to_string(), vec![0.0, 1.0, 0.0]),
            ("v_out".to_string(), vec![0.0, -1.0, 0.0]),
        ])
        .unwrap();
        write_records(dir.path().join("sine_1.0.npy"), &records).unwrap();
        write_records(dir.path().join("saw_0.25.npy"), &records).unwrap();
        write_records(dir.path().join("notes.npy"), &records).unwrap();
        std::fs::write(dir.path().join("readme_1.txt"), "x").unwrap();

        let datas = load_dir(dir.path(), Some(&["v_out"][..])).unwrap();
        assert_eq!(datas.len(), 2);
        assert_eq!(datas[0].signal, "saw");
        assert_eq!(datas[0].amplitude, 0.25);
        assert_eq!(datas[1].signal, "sine");
        assert_eq!(datas[1].vs.keys().collect::<Vec<_>>(), vec!["v_out"]);
    }
}
