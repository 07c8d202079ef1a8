//! Diagnostic plots.
//!
//! Plots are bare PNG line charts with no text: reference in blue, model in
//! red (dotted in time-domain comparisons).

use crate::fit::{FitRecord, Model, ModelError};
use crate::params::ParamSet;
use crate::spectrum::{power_spectrum, SpectrumOptions};
use plotters::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Pixel size of every plot.
pub const PLOT_SIZE: (u32, u32) = (600, 400);

/// Frequency span of spectrum plots, Hz.
pub const FREQ_RANGE: (f64, f64) = (10.0, 20_000.0);

/// Level span of spectrum plots, dB.
pub const DB_RANGE: (f64, f64) = (-80.0, 1.0);

/// Samples per dash in dotted lines.
const DOT_LENGTH: usize = 4;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Failed to create plot directory {0}: {1}")]
    Directory(PathBuf, #[source] std::io::Error),
    #[error("Failed to draw {0}: {1}")]
    Draw(PathBuf, String),
    #[error("Model error while plotting '{record}': {source}")]
    Model {
        record: String,
        #[source]
        source: ModelError,
    },
}

fn draw_err<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> PlotError + '_ {
    move |e| PlotError::Draw(path.to_path_buf(), e.to_string())
}

/// Min/max of finite values, padded so a flat series still has a range.
fn value_range(series: &[&[f64]]) -> Range<f64> {
    let (lo, hi) = series
        .iter()
        .flat_map(|s| s.iter())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return -1.0..1.0;
    }
    let pad = ((hi - lo) * 0.05).max(1e-9);
    (lo - pad)..(hi + pad)
}

/// Plot the model prediction against every record.
///
/// Writes `<name>_sig.png` and `<name>_fft.png` into `dir` for each record.
pub fn plot_fit_result<M: Model + ?Sized>(
    dir: &Path,
    records: &[FitRecord],
    model: &M,
    params: &ParamSet,
) -> Result<Vec<PathBuf>, PlotError> {
    std::fs::create_dir_all(dir).map_err(|e| PlotError::Directory(dir.to_path_buf(), e))?;

    let mut written = Vec::with_capacity(records.len() * 2);
    for record in records {
        let pred = model
            .run(record.fs(), record.signal_in(), params)
            .map_err(|source| PlotError::Model {
                record: record.name().to_string(),
                source,
            })?;

        let sig_path = dir.join(format!("{}_sig.png", record.name()));
        plot_signals(&sig_path, record.time(), record.signal_out(), &pred)?;
        written.push(sig_path);

        let fft_path = dir.join(format!("{}_fft.png", record.name()));
        plot_spectra(&fft_path, record.fs() as f64, record.signal_out(), &pred)?;
        written.push(fft_path);

        log::debug!("plotted '{}'", record.name());
    }

    Ok(written)
}

/// Reference (solid) and prediction (dotted) against time.
pub fn plot_signals(path: &Path, time: &[f64], reference: &[f64], pred: &[f64]) -> Result<(), PlotError> {
    let n = time.len().min(reference.len()).min(pred.len());
    let x_range = match (time.first(), time.get(n.saturating_sub(1))) {
        (Some(&t0), Some(&t1)) if t1 > t0 => t0..t1,
        _ => 0.0..1.0,
    };
    let y_range = value_range(&[&reference[..n], &pred[..n]]);

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err(path))?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(x_range, y_range)
        .map_err(draw_err(path))?;

    chart
        .draw_series(LineSeries::new(
            time[..n].iter().copied().zip(reference[..n].iter().copied()),
            &BLUE,
        ))
        .map_err(draw_err(path))?;

    // Every other dash of the prediction
    let points: Vec<(f64, f64)> = time[..n].iter().copied().zip(pred[..n].iter().copied()).collect();
    chart
        .draw_series(
            points
                .chunks(DOT_LENGTH)
                .step_by(2)
                .map(|dash| PathElement::new(dash.to_vec(), RED)),
        )
        .map_err(draw_err(path))?;

    root.present().map_err(draw_err(path))?;
    Ok(())
}

/// Re-zeroed dB spectra of reference and prediction on a log frequency axis.
pub fn plot_spectra(path: &Path, fs: f64, reference: &[f64], pred: &[f64]) -> Result<(), PlotError> {
    let options = SpectrumOptions::plot();
    let (ref_db, freqs) = power_spectrum(reference, fs, options);
    let (pred_db, pred_freqs) = power_spectrum(pred, fs, options);

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err(path))?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(FREQ_RANGE.0.log10()..FREQ_RANGE.1.log10(), DB_RANGE.0..DB_RANGE.1)
        .map_err(draw_err(path))?;

    chart
        .draw_series(LineSeries::new(log_points(&freqs, &ref_db), &BLUE))
        .map_err(draw_err(path))?;
    chart
        .draw_series(LineSeries::new(log_points(&pred_freqs, &pred_db), &RED))
        .map_err(draw_err(path))?;

    root.present().map_err(draw_err(path))?;
    Ok(())
}

/// `(log10(f), dB)` pairs inside the plotted frequency span, levels clamped
/// to the plotted dB span.
fn log_points(freqs: &[f64], db: &[f64]) -> Vec<(f64, f64)> {
    freqs
        .iter()
        .zip(db)
        .filter(|(&f, _)| f >= FREQ_RANGE.0 && f <= FREQ_RANGE.1)
        .map(|(&f, &v)| {
            let v = if v.is_nan() { DB_RANGE.0 } else { v.clamp(DB_RANGE.0, DB_RANGE.1) };
            (f.log10(), v)
        })
        .collect()
}

/// A single series against its sample index.
pub fn plot_series(path: &Path, values: &[f64]) -> Result<(), PlotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PlotError::Directory(parent.to_path_buf(), e))?;
    }
    let x_end = values.len().max(2) as f64 - 1.0;
    let y_range = value_range(&[values]);

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err(path))?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(0.0..x_end, y_range)
        .map_err(draw_err(path))?;

    chart
        .draw_series(LineSeries::new(
            values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .map(|(i, &v)| (i as f64, v)),
            &BLUE,
        ))
        .map_err(draw_err(path))?;

    root.present().map_err(draw_err(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn value_range_pads_flat_series() {
        let r = value_range(&[&[0.5, 0.5]]);
        assert!(r.start < 0.5 && r.end > 0.5);
        assert_eq!(value_range(&[&[]]), -1.0..1.0);
    }

    #[test]
    fn log_points_clip_to_plot_span() {
        let pts = log_points(&[0.0, 100.0, 30000.0], &[0.0, -200.0, 0.0]);
        assert_eq!(pts.len(), 1);
        assert!((pts[0].0 - 2.0).abs() < 1e-12);
        assert_eq!(pts[0].1, -80.0);
    }

    #[test]
    fn fit_result_writes_two_plots_per_record() {
        let dir = TempDir::new().unwrap();
        let fs = 8000;
        let input: Vec<f64> = (0..800).map(|i| (i as f64 * 0.3).sin()).collect();
        let output: Vec<f64> = input.iter().map(|x| 0.9 * x).collect();
        let record = FitRecord::from_signals(fs, input, output, None, "tone").unwrap();
        let model = |_fs: u32, x: &[f64], _p: &ParamSet| -> Result<Vec<f64>, ModelError> { Ok(x.to_vec()) };

        let out_dir = dir.path().join("plots");
        let written = plot_fit_result(&out_dir, &[record], &model, &ParamSet::new()).unwrap();
        assert_eq!(written.len(), 2);
        assert!(out_dir.join("tone_sig.png").exists());
        assert!(out_dir.join("tone_fft.png").exists());
    }

    #[test]
    fn series_plot_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/series.png");
        plot_series(&path, &[0.0, 1.0, f64::NEG_INFINITY, 0.5]).unwrap();
        assert!(path.exists());
    }
}
