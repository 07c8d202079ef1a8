//! Quick look at how a model behaves on probe signals.

use dspfit::npy::{self, NpyError};
use dspfit::plot::{self, PlotError};
use dspfit::spectrum::{power_spectrum, SpectrumOptions};
use dspfit::{signals, Model, ModelError, ParamSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Rate the probes run at.
pub const INSPECT_RATE: u32 = 48000;

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("Model failed during inspection: {0}")]
    Model(#[from] ModelError),
    #[error(transparent)]
    Plot(#[from] PlotError),
    #[error(transparent)]
    Npy(#[from] NpyError),
}

/// Run `model` on one second of silence and on a centred impulse, plotting
/// into `plot_dir`:
///
/// - `empty-signal.png`: output for silence
/// - `impulse-signal.png`: output for the impulse
/// - `impulse-response.png`: dB spectrum of the impulse output
/// - `impulse-response.npy`: the raw impulse output
pub fn inspect_behaviour<M: Model + ?Sized>(
    model: &M,
    params: &ParamSet,
    plot_dir: &Path,
) -> Result<Vec<PathBuf>, InspectError> {
    let length = INSPECT_RATE as usize;

    let empty = model.run(INSPECT_RATE, &signals::silence(length), params)?;
    let empty_path = plot_dir.join("empty-signal.png");
    plot::plot_series(&empty_path, &empty)?;

    let response = model.run(INSPECT_RATE, &signals::centred_impulse(length), params)?;
    let impulse_path = plot_dir.join("impulse-signal.png");
    plot::plot_series(&impulse_path, &response)?;

    let (spectrum, _) = power_spectrum(&response, INSPECT_RATE as f64, SpectrumOptions::impulse_response());
    let spectrum_path = plot_dir.join("impulse-response.png");
    plot::plot_series(&spectrum_path, &spectrum)?;

    let response_path = plot_dir.join("impulse-response.npy");
    npy::write_f64(&response_path, &response)?;

    let peak = empty.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if peak > 0.0 {
        log::warn!("non-zero output on silence (peak {peak:.3e}) in {}", plot_dir.display());
    }

    Ok(vec![empty_path, impulse_path, spectrum_path, response_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_plots_and_raw_response() {
        let dir = TempDir::new().unwrap();
        // Two-tap averager
        let model = |_fs: u32, x: &[f64], _p: &ParamSet| -> Result<Vec<f64>, ModelError> {
            let mut prev = 0.0;
            Ok(x.iter()
                .map(|&v| {
                    let y = 0.5 * (v + prev);
                    prev = v;
                    y
                })
                .collect())
        };
        let written = inspect_behaviour(&model, &ParamSet::new(), &dir.path().join("Cabinet")).unwrap();
        assert_eq!(written.len(), 4);
        for name in ["empty-signal.png", "impulse-signal.png", "impulse-response.png"] {
            assert!(dir.path().join("Cabinet").join(name).exists(), "{name}");
        }

        let response = npy::read_f64(dir.path().join("Cabinet").join("impulse-response.npy")).unwrap();
        assert_eq!(response.len(), INSPECT_RATE as usize);
        let centre = response.len() / 2;
        assert_eq!(&response[centre..centre + 2], &[0.5, 0.5]);
        assert_eq!(response.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn model_errors_propagate() {
        let failing = |_fs: u32, _x: &[f64], _p: &ParamSet| -> Result<Vec<f64>, ModelError> {
            Err(ModelError::Failed("nope".to_string()))
        };
        let dir = TempDir::new().unwrap();
        let err = inspect_behaviour(&failing, &ParamSet::new(), dir.path()).unwrap_err();
        assert!(matches!(err, InspectError::Model(_)));
    }
}
