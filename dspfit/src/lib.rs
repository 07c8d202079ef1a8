//! # dspfit
//!
//! Fit the free parameters of DSP models to reference recordings.
//!
//! A model is anything that maps an input signal to an output signal given a
//! set of named parameters ([`fit::Model`]). Reference data comes either from
//! recorded WAV input/output pairs or from circuit-simulation exports, and is
//! turned into [`fit::FitRecord`]s with a mask selecting the reliable part of
//! each recording. [`fit::fit`] then minimizes a range-normalized masked error
//! over all records with one or more solver stages.
//!
//! This crate is pure numerics and file formats. Compiling DSP code and
//! calling it through a shared library lives in `dspfit-faust`.
//!
//! ## Fitting a closure
//!
//! ```rust
//! use dspfit::prelude::*;
//!
//! let fs = 48000;
//! let input = signals::sine(fs as f64, 440.0, 0.01, 1.0);
//! let output: Vec<f64> = input.iter().map(|x| (2.0 * x).tanh()).collect();
//! let record = FitRecord::from_signals(fs, input, output, None, "tanh").unwrap();
//!
//! let model = |_fs: u32, x: &[f64], p: &ParamSet| -> Result<Vec<f64>, ModelError> {
//!     Ok(x.iter().map(|v| (p["drive"] * v).tanh()).collect())
//! };
//!
//! let outcome = fit(&[record], &model, &["drive"], &[1.0], &[], &FitOptions::default()).unwrap();
//! assert!((outcome.params["drive"] - 2.0).abs() < 1e-2);
//! ```
//!
//! ## Reference data
//!
//! ```rust,ignore
//! use dspfit::{simdata, wav};
//!
//! // Recorded pair, first 2.5 seconds
//! let (input, fs) = wav::read_wav("data/dry.wav", Some(2.5))?;
//! let (output, _) = wav::read_wav("data/wet.wav", Some(2.5))?;
//!
//! // Simulation exports, resampled to the model rate
//! for sim in simdata::load_dir("sims/triode", Some(&["v_in", "v_plate"]))? {
//!     let record = sim.resample(96000)?.to_record("v_in", "v_plate", Some((0.01, 0.05)), sim.label())?;
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`fit`] - Records, loss and the multi-stage fit driver
//! - [`solver`] - Minimization methods
//! - [`params`] - Parameter sets and per-class defaults files
//! - [`wav`] - WAV reading and writing
//! - [`npy`] - NumPy `.npy` files, plain and structured
//! - [`simdata`] - Circuit-simulation exports
//! - [`spectrum`] - Power spectra
//! - [`calibrate`] - Level-compensation sweeps
//! - [`plot`] - Diagnostic PNG plots
//! - [`signals`] - Probe signals

// ============================================================================
// Public modules
// ============================================================================

pub mod calibrate;
pub mod fit;
pub mod npy;
pub mod params;
pub mod plot;
pub mod signals;
pub mod simdata;
pub mod solver;
pub mod spectrum;
pub mod wav;

// ============================================================================
// Top-level re-exports for convenience
// ============================================================================

pub use fit::{fit, FitError, FitOptions, FitOutcome, FitRecord, Model, ModelError, StageReport};
pub use params::{DefaultsFile, MergeMode, ParamSet, ParamsError};
pub use solver::Method;

/// Prelude module - import everything commonly needed
///
/// ```rust
/// use dspfit::prelude::*;
/// ```
pub mod prelude {
    pub use crate::fit::{
        fit, masked_loss, window_mask, FitError, FitOptions, FitOutcome, FitRecord, Model,
        ModelError, StageReport,
    };
    pub use crate::params::{DefaultsFile, MergeMode, ParamSet};
    pub use crate::signals;
    pub use crate::simdata::SimData;
    pub use crate::solver::Method;
    pub use crate::spectrum::{power_spectrum, SpectrumOptions};
    pub use crate::wav::{read_wav, write_wav};
}
