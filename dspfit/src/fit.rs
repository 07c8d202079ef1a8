//! Fitting model parameters against reference recordings.
//!
//! The error metric is the masked mean squared error between a model's
//! prediction and each reference recording, divided by that recording's
//! squared peak-to-peak range so quiet and loud recordings weigh the same,
//! summed over recordings and scaled by [`LOSS_SCALE`].
//!
//! [`fit`] runs one or more minimization methods back to back. Every stage
//! after the first starts from the previous result plus Gaussian noise whose
//! scale falls linearly to zero at the last stage.
//!
//! # Example
//!
//! ```rust
//! use dspfit::fit::{fit, FitOptions, FitRecord, ModelError};
//! use dspfit::params::ParamSet;
//!
//! let fs = 1000;
//! let time: Vec<f64> = (0..200).map(|i| i as f64 / fs as f64).collect();
//! let input: Vec<f64> = time.iter().map(|t| (40.0 * t).sin()).collect();
//! let output: Vec<f64> = input.iter().map(|x| 0.5 * x).collect();
//! let record = FitRecord::new(fs, time, input, output, vec![true; 200], "gain").unwrap();
//!
//! let model = |_fs: u32, x: &[f64], p: &ParamSet| -> Result<Vec<f64>, ModelError> {
//!     Ok(x.iter().map(|v| v * p["gain"]).collect())
//! };
//!
//! let outcome = fit(&[record], &model, &["gain"], &[1.0], &[], &FitOptions::default()).unwrap();
//! assert!((outcome.params["gain"] - 0.5).abs() < 1e-3);
//! ```

use crate::params::ParamSet;
use crate::solver::{self, Method, SolverError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeSet;
use thiserror::Error;

/// Fixed factor applied to the summed error to keep the loss in a range the
/// solvers' default tolerances handle well.
pub const LOSS_SCALE: f64 = 1e3;

/// Added to each record's squared range so silent references don't divide by
/// zero.
pub const RANGE_EPSILON: f64 = 1e-12;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model parameter '{0}' has no value")]
    MissingParameter(String),
    #[error("Model produced {got} samples for an input of {expected}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("Model call failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum FitError {
    #[error("Record '{name}': {reason}")]
    InvalidRecord { name: String, reason: String },
    #[error("{names} parameter names but {values} initial values")]
    ParameterCount { names: usize, values: usize },
    #[error("Frozen parameter '{0}' is not a fit parameter")]
    UnknownFrozen(String),
    #[error("No minimization methods given")]
    NoMethods,
    #[error("No calibration records given")]
    NoRecords,
    #[error("Model error on record '{record}': {source}")]
    Model {
        record: String,
        #[source]
        source: ModelError,
    },
    #[error("Solver error in stage {stage} ({method}): {message}")]
    Solver {
        stage: usize,
        method: Method,
        message: String,
    },
}

/// A reference recording used to fit a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FitRecord {
    fs: u32,
    time: Vec<f64>,
    signal_in: Vec<f64>,
    signal_out: Vec<f64>,
    mask: Vec<bool>,
    name: String,
}

impl FitRecord {
    /// Build a record. All series must have the same length and the mask
    /// must select at least one sample.
    pub fn new(
        fs: u32,
        time: Vec<f64>,
        signal_in: Vec<f64>,
        signal_out: Vec<f64>,
        mask: Vec<bool>,
        name: impl Into<String>,
    ) -> Result<Self, FitError> {
        let name = name.into();
        let n = time.len();
        if signal_in.len() != n || signal_out.len() != n || mask.len() != n {
            return Err(FitError::InvalidRecord {
                name,
                reason: format!(
                    "length mismatch: time {}, input {}, output {}, mask {}",
                    n,
                    signal_in.len(),
                    signal_out.len(),
                    mask.len()
                ),
            });
        }
        if !mask.iter().any(|&m| m) {
            return Err(FitError::InvalidRecord {
                name,
                reason: "mask selects no samples".to_string(),
            });
        }
        Ok(Self {
            fs,
            time,
            signal_in,
            signal_out,
            mask,
            name,
        })
    }

    /// Build a record with the time axis `i / fs`.
    pub fn from_signals(
        fs: u32,
        signal_in: Vec<f64>,
        signal_out: Vec<f64>,
        window: Option<(f64, f64)>,
        name: impl Into<String>,
    ) -> Result<Self, FitError> {
        let time: Vec<f64> = (0..signal_in.len()).map(|i| i as f64 / fs as f64).collect();
        let mask = window_mask(&time, window);
        Self::new(fs, time, signal_in, signal_out, mask, name)
    }

    pub fn fs(&self) -> u32 {
        self.fs
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn signal_in(&self) -> &[f64] {
        &self.signal_in
    }

    pub fn signal_out(&self) -> &[f64] {
        &self.signal_out
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Peak-to-peak range of the reference over the masked samples.
    pub fn masked_range(&self) -> f64 {
        let (lo, hi) = self
            .signal_out
            .iter()
            .zip(&self.mask)
            .filter(|(_, &m)| m)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (&v, _)| {
                (lo.min(v), hi.max(v))
            });
        hi - lo
    }

    /// Masked mean squared error of `pred`, divided by the squared range.
    pub fn scaled_error(&self, pred: &[f64]) -> Result<f64, ModelError> {
        if pred.len() < self.signal_out.len() {
            return Err(ModelError::LengthMismatch {
                expected: self.signal_out.len(),
                got: pred.len(),
            });
        }
        let (sum, count) = pred
            .iter()
            .zip(&self.signal_out)
            .zip(&self.mask)
            .filter(|(_, &m)| m)
            .fold((0.0, 0usize), |(sum, count), ((p, r), _)| {
                (sum + (p - r) * (p - r), count + 1)
            });
        let range = self.masked_range();
        Ok(sum / count as f64 / (range * range + RANGE_EPSILON))
    }
}

/// Boolean mask selecting `start <= t < end`. `None` selects everything.
pub fn window_mask(time: &[f64], window: Option<(f64, f64)>) -> Vec<bool> {
    match window {
        Some((start, end)) => time.iter().map(|&t| t >= start && t < end).collect(),
        None => vec![true; time.len()],
    }
}

/// A model that turns an input signal into a predicted output.
pub trait Model {
    /// Run the model on `input` sampled at `sample_rate` with the given
    /// parameter values.
    fn run(&self, sample_rate: u32, input: &[f64], params: &ParamSet) -> Result<Vec<f64>, ModelError>;
}

impl<F> Model for F
where
    F: Fn(u32, &[f64], &ParamSet) -> Result<Vec<f64>, ModelError>,
{
    fn run(&self, sample_rate: u32, input: &[f64], params: &ParamSet) -> Result<Vec<f64>, ModelError> {
        self(sample_rate, input, params)
    }
}

/// The aggregate loss of `params` over all records.
pub fn masked_loss<M: Model + ?Sized>(
    records: &[FitRecord],
    model: &M,
    params: &ParamSet,
) -> Result<f64, FitError> {
    let mut err = 0.0;
    for record in records {
        let model_err = |source| FitError::Model {
            record: record.name.clone(),
            source,
        };
        let pred = model
            .run(record.fs, &record.signal_in, params)
            .map_err(model_err)?;
        err += record.scaled_error(&pred).map_err(model_err)?;
    }
    Ok(err * LOSS_SCALE)
}

/// Fit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Methods run in sequence, each starting from the previous result.
    pub methods: Vec<Method>,
    /// Scale of the random perturbation between stages; 0 disables it.
    pub randomness: f64,
    /// Seed for the perturbation noise. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Iteration cap per stage.
    pub max_iters: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            methods: vec![Method::NelderMead],
            randomness: 0.0,
            seed: None,
            max_iters: 2000,
        }
    }
}

impl FitOptions {
    /// Standard deviation of the noise added before stage `index`.
    pub fn perturbation_scale(&self, index: usize) -> f64 {
        let n = self.methods.len();
        if index == 0 || n < 2 || self.randomness <= 0.0 {
            return 0.0;
        }
        self.randomness * (n - 1 - index) as f64 / (n - 1) as f64
    }
}

/// Result of one minimization stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub method: Method,
    pub loss: f64,
    pub evaluations: usize,
    pub perturbation: f64,
}

/// Final parameters and per-stage history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    /// Every parameter: fitted values for free ones, initial values for
    /// frozen ones.
    pub params: ParamSet,
    pub stages: Vec<StageReport>,
}

impl FitOutcome {
    /// Loss after the final stage.
    pub fn final_loss(&self) -> Option<f64> {
        self.stages.last().map(|s| s.loss)
    }
}

/// Loss as a function of the free parameters only.
struct Objective<'a, M: ?Sized> {
    records: &'a [FitRecord],
    model: &'a M,
    base: &'a ParamSet,
    free: &'a [String],
    evaluations: Cell<usize>,
}

impl<M: Model + ?Sized> Objective<'_, M> {
    fn params_at(&self, x: &[f64]) -> ParamSet {
        let mut params = self.base.clone();
        for (name, &v) in self.free.iter().zip(x) {
            params.insert(name.clone(), v);
        }
        params
    }
}

impl<M: Model + ?Sized> solver::Objective for Objective<'_, M> {
    type Error = FitError;

    fn loss(&self, x: &[f64]) -> Result<f64, FitError> {
        self.evaluations.set(self.evaluations.get() + 1);
        masked_loss(self.records, self.model, &self.params_at(x))
    }
}

/// Fit `model` to `records`.
///
/// `names` and `values` give every model parameter and its starting value;
/// parameters listed in `fixed` keep their starting value and are hidden from
/// the solver.
pub fn fit<M: Model + ?Sized>(
    records: &[FitRecord],
    model: &M,
    names: &[&str],
    values: &[f64],
    fixed: &[&str],
    options: &FitOptions,
) -> Result<FitOutcome, FitError> {
    if names.len() != values.len() {
        return Err(FitError::ParameterCount {
            names: names.len(),
            values: values.len(),
        });
    }
    if options.methods.is_empty() {
        return Err(FitError::NoMethods);
    }
    if records.is_empty() {
        return Err(FitError::NoRecords);
    }
    if let Some(unknown) = fixed.iter().find(|f| !names.contains(*f)) {
        return Err(FitError::UnknownFrozen(unknown.to_string()));
    }

    let frozen: BTreeSet<&str> = fixed.iter().copied().collect();
    let base: ParamSet = names
        .iter()
        .zip(values)
        .map(|(n, &v)| (n.to_string(), v))
        .collect();
    let free: Vec<String> = names
        .iter()
        .filter(|n| !frozen.contains(*n))
        .map(|n| n.to_string())
        .collect();
    let mut x: Vec<f64> = names
        .iter()
        .zip(values)
        .filter(|(n, _)| !frozen.contains(*n))
        .map(|(_, &v)| v)
        .collect();

    log::info!(
        "fitting {} of {} parameters on {} records ({} frozen)",
        free.len(),
        names.len(),
        records.len(),
        frozen.len()
    );

    let objective = Objective {
        records,
        model,
        base: &base,
        free: &free,
        evaluations: Cell::new(0),
    };

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut stages = Vec::with_capacity(options.methods.len());
    for (index, &method) in options.methods.iter().enumerate() {
        let perturbation = options.perturbation_scale(index);
        if perturbation > 0.0 {
            for v in &mut x {
                let noise: f64 = StandardNormal.sample(&mut rng);
                *v += noise * perturbation;
            }
        }

        objective.evaluations.set(0);
        let result = solver::minimize(method, &objective, &x, options.max_iters).map_err(
            |source| match source {
                SolverError::Objective(e) => e,
                SolverError::Failed(message) => FitError::Solver {
                    stage: index,
                    method,
                    message,
                },
            },
        )?;

        log::info!("loss: {:+.4e} ({method}, stage {})", result.loss, index + 1);
        stages.push(StageReport {
            method,
            loss: result.loss,
            evaluations: objective.evaluations.get(),
            perturbation,
        });
        x = result.params;
    }

    Ok(FitOutcome {
        params: objective.params_at(&x),
        stages,
    })
}
