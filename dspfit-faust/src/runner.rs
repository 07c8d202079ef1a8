//! Fit-job and calibration runner.
//!
//! Orchestrates: build the class, load reference data, fit, write the
//! fitted values back into the class's defaults file and plot the result.

use crate::config::{ConfigError, FitJob, ProjectConfig, RecordSource};
use crate::native::NativeDsp;
use crate::project::{self, ProjectError, Toolchain};
use crate::report::{self, FitReport};
use dspfit::calibrate;
use dspfit::params::{DefaultsFile, MergeMode, ParamsError};
use dspfit::plot::{self, PlotError};
use dspfit::simdata::{self, SimDataError};
use dspfit::wav::{self, WavError};
use dspfit::{FitError, FitRecord, Model, ModelError, ParamSet};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Wav(#[from] WavError),
    #[error(transparent)]
    SimData(#[from] SimDataError),
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Plot(#[from] PlotError),
    #[error("Model failed: {0}")]
    Model(#[from] ModelError),
    #[error("{class_name} has no parameter '{name}'")]
    UnknownParameter { class_name: String, name: String },
    #[error("{input} is sampled at {input_rate} Hz but {output} at {output_rate} Hz")]
    RateMismatch {
        input: PathBuf,
        input_rate: u32,
        output: PathBuf,
        output_rate: u32,
    },
    #[error("No simulation files in {0}")]
    NoSimulations(PathBuf),
    #[error("No calibrate section in the configuration")]
    NoCalibration,
}

/// Per-invocation overrides of a fit job.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Never write the defaults file, whatever the job says.
    pub no_update: bool,
    /// Replaces the job's seed.
    pub seed: Option<u64>,
}

/// Fit and calibration runner.
pub struct Runner {
    config: ProjectConfig,
    toolchain: Toolchain,
    options: RunOptions,
}

impl Runner {
    pub fn new(config: ProjectConfig) -> Self {
        let toolchain = Toolchain::from_config(&config.toolchain);
        Self {
            config,
            toolchain,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Run the fit job `name`.
    pub fn run_job(&self, name: &str) -> Result<FitReport, RunnerError> {
        let job = self.config.job(name)?;
        let paths = &self.config.paths;

        log::info!("building {}", job.class_name);
        let dsp = match &job.monitor {
            Some(monitor) => project::build_class_with_monitor(paths, &self.toolchain, &job.class_name, monitor)?,
            None => project::build_class(paths, &self.toolchain, &job.class_name)?,
        };

        let names = fit_parameters(job, &dsp)?;

        let defaults_path = DefaultsFile::path_for(&paths.dsp_dir, &job.class_name);
        let mut defaults = if defaults_path.exists() {
            Some(DefaultsFile::load(&defaults_path)?)
        } else {
            log::warn!("no defaults file at {}", defaults_path.display());
            None
        };

        // Every compiled parameter gets a value; the fit overlays its own
        let base: ParamSet = dsp
            .parameters()
            .iter()
            .map(|p| (p.clone(), starting_value(job, defaults.as_ref(), p)))
            .collect();
        let values: Vec<f64> = names.iter().map(|n| base[n]).collect();

        let model = |fs: u32, input: &[f64], params: &ParamSet| -> Result<Vec<f64>, ModelError> {
            let mut all = base.clone();
            all.extend(params.iter().map(|(k, v)| (k.clone(), *v)));
            dsp.run(fs, input, &all)
        };

        let records = self.load_records(job)?;
        log::info!("fitting {} parameters against {} records", names.len(), records.len());

        let mut options = job.fit_options();
        if let Some(seed) = self.options.seed {
            options.seed = Some(seed);
        }

        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let fixed: Vec<&str> = job.fixed.iter().map(String::as_str).collect();
        let outcome = dspfit::fit(&records, &model, &name_refs, &values, &fixed, &options)?;

        let mut defaults_updated = None;
        if job.update_defaults && !self.options.no_update {
            if let Some(defaults) = defaults.as_mut() {
                let written: ParamSet = outcome
                    .params
                    .iter()
                    .filter(|(k, _)| !job.fixed.contains(*k))
                    .map(|(k, v)| (k.clone(), *v))
                    .collect();
                let ignore: BTreeSet<String> = job.ignore.iter().cloned().collect();
                defaults.update_defaults(&written, &ignore, job.merge)?;
                defaults.save()?;
                log::info!("updated {}", defaults.path().display());
                defaults_updated = Some(defaults.path().to_path_buf());
            }
        }

        let plots = match &job.plot_dir {
            Some(dir) => plot::plot_fit_result(dir, &records, &model, &outcome.params)?,
            None => Vec::new(),
        };

        Ok(FitReport {
            job: name.to_string(),
            class_name: job.class_name.clone(),
            timestamp: report::timestamp(),
            git_commit: report::git_commit(),
            monitor: job.monitor.clone(),
            sample_rate: job.sample_rate,
            records: records.iter().map(|r| r.name().to_string()).collect(),
            final_loss: outcome.final_loss(),
            parameters: outcome.params,
            fixed: job.fixed.clone(),
            stages: outcome.stages,
            merge: job.merge,
            defaults_updated,
            plots,
        })
    }

    /// Load every record source of `job`.
    pub fn load_records(&self, job: &FitJob) -> Result<Vec<FitRecord>, RunnerError> {
        let mut records = Vec::new();
        for source in &job.records {
            match source {
                RecordSource::Sim {
                    dir,
                    input,
                    output,
                    window,
                } => {
                    let keep = [input.as_str(), output.as_str()];
                    let sims = simdata::load_dir(dir, Some(&keep[..]))?;
                    if sims.is_empty() {
                        return Err(RunnerError::NoSimulations(dir.clone()));
                    }
                    for sim in sims {
                        let resampled = sim.resample(job.sample_rate)?;
                        records.push(resampled.to_record(input, output, *window, sim.label())?);
                    }
                }
                RecordSource::Wav {
                    input,
                    output,
                    max_length,
                    window,
                    name,
                } => {
                    let name = name.clone().unwrap_or_else(|| file_stem(input));
                    records.push(load_wav_pair(input, output, *max_length, *window, name)?);
                }
            }
        }
        Ok(records)
    }

    /// Level-compensation sweeps of the configured calibration class.
    ///
    /// Returns `(parameter, initializer list)` pairs in sweep order.
    pub fn calibrate(&self) -> Result<Vec<(String, String)>, RunnerError> {
        let cal = self.config.calibrate.as_ref().ok_or(RunnerError::NoCalibration)?;
        let (signal, fs) = wav::read_wav(&cal.signal, None)?;

        let parameters = cal.ordered_parameters();
        for name in &cal.sweeps {
            if !parameters.contains(name) {
                return Err(RunnerError::UnknownParameter {
                    class_name: cal.class_name.clone(),
                    name: name.clone(),
                });
            }
        }

        let dsp = project::build_wrapped(&self.config.paths, &self.toolchain, &cal.class_name, parameters)?;

        let mut curves = Vec::with_capacity(cal.sweeps.len());
        for name in &cal.sweeps {
            log::info!("sweeping {name}");
            let factors = calibrate::sweep(&dsp, &cal.parameters, name, &signal, fs, cal.points)?;
            curves.push((name.clone(), calibrate::format_cpp_floats(&factors)));
        }
        Ok(curves)
    }
}

/// Names the fit sees, checked against the compiled class.
fn fit_parameters(job: &FitJob, dsp: &NativeDsp) -> Result<Vec<String>, RunnerError> {
    if job.parameters.is_empty() {
        return Ok(dsp.parameters().to_vec());
    }
    for name in job.parameters.iter().chain(job.initial.keys()) {
        if !dsp.parameters().contains(name) {
            return Err(RunnerError::UnknownParameter {
                class_name: job.class_name.clone(),
                name: name.clone(),
            });
        }
    }
    Ok(job.parameters.clone())
}

/// The value a parameter starts from (and keeps, when not fitted).
///
/// Under additive merge the model's parameters are offsets from the stored
/// defaults, so 0 means "current default".
pub fn starting_value(job: &FitJob, defaults: Option<&DefaultsFile>, name: &str) -> f64 {
    if let Some(&value) = job.initial.get(name) {
        return value;
    }
    match job.merge {
        MergeMode::Additive => 0.0,
        MergeMode::Replace => defaults.and_then(|d| d.default_of(name)).unwrap_or(0.0),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string())
}

/// Read a recorded input/output pair into one record.
///
/// Both files must share a sample rate; the longer one is truncated.
pub fn load_wav_pair(
    input: &Path,
    output: &Path,
    max_length: Option<f64>,
    window: Option<(f64, f64)>,
    name: String,
) -> Result<FitRecord, RunnerError> {
    let (mut signal_in, input_rate) = wav::read_wav(input, max_length)?;
    let (mut signal_out, output_rate) = wav::read_wav(output, max_length)?;
    if input_rate != output_rate {
        return Err(RunnerError::RateMismatch {
            input: input.to_path_buf(),
            input_rate,
            output: output.to_path_buf(),
            output_rate,
        });
    }

    let length = signal_in.len().min(signal_out.len());
    if signal_in.len() != signal_out.len() {
        log::debug!("truncating '{name}' to {length} samples");
    }
    signal_in.truncate(length);
    signal_out.truncate(length);

    Ok(FitRecord::from_signals(input_rate, signal_in, signal_out, window, name)?)
}
