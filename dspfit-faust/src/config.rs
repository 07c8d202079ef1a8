//! YAML project configuration (`dspfit.yaml`).
//!
//! # Configuration Structure
//!
//! ```yaml
//! paths:
//!   dsp_dir: dsp
//!   headers_dir: headers
//!   build_dir: build
//!
//! toolchain:
//!   faust2hpp: faust2hpp
//!   cxx: g++
//!
//! build:
//!   classes: [Cabinet, ToneStack, Triode, TetrodeGrid, TetrodePlate]
//!   keep_headers: [PushPullAmp]
//!   merge:
//!     - target: Triode
//!       sources: [TriodeGrid, TriodePlate]
//!   inspect_overrides:
//!     Triode: { mix: 1.0, overhead: 1.0, unscale: 1.0 }
//!
//! calibrate:
//!   class_name: PushPullAmp
//!   signal: data/signal.wav
//!   sweeps: [triode_drive, tetrode_drive]
//!   parameters:
//!     triode_num_stages: 3
//!     tetrode_plate_sag_toggle: -1
//!
//! fits:
//!   triode_plate:
//!     class_name: TriodePlate
//!     sample_rate: 96000
//!     records:
//!       - type: sim
//!         dir: sims/triode_plate
//!         input: v_grid
//!         output: v_plate
//!         window: [0.01, 0.05]
//!     fixed: [plate_bias]
//!     methods: [nelder-mead, lbfgs, nelder-mead]
//!     randomness: 0.1
//!     plot_dir: plots/triode_plate
//! ```
//!
//! Every field except the fit jobs' `class_name` and `records` has a default.
//!
//! # Programmatic Usage
//!
//! ```rust
//! use dspfit_faust::config::ProjectConfig;
//!
//! // Load from file
//! // let config = ProjectConfig::load("dspfit.yaml").unwrap();
//!
//! // Or use defaults
//! let config = ProjectConfig::default_config();
//! assert!(config.fits.contains_key("triode_plate"));
//! ```

use dspfit::{FitOptions, MergeMode, Method, ParamSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("No fit job named '{0}'")]
    UnknownJob(String),
    #[error("Fit job '{job}': {reason}")]
    InvalidJob { job: String, reason: String },
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub calibrate: Option<CalibrateConfig>,
    #[serde(default)]
    pub fits: BTreeMap<String, FitJob>,
}

/// Project directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// `.dsp` sources and their `.json` parameter files.
    #[serde(default = "default_dsp_dir")]
    pub dsp_dir: PathBuf,
    /// Generated and hand-written C++ headers.
    #[serde(default = "default_headers_dir")]
    pub headers_dir: PathBuf,
    /// Wrapper sources and shared libraries.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
}

fn default_dsp_dir() -> PathBuf { PathBuf::from("dsp") }
fn default_headers_dir() -> PathBuf { PathBuf::from("headers") }
fn default_build_dir() -> PathBuf { PathBuf::from("build") }

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dsp_dir: default_dsp_dir(),
            headers_dir: default_headers_dir(),
            build_dir: default_build_dir(),
        }
    }
}

/// External tool names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_faust2hpp")]
    pub faust2hpp: String,
    #[serde(default = "default_cxx")]
    pub cxx: String,
    /// Extra compiler flags.
    #[serde(default)]
    pub cxx_flags: Vec<String>,
}

fn default_faust2hpp() -> String { "faust2hpp".to_string() }
fn default_cxx() -> String { "g++".to_string() }

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            faust2hpp: default_faust2hpp(),
            cxx: default_cxx(),
            cxx_flags: Vec::new(),
        }
    }
}

/// What `build` compiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Classes to generate and compile, in order.
    #[serde(default)]
    pub classes: Vec<String>,
    /// Hand-written headers (by stem) that must survive cleaning.
    #[serde(default)]
    pub keep_headers: Vec<String>,
    /// Parameter files merged before building.
    #[serde(default)]
    pub merge: Vec<MergeGroup>,
    /// Parameter values other than 0 used when inspecting a class.
    #[serde(default)]
    pub inspect_overrides: BTreeMap<String, ParamSet>,
}

/// Combine the parameter files of `sources` into the one of `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeGroup {
    pub target: String,
    pub sources: Vec<String>,
}

/// Level-compensation sweeps of a hand-written class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrateConfig {
    /// Class whose header `<headers_dir>/<class_name>.h` is wrapped.
    pub class_name: String,
    /// Stimulus WAV, mixed down to mono.
    pub signal: PathBuf,
    /// Parameters swept one at a time.
    pub sweeps: Vec<String>,
    /// Baseline value of every parameter, in the class's setter order.
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// Setter order. When empty, the keys of `parameters` are used.
    #[serde(default)]
    pub parameter_order: Vec<String>,
    #[serde(default = "default_points")]
    pub points: usize,
}

fn default_points() -> usize { dspfit::calibrate::DEFAULT_POINTS }

impl CalibrateConfig {
    /// Parameter names in setter order.
    pub fn ordered_parameters(&self) -> Vec<String> {
        if self.parameter_order.is_empty() {
            self.parameters.keys().cloned().collect()
        } else {
            self.parameter_order.clone()
        }
    }
}

/// One fit of a class against reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitJob {
    pub class_name: String,
    /// Internal member copied to the output on every sample.
    #[serde(default)]
    pub monitor: Option<String>,
    /// Rate simulation data is resampled to.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    pub records: Vec<RecordSource>,
    /// Parameters the fit sees. Empty means every compiled parameter.
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Starting values. Unlisted parameters start at 0 offset (additive
    /// merge) or at their current default (replace merge).
    #[serde(default)]
    pub initial: ParamSet,
    /// Parameters kept at their starting value.
    #[serde(default)]
    pub fixed: Vec<String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub randomness: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_max_iters")]
    pub max_iters: u64,
    #[serde(default)]
    pub plot_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub update_defaults: bool,
    #[serde(default)]
    pub merge: MergeMode,
    /// Parameters whose fitted value is not written back.
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_sample_rate() -> u32 { 96000 }
fn default_methods() -> Vec<Method> { FitOptions::default().methods }
fn default_max_iters() -> u64 { FitOptions::default().max_iters }
fn default_true() -> bool { true }

impl FitJob {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            methods: self.methods.clone(),
            randomness: self.randomness,
            seed: self.seed,
            max_iters: self.max_iters,
        }
    }
}

/// Where reference data for a fit comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecordSource {
    /// Every `<signal>_<amplitude>.npy` simulation export in `dir`.
    #[serde(rename = "sim")]
    Sim {
        dir: PathBuf,
        input: String,
        output: String,
        #[serde(default)]
        window: Option<(f64, f64)>,
    },
    /// A recorded input/output WAV pair.
    #[serde(rename = "wav")]
    Wav {
        input: PathBuf,
        output: PathBuf,
        #[serde(default)]
        max_length: Option<f64>,
        #[serde(default)]
        window: Option<(f64, f64)>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl RecordSource {
    pub fn window(&self) -> Option<(f64, f64)> {
        match self {
            RecordSource::Sim { window, .. } | RecordSource::Wav { window, .. } => *window,
        }
    }
}

impl ProjectConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Write configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Look up a fit job and check it is usable.
    pub fn job(&self, name: &str) -> Result<&FitJob, ConfigError> {
        let job = self
            .fits
            .get(name)
            .ok_or_else(|| ConfigError::UnknownJob(name.to_string()))?;
        let invalid = |reason: &str| ConfigError::InvalidJob {
            job: name.to_string(),
            reason: reason.to_string(),
        };
        if job.records.is_empty() {
            return Err(invalid("no records"));
        }
        if job.methods.is_empty() {
            return Err(invalid("no methods"));
        }
        if job.sample_rate == 0 {
            return Err(invalid("sample_rate must be positive"));
        }
        if let Some((start, end)) = job.records.iter().filter_map(RecordSource::window).find(|(s, e)| s >= e) {
            return Err(invalid(&format!("empty window [{start}, {end})")));
        }
        Ok(job)
    }

    /// The standard amp project layout.
    pub fn default_config() -> Self {
        let mut inspect_overrides = BTreeMap::new();
        // Triode is normally driven by the amp with these away from 0
        inspect_overrides.insert(
            "Triode".to_string(),
            [("mix", 1.0), ("overhead", 1.0), ("unscale", 1.0)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );

        let build = BuildConfig {
            classes: ["Cabinet", "ToneStack", "Triode", "TetrodeGrid", "TetrodePlate"]
                .into_iter()
                .map(String::from)
                .collect(),
            keep_headers: vec!["PushPullAmp".to_string()],
            merge: vec![MergeGroup {
                target: "Triode".to_string(),
                sources: vec!["TriodeGrid".to_string(), "TriodePlate".to_string()],
            }],
            inspect_overrides,
        };

        let mut parameters: BTreeMap<String, f64> = [
            "triode_overhead", "triode_drive", "tetrode_drive", "tonestack_bass",
            "tonestack_mids", "tonestack_treble", "input_level", "output_level",
        ]
        .into_iter()
        .map(|k| (k.to_string(), 0.0))
        .collect();
        parameters.insert("triode_num_stages".to_string(), 3.0);
        // Sag causes loudness fluctuations over time
        parameters.insert("tetrode_plate_sag_toggle".to_string(), -1.0);

        let calibrate = CalibrateConfig {
            class_name: "PushPullAmp".to_string(),
            signal: PathBuf::from("data/signal.wav"),
            sweeps: vec!["triode_drive".to_string(), "tetrode_drive".to_string()],
            parameters,
            parameter_order: Vec::new(),
            points: default_points(),
        };

        let mut fits = BTreeMap::new();
        fits.insert(
            "triode_plate".to_string(),
            FitJob {
                class_name: "TriodePlate".to_string(),
                monitor: None,
                sample_rate: default_sample_rate(),
                records: vec![RecordSource::Sim {
                    dir: PathBuf::from("sims/triode_plate"),
                    input: "v_grid".to_string(),
                    output: "v_plate".to_string(),
                    window: Some((0.01, 0.05)),
                }],
                parameters: Vec::new(),
                initial: ParamSet::new(),
                fixed: Vec::new(),
                methods: vec![Method::NelderMead],
                randomness: 0.0,
                seed: None,
                max_iters: default_max_iters(),
                plot_dir: Some(PathBuf::from("plots/triode_plate")),
                update_defaults: true,
                merge: MergeMode::Additive,
                ignore: Vec::new(),
            },
        );

        Self {
            paths: PathsConfig::default(),
            toolchain: ToolchainConfig::default(),
            build,
            calibrate: Some(calibrate),
            fits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: ProjectConfig = serde_yaml::from_str(
            r#"
fits:
  cab:
    class_name: Cabinet
    records:
      - type: wav
        input: dry.wav
        output: wet.wav
"#,
        )
        .unwrap();

        assert_eq!(config.paths.dsp_dir, PathBuf::from("dsp"));
        assert_eq!(config.toolchain.cxx, "g++");
        assert!(config.calibrate.is_none());

        let job = config.job("cab").unwrap();
        assert_eq!(job.sample_rate, 96000);
        assert_eq!(job.methods, vec![Method::NelderMead]);
        assert_eq!(job.max_iters, 2000);
        assert_eq!(job.merge, MergeMode::Additive);
        assert!(job.update_defaults);
        assert!(job.records[0].window().is_none());
    }

    #[test]
    fn full_job_parses() {
        let config: ProjectConfig = serde_yaml::from_str(
            r#"
fits:
  plate:
    class_name: TriodePlate
    monitor: fRec3
    sample_rate: 48000
    records:
      - type: sim
        dir: sims/plate
        input: v_grid
        output: v_plate
        window: [0.01, 0.05]
    fixed: [plate_bias]
    methods: [nelder-mead, lbfgs, cg, steepest-descent]
    randomness: 0.2
    seed: 42
    merge: replace
    ignore: [mix]
"#,
        )
        .unwrap();

        let job = config.job("plate").unwrap();
        assert_eq!(job.monitor.as_deref(), Some("fRec3"));
        assert_eq!(job.methods.len(), 4);
        assert_eq!(job.records[0].window(), Some((0.01, 0.05)));
        assert_eq!(job.merge, MergeMode::Replace);

        let options = job.fit_options();
        assert_eq!(options.seed, Some(42));
        assert_eq!(options.randomness, 0.2);
    }

    #[test]
    fn invalid_jobs_are_rejected() {
        let config: ProjectConfig = serde_yaml::from_str(
            r#"
fits:
  backwards:
    class_name: Cabinet
    records:
      - type: wav
        input: a.wav
        output: b.wav
        window: [0.5, 0.1]
  empty:
    class_name: Cabinet
    records: []
"#,
        )
        .unwrap();
        assert!(matches!(config.job("backwards"), Err(ConfigError::InvalidJob { .. })));
        assert!(matches!(config.job("empty"), Err(ConfigError::InvalidJob { .. })));
        assert!(matches!(config.job("missing"), Err(ConfigError::UnknownJob(_))));
    }

    #[test]
    fn unknown_method_is_a_parse_error() {
        let result: Result<ProjectConfig, _> = serde_yaml::from_str(
            r#"
fits:
  x:
    class_name: Cabinet
    methods: [powell]
    records: []
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = ProjectConfig::default_config();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ProjectConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.build.classes, config.build.classes);
        assert_eq!(parsed.build.inspect_overrides["Triode"]["mix"], 1.0);
        assert!(parsed.job("triode_plate").is_ok());
    }
}
