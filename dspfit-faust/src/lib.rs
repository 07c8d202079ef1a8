//! # dspfit-faust
//!
//! Compile Faust DSP classes into shared libraries, call them from Rust and
//! fit their parameters against recorded or simulated reference data.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! dspfit-faust = { path = "../dspfit-faust" }
//! ```
//!
//! ### Building a Class
//!
//! Each class goes through `faust2hpp`, gets wrapped with a C entry point,
//! is compiled with the C++ compiler and loaded as a [`native::NativeDsp`],
//! which implements [`dspfit::Model`]:
//!
//! ```rust,ignore
//! use dspfit::prelude::*;
//! use dspfit_faust::config::PathsConfig;
//! use dspfit_faust::project::{build_class, Toolchain};
//!
//! let dsp = build_class(&PathsConfig::default(), &Toolchain::default(), "TriodePlate")?;
//!
//! let input = signals::sine(96000.0, 440.0, 0.05, 0.5);
//! let params: ParamSet = dsp.parameters().iter().map(|p| (p.clone(), 0.0)).collect();
//! let output = dsp.run(96000, &input, &params)?;
//! ```
//!
//! ### Running a Fit Job
//!
//! ```rust,ignore
//! use dspfit_faust::config::ProjectConfig;
//! use dspfit_faust::runner::Runner;
//!
//! let config = ProjectConfig::load("dspfit.yaml")?;
//! let report = Runner::new(config).run_job("triode_plate")?;
//! report.print_summary();
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Write a default dspfit.yaml and the project directories
//! dspfit init
//!
//! # Check that faust2hpp and g++ run
//! dspfit check-toolchain
//!
//! # Build every configured class and plot its behaviour
//! dspfit build --plot-dir plots/build
//!
//! # Fit a configured job without touching the defaults files
//! dspfit fit triode_plate --no-update --report reports/triode_plate.json
//!
//! # Print level-compensation curves
//! dspfit calibrate
//! ```
//!
//! ## Module Overview
//!
//! - [`codegen`] - C++ wrapper generation and monitor injection
//! - [`toolchain`] - `faust2hpp` and C++ compiler invocation
//! - [`native`] - Loading and calling compiled classes
//! - [`project`] - Build orchestration
//! - [`inspect`] - Probe-signal behaviour plots
//! - [`config`] - YAML project configuration
//! - [`runner`] - Fit jobs and calibration sweeps
//! - [`report`] - JSON and terminal reporting

// ============================================================================
// Public modules
// ============================================================================

pub mod codegen;
pub mod config;
pub mod inspect;
pub mod native;
pub mod project;
pub mod report;
pub mod runner;
pub mod toolchain;

// ============================================================================
// Top-level re-exports for convenience
// ============================================================================

// Config types
pub use config::{
    BuildConfig,
    CalibrateConfig,
    ConfigError,
    FitJob,
    MergeGroup,
    PathsConfig,
    ProjectConfig,
    RecordSource,
    ToolchainConfig,
};

// Native boundary
pub use codegen::CodegenError;
pub use native::{NativeDsp, NativeError};
pub use toolchain::{CxxCompiler, Faust2Hpp, ToolchainError};

// Build
pub use project::{BuiltClass, ProjectError, Toolchain};

// Runner types
pub use runner::{RunOptions, Runner, RunnerError};

// Report types
pub use report::FitReport;

/// Prelude module - import everything commonly needed
///
/// ```rust
/// use dspfit_faust::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{FitJob, ProjectConfig, RecordSource};
    pub use crate::native::NativeDsp;
    pub use crate::project::{build_all, build_class, build_class_with_monitor, build_wrapped, Toolchain};
    pub use crate::report::FitReport;
    pub use crate::runner::{RunOptions, Runner};
    pub use dspfit::prelude::*;
}
