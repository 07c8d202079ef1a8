//! Compile hand-written DSP classes with the system C++ compiler and drive
//! them through the shared-library boundary.
//!
//! Every test returns early when `g++` is not installed.

use dspfit::prelude::*;
use dspfit_faust::config::{CalibrateConfig, PathsConfig, ProjectConfig};
use dspfit_faust::project::{build_wrapped, Toolchain};
use dspfit_faust::runner::Runner;
use dspfit_faust::toolchain;
use std::path::Path;
use tempfile::TempDir;

const AFFINE_HEADER: &str = r#"
#ifndef FAUSTFLOAT
#define FAUSTFLOAT float
#endif

class Affine {
  float gain = 0.0f;
  float offset = 0.0f;

public:
  void prepare(int fs) { (void)fs; }
  void set_gain(float v) { gain = v; }
  void set_offset(float v) { offset = v; }
  void process(int count, FAUSTFLOAT** buffer) {
    for (int i = 0; i < count; i++) {
      buffer[0][i] = gain * buffer[0][i] + offset;
    }
  }
};
"#;

const LEVEL_HEADER: &str = r#"
#ifndef FAUSTFLOAT
#define FAUSTFLOAT float
#endif

class Level {
  float drive = 0.0f;
  float level = 0.0f;

public:
  void prepare(int fs) { (void)fs; }
  void set_drive(float v) { drive = v; }
  void set_level(float v) { level = v; }
  void process(int count, FAUSTFLOAT** buffer) {
    for (int i = 0; i < count; i++) {
      buffer[0][i] = level * (1.0f + 0.5f * drive) * buffer[0][i];
    }
  }
};
"#;

fn have_compiler() -> bool {
    let found = toolchain::is_available("g++");
    if !found {
        eprintln!("g++ not found, skipping");
    }
    found
}

fn project_in(dir: &Path, class_name: &str, header: &str) -> PathsConfig {
    let paths = PathsConfig {
        dsp_dir: dir.join("dsp"),
        headers_dir: dir.join("headers"),
        build_dir: dir.join("build"),
    };
    std::fs::create_dir_all(&paths.headers_dir).unwrap();
    std::fs::write(paths.headers_dir.join(format!("{class_name}.h")), header).unwrap();
    paths
}

fn params(values: &[(&str, f64)]) -> ParamSet {
    values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn compiled_class_processes_in_place() {
    if !have_compiler() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let paths = project_in(dir.path(), "Affine", AFFINE_HEADER);

    let parameters = vec!["gain".to_string(), "offset".to_string()];
    let dsp = build_wrapped(&paths, &Toolchain::default(), "Affine", parameters).unwrap();
    assert_eq!(dsp.parameters(), ["gain", "offset"]);
    assert!(dsp.path().ends_with("Affine.so"));

    let input = [0.0, 0.25, -0.5, 1.0];
    let output = dsp.run(48000, &input, &params(&[("gain", 2.0), ("offset", 0.5)])).unwrap();
    assert_eq!(output, vec![0.5, 1.0, -0.5, 2.5]);

    // Calls don't share state
    let again = dsp.run(48000, &input, &params(&[("gain", 1.0), ("offset", 0.0)])).unwrap();
    assert_eq!(again, input.to_vec());
}

#[test]
fn missing_parameter_is_reported() {
    if !have_compiler() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let paths = project_in(dir.path(), "Affine", AFFINE_HEADER);

    let parameters = vec!["gain".to_string(), "offset".to_string()];
    let dsp = build_wrapped(&paths, &Toolchain::default(), "Affine", parameters).unwrap();
    let err = dsp.run(48000, &[0.0; 8], &params(&[("gain", 1.0)])).unwrap_err();
    assert_eq!(err.to_string(), ModelError::MissingParameter("offset".to_string()).to_string());
}

#[test]
fn wrong_parameter_count_fails_to_load() {
    if !have_compiler() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let paths = project_in(dir.path(), "Affine", AFFINE_HEADER);

    let dsp = build_wrapped(&paths, &Toolchain::default(), "Affine", vec!["gain".to_string(), "offset".to_string()])
        .unwrap();
    let err = dspfit_faust::NativeDsp::load(dsp.path(), vec!["gain".to_string()]).unwrap_err();
    assert!(matches!(err, dspfit_faust::NativeError::ParameterCount { compiled: 2, given: 1, .. }));
}

#[test]
fn native_class_fits_recorded_pair() {
    if !have_compiler() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let paths = project_in(dir.path(), "Affine", AFFINE_HEADER);
    let dsp = build_wrapped(
        &paths,
        &Toolchain::default(),
        "Affine",
        vec!["gain".to_string(), "offset".to_string()],
    )
    .unwrap();

    let fs = 8000;
    let input = signals::sine(fs as f64, 200.0, 0.05, 0.8);
    let output: Vec<f64> = input.iter().map(|x| 1.5 * x + 0.1).collect();
    let record = FitRecord::from_signals(fs, input, output, None, "affine").unwrap();

    let outcome = fit(
        &[record],
        &dsp,
        &["gain", "offset"],
        &[1.0, 0.0],
        &[],
        &FitOptions::default(),
    )
    .unwrap();

    assert!((outcome.params["gain"] - 1.5).abs() < 1e-2, "{:?}", outcome.params);
    assert!((outcome.params["offset"] - 0.1).abs() < 1e-2, "{:?}", outcome.params);
}

#[test]
fn calibration_sweep_through_native_class() {
    if !have_compiler() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let paths = project_in(dir.path(), "Level", LEVEL_HEADER);

    let signal_path = dir.path().join("signal.wav");
    write_wav(&signal_path, &signals::sine(8000.0, 300.0, 0.1, 0.5), 8000).unwrap();

    let config = ProjectConfig {
        paths,
        calibrate: Some(CalibrateConfig {
            class_name: "Level".to_string(),
            signal: signal_path,
            sweeps: vec!["drive".to_string()],
            parameters: params(&[("drive", 0.0), ("level", 1.0)]),
            parameter_order: Vec::new(),
            points: 3,
        }),
        ..ProjectConfig::default()
    };

    let curves = Runner::new(config).calibrate().unwrap();
    assert_eq!(curves.len(), 1);
    assert_eq!(curves[0].0, "drive");

    // drive -1, 0, 1 scales the level by 0.5, 1 and 1.5
    let factors: Vec<f64> = curves[0]
        .1
        .split(',')
        .map(|v| v.trim_end_matches('f').parse().unwrap())
        .collect();
    let expected = [2.0, 1.0, 1.0 / 1.5];
    assert_eq!(factors.len(), 3);
    for (got, want) in factors.iter().zip(expected) {
        assert!((got - want).abs() < 1e-4, "{got} vs {want}");
    }
}
