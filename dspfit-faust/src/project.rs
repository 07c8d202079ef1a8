//! Building DSP classes into loadable models.
//!
//! A class `Foo` goes through three steps:
//!
//! 1. `faust2hpp` turns `<dsp_dir>/Foo.dsp` into `<headers_dir>/Foo.h` and
//!    reports the parameter names.
//! 2. The header is wrapped with the exported C entry points and compiled
//!    into `<build_dir>/Foo.so`.
//! 3. The library is loaded as a [`NativeDsp`].

use crate::codegen::{self, CodegenError};
use crate::config::{PathsConfig, ProjectConfig, ToolchainConfig};
use crate::inspect::{self, InspectError};
use crate::native::{NativeDsp, NativeError};
use crate::toolchain::{CxxCompiler, Faust2Hpp, ToolchainError};
use dspfit::params::{self, DefaultsFile, ParamsError};
use dspfit::ParamSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Failed to access {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error("Code generation for {class_name} failed: {source}")]
    Codegen {
        class_name: String,
        #[source]
        source: CodegenError,
    },
    #[error(transparent)]
    Native(#[from] NativeError),
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("Inspecting {class_name} failed: {source}")]
    Inspect {
        class_name: String,
        #[source]
        source: InspectError,
    },
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> ProjectError + '_ {
    move |e| ProjectError::Io(path.to_path_buf(), e)
}

/// The configured header generator and compiler.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    pub faust: Faust2Hpp,
    pub cxx: CxxCompiler,
}

impl Toolchain {
    pub fn from_config(config: &ToolchainConfig) -> Self {
        Self {
            faust: Faust2Hpp::new(config.faust2hpp.clone()),
            cxx: CxxCompiler::new(config.cxx.clone()).with_flags(config.cxx_flags.iter().cloned()),
        }
    }
}

/// Path of a header in the headers directory.
fn header_path(paths: &PathsConfig, stem: &str) -> PathBuf {
    paths.headers_dir.join(format!("{stem}.h"))
}

fn read_header(paths: &PathsConfig, stem: &str) -> Result<String, ProjectError> {
    let path = header_path(paths, stem);
    std::fs::read_to_string(&path).map_err(io_err(&path))
}

/// Wrap an existing header `<headers_dir>/<class>.h`, compile and load it.
///
/// Used directly for hand-written classes, which have no `.dsp` source.
pub fn build_wrapped(
    paths: &PathsConfig,
    toolchain: &Toolchain,
    class_name: &str,
    parameters: Vec<String>,
) -> Result<NativeDsp, ProjectError> {
    let header = read_header(paths, class_name)?;
    let code = codegen::wrap_compute(&header, class_name, parameters.as_slice()).map_err(|source| ProjectError::Codegen {
        class_name: class_name.to_string(),
        source,
    })?;
    let library = toolchain
        .cxx
        .compile(class_name, &paths.build_dir, &paths.headers_dir, &code)?;
    Ok(NativeDsp::load(library, parameters)?)
}

/// Generate, wrap, compile and load a Faust class.
pub fn build_class(paths: &PathsConfig, toolchain: &Toolchain, class_name: &str) -> Result<NativeDsp, ProjectError> {
    let parameters = toolchain
        .faust
        .generate(&paths.headers_dir, &paths.dsp_dir, class_name)?;
    build_wrapped(paths, toolchain, class_name, parameters)
}

/// Like [`build_class`], but the model's output is replaced by the internal
/// member `monitor`.
///
/// The member lives in the generated `<class>Faust.h`, which is patched in
/// place before the wrapper is compiled.
pub fn build_class_with_monitor(
    paths: &PathsConfig,
    toolchain: &Toolchain,
    class_name: &str,
    monitor: &str,
) -> Result<NativeDsp, ProjectError> {
    let parameters = toolchain
        .faust
        .generate(&paths.headers_dir, &paths.dsp_dir, class_name)?;

    let faust_stem = format!("{class_name}Faust");
    let faust_header = read_header(paths, &faust_stem)?;
    let patched = codegen::insert_monitor(&faust_header, monitor).map_err(|source| ProjectError::Codegen {
        class_name: class_name.to_string(),
        source,
    })?;
    let path = header_path(paths, &faust_stem);
    std::fs::write(&path, patched).map_err(io_err(&path))?;
    log::debug!("monitoring {monitor} in {class_name}");

    build_wrapped(paths, toolchain, class_name, parameters)
}

/// A class produced by [`build_all`].
#[derive(Debug)]
pub struct BuiltClass {
    pub class_name: String,
    pub dsp: NativeDsp,
    /// Inspection plots, when requested.
    pub plots: Vec<PathBuf>,
}

/// Delete regular files in `dir` accepted by `remove`.
fn clean_dir(dir: &Path, remove: impl Fn(&Path) -> bool) -> Result<usize, ProjectError> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if path.is_file() && remove(&path) {
            std::fs::remove_file(&path).map_err(io_err(&path))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remove previous build output and generated headers.
///
/// Headers whose stem is listed in `keep_headers` are hand-written and kept.
pub fn clean(paths: &PathsConfig, keep_headers: &[String]) -> Result<(), ProjectError> {
    for dir in [&paths.build_dir, &paths.headers_dir] {
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    }

    let build_files = clean_dir(&paths.build_dir, |_| true)?;
    let headers = clean_dir(&paths.headers_dir, |path| {
        let is_header = path.extension().map(|e| e == "h").unwrap_or(false);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        is_header && !keep_headers.iter().any(|k| k == stem)
    })?;
    log::debug!("removed {build_files} build files and {headers} generated headers");
    Ok(())
}

/// Parameter values used to inspect a class: 0 everywhere, then overrides.
pub fn inspect_parameters(parameters: &[String], overrides: Option<&ParamSet>) -> ParamSet {
    let mut values: ParamSet = parameters.iter().map(|p| (p.clone(), 0.0)).collect();
    if let Some(overrides) = overrides {
        values.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
    }
    values
}

/// Clean, merge parameter files, then build every configured class.
///
/// With `plot_dir`, each class is inspected into `<plot_dir>/<class>/`.
pub fn build_all(config: &ProjectConfig, plot_dir: Option<&Path>) -> Result<Vec<BuiltClass>, ProjectError> {
    let paths = &config.paths;
    let toolchain = Toolchain::from_config(&config.toolchain);

    clean(paths, &config.build.keep_headers)?;

    for group in &config.build.merge {
        let target = DefaultsFile::path_for(&paths.dsp_dir, &group.target);
        let sources: Vec<PathBuf> = group
            .sources
            .iter()
            .map(|s| DefaultsFile::path_for(&paths.dsp_dir, s))
            .collect();
        let merged = params::merge_files(&target, &sources)?;
        log::info!("merged {} parameters into {}", merged.names().count(), target.display());
    }

    let mut built = Vec::with_capacity(config.build.classes.len());
    for class_name in &config.build.classes {
        let dsp = build_class(paths, &toolchain, class_name)?;

        let plots = match plot_dir {
            Some(plot_dir) => {
                let class_dir = plot_dir.join(class_name);
                let values = inspect_parameters(dsp.parameters(), config.build.inspect_overrides.get(class_name));
                inspect::inspect_behaviour(&dsp, &values, &class_dir).map_err(|source| ProjectError::Inspect {
                    class_name: class_name.clone(),
                    source,
                })?
            }
            None => Vec::new(),
        };

        log::info!("built {class_name} ({} parameters)", dsp.parameters().len());
        built.push(BuiltClass {
            class_name: class_name.clone(),
            dsp,
            plots,
        });
    }

    Ok(built)
}
