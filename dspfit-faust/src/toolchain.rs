//! External build tools: `faust2hpp` and a C++ compiler.
//!
//! # Requirements
//!
//! Both tools must be installed and available in PATH:
//! - `faust2hpp` ships with the amp's DSP sources and needs Faust itself
//!   (`brew install faust`, `apt install faust`).
//! - Any g++-compatible compiler with C++17 support. The command name is
//!   configurable, so `clang++` works too.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolchainError {
    #[error("{0} not found in PATH")]
    NotFound(String),
    #[error("{tool} failed for {class_name}:\n{stderr}")]
    GenerateFailed {
        tool: String,
        class_name: String,
        stderr: String,
    },
    #[error("Compiling {class_name} failed:\n{stderr}")]
    CompileFailed { class_name: String, stderr: String },
    #[error("DSP source not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Run a tool, mapping a missing executable to [`ToolchainError::NotFound`].
fn run(command: &mut Command, program: &str) -> Result<Output, ToolchainError> {
    log::debug!("running {command:?}");
    command.output().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ToolchainError::NotFound(program.to_string()),
        _ => ToolchainError::IoError(e),
    })
}

/// First line of a `--version` style probe.
fn version_line(program: &str, arg: &str) -> Result<String, ToolchainError> {
    let output = run(Command::new(program).arg(arg), program)?;
    if !output.status.success() {
        return Err(ToolchainError::NotFound(program.to_string()));
    }
    // Some tools print their version on stderr
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    Ok(text.lines().next().unwrap_or("unknown").trim().to_string())
}

/// Non-empty, trimmed lines of tool output.
pub fn parse_parameter_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// The Faust-to-C++ header generator.
#[derive(Debug, Clone)]
pub struct Faust2Hpp {
    program: String,
}

impl Default for Faust2Hpp {
    fn default() -> Self {
        Self::new("faust2hpp")
    }
}

impl Faust2Hpp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check that the generator runs.
    pub fn check(&self) -> Result<String, ToolchainError> {
        version_line(&self.program, "--help")
    }

    /// Generate `<headers>/<class>.h` (and its `<class>Faust.h`) from
    /// `<dsp_dir>/<class>.dsp`, with defaults from `<dsp_dir>/<class>.json`.
    ///
    /// Returns the parameter names in the order the class declares them.
    pub fn generate(&self, headers: &Path, dsp_dir: &Path, class_name: &str) -> Result<Vec<String>, ToolchainError> {
        let dsp = dsp_dir.join(format!("{class_name}.dsp"));
        if !dsp.exists() {
            return Err(ToolchainError::SourceNotFound(dsp));
        }
        let pars = dspfit::DefaultsFile::path_for(dsp_dir, class_name);

        let output = run(
            Command::new(&self.program)
                .arg(headers)
                .arg(&dsp)
                .arg(class_name)
                .arg("--pars_file")
                .arg(&pars)
                .arg("--print_pars"),
            &self.program,
        )?;

        if !output.status.success() {
            return Err(ToolchainError::GenerateFailed {
                tool: self.program.clone(),
                class_name: class_name.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let parameters = parse_parameter_list(&String::from_utf8_lossy(&output.stdout));
        log::debug!("{class_name}: {} parameters", parameters.len());
        Ok(parameters)
    }
}

/// A g++-compatible compiler producing shared libraries.
#[derive(Debug, Clone)]
pub struct CxxCompiler {
    program: String,
    flags: Vec<String>,
}

impl Default for CxxCompiler {
    fn default() -> Self {
        Self::new("g++")
    }
}

impl CxxCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flags: ["-std=c++17", "-shared", "-fpic", "-O3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Add compiler flags after the defaults.
    pub fn with_flags(mut self, flags: impl IntoIterator<Item = String>) -> Self {
        self.flags.extend(flags);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn check(&self) -> Result<String, ToolchainError> {
        version_line(&self.program, "--version")
    }

    /// Path of the shared library built for `class_name`.
    pub fn library_path(build_dir: &Path, class_name: &str) -> PathBuf {
        build_dir.join(format!("{class_name}.so"))
    }

    /// Write `code` to `<build_dir>/<class>.cpp` and compile it into
    /// `<build_dir>/<class>.so`, with `headers` on the include path.
    pub fn compile(&self, class_name: &str, build_dir: &Path, headers: &Path, code: &str) -> Result<PathBuf, ToolchainError> {
        std::fs::create_dir_all(build_dir)?;
        let source = build_dir.join(format!("{class_name}.cpp"));
        std::fs::write(&source, code)?;

        let library = Self::library_path(build_dir, class_name);
        let headers = std::fs::canonicalize(headers).unwrap_or_else(|_| headers.to_path_buf());

        let output = run(
            Command::new(&self.program)
                .args(&self.flags)
                .arg("-I")
                .arg(&headers)
                .arg("-o")
                .arg(&library)
                .arg(&source),
            &self.program,
        )?;

        if !output.status.success() {
            return Err(ToolchainError::CompileFailed {
                class_name: class_name.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        log::debug!("compiled {}", library.display());
        Ok(library)
    }
}

/// Whether `program` can be started at all.
pub fn is_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|_| true)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parameter_list_skips_blank_lines() {
        let pars = parse_parameter_list("drive\n  bias \n\n\nmix\n");
        assert_eq!(pars, vec!["drive", "bias", "mix"]);
    }

    #[test]
    fn missing_tool_is_not_found() {
        let compiler = CxxCompiler::new("dspfit-no-such-compiler");
        assert!(matches!(compiler.check(), Err(ToolchainError::NotFound(_))));
        assert!(!is_available("dspfit-no-such-compiler"));
    }

    #[test]
    fn missing_dsp_source_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = Faust2Hpp::default()
            .generate(dir.path(), dir.path(), "Nothing")
            .unwrap_err();
        assert!(matches!(err, ToolchainError::SourceNotFound(_)));
    }

    #[test]
    fn library_path_naming() {
        assert_eq!(
            CxxCompiler::library_path(Path::new("build"), "Triode"),
            PathBuf::from("build/Triode.so")
        );
    }
}
