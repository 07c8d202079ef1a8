//! Calling compiled DSP classes through their shared library.

use crate::codegen::{COMPUTE_SYMBOL, PARAMETER_COUNT_SYMBOL};
use dspfit::{Model, ModelError, ParamSet};
use libloading::{Library, Symbol};
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `void compute(int fs, int count, FAUSTFLOAT** buffer, const FAUSTFLOAT* params)`
type ComputeFn = unsafe extern "C" fn(c_int, c_int, *mut *mut f32, *const f32);
/// `int parameter_count()`
type ParameterCountFn = unsafe extern "C" fn() -> c_int;

/// Channel slots handed to the DSP. Unused slots are null.
const CHANNEL_SLOTS: usize = 2;

#[derive(Error, Debug)]
pub enum NativeError {
    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("Symbol '{symbol}' missing from {path}: {source}")]
    Symbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },
    #[error("{path} was compiled with {compiled} parameters, {given} given")]
    ParameterCount {
        path: PathBuf,
        compiled: usize,
        given: usize,
    },
}

/// A loaded DSP class.
///
/// Each call creates a fresh DSP instance inside the library, so calls are
/// independent and no state carries over between them.
pub struct NativeDsp {
    compute: ComputeFn,
    parameters: Vec<String>,
    path: PathBuf,
    // Keeps `compute` valid
    _library: Library,
}

impl std::fmt::Debug for NativeDsp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeDsp")
            .field("path", &self.path)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl NativeDsp {
    /// Load a library built from [`crate::codegen::wrap_compute`] output.
    ///
    /// `parameters` must be the names the class was wrapped with, in the
    /// same order.
    pub fn load(path: impl AsRef<Path>, parameters: Vec<String>) -> Result<Self, NativeError> {
        let path = path.as_ref().to_path_buf();

        // SAFETY: loading runs the library's static initializers; the
        // libraries loaded here are built by this crate from generated code.
        let library = unsafe { Library::new(&path) }.map_err(|source| NativeError::Load {
            path: path.clone(),
            source,
        })?;

        let symbol_err = |symbol: &[u8]| {
            let path = path.clone();
            let symbol = String::from_utf8_lossy(symbol).into_owned();
            move |source: libloading::Error| NativeError::Symbol { path, symbol, source }
        };

        // SAFETY: the wrapper exports both symbols with exactly these
        // signatures.
        let compute: ComputeFn = unsafe {
            let symbol: Symbol<ComputeFn> = library.get(COMPUTE_SYMBOL).map_err(symbol_err(COMPUTE_SYMBOL))?;
            *symbol
        };
        let compiled = unsafe {
            let symbol: Symbol<ParameterCountFn> = library
                .get(PARAMETER_COUNT_SYMBOL)
                .map_err(symbol_err(PARAMETER_COUNT_SYMBOL))?;
            symbol()
        };

        if usize::try_from(compiled).ok() != Some(parameters.len()) {
            return Err(NativeError::ParameterCount {
                path,
                compiled: compiled.max(0) as usize,
                given: parameters.len(),
            });
        }

        log::debug!("loaded {} ({} parameters)", path.display(), parameters.len());
        Ok(Self {
            compute,
            parameters,
            path,
            _library: library,
        })
    }

    /// Parameter names in the order the library expects them.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parameter values in compiled order.
    fn parameter_values(&self, params: &ParamSet) -> Result<Vec<f32>, ModelError> {
        self.parameters
            .iter()
            .map(|name| {
                params
                    .get(name)
                    .map(|&v| v as f32)
                    .ok_or_else(|| ModelError::MissingParameter(name.clone()))
            })
            .collect()
    }
}

impl Model for NativeDsp {
    fn run(&self, sample_rate: u32, input: &[f64], params: &ParamSet) -> Result<Vec<f64>, ModelError> {
        let values = self.parameter_values(params)?;
        let fs = c_int::try_from(sample_rate)
            .map_err(|_| ModelError::Failed(format!("sample rate {sample_rate} out of range")))?;
        let count = c_int::try_from(input.len())
            .map_err(|_| ModelError::Failed(format!("{} samples is too long for one call", input.len())))?;

        let mut channel: Vec<f32> = input.iter().map(|&x| x as f32).collect();
        let mut buffers: [*mut f32; CHANNEL_SLOTS] = [std::ptr::null_mut(); CHANNEL_SLOTS];
        buffers[0] = channel.as_mut_ptr();

        // SAFETY: `channel` holds `count` samples and `values` one entry per
        // compiled parameter; both outlive the call and the library keeps no
        // reference to them afterwards.
        unsafe {
            (self.compute)(fs, count, buffers.as_mut_ptr(), values.as_ptr());
        }

        Ok(channel.into_iter().map(f64::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_fails_to_load() {
        let err = NativeDsp::load("/nonexistent/Triode.so", vec![]).unwrap_err();
        assert!(matches!(err, NativeError::Load { .. }));
    }
}
