//! Parameter sets and the per-class parameter defaults file.
//!
//! Every DSP class `Foo` has a `Foo.json` next to its `Foo.dsp`, mapping each
//! parameter to its metadata:
//!
//! ```json
//! {
//! 	"drive": { "default": 0.25, "min": -1, "max": 1 },
//! 	"bias": { "default": 0 }
//! }
//! ```
//!
//! The DSP compiler reads the `default` entries, so writing fitted values
//! back into this file is how a fit becomes the model's new behaviour.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Parameter name → value.
pub type ParamSet = BTreeMap<String, f64>;

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("Failed to access parameter file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse parameter file {0}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),
    #[error("Parameter file {0} is not a JSON object of parameter objects")]
    Layout(PathBuf),
    #[error("Parameter '{0}' is not declared in {1}")]
    UnknownParameter(String, PathBuf),
}

/// How fitted values are written into the defaults file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// `default = fitted + previous default`. Fitted values are offsets
    /// relative to the defaults the class was compiled with.
    #[default]
    Additive,
    /// `default = fitted`.
    Replace,
}

/// A loaded `<class>.json` defaults file. Key order and unknown metadata
/// keys are preserved on save.
#[derive(Debug, Clone)]
pub struct DefaultsFile {
    path: PathBuf,
    pars: Map<String, Value>,
}

impl DefaultsFile {
    /// The defaults file for `class_name` inside `dsp_dir`.
    pub fn path_for(dsp_dir: &Path, class_name: &str) -> PathBuf {
        dsp_dir.join(format!("{class_name}.json"))
    }

    /// Load a defaults file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|e| ParamsError::Io(path.clone(), e))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| ParamsError::Json(path.clone(), e))?;
        let Value::Object(pars) = value else {
            return Err(ParamsError::Layout(path));
        };
        if pars.values().any(|v| !v.is_object()) {
            return Err(ParamsError::Layout(path));
        }
        Ok(Self { path, pars })
    }

    /// An empty defaults file that will be written to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pars: Map::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parameter names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pars.keys().map(String::as_str)
    }

    /// The `default` of one parameter (0 when absent or not a number).
    pub fn default_of(&self, name: &str) -> Option<f64> {
        self.pars
            .get(name)
            .map(|info| info.get("default").and_then(Value::as_f64).unwrap_or(0.0))
    }

    /// All defaults as a parameter set.
    pub fn defaults(&self) -> ParamSet {
        self.pars
            .keys()
            .map(|name| (name.clone(), self.default_of(name).unwrap_or(0.0)))
            .collect()
    }

    /// Write fitted values into the `default` entries.
    ///
    /// Parameters named in `ignore` are left untouched.
    pub fn update_defaults(
        &mut self,
        fitted: &ParamSet,
        ignore: &BTreeSet<String>,
        mode: MergeMode,
    ) -> Result<(), ParamsError> {
        for (name, &value) in fitted {
            if ignore.contains(name) {
                continue;
            }
            let prior = self
                .default_of(name)
                .ok_or_else(|| ParamsError::UnknownParameter(name.clone(), self.path.clone()))?;
            let new_default = match mode {
                MergeMode::Additive => value + prior,
                MergeMode::Replace => value,
            };
            if let Some(Value::Object(info)) = self.pars.get_mut(name) {
                info.insert("default".to_string(), json_number(new_default));
            }
        }
        Ok(())
    }

    /// Add (or overwrite) the metadata of every parameter in `other`.
    pub fn merge_from(&mut self, other: &DefaultsFile) {
        for (name, info) in &other.pars {
            self.pars.insert(name.clone(), info.clone());
        }
    }

    /// Save with tab indentation.
    pub fn save(&self) -> Result<(), ParamsError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        Value::Object(self.pars.clone())
            .serialize(&mut ser)
            .map_err(|e| ParamsError::Json(self.path.clone(), e))?;
        std::fs::write(&self.path, buf).map_err(|e| ParamsError::Io(self.path.clone(), e))
    }
}

/// Non-finite values have no JSON form; they are stored as 0.
fn json_number(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::Number(0.into()))
}

/// Merge several defaults files into `target`, later sources winning.
///
/// `target` itself is read first when it exists, so its own parameters are
/// kept unless a source redefines them.
pub fn merge_files(target: &Path, sources: &[PathBuf]) -> Result<DefaultsFile, ParamsError> {
    let mut merged = if target.exists() {
        DefaultsFile::load(target)?
    } else {
        DefaultsFile::empty(target)
    };
    for source in sources {
        merged.merge_from(&DefaultsFile::load(source)?);
    }
    merged.save()?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn additive_update_adds_to_prior() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "Triode.json",
            r#"{"drive": {"default": 0.5, "min": -1}, "bias": {"max": 2}, "mix": {"default": 1}}"#,
        );
        let mut file = DefaultsFile::load(&path).unwrap();

        let fitted: ParamSet = [("drive".to_string(), 0.25), ("bias".to_string(), -0.5), ("mix".to_string(), 9.0)]
            .into_iter()
            .collect();
        let ignore: BTreeSet<String> = ["mix".to_string()].into_iter().collect();
        file.update_defaults(&fitted, &ignore, MergeMode::Additive).unwrap();
        file.save().unwrap();

        let reloaded = DefaultsFile::load(&path).unwrap();
        assert_eq!(reloaded.default_of("drive"), Some(0.75));
        assert_eq!(reloaded.default_of("bias"), Some(-0.5));
        assert_eq!(reloaded.default_of("mix"), Some(1.0));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\t\"drive\""));
        assert!(text.contains("\"min\": -1"));
        assert!(text.contains("\"max\": 2"));
        // Key order is kept
        assert!(text.find("drive").unwrap() < text.find("bias").unwrap());
    }

    #[test]
    fn replace_update_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "A.json", r#"{"x": {"default": 3}}"#);
        let mut file = DefaultsFile::load(&path).unwrap();
        let fitted: ParamSet = [("x".to_string(), 1.5)].into_iter().collect();
        file.update_defaults(&fitted, &BTreeSet::new(), MergeMode::Replace).unwrap();
        assert_eq!(file.default_of("x"), Some(1.5));
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "A.json", r#"{"x": {"default": 3}}"#);
        let mut file = DefaultsFile::load(&path).unwrap();
        let fitted: ParamSet = [("y".to_string(), 1.0)].into_iter().collect();
        let err = file
            .update_defaults(&fitted, &BTreeSet::new(), MergeMode::Additive)
            .unwrap_err();
        assert!(matches!(err, ParamsError::UnknownParameter(name, _) if name == "y"));
    }

    #[test]
    fn malformed_layout_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "A.json", r#"{"x": 3}"#);
        assert!(matches!(DefaultsFile::load(&path), Err(ParamsError::Layout(_))));
    }

    #[test]
    fn merge_files_unions_parameters() {
        let dir = TempDir::new().unwrap();
        let target = write(dir.path(), "Triode.json", r#"{"mix": {"default": 1}}"#);
        let grid = write(dir.path(), "TriodeGrid.json", r#"{"grid_tau": {"default": 0.1}}"#);
        let plate = write(
            dir.path(),
            "TriodePlate.json",
            r#"{"plate_bias": {"default": 0.2}, "mix": {"default": 0.5}}"#,
        );

        let merged = merge_files(&target, &[grid, plate]).unwrap();
        assert_eq!(merged.names().collect::<Vec<_>>(), vec!["mix", "grid_tau", "plate_bias"]);
        assert_eq!(merged.default_of("mix"), Some(0.5));

        let reloaded = DefaultsFile::load(&target).unwrap();
        assert_eq!(reloaded.defaults().len(), 3);
    }
}
