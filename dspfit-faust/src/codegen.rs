//! C++ source generation around Faust-generated DSP classes.
//!
//! Every wrapped class exports the same two C symbols, so one Rust
//! function-pointer type can call any of them:
//!
//! ```c
//! void compute(int fs, int count, FAUSTFLOAT** buffer, const FAUSTFLOAT* params);
//! int parameter_count();
//! ```
//!
//! `params` holds one value per parameter, in the order the class was
//! wrapped with. The buffer is processed in place.

use thiserror::Error;

/// Exported symbol that runs the DSP.
pub const COMPUTE_SYMBOL: &[u8] = b"compute";
/// Exported symbol returning the number of parameters.
pub const PARAMETER_COUNT_SYMBOL: &[u8] = b"parameter_count";

#[derive(Error, Debug, PartialEq)]
pub enum CodegenError {
    #[error("'{0}' is not a valid C++ identifier")]
    InvalidIdentifier(String),
    #[error("Monitor member '{0}' not found in source")]
    MonitorNotFound(String),
    #[error("Can't find the per-sample loop of compute() to insert a monitor")]
    InsertionPointNotFound,
}

fn check_identifier(name: &str) -> Result<(), CodegenError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CodegenError::InvalidIdentifier(name.to_string()))
    }
}

/// Append the exported entry points for `class_name` to the class header
/// source `header`.
///
/// The DSP instance is created per call, prepared at `fs`, given each
/// parameter through `set_<name>` in order, then run over the buffer.
pub fn wrap_compute<S: AsRef<str>>(header: &str, class_name: &str, parameters: &[S]) -> Result<String, CodegenError> {
    check_identifier(class_name)?;
    for name in parameters {
        check_identifier(name.as_ref())?;
    }

    let set_parameters: String = parameters
        .iter()
        .enumerate()
        .map(|(i, name)| format!("  dsp.set_{}(params[{i}]);\n", name.as_ref()))
        .collect();

    Ok(format!(
        r#"{header}

extern "C" {{

int parameter_count() {{
  return {count};
}}

void compute(int fs, int count, FAUSTFLOAT** buffer, const FAUSTFLOAT* params) {{
  {class_name} dsp = {class_name}();
  dsp.prepare(fs);
{set_parameters}  dsp.process(count, buffer);
}}

}}
"#,
        count = parameters.len(),
    ))
}

/// Make the generated `compute` write `member[0]` to the first output on
/// every sample, exposing an internal signal.
///
/// `code` is the Faust-generated class source. The assignment goes at the
/// end of the per-sample loop, after the regular output is written.
pub fn insert_monitor(code: &str, member: &str) -> Result<String, CodegenError> {
    check_identifier(member)?;
    if !code.contains(member) {
        return Err(CodegenError::MonitorNotFound(member.to_string()));
    }

    let compute = code
        .find("\tvirtual void compute(")
        .ok_or(CodegenError::InsertionPointNotFound)?;
    let loop_end = code[compute..]
        .find("\t\t}\n\t}\n")
        .map(|offset| compute + offset)
        .ok_or(CodegenError::InsertionPointNotFound)?;

    let mut patched = String::with_capacity(code.len() + member.len() + 32);
    patched.push_str(&code[..loop_end]);
    patched.push_str(&format!("\t\t\toutputs[0][i] = {member}[0];\n"));
    patched.push_str(&code[loop_end..]);
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAUST_CLASS: &str = "class TriodeFaust {\n\
        \tfloat fRec0[2];\n\
        \tvirtual void compute(int count, FAUSTFLOAT** inputs, FAUSTFLOAT** outputs) {\n\
        \t\tfor (int i = 0; (i < count); i = (i + 1)) {\n\
        \t\t\tfRec0[0] = float(input0[i]);\n\
        \t\t\toutput0[i] = FAUSTFLOAT(fRec0[0]);\n\
        \t\t}\n\
        \t}\n\
        };\n";

    #[test]
    fn wrapper_exports_entry_points() {
        let code = wrap_compute("// header", "Triode", &["drive", "bias"]).unwrap();
        assert!(code.starts_with("// header"));
        assert!(code.contains("extern \"C\""));
        assert!(code.contains("void compute(int fs, int count, FAUSTFLOAT** buffer, const FAUSTFLOAT* params)"));
        assert!(code.contains("int parameter_count() {\n  return 2;\n}"));
        assert!(code.contains("Triode dsp = Triode();"));
        assert!(code.contains("dsp.prepare(fs);"));
        assert!(code.contains("dsp.process(count, buffer);"));

        let drive = code.find("dsp.set_drive(params[0]);").unwrap();
        let bias = code.find("dsp.set_bias(params[1]);").unwrap();
        let process = code.find("dsp.process").unwrap();
        assert!(drive < bias && bias < process);
    }

    #[test]
    fn wrapper_without_parameters() {
        let code = wrap_compute::<&str>("", "Cabinet", &[]).unwrap();
        assert!(code.contains("return 0;"));
        assert!(!code.contains("dsp.set_"));
    }

    #[test]
    fn wrapper_rejects_bad_names() {
        let err = wrap_compute("", "Triode", &["drive; system(\"rm\")"]).unwrap_err();
        assert!(matches!(err, CodegenError::InvalidIdentifier(_)));
        assert!(wrap_compute::<&str>("", "1Triode", &[]).is_err());
    }

    #[test]
    fn monitor_goes_at_end_of_sample_loop() {
        let patched = insert_monitor(FAUST_CLASS, "fRec0").unwrap();
        let output = patched.find("output0[i] = FAUSTFLOAT(fRec0[0]);").unwrap();
        let monitor = patched.find("\t\t\toutputs[0][i] = fRec0[0];\n").unwrap();
        let loop_close = patched.find("\t\t}\n\t}\n").unwrap();
        assert!(output < monitor && monitor < loop_close);
        assert_eq!(patched.len(), FAUST_CLASS.len() + "\t\t\toutputs[0][i] = fRec0[0];\n".len());
    }

    #[test]
    fn monitor_errors() {
        assert_eq!(
            insert_monitor(FAUST_CLASS, "fMissing").unwrap_err(),
            CodegenError::MonitorNotFound("fMissing".to_string())
        );
        assert_eq!(
            insert_monitor("float fRec0[2];", "fRec0").unwrap_err(),
            CodegenError::InsertionPointNotFound
        );
    }
}
