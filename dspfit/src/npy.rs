//! NumPy `.npy` file I/O.
//!
//! Plain 1-D float64 arrays go through `ndarray-npy`. Circuit simulators
//! export structured arrays (one named field per node voltage plus `time`),
//! which `ndarray-npy` cannot represent; those are handled by
//! [`read_records`] / [`write_records`] with a small `nom` parser for the
//! header dictionary.
//!
//! # Example
//!
//! ```rust,ignore
//! use dspfit::npy;
//!
//! let sim = npy::read_records("sims/sine_0.5.npy").unwrap();
//! let time = sim.column("time").unwrap();
//! let v_out = sim.column("v_out").unwrap();
//! ```

use ndarray::Array1;
use ndarray_npy::{ReadNpyError, WriteNpyError};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0},
    combinator::{map, map_res, opt, value},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, preceded, separated_pair, terminated, tuple},
    IResult,
};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NpyError {
    #[error("Failed to read NPY file: {0}")]
    ReadError(#[from] ReadNpyError),
    #[error("Failed to write NPY file: {0}")]
    WriteError(#[from] WriteNpyError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Malformed NPY file: {0}")]
    Malformed(String),
    #[error("Unsupported NPY layout: {0}")]
    Unsupported(String),
}

const MAGIC: &[u8] = b"\x93NUMPY";

/// Read a 1D float64 array from an NPY file.
pub fn read_f64(path: impl AsRef<Path>) -> Result<Vec<f64>, NpyError> {
    let arr: Array1<f64> = ndarray_npy::read_npy(path)?;
    Ok(arr.to_vec())
}

/// Write a 1D float64 array to an NPY file.
pub fn write_f64(path: impl AsRef<Path>, data: &[f64]) -> Result<(), NpyError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let arr = Array1::from_vec(data.to_vec());
    ndarray_npy::write_npy(path, &arr)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Structured arrays
// ---------------------------------------------------------------------------

/// A 1-D structured array, stored column-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordArray {
    fields: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl RecordArray {
    /// Build from named columns of equal length.
    pub fn new(columns: Vec<(String, Vec<f64>)>) -> Result<Self, NpyError> {
        let len = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        if columns.iter().any(|(_, c)| c.len() != len) {
            return Err(NpyError::Malformed("columns differ in length".to_string()));
        }
        let (fields, columns) = columns.into_iter().unzip();
        Ok(Self { fields, columns })
    }

    /// Field names in file order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Values of one field.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.fields
            .iter()
            .position(|f| f == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Iterate over `(name, values)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.fields
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter().map(Vec::as_slice))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    F8,
    F4,
    I8,
    I4,
}

impl FieldType {
    fn parse(descr: &str) -> Option<Self> {
        match descr {
            "<f8" => Some(Self::F8),
            "<f4" => Some(Self::F4),
            "<i8" => Some(Self::I8),
            "<i4" => Some(Self::I4),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::F8 | Self::I8 => 8,
            Self::F4 | Self::I4 => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            Self::F8 => f64::from_le_bytes(bytes[..8].try_into().unwrap_or([0; 8])),
            Self::F4 => f32::from_le_bytes(bytes[..4].try_into().unwrap_or([0; 4])) as f64,
            Self::I8 => i64::from_le_bytes(bytes[..8].try_into().unwrap_or([0; 8])) as f64,
            Self::I4 => i32::from_le_bytes(bytes[..4].try_into().unwrap_or([0; 4])) as f64,
        }
    }
}

/// Parsed header dictionary value.
#[derive(Debug, Clone, PartialEq)]
enum HeaderValue {
    Str(String),
    Bool(bool),
    Shape(Vec<usize>),
    Fields(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
struct Header {
    fields: Vec<(String, String)>,
    fortran_order: bool,
    shape: Vec<usize>,
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
    ))(input)
}

fn comma(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char(','), multispace0)(input)
}

/// `(1000,)`, `(3, 4)` or `()`.
fn shape(input: &str) -> IResult<&str, Vec<usize>> {
    delimited(
        terminated(char('('), multispace0),
        terminated(
            separated_list0(comma, map_res(digit1, str::parse::<usize>)),
            opt(comma),
        ),
        preceded(multispace0, char(')')),
    )(input)
}

/// `('time', '<f8')`
fn field(input: &str) -> IResult<&str, (String, String)> {
    map(
        delimited(
            terminated(char('('), multispace0),
            terminated(separated_pair(quoted, comma, quoted), opt(comma)),
            preceded(multispace0, char(')')),
        ),
        |(name, descr)| (name.to_string(), descr.to_string()),
    )(input)
}

fn field_list(input: &str) -> IResult<&str, Vec<(String, String)>> {
    delimited(
        terminated(char('['), multispace0),
        terminated(separated_list1(comma, field), opt(comma)),
        preceded(multispace0, char(']')),
    )(input)
}

fn header_value(input: &str) -> IResult<&str, HeaderValue> {
    alt((
        map(field_list, HeaderValue::Fields),
        map(shape, HeaderValue::Shape),
        value(HeaderValue::Bool(true), tag("True")),
        value(HeaderValue::Bool(false), tag("False")),
        map(quoted, |s| HeaderValue::Str(s.to_string())),
    ))(input)
}

fn header_dict(input: &str) -> IResult<&str, Vec<(&str, HeaderValue)>> {
    delimited(
        terminated(char('{'), multispace0),
        terminated(
            separated_list0(
                comma,
                separated_pair(
                    quoted,
                    tuple((multispace0, char(':'), multispace0)),
                    header_value,
                ),
            ),
            opt(comma),
        ),
        preceded(multispace0, char('}')),
    )(input)
}

fn parse_header(text: &str) -> Result<Header, NpyError> {
    let (_, entries) = header_dict(text.trim())
        .map_err(|e| NpyError::Malformed(format!("header dictionary: {e}")))?;

    let mut fields = None;
    let mut fortran_order = false;
    let mut shape = None;

    for (key, val) in entries {
        match (key, val) {
            ("descr", HeaderValue::Fields(f)) => fields = Some(f),
            ("descr", HeaderValue::Str(d)) => {
                return Err(NpyError::Unsupported(format!(
                    "plain dtype '{d}', expected a structured array"
                )))
            }
            ("fortran_order", HeaderValue::Bool(b)) => fortran_order = b,
            ("shape", HeaderValue::Shape(s)) => shape = Some(s),
            _ => {}
        }
    }

    Ok(Header {
        fields: fields.ok_or_else(|| NpyError::Malformed("missing 'descr'".to_string()))?,
        fortran_order,
        shape: shape.ok_or_else(|| NpyError::Malformed("missing 'shape'".to_string()))?,
    })
}

/// Read a 1-D structured array (e.g. a simulator export with `time` and
/// node-voltage fields).
pub fn read_records(path: impl AsRef<Path>) -> Result<RecordArray, NpyError> {
    let bytes = std::fs::read(path)?;
    decode_records(&bytes)
}

fn decode_records(bytes: &[u8]) -> Result<RecordArray, NpyError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(NpyError::Malformed("missing NUMPY magic".to_string()));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(NpyError::Malformed("truncated header length".to_string()));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(NpyError::Unsupported(format!("format version {v}"))),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(NpyError::Malformed("truncated header".to_string()));
    }
    let text = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|e| NpyError::Malformed(format!("header is not text: {e}")))?;
    let header = parse_header(text)?;

    if header.fortran_order {
        return Err(NpyError::Unsupported("Fortran order".to_string()));
    }
    let len = match header.shape.as_slice() {
        [n] => *n,
        other => {
            return Err(NpyError::Unsupported(format!(
                "shape {other:?}, expected 1-D"
            )))
        }
    };

    let types = header
        .fields
        .iter()
        .map(|(name, descr)| {
            FieldType::parse(descr).ok_or_else(|| {
                NpyError::Unsupported(format!("field '{name}' has dtype '{descr}'"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let record_size: usize = types.iter().map(|t| t.size()).sum();
    if record_size == 0 {
        return Err(NpyError::Malformed("record has no fields".to_string()));
    }

    let data = &bytes[data_start..];
    let needed = len
        .checked_mul(record_size)
        .ok_or_else(|| NpyError::Malformed(format!("shape ({len},) is too large")))?;
    if data.len() < needed {
        return Err(NpyError::Malformed(format!(
            "expected {needed} data bytes, found {}",
            data.len()
        )));
    }

    let mut columns: Vec<Vec<f64>> = types.iter().map(|_| Vec::with_capacity(len)).collect();
    for record in data.chunks_exact(record_size).take(len) {
        let mut offset = 0;
        for (col, ty) in columns.iter_mut().zip(&types) {
            col.push(ty.decode(&record[offset..offset + ty.size()]));
            offset += ty.size();
        }
    }

    let fields = header.fields.into_iter().map(|(name, _)| name).collect();
    Ok(RecordArray { fields, columns })
}

/// Write a structured array with `<f8` fields (format version 1.0).
pub fn write_records(path: impl AsRef<Path>, records: &RecordArray) -> Result<(), NpyError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let descr = records
        .fields
        .iter()
        .map(|f| format!("('{f}', '<f8')"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut header = format!(
        "{{'descr': [{descr}], 'fortran_order': False, 'shape': ({},), }}",
        records.len()
    );
    // Pad so the data starts on a 64-byte boundary.
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let header_len = u16::try_from(header.len())
        .map_err(|_| NpyError::Unsupported("header longer than 65535 bytes".to_string()))?;

    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    file.write_all(MAGIC)?;
    file.write_all(&[1, 0])?;
    file.write_all(&header_len.to_le_bytes())?;
    file.write_all(header.as_bytes())?;
    for i in 0..records.len() {
        for col in &records.columns {
            file.write_all(&col[i].to_le_bytes())?;
        }
    }
    file.flush()?;
    Ok(())
}
