use std::fmt;

use motion_core::{Error, Result};
use serde_json::Value;

// Numpy dtypes: the element description stored in `.zarray`
//
// Scalars are numpy type strings: byte order, kind, size.
//
//   "<f8"  little-endian float64      "|b1"  bool
//   "<i8"  little-endian int64        "|u1"  uint8
//   ">u4"  big-endian uint32          "<U16" 16 UCS-4 code points (64 bytes)
//   "|S8"  8 raw bytes
//
// Records are structured dtypes: a JSON list of fields, each
// `[name, typestr]` or `[name, typestr, shape]`. Fields are packed with no
// padding, so a field's offset is the sum of the sizes before it:
//
//   [["centroid", "<f8", [2]], ["yaw", "<f4"]]   -> itemsize 20
//     centroid @ 0 (16 bytes), yaw @ 16 (4 bytes)

/// Byte order of a multi-byte scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
    /// Single-byte and string types (`|`).
    NotApplicable,
}

/// Kind character of a numpy type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Int,
    UInt,
    Float,
    /// Fixed-width UCS-4 text (`U`).
    Unicode,
    /// Fixed-width raw bytes (`S`).
    Bytes,
}

/// A single numpy scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarType {
    pub kind: ScalarKind,
    pub order: ByteOrder,
    /// Size of one element in bytes.
    pub size: usize,
}

impl ScalarType {
    pub const F64: ScalarType = ScalarType::num(ScalarKind::Float, 8);
    pub const F32: ScalarType = ScalarType::num(ScalarKind::Float, 4);
    pub const I64: ScalarType = ScalarType::num(ScalarKind::Int, 8);
    pub const U64: ScalarType = ScalarType::num(ScalarKind::UInt, 8);
    pub const BOOL: ScalarType = ScalarType {
        kind: ScalarKind::Bool,
        order: ByteOrder::NotApplicable,
        size: 1,
    };

    const fn num(kind: ScalarKind, size: usize) -> Self {
        ScalarType {
            kind,
            order: ByteOrder::Little,
            size,
        }
    }

    /// Fixed-width unicode string of `chars` code points.
    pub const fn unicode(chars: usize) -> Self {
        ScalarType {
            kind: ScalarKind::Unicode,
            order: ByteOrder::Little,
            size: chars * 4,
        }
    }

    /// Parse a numpy type string such as `"<f8"` or `"<U16"`.
    pub fn parse(s: &str) -> Result<Self> {
        let unsupported = || Error::UnsupportedDtype(s.to_string());
        let mut chars = s.chars();
        let order = match chars.next().ok_or_else(unsupported)? {
            '<' => ByteOrder::Little,
            '>' => ByteOrder::Big,
            '|' => ByteOrder::NotApplicable,
            // native order; every platform we target is little-endian
            '=' => ByteOrder::Little,
            _ => return Err(unsupported()),
        };
        let kind = match chars.next().ok_or_else(unsupported)? {
            'b' => ScalarKind::Bool,
            'i' => ScalarKind::Int,
            'u' => ScalarKind::UInt,
            'f' => ScalarKind::Float,
            'U' => ScalarKind::Unicode,
            'S' => ScalarKind::Bytes,
            _ => return Err(unsupported()),
        };
        let n: usize = chars.as_str().parse().map_err(|_| unsupported())?;

        let size = match kind {
            ScalarKind::Unicode => n * 4,
            _ => n,
        };
        let valid = match kind {
            ScalarKind::Bool => size == 1,
            ScalarKind::Int | ScalarKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            ScalarKind::Float => matches!(size, 4 | 8),
            ScalarKind::Unicode | ScalarKind::Bytes => true,
        };
        if !valid {
            return Err(unsupported());
        }
        Ok(ScalarType { kind, order, size })
    }

    /// The numpy type string for this scalar.
    pub fn typestr(&self) -> String {
        let order = match self.order {
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::NotApplicable => '|',
        };
        let (kind, n) = match self.kind {
            ScalarKind::Bool => ('b', self.size),
            ScalarKind::Int => ('i', self.size),
            ScalarKind::UInt => ('u', self.size),
            ScalarKind::Float => ('f', self.size),
            ScalarKind::Unicode => ('U', self.size / 4),
            ScalarKind::Bytes => ('S', self.size),
        };
        let order = if self.size == 1 && self.kind != ScalarKind::Unicode {
            '|'
        } else {
            order
        };
        format!("{order}{kind}{n}")
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self.kind, ScalarKind::Unicode | ScalarKind::Bytes)
    }

    fn word<const N: usize>(&self, bytes: &[u8]) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&bytes[..N]);
        if self.order == ByteOrder::Big {
            buf.reverse();
        }
        buf
    }

    /// Decode one numeric element as f64. `bytes` must hold at least `size`.
    pub fn read_f64(&self, bytes: &[u8]) -> Result<f64> {
        Ok(match (self.kind, self.size) {
            (ScalarKind::Float, 8) => f64::from_le_bytes(self.word::<8>(bytes)),
            (ScalarKind::Float, 4) => f32::from_le_bytes(self.word::<4>(bytes)) as f64,
            (ScalarKind::Int, _) | (ScalarKind::Bool, _) => self.read_i64(bytes)? as f64,
            (ScalarKind::UInt, _) => self.read_u64(bytes)? as f64,
            _ => return Err(Error::UnsupportedDtype(format!("{} as float", self.typestr()))),
        })
    }

    /// Decode one integer (or bool) element as i64.
    pub fn read_i64(&self, bytes: &[u8]) -> Result<i64> {
        Ok(match (self.kind, self.size) {
            (ScalarKind::Bool, 1) => (bytes[0] != 0) as i64,
            (ScalarKind::Int, 1) => bytes[0] as i8 as i64,
            (ScalarKind::Int, 2) => i16::from_le_bytes(self.word::<2>(bytes)) as i64,
            (ScalarKind::Int, 4) => i32::from_le_bytes(self.word::<4>(bytes)) as i64,
            (ScalarKind::Int, 8) => i64::from_le_bytes(self.word::<8>(bytes)),
            (ScalarKind::UInt, _) => self.read_u64(bytes)? as i64,
            _ => return Err(Error::UnsupportedDtype(format!("{} as int", self.typestr()))),
        })
    }

    /// Decode one unsigned element as u64.
    pub fn read_u64(&self, bytes: &[u8]) -> Result<u64> {
        Ok(match (self.kind, self.size) {
            (ScalarKind::UInt, 1) | (ScalarKind::Bool, 1) => bytes[0] as u64,
            (ScalarKind::UInt, 2) => u16::from_le_bytes(self.word::<2>(bytes)) as u64,
            (ScalarKind::UInt, 4) => u32::from_le_bytes(self.word::<4>(bytes)) as u64,
            (ScalarKind::UInt, 8) => u64::from_le_bytes(self.word::<8>(bytes)),
            (ScalarKind::Int, _) => self.read_i64(bytes)? as u64,
            _ => return Err(Error::UnsupportedDtype(format!("{} as uint", self.typestr()))),
        })
    }

    /// Decode a fixed-width text element, dropping trailing NULs.
    pub fn read_string(&self, bytes: &[u8]) -> Result<String> {
        let bytes = &bytes[..self.size];
        match self.kind {
            ScalarKind::Unicode => {
                let mut out = String::with_capacity(self.size / 4);
                for cp in bytes.chunks_exact(4) {
                    let mut word = [cp[0], cp[1], cp[2], cp[3]];
                    if self.order == ByteOrder::Big {
                        word.reverse();
                    }
                    let code = u32::from_le_bytes(word);
                    if code == 0 {
                        break;
                    }
                    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                Ok(out)
            }
            ScalarKind::Bytes => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            _ => Err(Error::UnsupportedDtype(format!("{} as string", self.typestr()))),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.typestr())
    }
}

/// One named field of a structured dtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub scalar: ScalarType,
    /// Sub-array shape; empty for a scalar field.
    pub shape: Vec<usize>,
    /// Byte offset within a record.
    pub offset: usize,
}

impl Field {
    /// Number of scalars in the field.
    pub fn count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the field in bytes.
    pub fn nbytes(&self) -> usize {
        self.count() * self.scalar.size
    }
}

/// A packed structured dtype (or a plain scalar dtype with one unnamed field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDtype {
    fields: Vec<Field>,
    itemsize: usize,
    structured: bool,
}

impl RecordDtype {
    /// Build from `(name, scalar, shape)` triples, computing offsets.
    pub fn new(fields: Vec<(&str, ScalarType, Vec<usize>)>) -> Self {
        let mut offset = 0;
        let fields = fields
            .into_iter()
            .map(|(name, scalar, shape)| {
                let f = Field {
                    name: name.to_string(),
                    scalar,
                    shape,
                    offset,
                };
                offset += f.nbytes();
                f
            })
            .collect();
        RecordDtype {
            fields,
            itemsize: offset,
            structured: true,
        }
    }

    /// A non-structured dtype: every element is one scalar.
    pub fn scalar(scalar: ScalarType) -> Self {
        RecordDtype {
            fields: vec![Field {
                name: String::new(),
                scalar,
                shape: Vec::new(),
                offset: 0,
            }],
            itemsize: scalar.size,
            structured: false,
        }
    }

    /// Parse the `dtype` entry of a `.zarray` document.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::scalar(ScalarType::parse(s)?)),
            Value::Array(items) => {
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(parse_field(item)?);
                }
                let fields = parsed
                    .iter()
                    .map(|(n, s, shape)| (n.as_str(), *s, shape.clone()))
                    .collect();
                Ok(Self::new(fields))
            }
            other => Err(Error::UnsupportedDtype(other.to_string())),
        }
    }

    /// The JSON form written to `.zarray`.
    pub fn to_json(&self) -> Value {
        if !self.structured {
            return Value::String(self.fields[0].scalar.typestr());
        }
        Value::Array(
            self.fields
                .iter()
                .map(|f| {
                    let mut entry = vec![
                        Value::String(f.name.clone()),
                        Value::String(f.scalar.typestr()),
                    ];
                    if !f.shape.is_empty() {
                        entry.push(Value::Array(
                            f.shape.iter().map(|&d| Value::from(d as u64)).collect(),
                        ));
                    }
                    Value::Array(entry)
                })
                .collect(),
        )
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Bytes per record.
    pub fn itemsize(&self) -> usize {
        self.itemsize
    }

    pub fn is_structured(&self) -> bool {
        self.structured
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Like [`field`](Self::field) but an error names the missing field.
    pub fn require_field(&self, name: &str) -> Result<&Field> {
        self.field(name)
            .ok_or_else(|| Error::UnsupportedDtype(format!("record has no field {name:?}")))
    }
}

fn parse_field(item: &Value) -> Result<(String, ScalarType, Vec<usize>)> {
    let bad = || Error::UnsupportedDtype(format!("bad structured field: {item}"));
    let parts = item.as_array().ok_or_else(bad)?;
    if parts.len() < 2 || parts.len() > 3 {
        return Err(bad());
    }
    let name = parts[0].as_str().ok_or_else(bad)?.to_string();
    let typestr = parts[1].as_str().ok_or_else(bad)?;
    let scalar = ScalarType::parse(typestr)?;
    let shape = match parts.get(2) {
        None => Vec::new(),
        Some(Value::Array(dims)) => dims
            .iter()
            .map(|d| d.as_u64().map(|d| d as usize).ok_or_else(bad))
            .collect::<Result<Vec<_>>>()?,
        Some(Value::Number(n)) => vec![n.as_u64().ok_or_else(bad)? as usize],
        Some(_) => return Err(bad()),
    };
    Ok((name, scalar, shape))
}

// RecordView: typed access to one encoded record

/// Borrowed view of a single record's bytes, with field lookup by name.
///
/// Numeric getters convert between widths, so a file declaring `<f4`
/// centroids decodes into the same `f64` values as one declaring `<f8`.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    dtype: &'a RecordDtype,
    bytes: &'a [u8],
}

impl<'a> RecordView<'a> {
    pub fn new(dtype: &'a RecordDtype, bytes: &'a [u8]) -> Self {
        debug_assert!(bytes.len() >= dtype.itemsize());
        Self { dtype, bytes }
    }

    fn element(&self, field: &Field, i: usize) -> &'a [u8] {
        let start = field.offset + i * field.scalar.size;
        &self.bytes[start..start + field.scalar.size]
    }

    pub fn f64s(&self, name: &str) -> Result<Vec<f64>> {
        let f = self.dtype.require_field(name)?;
        (0..f.count())
            .map(|i| f.scalar.read_f64(self.element(f, i)))
            .collect()
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        let f = self.dtype.require_field(name)?;
        f.scalar.read_f64(self.element(f, 0))
    }

    pub fn i64s(&self, name: &str) -> Result<Vec<i64>> {
        let f = self.dtype.require_field(name)?;
        (0..f.count())
            .map(|i| f.scalar.read_i64(self.element(f, i)))
            .collect()
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        let f = self.dtype.require_field(name)?;
        f.scalar.read_i64(self.element(f, 0))
    }

    pub fn u64(&self, name: &str) -> Result<u64> {
        let f = self.dtype.require_field(name)?;
        f.scalar.read_u64(self.element(f, 0))
    }

    pub fn string(&self, name: &str) -> Result<String> {
        let f = self.dtype.require_field(name)?;
        f.scalar.read_string(self.element(f, 0))
    }

    /// Exactly `N` floats, or a shape mismatch.
    pub fn f64_array<const N: usize>(&self, name: &str) -> Result<[f64; N]> {
        let v = self.f64s(name)?;
        v.try_into().map_err(|v: Vec<f64>| Error::ShapeMismatch {
            expected: vec![N],
            got: vec![v.len()],
        })
    }

    /// Exactly `N` integers, or a shape mismatch.
    pub fn i64_array<const N: usize>(&self, name: &str) -> Result<[i64; N]> {
        let v = self.i64s(name)?;
        v.try_into().map_err(|v: Vec<i64>| Error::ShapeMismatch {
            expected: vec![N],
            got: vec![v.len()],
        })
    }
}

// Little-endian encoders used when writing canonical records

pub(crate) fn put_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_i64(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Write `s` as `chars` UCS-4 code points, truncating or NUL-padding.
pub(crate) fn put_unicode(out: &mut Vec<u8>, s: &str, chars: usize) {
    let mut written = 0;
    for c in s.chars().take(chars) {
        out.extend_from_slice(&(c as u32).to_le_bytes());
        written += 1;
    }
    for _ in written..chars {
        out.extend_from_slice(&[0u8; 4]);
    }
}
