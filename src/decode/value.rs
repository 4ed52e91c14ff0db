//! Metadata value model: a closed sum over the thirteen GGUF value kinds.

use serde::{Deserialize, Serialize};

use crate::error::{GgufError, GgufResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
    String,
    Array,
    U64,
    I64,
    F64,
}

impl ValueType {
    pub fn from_u32(v: u32) -> GgufResult<Self> {
        let v = match v {
            0 => Self::U8,
            1 => Self::I8,
            2 => Self::U16,
            3 => Self::I16,
            4 => Self::U32,
            5 => Self::I32,
            6 => Self::F32,
            7 => Self::Bool,
            8 => Self::String,
            9 => Self::Array,
            10 => Self::U64,
            11 => Self::I64,
            12 => Self::F64,
            v => {
                return Err(GgufError::InvalidFormat(format!(
                    "unrecognized metadata value type {v} (0x{v:08x})"
                )))
            }
        };
        Ok(v)
    }
}

/// An array value. `len` and `encoded_size` are always populated from the
/// file; `values` may be left empty when the decoder elides a large array,
/// so byte-size accounting keeps working without materializing the items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayValue {
    pub kind: ValueType,
    pub len: u64,
    /// Bytes the items occupy on disk, excluding the kind/length prefix.
    pub encoded_size: u64,
    pub values: Vec<Value>,
}

impl ArrayValue {
    pub fn is_elided(&self) -> bool {
        self.values.is_empty() && self.len > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Array(ArrayValue),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::U8(_) => ValueType::U8,
            Self::I8(_) => ValueType::I8,
            Self::U16(_) => ValueType::U16,
            Self::I16(_) => ValueType::I16,
            Self::U32(_) => ValueType::U32,
            Self::I32(_) => ValueType::I32,
            Self::U64(_) => ValueType::U64,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::Bool(_) => ValueType::Bool,
            Self::String(_) => ValueType::String,
            Self::Array(_) => ValueType::Array,
        }
    }

    pub fn as_bool(&self) -> GgufResult<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            v => Err(kind_mismatch("bool", v)),
        }
    }

    pub fn as_str(&self) -> GgufResult<&str> {
        match self {
            Self::String(v) => Ok(v),
            v => Err(kind_mismatch("string", v)),
        }
    }

    pub fn as_array(&self) -> GgufResult<&ArrayValue> {
        match self {
            Self::Array(v) => Ok(v),
            v => Err(kind_mismatch("array", v)),
        }
    }

    /// Widen any unsigned integer or bool to u64. Signed and float kinds are
    /// narrowed only when exactly representable and non-negative.
    pub fn as_u64(&self) -> GgufResult<u64> {
        match self {
            Self::U8(v) => Ok(*v as u64),
            Self::U16(v) => Ok(*v as u64),
            Self::U32(v) => Ok(*v as u64),
            Self::U64(v) => Ok(*v),
            Self::Bool(v) => Ok(*v as u64),
            Self::I8(v) if *v >= 0 => Ok(*v as u64),
            Self::I16(v) if *v >= 0 => Ok(*v as u64),
            Self::I32(v) if *v >= 0 => Ok(*v as u64),
            Self::I64(v) if *v >= 0 => Ok(*v as u64),
            v => Err(kind_mismatch("u64", v)),
        }
    }

    pub fn as_u32(&self) -> GgufResult<u32> {
        let v = self.as_u64()?;
        u32::try_from(v)
            .map_err(|_| GgufError::InvalidFormat(format!("value {v} out of range for u32")))
    }

    pub fn as_i64(&self) -> GgufResult<i64> {
        match self {
            Self::I8(v) => Ok(*v as i64),
            Self::I16(v) => Ok(*v as i64),
            Self::I32(v) => Ok(*v as i64),
            Self::I64(v) => Ok(*v),
            Self::U8(v) => Ok(*v as i64),
            Self::U16(v) => Ok(*v as i64),
            Self::U32(v) => Ok(*v as i64),
            Self::U64(v) => i64::try_from(*v)
                .map_err(|_| GgufError::InvalidFormat(format!("value {v} out of range for i64"))),
            v => Err(kind_mismatch("i64", v)),
        }
    }

    /// Accept any integer or float kind and convert to f64.
    pub fn as_f64(&self) -> GgufResult<f64> {
        match self {
            Self::F32(v) => Ok(*v as f64),
            Self::F64(v) => Ok(*v),
            Self::U8(v) => Ok(*v as f64),
            Self::I8(v) => Ok(*v as f64),
            Self::U16(v) => Ok(*v as f64),
            Self::I16(v) => Ok(*v as f64),
            Self::U32(v) => Ok(*v as f64),
            Self::I32(v) => Ok(*v as f64),
            Self::U64(v) => Ok(*v as f64),
            Self::I64(v) => Ok(*v as f64),
            v => Err(kind_mismatch("f64", v)),
        }
    }

    pub fn as_f32(&self) -> GgufResult<f32> {
        Ok(self.as_f64()? as f32)
    }

    /// Items of a string array as borrowed strs, skipping non-strings.
    pub fn as_str_array(&self) -> GgufResult<Vec<&str>> {
        let arr = self.as_array()?;
        Ok(arr
            .values
            .iter()
            .filter_map(|v| v.as_str().ok())
            .collect())
    }
}

fn kind_mismatch(wanted: &'static str, got: &Value) -> GgufError {
    GgufError::InvalidFormat(format!(
        "metadata kind mismatch: wanted {wanted}, got {:?}",
        got.value_type()
    ))
}
