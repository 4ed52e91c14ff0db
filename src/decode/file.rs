//! The GGUF container decoder.
//!
//! Layout: <https://github.com/ggml-org/ggml/blob/master/docs/gguf.md>
//!
//! Reads the header, metadata key/value table, and tensor descriptor table
//! from any [`ByteSource`]. The tensor data region is never touched; its
//! start offset is computed from the declared alignment so callers can fetch
//! tensors themselves.

use std::collections::HashMap;

use byteorder::ByteOrder as _;
use byteorder::{BigEndian, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::{
    bytes::{ByteSource, CancelToken},
    decode::{
        dtype::GgmlDType,
        layers::GgufLayers,
        tensor::{TensorInfo, TensorInfos},
        value::{ArrayValue, Value, ValueType},
    },
    error::{GgufError, GgufResult},
    params,
};

/// "GGUF" in a little-endian file, read as a little-endian u32.
pub const GGUF_MAGIC_LE: u32 = 0x4655_4747;
/// The same bytes as seen when the file is big-endian.
pub const GGUF_MAGIC_BE: u32 = 0x4747_5546;

const GGML_MAGIC: u32 = 0x6767_6D6C;
const GGMF_MAGIC: u32 = 0x6767_6D66;
const GGJT_MAGIC: u32 = 0x6767_6A74;

pub const DEFAULT_ALIGNMENT: u64 = 32;

/// Metadata strings/arrays beyond this many bytes are elided when
/// `skip_large_metadata` is set.
const LARGE_METADATA_THRESHOLD: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GgufByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GgufHeader {
    pub magic: u32,
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataKv {
    pub key: String,
    pub value: Value,
}

/// The metadata table: file order preserved, with O(1) key lookup and regex
/// search layered on top. Keys are compared case-sensitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<MetadataKv>", into = "Vec<MetadataKv>")]
pub struct MetadataTable {
    entries: Vec<MetadataKv>,
    index: HashMap<String, usize>,
}

impl MetadataTable {
    fn push(&mut self, kv: MetadataKv) {
        self.index.insert(kv.key.clone(), self.entries.len());
        self.entries.push(kv);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn search(&self, re: &regex::Regex) -> Vec<&MetadataKv> {
        self.entries
            .iter()
            .filter(|kv| re.is_match(&kv.key))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataKv> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<MetadataKv>> for MetadataTable {
    fn from(entries: Vec<MetadataKv>) -> Self {
        let mut table = Self::default();
        for kv in entries {
            table.push(kv);
        }
        table
    }
}

impl From<MetadataTable> for Vec<MetadataKv> {
    fn from(table: MetadataTable) -> Self {
        table.entries
    }
}

/// Recognized decoder knobs.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Skip large metadata values and the tensor descriptor details, seeking
    /// past them. Model size is then derived from the file length and the
    /// parameter count guessed from the architecture.
    pub approximate: bool,
    /// Keep the table structure but elide string/array values larger than
    /// 64 bytes (token lists, merge tables).
    pub skip_large_metadata: bool,
    /// Advisory read size, forwarded to sources that buffer.
    pub buffer_size: Option<usize>,
    /// Surface the underlying reads on the trace log channel.
    pub debug: bool,
    /// Checked between reads; aborts the parse with `Cancelled`.
    pub cancel: Option<CancelToken>,
}

/// A parsed GGUF file, minus the tensor data region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GgufFile {
    pub header: GgufHeader,
    pub byte_order: GgufByteOrder,
    pub metadata: MetadataTable,
    pub tensors: Vec<TensorInfo>,
    /// Declared alignment of the tensor data region.
    pub alignment: u64,
    /// Zero-fill between the last tensor descriptor and the data region.
    pub padding: i64,
    pub tensor_data_start_offset: i64,
    /// Total file length in bytes.
    pub total_size: u64,
    /// Sum of all tensor byte counts (or the data-region size in
    /// approximate mode).
    pub model_bytes: u64,
    /// Sum of all tensor element counts (or the architecture guess in
    /// approximate mode).
    pub model_params: u64,
    pub bits_per_weight: f64,
}

impl GgufFile {
    pub fn decode<S: ByteSource>(source: &mut S, options: DecodeOptions) -> GgufResult<Self> {
        if let Some(hint) = options.buffer_size {
            source.set_buffer_hint(hint);
        }
        let mut scanner = Scanner::new(source, &options)?;

        let tensor_count = scanner.length("tensor count")?;
        let metadata_kv_count = scanner.length("metadata kv count")?;
        tracing::debug!(
            version = scanner.version,
            tensor_count,
            metadata_kv_count,
            "decoding gguf"
        );

        let mut metadata = MetadataTable::default();
        for _ in 0..metadata_kv_count {
            let key = scanner.string("metadata key")?;
            let kind = ValueType::from_u32(scanner.u32("metadata value type")?)?;
            let value = scanner.value(kind, options.approximate || options.skip_large_metadata)?;
            metadata.push(MetadataKv { key, value });
        }

        let mut tensors: Vec<TensorInfo> = Vec::with_capacity(if options.approximate {
            0
        } else {
            (tensor_count as usize).min(1 << 20)
        });
        for _ in 0..tensor_count {
            if options.approximate {
                scanner.skip_tensor_info()?;
            } else {
                tensors.push(scanner.tensor_info()?);
            }
        }

        let position = scanner.source.position();
        let alignment = match metadata.get("general.alignment") {
            Some(v) => {
                let alignment = v.as_u64().unwrap_or(DEFAULT_ALIGNMENT);
                if alignment == 0 || alignment % 8 != 0 {
                    return Err(GgufError::InvalidAlignment(alignment));
                }
                alignment
            }
            None => DEFAULT_ALIGNMENT,
        };
        let padding = crate::scalar::padding_for(position, alignment) as i64;
        let tensor_data_start_offset = position as i64 + padding;
        let total_size = scanner.source.len();

        let (model_bytes, model_params) = if options.approximate {
            let bytes = total_size.saturating_sub(tensor_data_start_offset as u64);
            let params = params::guess_parameters(&metadata);
            (bytes, params)
        } else {
            (tensors.as_slice().bytes(), tensors.as_slice().elements())
        };
        let bits_per_weight = if model_params > 0 {
            model_bytes as f64 * 8.0 / model_params as f64
        } else {
            0.0
        };

        Ok(Self {
            header: GgufHeader {
                magic: scanner.magic,
                version: scanner.version,
                tensor_count,
                metadata_kv_count,
            },
            byte_order: scanner.order,
            metadata,
            tensors,
            alignment,
            padding,
            tensor_data_start_offset,
            total_size,
            model_bytes,
            model_params,
            bits_per_weight,
        })
    }

    /// Tensors grouped by dotted-name prefix; borrows from this file.
    pub fn layers(&self) -> GgufLayers<'_> {
        GgufLayers::from_tensors(&self.tensors)
    }
}

struct Scanner<'a, S: ByteSource> {
    source: &'a mut S,
    order: GgufByteOrder,
    magic: u32,
    version: u32,
    cancel: Option<CancelToken>,
    debug: bool,
}

impl<'a, S: ByteSource> Scanner<'a, S> {
    /// Read magic and version, fixing byte order and the length-field width
    /// rule for the rest of the parse.
    fn new(source: &'a mut S, options: &DecodeOptions) -> GgufResult<Self> {
        let mut scanner = Self {
            source,
            order: GgufByteOrder::Little,
            magic: 0,
            version: 0,
            cancel: options.cancel.clone(),
            debug: options.debug,
        };

        let magic = scanner.u32("magic")?;
        scanner.order = match magic {
            GGUF_MAGIC_LE => GgufByteOrder::Little,
            GGUF_MAGIC_BE => GgufByteOrder::Big,
            GGML_MAGIC | GGMF_MAGIC | GGJT_MAGIC => {
                return Err(GgufError::UnsupportedFormat(format!(
                    "legacy pre-GGUF container (magic 0x{magic:08x})"
                )))
            }
            _ => {
                return Err(GgufError::InvalidFormat(format!(
                    "unknown magic 0x{magic:08x}"
                )))
            }
        };
        scanner.magic = magic;

        let version = scanner.u32("version")?;
        if !(1..=3).contains(&version) {
            return Err(GgufError::UnsupportedFormat(format!(
                "gguf version {version}"
            )));
        }
        scanner.version = version;
        Ok(scanner)
    }

    fn check(&self, field: &'static str) -> GgufResult<()> {
        if let Some(cancel) = &self.cancel {
            if cancel.is_cancelled() {
                return Err(GgufError::Cancelled { field });
            }
        }
        Ok(())
    }

    fn bytes(&mut self, n: usize, field: &'static str) -> GgufResult<Vec<u8>> {
        self.check(field)?;
        let mut buf = vec![0u8; n];
        self.source.read_exact(&mut buf)?;
        if self.debug {
            tracing::trace!(field, bytes = n, position = self.source.position(), "read");
        }
        Ok(buf)
    }

    fn skip(&mut self, n: u64, field: &'static str) -> GgufResult<()> {
        self.check(field)?;
        let target = self
            .source
            .position()
            .checked_add(n)
            .ok_or(GgufError::Truncated { field })?;
        if target > self.source.len() {
            return Err(GgufError::Truncated { field });
        }
        self.source.seek(target)
    }

    fn u8(&mut self, field: &'static str) -> GgufResult<u8> {
        Ok(self.bytes(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> GgufResult<u16> {
        let buf = self.bytes(2, field)?;
        Ok(match self.order {
            GgufByteOrder::Little => LittleEndian::read_u16(&buf),
            GgufByteOrder::Big => BigEndian::read_u16(&buf),
        })
    }

    fn u32(&mut self, field: &'static str) -> GgufResult<u32> {
        let buf = self.bytes(4, field)?;
        Ok(match self.order {
            GgufByteOrder::Little => LittleEndian::read_u32(&buf),
            GgufByteOrder::Big => BigEndian::read_u32(&buf),
        })
    }

    fn u64(&mut self, field: &'static str) -> GgufResult<u64> {
        let buf = self.bytes(8, field)?;
        Ok(match self.order {
            GgufByteOrder::Little => LittleEndian::read_u64(&buf),
            GgufByteOrder::Big => BigEndian::read_u64(&buf),
        })
    }

    fn f32(&mut self, field: &'static str) -> GgufResult<f32> {
        Ok(f32::from_bits(self.u32(field)?))
    }

    fn f64(&mut self, field: &'static str) -> GgufResult<f64> {
        Ok(f64::from_bits(self.u64(field)?))
    }

    /// Length field: u32 widened in version 1, u64 from version 2 on.
    fn length(&mut self, field: &'static str) -> GgufResult<u64> {
        if self.version <= 1 {
            Ok(self.u32(field)? as u64)
        } else {
            self.u64(field)
        }
    }

    fn string(&mut self, field: &'static str) -> GgufResult<String> {
        let len = self.length(field)?;
        if len > self.source.len() {
            return Err(GgufError::Truncated { field });
        }
        let buf = self.bytes(len as usize, field)?;
        // Non-conformant writers null-terminate; strip trailing zero bytes.
        let end = buf
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    fn value(&mut self, kind: ValueType, skip_large: bool) -> GgufResult<Value> {
        let v = match kind {
            ValueType::U8 => Value::U8(self.u8("u8 value")?),
            ValueType::I8 => Value::I8(self.u8("i8 value")? as i8),
            ValueType::U16 => Value::U16(self.u16("u16 value")?),
            ValueType::I16 => Value::I16(self.u16("i16 value")? as i16),
            ValueType::U32 => Value::U32(self.u32("u32 value")?),
            ValueType::I32 => Value::I32(self.u32("i32 value")? as i32),
            ValueType::U64 => Value::U64(self.u64("u64 value")?),
            ValueType::I64 => Value::I64(self.u64("i64 value")? as i64),
            ValueType::F32 => Value::F32(self.f32("f32 value")?),
            ValueType::F64 => Value::F64(self.f64("f64 value")?),
            ValueType::Bool => match self.u8("bool value")? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                b => {
                    return Err(GgufError::InvalidFormat(format!(
                        "unexpected bool value {b}"
                    )))
                }
            },
            ValueType::String => {
                let len = self.length("string value")?;
                if skip_large && len > LARGE_METADATA_THRESHOLD {
                    self.skip(len, "string value")?;
                    Value::String(String::new())
                } else {
                    if len > self.source.len() {
                        return Err(GgufError::Truncated { field: "string value" });
                    }
                    let buf = self.bytes(len as usize, "string value")?;
                    let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                    Value::String(String::from_utf8_lossy(&buf[..end]).into_owned())
                }
            }
            ValueType::Array => {
                let item_kind = ValueType::from_u32(self.u32("array item type")?)?;
                let len = self.length("array length")?;
                let start = self.source.position();
                let elide = skip_large
                    && self
                        .fixed_kind_size(item_kind)
                        .map_or(true, |s| len.saturating_mul(s) > LARGE_METADATA_THRESHOLD);
                if elide {
                    self.skip_value_items(item_kind, len)?;
                    Value::Array(ArrayValue {
                        kind: item_kind,
                        len,
                        encoded_size: self.source.position() - start,
                        values: Vec::new(),
                    })
                } else {
                    let mut values = Vec::with_capacity(len.min(1 << 20) as usize);
                    for _ in 0..len {
                        values.push(self.value(item_kind, skip_large)?);
                    }
                    Value::Array(ArrayValue {
                        kind: item_kind,
                        len,
                        encoded_size: self.source.position() - start,
                        values,
                    })
                }
            }
        };
        Ok(v)
    }

    fn fixed_kind_size(&self, kind: ValueType) -> Option<u64> {
        match kind {
            ValueType::U8 | ValueType::I8 | ValueType::Bool => Some(1),
            ValueType::U16 | ValueType::I16 => Some(2),
            ValueType::U32 | ValueType::I32 | ValueType::F32 => Some(4),
            ValueType::U64 | ValueType::I64 | ValueType::F64 => Some(8),
            ValueType::String | ValueType::Array => None,
        }
    }

    /// Walk past `len` items of `kind` without materializing them, reading
    /// only the length prefixes variable-size items require.
    fn skip_value_items(&mut self, kind: ValueType, len: u64) -> GgufResult<()> {
        if let Some(size) = self.fixed_kind_size(kind) {
            return self.skip(len.saturating_mul(size), "array items");
        }
        for _ in 0..len {
            match kind {
                ValueType::String => {
                    let n = self.length("string value")?;
                    self.skip(n, "string value")?;
                }
                ValueType::Array => {
                    let inner = ValueType::from_u32(self.u32("array item type")?)?;
                    let n = self.length("array length")?;
                    self.skip_value_items(inner, n)?;
                }
                _ => unreachable!("fixed kinds handled above"),
            }
        }
        Ok(())
    }

    fn tensor_info(&mut self) -> GgufResult<TensorInfo> {
        let start_offset = self.source.position() as i64;
        let name = self.string("tensor name")?;
        let n_dimensions = self.u32("tensor dimension count")?;
        if n_dimensions == 0 {
            return Err(GgufError::InvalidFormat(format!(
                "tensor '{name}' has no dimensions"
            )));
        }
        let mut dimensions = Vec::with_capacity(n_dimensions as usize);
        for _ in 0..n_dimensions {
            dimensions.push(self.length("tensor dimension")?);
        }
        let dtype = GgmlDType::from_u32(self.u32("tensor type")?)?;
        let offset = self.u64("tensor offset")?;
        Ok(TensorInfo {
            name,
            n_dimensions,
            dimensions,
            dtype,
            offset,
            start_offset,
        })
    }

    fn skip_tensor_info(&mut self) -> GgufResult<()> {
        let name_len = self.length("tensor name")?;
        self.skip(name_len, "tensor name")?;
        let n_dimensions = self.u32("tensor dimension count")?;
        let dim_width = if self.version <= 1 { 4 } else { 8 };
        self.skip(n_dimensions as u64 * dim_width, "tensor dimensions")?;
        self.skip(4 + 8, "tensor type and offset")
    }
}
