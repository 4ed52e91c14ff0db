//! Synthetic GGUF files for exercising the decoder and estimator without
//! multi-gigabyte downloads.

use gguf_estimate::GgmlDType;

#[derive(Debug, Clone)]
pub enum Val {
    U32(u32),
    U64(u64),
    I32(i32),
    F32(f32),
    Bool(bool),
    Str(String),
    StrArr(Vec<String>),
    F32Arr(Vec<f32>),
    NestedArr(Vec<Vec<u32>>),
}

#[derive(Debug, Clone)]
pub struct FixtureTensor {
    pub name: String,
    pub dims: Vec<u64>,
    pub dtype_id: u32,
}

/// Writes a structurally valid GGUF byte blob: header, metadata, tensor
/// table, alignment padding, and a zero-filled data region.
pub struct FixtureBuilder {
    version: u32,
    big_endian: bool,
    metadata: Vec<(String, Val)>,
    tensors: Vec<FixtureTensor>,
    trailing: u64,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self {
            version: 3,
            big_endian: false,
            metadata: Vec::new(),
            tensors: Vec::new(),
            trailing: 0,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn kv(mut self, key: &str, value: Val) -> Self {
        self.metadata.push((key.to_string(), value));
        self
    }

    pub fn tensor(mut self, name: &str, dims: &[u64], dtype_id: u32) -> Self {
        self.tensors.push(FixtureTensor {
            name: name.to_string(),
            dims: dims.to_vec(),
            dtype_id,
        });
        self
    }

    /// Extra zero bytes appended after the data region (tail padding).
    pub fn trailing(mut self, bytes: u64) -> Self {
        self.trailing = bytes;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.put_u32(&mut out, 0x4655_4747); // GGUF
        self.put_u32(&mut out, self.version);
        self.put_len(&mut out, self.tensors.len() as u64);
        self.put_len(&mut out, self.metadata.len() as u64);

        for (key, value) in &self.metadata {
            self.put_str(&mut out, key);
            self.put_val(&mut out, value);
        }

        let mut data_offset = 0u64;
        let mut data_end = 0u64;
        for t in &self.tensors {
            self.put_str(&mut out, &t.name);
            self.put_u32(&mut out, t.dims.len() as u32);
            for &d in &t.dims {
                self.put_len(&mut out, d);
            }
            self.put_u32(&mut out, t.dtype_id);
            let offset = data_offset.div_ceil(32) * 32;
            self.put_u64(&mut out, offset);
            let bytes = tensor_bytes(t);
            data_offset = offset + bytes;
            data_end = data_offset;
        }

        // Pad to the default alignment, then the (zeroed) data region.
        while out.len() % 32 != 0 {
            out.push(0);
        }
        out.extend(vec![0u8; (data_end + self.trailing) as usize]);
        out
    }

    pub fn write_file(&self) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&self.build()).unwrap();
        file.flush().unwrap();
        file
    }

    fn put_u32(&self, out: &mut Vec<u8>, v: u32) {
        if self.big_endian {
            out.extend(v.to_be_bytes());
        } else {
            out.extend(v.to_le_bytes());
        }
    }

    fn put_u64(&self, out: &mut Vec<u8>, v: u64) {
        if self.big_endian {
            out.extend(v.to_be_bytes());
        } else {
            out.extend(v.to_le_bytes());
        }
    }

    fn put_len(&self, out: &mut Vec<u8>, v: u64) {
        if self.version <= 1 {
            self.put_u32(out, v as u32);
        } else {
            self.put_u64(out, v);
        }
    }

    fn put_str(&self, out: &mut Vec<u8>, s: &str) {
        self.put_len(out, s.len() as u64);
        out.extend(s.as_bytes());
    }

    fn put_val(&self, out: &mut Vec<u8>, value: &Val) {
        match value {
            Val::U32(v) => {
                self.put_u32(out, 4);
                self.put_u32(out, *v);
            }
            Val::U64(v) => {
                self.put_u32(out, 10);
                self.put_u64(out, *v);
            }
            Val::I32(v) => {
                self.put_u32(out, 5);
                self.put_u32(out, *v as u32);
            }
            Val::F32(v) => {
                self.put_u32(out, 6);
                self.put_u32(out, v.to_bits());
            }
            Val::Bool(v) => {
                self.put_u32(out, 7);
                out.push(u8::from(*v));
            }
            Val::Str(v) => {
                self.put_u32(out, 8);
                self.put_str(out, v);
            }
            Val::StrArr(items) => {
                self.put_u32(out, 9);
                self.put_u32(out, 8);
                self.put_len(out, items.len() as u64);
                for item in items {
                    self.put_str(out, item);
                }
            }
            Val::F32Arr(items) => {
                self.put_u32(out, 9);
                self.put_u32(out, 6);
                self.put_len(out, items.len() as u64);
                for item in items {
                    self.put_u32(out, item.to_bits());
                }
            }
            Val::NestedArr(rows) => {
                self.put_u32(out, 9);
                self.put_u32(out, 9);
                self.put_len(out, rows.len() as u64);
                for row in rows {
                    self.put_u32(out, 4);
                    self.put_len(out, row.len() as u64);
                    for item in row {
                        self.put_u32(out, *item);
                    }
                }
            }
        }
    }
}

pub fn write_blob(blob: &[u8]) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(blob).unwrap();
    file.flush().unwrap();
    file
}

pub fn tensor_bytes(t: &FixtureTensor) -> u64 {
    let dtype = GgmlDType::from_u32(t.dtype_id).unwrap();
    dtype.row_size_of(t.dims.iter().product())
}
