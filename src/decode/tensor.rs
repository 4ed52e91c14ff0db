use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::decode::dtype::GgmlDType;

/// One tensor descriptor from the GGUF tensor table. Dimensions are kept in
/// file order: `dimensions[0]` is the row (fastest-varying) dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    pub n_dimensions: u32,
    pub dimensions: Vec<u64>,
    pub dtype: GgmlDType,
    /// Offset within the tensor data region, aligned to the file's declared
    /// alignment.
    pub offset: u64,
    /// Absolute position of this descriptor in the file, recorded so a
    /// consumer can fetch the tensor later without re-walking the table.
    pub start_offset: i64,
}

impl TensorInfo {
    pub fn elements(&self) -> u64 {
        self.dimensions.iter().product()
    }

    /// On-disk byte count, from the stride array over the dimensions.
    /// Quantized rows occupy whole blocks; trailing dimensions multiply the
    /// row stride out.
    pub fn bytes(&self) -> u64 {
        if self.dimensions.is_empty() {
            return 0;
        }
        let block_size = self.dtype.block_size();
        let type_size = self.dtype.type_size();

        let mut nb = vec![0u64; self.dimensions.len()];
        nb[0] = type_size;
        if nb.len() > 1 {
            nb[1] = nb[0] * (self.dimensions[0] / block_size);
            for i in 2..nb.len() {
                nb[i] = nb[i - 1] * self.dimensions[i - 1];
            }
        }

        if block_size == 1 {
            let mut bytes = type_size;
            for (i, &d) in self.dimensions.iter().enumerate() {
                bytes += (d - 1) * nb[i];
            }
            bytes
        } else {
            let mut bytes = self.dimensions[0] * nb[0] / block_size;
            for (i, &d) in self.dimensions.iter().enumerate().skip(1) {
                bytes += (d - 1) * nb[i];
            }
            bytes
        }
    }
}

/// Common aggregate surface over any tensor-descriptor collection: the flat
/// table and the name-grouped layer tree both expose it.
pub trait TensorInfos {
    fn tensor_count(&self) -> u64;
    fn bytes(&self) -> u64;
    fn elements(&self) -> u64;
    fn search(&self, re: &Regex) -> Vec<&TensorInfo>;
    fn get(&self, name: &str) -> Option<&TensorInfo>;
}

impl TensorInfos for [TensorInfo] {
    fn tensor_count(&self) -> u64 {
        self.len() as u64
    }

    fn bytes(&self) -> u64 {
        self.iter().map(TensorInfo::bytes).sum()
    }

    fn elements(&self) -> u64 {
        self.iter().map(TensorInfo::elements).sum()
    }

    fn search(&self, re: &Regex) -> Vec<&TensorInfo> {
        self.iter().filter(|t| re.is_match(&t.name)).collect()
    }

    fn get(&self, name: &str) -> Option<&TensorInfo> {
        self.iter().find(|t| t.name == name)
    }
}
