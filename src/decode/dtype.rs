//! GGML tensor element encodings and their on-disk sizes.
//!
//! Block-quantized types store `block_size` logical elements in `type_size`
//! bytes; non-quantized types have a block size of 1.

use serde::{Deserialize, Serialize};

use crate::error::{GgufError, GgufResult};

pub const QK4: u64 = 32;
pub const QK8: u64 = 32;
pub const QK_K: u64 = 256;
pub const QK_MXFP4: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GgmlDType {
    F32,
    F16,
    Q4_0,
    Q4_1,
    Q5_0,
    Q5_1,
    Q8_0,
    Q8_1,
    Q2K,
    Q3K,
    Q4K,
    Q5K,
    Q6K,
    Q8K,
    IQ2XXS,
    IQ2XS,
    IQ3XXS,
    IQ1S,
    IQ4NL,
    IQ3S,
    IQ2S,
    IQ4XS,
    I8,
    I16,
    I32,
    I64,
    F64,
    IQ1M,
    BF16,
    Q4_0_4_4,
    Q4_0_4_8,
    Q4_0_8_8,
    TQ1_0,
    TQ2_0,
    IQ4NL4_4,
    IQ4NL4_8,
    IQ4NL8_8,
    MXFP4,
}

impl GgmlDType {
    /// Map the on-disk type id. Ids 4 and 5 (Q4_2/Q4_3) were retired before
    /// GGUF shipped and are rejected as unsupported; anything at or past the
    /// closed-set count is invalid.
    pub fn from_u32(u: u32) -> GgufResult<Self> {
        let dtype = match u {
            0 => Self::F32,
            1 => Self::F16,
            2 => Self::Q4_0,
            3 => Self::Q4_1,
            4 | 5 => {
                return Err(GgufError::UnsupportedFormat(format!(
                    "retired tensor type {u} (Q4_2/Q4_3)"
                )))
            }
            6 => Self::Q5_0,
            7 => Self::Q5_1,
            8 => Self::Q8_0,
            9 => Self::Q8_1,
            10 => Self::Q2K,
            11 => Self::Q3K,
            12 => Self::Q4K,
            13 => Self::Q5K,
            14 => Self::Q6K,
            15 => Self::Q8K,
            16 => Self::IQ2XXS,
            17 => Self::IQ2XS,
            18 => Self::IQ3XXS,
            19 => Self::IQ1S,
            20 => Self::IQ4NL,
            21 => Self::IQ3S,
            22 => Self::IQ2S,
            23 => Self::IQ4XS,
            24 => Self::I8,
            25 => Self::I16,
            26 => Self::I32,
            27 => Self::I64,
            28 => Self::F64,
            29 => Self::IQ1M,
            30 => Self::BF16,
            31 => Self::Q4_0_4_4,
            32 => Self::Q4_0_4_8,
            33 => Self::Q4_0_8_8,
            34 => Self::TQ1_0,
            35 => Self::TQ2_0,
            36 => Self::IQ4NL4_4,
            37 => Self::IQ4NL4_8,
            38 => Self::IQ4NL8_8,
            39 => Self::MXFP4,
            _ => {
                return Err(GgufError::InvalidFormat(format!(
                    "unknown tensor type {u}"
                )))
            }
        };
        Ok(dtype)
    }

    /// The number of logical elements stored in one block.
    pub fn block_size(&self) -> u64 {
        match self {
            Self::F32 | Self::F16 | Self::BF16 | Self::F64 => 1,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 => 1,
            Self::Q4_0 | Self::Q4_1 | Self::Q5_0 | Self::Q5_1 => QK4,
            Self::Q8_0 | Self::Q8_1 => QK8,
            Self::Q4_0_4_4 | Self::Q4_0_4_8 | Self::Q4_0_8_8 => QK4,
            Self::IQ4NL | Self::IQ4NL4_4 | Self::IQ4NL4_8 | Self::IQ4NL8_8 => QK4,
            Self::MXFP4 => QK_MXFP4,
            Self::Q2K
            | Self::Q3K
            | Self::Q4K
            | Self::Q5K
            | Self::Q6K
            | Self::Q8K
            | Self::IQ2XXS
            | Self::IQ2XS
            | Self::IQ3XXS
            | Self::IQ1S
            | Self::IQ3S
            | Self::IQ2S
            | Self::IQ4XS
            | Self::IQ1M
            | Self::TQ1_0
            | Self::TQ2_0 => QK_K,
        }
    }

    /// The on-disk size of one block in bytes.
    pub fn type_size(&self) -> u64 {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F16 | Self::BF16 | Self::I16 => 2,
            Self::F64 | Self::I64 => 8,
            Self::I8 => 1,
            Self::Q4_0 => 18,
            Self::Q4_1 => 20,
            Self::Q5_0 => 22,
            Self::Q5_1 => 24,
            Self::Q8_0 => 34,
            Self::Q8_1 => 36,
            // K-quants: scales/mins plus packed quants over a 256 superblock.
            Self::Q2K => 84,
            Self::Q3K => 110,
            Self::Q4K => 144,
            Self::Q5K => 176,
            Self::Q6K => 210,
            Self::Q8K => 292,
            Self::IQ2XXS => 66,
            Self::IQ2XS => 74,
            Self::IQ3XXS => 98,
            Self::IQ1S => 50,
            Self::IQ4NL => 18,
            Self::IQ3S => 110,
            Self::IQ2S => 82,
            Self::IQ4XS => 136,
            Self::IQ1M => 56,
            Self::Q4_0_4_4 | Self::Q4_0_4_8 | Self::Q4_0_8_8 => 18,
            Self::TQ1_0 => 54,
            Self::TQ2_0 => 66,
            Self::IQ4NL4_4 | Self::IQ4NL4_8 | Self::IQ4NL8_8 => 18,
            Self::MXFP4 => 17,
        }
    }

    pub fn is_quantized(&self) -> bool {
        self.block_size() > 1
    }

    pub fn bits_per_weight(&self) -> f64 {
        (self.type_size() as f64 * 8.0) / self.block_size() as f64
    }

    /// Bytes of a row of `elements` values. Rows of quantized types are
    /// stored in whole blocks; `elements` is expected to be a multiple of
    /// the block size.
    pub fn row_size_of(&self, elements: u64) -> u64 {
        elements * self.type_size() / self.block_size()
    }

    /// Row size across a dimension list: `dims[0]` is the row dimension,
    /// the rest multiply it out.
    pub fn row_size_of_dims(&self, dims: &[u64]) -> u64 {
        let mut size = self.row_size_of(dims.first().copied().unwrap_or(0));
        for &d in &dims[1.min(dims.len())..] {
            size *= d;
        }
        size
    }
}

impl std::fmt::Display for GgmlDType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
