//! Typed views over the raw metadata table.

pub mod architecture;
pub mod tokenizer;

pub use architecture::{
    Architecture, ArchitectureType, Attention, Clip, ClipEncoder, Rope, Rwkv, Ssm,
};
pub use tokenizer::Tokenizer;

use crate::decode::file::GgufFile;

impl GgufFile {
    /// Interpret `general.architecture` and the per-architecture key family.
    pub fn architecture(&self) -> Architecture {
        Architecture::from_file(self)
    }

    /// Interpret the embedded tokenizer definition.
    pub fn tokenizer(&self) -> Tokenizer {
        Tokenizer::from_file(self)
    }
}
