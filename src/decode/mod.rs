//! GGUF container decoding: header, metadata table, tensor descriptors.

pub mod dtype;
pub mod file;
pub mod layers;
pub mod tensor;
pub mod value;

pub use dtype::GgmlDType;
pub use file::{
    DecodeOptions, GgufByteOrder, GgufFile, GgufHeader, MetadataKv, MetadataTable,
    DEFAULT_ALIGNMENT, GGUF_MAGIC_BE, GGUF_MAGIC_LE,
};
pub use layers::{GgufLayer, GgufLayers};
pub use tensor::{TensorInfo, TensorInfos};
pub use value::{ArrayValue, Value, ValueType};
