pub mod bytes;
pub mod cache;
pub mod decode;
pub mod error;
pub mod estimate;
pub mod metadata;
pub mod params;
pub mod scalar;

pub use bytes::{ByteSource, CancelToken, FileSource, MmapSource, RemoteSource};
pub use decode::{DecodeOptions, GgmlDType, GgufFile, GgufHeader, GgufLayers, TensorInfo, Value};
pub use error::{GgufError, GgufResult};
pub use estimate::{EstimateConfig, LlamaCppEstimate, MemorySummary};

#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
