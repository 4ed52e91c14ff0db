//! The llama.cpp runtime-footprint estimator.
//!
//! Dispatches on the interpreted architecture type: full models get the
//! complete weight/KV/graph accounting, projectors and adapters get their
//! reduced paths, imatrix files only carry weights.

mod adapter;
pub mod config;
pub mod device;
pub mod graph;
mod imatrix;
mod model;
mod overrides;
mod perf;
mod prelude;
mod projector;
pub mod summary;

use serde::{Deserialize, Serialize};

pub use config::{DeviceMetrics, EstimateConfig, OverrideBuffer, SplitMode, TensorOverride};
pub use device::{ComputationUsage, DeviceUsage, KvCacheUsage, ParameterUsage, WeightUsage};
pub use summary::{MemoryDemand, MemorySummary, MemorySummaryItem};

use crate::{decode::file::GgufFile, metadata::ArchitectureType};

/// The per-device estimate for running a file under llama.cpp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlamaCppEstimate {
    pub architecture: String,
    pub arch_type: ArchitectureType,
    pub flash_attention: bool,
    pub context_size: u64,
    /// Transformer layers placed off-host.
    pub offload_layers: u64,
    pub full_offloaded: bool,
    pub embedding_only: bool,
    pub reranking: bool,
    /// False when a quantized tensor's row dimension breaks RPC sharding.
    pub distributable: bool,
    pub logical_batch_size: i32,
    pub physical_batch_size: i32,
    /// Index 0 is the host; the rest follow the split-fraction order.
    pub devices: Vec<DeviceUsage>,
    pub maximum_tokens_per_second: Option<f64>,
    pub drafter: Option<Box<LlamaCppEstimate>>,
    pub projector: Option<Box<LlamaCppEstimate>>,
    pub adapters: Vec<LlamaCppEstimate>,
}

impl GgufFile {
    /// Estimate the runtime memory demand of loading this file with the
    /// given configuration.
    ///
    /// # Panics
    /// On configuration errors (`main_gpu_index` out of range, physical
    /// batch above logical); these are programming mistakes, not runtime
    /// conditions.
    pub fn estimate_llama_cpp(&self, config: &EstimateConfig) -> LlamaCppEstimate {
        let arch = self.architecture();
        let tokenizer = self.tokenizer();
        tracing::debug!(
            architecture = %arch.architecture,
            arch_type = ?arch.arch_type,
            "estimating llama.cpp usage"
        );
        let mut estimate = match arch.arch_type {
            ArchitectureType::Model => model::estimate(self, &arch, &tokenizer, config),
            ArchitectureType::Projector => projector::estimate(self, &arch, config),
            ArchitectureType::Adapter => adapter::estimate(self, &arch, config),
            ArchitectureType::Imatrix => imatrix::estimate(self, &arch, config),
        };
        estimate.drafter = config.drafter.clone();
        estimate.projector = config.projector.clone();
        estimate.adapters = config.adapters.clone();
        estimate
    }
}
