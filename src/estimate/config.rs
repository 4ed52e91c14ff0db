//! Estimator configuration: the run-time knobs llama.cpp would be launched
//! with.

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{decode::dtype::GgmlDType, estimate::LlamaCppEstimate};

/// How layers are split across devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMode {
    #[default]
    Layer,
    Row,
    None,
}

/// Pins tensors matching `pattern` to a specific buffer, ahead of the normal
/// layer partitioning. Patterns use the layer-tree glob syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorOverride {
    pub pattern: String,
    pub buffer: OverrideBuffer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OverrideBuffer {
    Cpu,
    /// Local GPU by index, counted after any RPC servers.
    Gpu(usize),
    /// Remote RPC server by endpoint.
    Rpc(String),
}

/// Throughput description of one device, enabling the tokens/second
/// prediction. Bandwidths are bytes per second, `flops` is FLOPS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub flops: f64,
    pub up_bandwidth: f64,
    pub down_bandwidth: f64,
}

#[derive(Builder, Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimateConfig {
    /// Context size in tokens. Defaults to the model's advertised maximum.
    pub context_size: Option<i32>,

    /// Clamp the requested context down to the advertised maximum.
    #[builder(default)]
    pub in_max_context_size: bool,

    /// Logical batch size; floored at 32.
    pub logical_batch_size: Option<i32>,

    /// Physical batch size; must not exceed the logical one.
    pub physical_batch_size: Option<i32>,

    /// Concurrent sequence count.
    pub parallel_size: Option<i32>,

    /// KV-cache key/value element types. Default F16.
    pub cache_key_type: Option<GgmlDType>,
    pub cache_value_type: Option<GgmlDType>,

    /// Keep the KV cache on the offload devices. Default true.
    pub offload_kv_cache: Option<bool>,

    /// Transformer layers to offload. Values past the block count offload
    /// the output layer too; absent means everything.
    pub offload_layers: Option<u64>,

    /// Per-device split weights, host excluded. Default `[1.0]`.
    #[builder(default)]
    pub tensor_split_fraction: Vec<f64>,

    /// Index into `tensor_split_fraction` of the primary device; with
    /// `SplitMode::None` it takes every offloaded layer.
    #[builder(default)]
    pub main_gpu_index: usize,

    /// RPC endpoints; they consume the leading entries of
    /// `tensor_split_fraction`.
    #[builder(default)]
    pub rpc_servers: Vec<String>,

    #[builder(default)]
    pub split_mode: SplitMode,

    #[builder(default)]
    pub flash_attention: bool,

    /// Size every layer's cache for the full context even under SWA.
    #[builder(default)]
    pub full_size_swa_cache: bool,

    /// RoPE overrides; only effective for non-causal models and recorded
    /// for completeness (they do not change byte totals).
    pub rope_frequency_base: Option<f32>,
    pub rope_frequency_scale: Option<f32>,
    pub rope_scaling_type: Option<String>,
    pub rope_scaling_original_context_size: Option<u64>,

    #[builder(default)]
    pub overridden_tensors: Vec<TensorOverride>,

    /// Per-device throughput; the last entry repeats to cover every device.
    #[builder(default)]
    pub device_metrics: Vec<DeviceMetrics>,

    /// Upper bound on the projected image edge for projector estimates.
    pub max_projected_image_size: Option<u64>,

    /// Precomputed sub-estimates attached to the result.
    pub drafter: Option<Box<LlamaCppEstimate>>,
    pub projector: Option<Box<LlamaCppEstimate>>,
    #[builder(default)]
    pub adapters: Vec<LlamaCppEstimate>,
}

impl EstimateConfig {
    /// Split fractions with defaults applied: `[1.0]` when unset.
    pub(crate) fn split_fractions(&self) -> Vec<f64> {
        if self.tensor_split_fraction.is_empty() {
            vec![1.0]
        } else {
            self.tensor_split_fraction.clone()
        }
    }

    /// Fail-fast validation; configuration mistakes are programming errors.
    pub(crate) fn validate(&self) {
        let fractions = self.split_fractions();
        assert!(
            self.main_gpu_index < fractions.len(),
            "main_gpu_index {} out of range for {} split fractions",
            self.main_gpu_index,
            fractions.len()
        );
        assert!(
            fractions.iter().all(|&f| f > 0.0),
            "tensor split fractions must be positive"
        );
        if let (Some(physical), Some(logical)) =
            (self.physical_batch_size, self.logical_batch_size)
        {
            assert!(
                physical <= logical,
                "physical batch size {physical} exceeds logical batch size {logical}"
            );
        }
    }
}
