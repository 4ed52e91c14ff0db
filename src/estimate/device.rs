//! Per-device memory accounting.

use serde::{Deserialize, Serialize};

/// Element counts backing each byte bucket, kept separately so throughput
/// prediction can reason about parameters rather than bytes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ParameterUsage {
    pub kv_cache: u64,
    pub input: u64,
    pub compute: u64,
    pub compute_overridden: u64,
    pub output: u64,
}

impl ParameterUsage {
    pub fn total(&self) -> u64 {
        self.kv_cache + self.input + self.compute + self.compute_overridden + self.output
    }
}

/// Weight bytes by placement bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WeightUsage {
    pub input: u64,
    pub compute: u64,
    /// Weights pinned here by an override rule.
    pub compute_overridden: u64,
    pub output: u64,
}

impl WeightUsage {
    pub fn total(&self) -> u64 {
        self.input + self.compute + self.compute_overridden + self.output
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct KvCacheUsage {
    pub key: u64,
    pub value: u64,
}

impl KvCacheUsage {
    pub fn total(&self) -> u64 {
        self.key + self.value
    }
}

/// Computation-graph scratch bytes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ComputationUsage {
    /// Graph metadata, scheduler, and context bookkeeping.
    pub footprint: u64,
    /// Input tensors (token ids, embeddings, masks, output ids).
    pub input: u64,
    /// Largest per-layer working set.
    pub compute: u64,
    /// Output-layer scratch.
    pub output: u64,
}

impl ComputationUsage {
    pub fn total(&self) -> u64 {
        self.footprint + self.input + self.compute + self.output
    }
}

/// One entry of the estimate: index 0 is the CPU/main host, the rest are
/// GPUs or remote RPC servers in device order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceUsage {
    /// Transformer layers resident here.
    pub handle_layers: u64,

    /// Of those, layers whose KV cache is sized to the sliding window.
    pub handle_sliding_window_layers: u64,

    /// Highest layer index resident here; -1 when none.
    pub handle_last_layer: i64,

    /// Whether the output layer lives here.
    pub handle_output_layer: bool,

    /// True for RPC servers.
    pub remote: bool,

    /// Position within its class (RPC server list / GPU ordinal).
    pub position: usize,

    /// RPC endpoint, for remote devices.
    pub endpoint: Option<String>,

    /// Bootstrap bytes: non-tensor file content, token tables, output
    /// buffer.
    pub footprint: u64,

    pub parameter: ParameterUsage,
    pub weight: WeightUsage,
    pub kv_cache: KvCacheUsage,
    pub computation: ComputationUsage,
}

impl DeviceUsage {
    pub fn new_host() -> Self {
        Self {
            handle_last_layer: -1,
            ..Default::default()
        }
    }

    pub fn new_gpu(position: usize) -> Self {
        Self {
            handle_last_layer: -1,
            position,
            ..Default::default()
        }
    }

    pub fn new_rpc(position: usize, endpoint: String) -> Self {
        Self {
            handle_last_layer: -1,
            position,
            remote: true,
            endpoint: Some(endpoint),
            ..Default::default()
        }
    }
}
