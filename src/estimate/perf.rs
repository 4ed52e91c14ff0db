//! Tokens-per-second prediction from per-device throughput metrics.
//!
//! Per decoded token each device either recomputes its resident parameters
//! (compute-bound) or streams their bytes (memory-bound); remote devices
//! additionally ship the layer activations both ways. The devices run in
//! sequence, so latencies add.

use crate::estimate::{config::DeviceMetrics, device::DeviceUsage};

pub(super) fn predict_tokens_per_second(
    devices: &[DeviceUsage],
    metrics: &[DeviceMetrics],
    embedding_length: u64,
) -> Option<f64> {
    if metrics.is_empty() {
        return None;
    }

    let activation_bytes = (embedding_length * 4) as f64;
    let mut latency = 0.0f64;
    for (device, metric) in devices.iter().zip(metrics.iter()) {
        let params = device.parameter.total() as f64;
        if params == 0.0 {
            continue;
        }
        let weight_bytes = device.weight.total() as f64;
        let compute_seconds = if metric.flops > 0.0 {
            2.0 * params / metric.flops
        } else {
            0.0
        };
        let memory_seconds = if metric.up_bandwidth > 0.0 {
            weight_bytes / metric.up_bandwidth
        } else {
            0.0
        };
        latency += compute_seconds.max(memory_seconds);
        if device.remote {
            if metric.up_bandwidth > 0.0 {
                latency += activation_bytes / metric.up_bandwidth;
            }
            if metric.down_bandwidth > 0.0 {
                latency += activation_bytes / metric.down_bandwidth;
            }
        }
    }
    if latency <= 0.0 {
        return None;
    }
    Some(1.0 / latency)
}
