//! Shared resolution of the estimator configuration: the device array and
//! the normalized batch/split settings every path starts from.

use crate::estimate::{
    config::{DeviceMetrics, EstimateConfig},
    device::DeviceUsage,
};

pub(super) struct Prelude {
    /// `devices[0]` is the host; `devices[j+1]` covers split fraction `j`,
    /// remote when an RPC endpoint claims that slot.
    pub devices: Vec<DeviceUsage>,
    /// Cumulative, normalized split fractions; last entry is 1.0.
    pub fractions: Vec<f64>,
    pub logical_batch: u64,
    pub physical_batch: u64,
    pub parallel: u64,
    /// Per-device metrics extended to cover every device, or empty when the
    /// prediction is off.
    pub metrics: Vec<DeviceMetrics>,
}

impl Prelude {
    pub fn resolve(config: &EstimateConfig) -> Self {
        config.validate();

        let raw = config.split_fractions();
        let sum: f64 = raw.iter().sum();
        let mut fractions = Vec::with_capacity(raw.len());
        let mut acc = 0.0;
        for f in &raw {
            acc += f / sum;
            fractions.push(acc);
        }

        let mut devices = vec![DeviceUsage::new_host()];
        for j in 0..raw.len() {
            if j < config.rpc_servers.len() {
                devices.push(DeviceUsage::new_rpc(j, config.rpc_servers[j].clone()));
            } else {
                devices.push(DeviceUsage::new_gpu(j));
            }
        }

        let logical_batch = config.logical_batch_size.unwrap_or(2048).max(32) as u64;
        let physical_batch = (config.physical_batch_size.unwrap_or(512).max(1) as u64)
            .min(logical_batch);
        let parallel = config.parallel_size.unwrap_or(1).max(1) as u64;

        let metrics = if config.device_metrics.is_empty() {
            Vec::new()
        } else {
            let mut metrics = config.device_metrics.clone();
            let last = *metrics.last().unwrap();
            while metrics.len() < devices.len() {
                metrics.push(last);
            }
            metrics.truncate(devices.len());
            metrics
        };

        Self {
            devices,
            fractions,
            logical_batch,
            physical_batch,
            parallel,
            metrics,
        }
    }
}
