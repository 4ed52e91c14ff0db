//! Collapse an estimate into per-device byte demands under UMA and NonUMA
//! assumptions.
//!
//! With mmap the weights are backed by the page cache rather than anonymous
//! memory, so they drop out of the resident total except where a device
//! pins them (remote workers copy their shard; projector weights are
//! uploaded whole).

use serde::{Deserialize, Serialize};

use crate::{
    estimate::LlamaCppEstimate,
    metadata::ArchitectureType,
    scalar::{SizeDisplayMode, SizeScalar},
};

/// Byte demand of one device under both memory architectures.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemoryDemand {
    pub uma: u64,
    pub nonuma: u64,
}

impl MemoryDemand {
    pub fn format(&self, mode: SizeDisplayMode) -> String {
        format!(
            "{} (UMA) / {} (NonUMA)",
            SizeScalar(self.uma).format(mode),
            SizeScalar(self.nonuma).format(mode)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySummaryItem {
    pub offload_layers: u64,
    pub full_offloaded: bool,
    /// Host demand.
    pub ram: MemoryDemand,
    /// One entry per GPU / RPC device.
    pub vrams: Vec<MemoryDemand>,
    pub maximum_tokens_per_second: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySummary {
    pub items: Vec<MemorySummaryItem>,
}

impl LlamaCppEstimate {
    /// Summarize with platform footprints: `nonuma_ram_footprint` and
    /// `nonuma_vram_footprint` are what the OS/driver claim beyond the
    /// model's own demand on non-unified platforms.
    pub fn summarize(
        &self,
        mmap: bool,
        nonuma_ram_footprint: u64,
        nonuma_vram_footprint: u64,
    ) -> MemorySummary {
        let mut item = self.summarize_item(mmap);
        item.ram.nonuma += nonuma_ram_footprint;
        for vram in &mut item.vrams {
            vram.nonuma += nonuma_vram_footprint;
        }
        MemorySummary { items: vec![item] }
    }

    /// UMA-based demand of this estimate and its sub-estimates, before
    /// platform footprints.
    fn summarize_item(&self, mmap: bool) -> MemorySummaryItem {
        let host = &self.devices[0];
        let host_weight = host.weight.total();
        let mut ram_uma = host.footprint
            + host_weight
            + host.kv_cache.total()
            + host.computation.total();
        if mmap || self.full_offloaded {
            ram_uma = ram_uma.saturating_sub(host_weight);
            if !mmap {
                ram_uma += host.weight.output;
            }
        }

        let mut vrams = Vec::with_capacity(self.devices.len().saturating_sub(1));
        for device in &self.devices[1..] {
            let weight = device.weight.total();
            let mut uma = device.footprint + weight + device.kv_cache.total();
            if device.remote {
                uma += device.computation.total();
            }
            if mmap {
                let pinned = device.remote
                    || (device.position > 0 && device.handle_last_layer >= 0)
                    || self.arch_type == ArchitectureType::Projector;
                if !pinned {
                    uma = uma.saturating_sub(weight);
                }
            }
            vrams.push(MemoryDemand { uma, nonuma: uma });
        }

        let mut item = MemorySummaryItem {
            offload_layers: self.offload_layers,
            full_offloaded: self.full_offloaded,
            ram: MemoryDemand {
                uma: ram_uma,
                nonuma: ram_uma,
            },
            vrams,
            maximum_tokens_per_second: self.maximum_tokens_per_second,
        };

        if let Some(drafter) = &self.drafter {
            add_item(&mut item, drafter.summarize_item(mmap));
        }
        if let Some(projector) = &self.projector {
            add_item(&mut item, projector.summarize_item(mmap));
        }
        for adapter in &self.adapters {
            // Adapter weights are patched into the graph; mmap never backs
            // them.
            add_item(&mut item, adapter.summarize_item(false));
        }
        item
    }
}

fn add_item(into: &mut MemorySummaryItem, other: MemorySummaryItem) {
    into.ram.uma += other.ram.uma;
    into.ram.nonuma += other.ram.nonuma;
    for (i, vram) in other.vrams.into_iter().enumerate() {
        if i < into.vrams.len() {
            into.vrams[i].uma += vram.uma;
            into.vrams[i].nonuma += vram.nonuma;
        } else {
            into.vrams.push(vram);
        }
    }
}
