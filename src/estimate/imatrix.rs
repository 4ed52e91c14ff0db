//! Importance-matrix files: statistics only, everything stays on the host.

use crate::{
    decode::{file::GgufFile, tensor::TensorInfos},
    estimate::{config::EstimateConfig, graph, prelude::Prelude, LlamaCppEstimate},
    metadata::{Architecture, ArchitectureType},
};

pub(super) fn estimate(
    file: &GgufFile,
    arch: &Architecture,
    config: &EstimateConfig,
) -> LlamaCppEstimate {
    let mut pre = Prelude::resolve(config);

    pre.devices[0].footprint =
        graph::BOOTSTRAP_OVERHEAD + file.total_size.saturating_sub(file.model_bytes);
    pre.devices[0].weight.compute = file.tensors.as_slice().bytes();
    pre.devices[0].parameter.compute = file.tensors.as_slice().elements();

    LlamaCppEstimate {
        architecture: arch.architecture.clone(),
        arch_type: ArchitectureType::Imatrix,
        flash_attention: false,
        context_size: 0,
        offload_layers: 0,
        full_offloaded: false,
        embedding_only: false,
        reranking: false,
        distributable: false,
        logical_batch_size: 0,
        physical_batch_size: 0,
        devices: pre.devices,
        maximum_tokens_per_second: None,
        drafter: None,
        projector: None,
        adapters: Vec::new(),
    }
}
