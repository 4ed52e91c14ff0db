//! LoRA-style adapter files: weights split across devices like the model
//! path, but with no KV cache and no graph scratch.

use crate::{
    decode::file::GgufFile,
    estimate::{config::EstimateConfig, graph, prelude::Prelude, LlamaCppEstimate},
    metadata::{Architecture, ArchitectureType},
};

pub(super) fn estimate(
    file: &GgufFile,
    arch: &Architecture,
    config: &EstimateConfig,
) -> LlamaCppEstimate {
    let mut pre = Prelude::resolve(config);
    let block_count = file.layers().count_blocks().max(arch.block_count);

    let requested = config.offload_layers.unwrap_or(block_count + 1);
    let offload_output = requested > block_count;
    let n_offload = requested.min(block_count);
    let n_load = block_count - n_offload;
    let full_offloaded = n_load == 0 && offload_output;

    pre.devices[0].footprint =
        graph::BOOTSTRAP_OVERHEAD + file.total_size.saturating_sub(file.model_bytes);

    let layers = file.layers();
    let (io_layers, tf_layers) = layers.cut(&[
        "position_*",
        "token_*",
        "output.*",
        "output_norm.*",
    ]);
    let (input_layers, output_layers) = io_layers.cut(&["position_*", "token_*"]);

    pre.devices[0].weight.input = input_layers.bytes_where(|_| true);
    pre.devices[0].parameter.input = input_layers.elements_where(|_| true);

    let split_mode = config.split_mode;
    let main_gpu_index = config.main_gpu_index;
    let assign = |i: u64| -> usize {
        if i < n_load {
            return 0;
        }
        if matches!(split_mode, crate::estimate::SplitMode::None) {
            return main_gpu_index + 1;
        }
        let denominator = n_offload + u64::from(offload_output);
        let x = (i - n_load) as f64 / denominator.max(1) as f64;
        let j = pre
            .fractions
            .iter()
            .position(|&f| f > x)
            .unwrap_or(pre.fractions.len() - 1);
        j + 1
    };

    for i in 0..block_count {
        let di = assign(i);
        let device = &mut pre.devices[di];
        device.handle_layers += 1;
        device.handle_last_layer = i as i64;
        if let Some(layer) = tf_layers.layer(&format!("blk.{i}")) {
            device.weight.compute += layer.bytes();
            device.parameter.compute += layer.elements();
        }
    }

    // Adapters never synthesize a duplicate output weight; only what the
    // file carries is placed.
    let output_device = if full_offloaded && block_count > 0 {
        assign(block_count - 1)
    } else {
        0
    };
    {
        let device = &mut pre.devices[output_device];
        device.weight.output += output_layers.bytes_where(|_| true);
        device.parameter.output += output_layers.elements_where(|_| true);
        device.handle_output_layer = true;
    }

    LlamaCppEstimate {
        architecture: arch.architecture.clone(),
        arch_type: ArchitectureType::Adapter,
        flash_attention: false,
        context_size: 0,
        offload_layers: n_offload,
        full_offloaded,
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
