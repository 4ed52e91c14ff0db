//! Multimodal projector files (clip-style vision/audio encoders plus the
//! mm projection head).
//!
//! Vision and audio encoders are estimated independently and accumulated.
//! The projector rides on one device: the first offload device when any
//! offload is configured, else the host.

use crate::{
    decode::{file::GgufFile, layers::GgufLayers, tensor::TensorInfos, GgmlDType},
    estimate::{config::EstimateConfig, graph, prelude::Prelude, LlamaCppEstimate},
    metadata::{Architecture, ArchitectureType, ClipEncoder},
};

/// Graph node budget clip graphs are built with.
const PROJECTOR_MAX_NODES: u64 = 8192;

pub(super) fn estimate(
    file: &GgufFile,
    arch: &Architecture,
    config: &EstimateConfig,
) -> LlamaCppEstimate {
    let mut pre = Prelude::resolve(config);
    let offload = config.offload_layers.map_or(true, |n| n > 0) && pre.devices.len() > 1;
    let target = if offload { 1 } else { 0 };

    pre.devices[0].footprint =
        graph::BOOTSTRAP_OVERHEAD + file.total_size.saturating_sub(file.model_bytes);

    let clip = arch.clip.clone().unwrap_or(crate::metadata::Clip {
        projector_type: "mlp".to_string(),
        vision: None,
        audio: None,
    });

    let layers = file.layers();
    let (mm_layers, rest) = layers.cut(&["mm.*", "resampler.*"]);
    let (io_layers, tf_layers) = rest.cut(&[
        "v.patch_embd.*",
        "v.position_embd.*",
        "v.class_embd",
        "v.pre_ln.*",
        "v.post_ln.*",
        "a.position_embd.*",
        "a.conv1d.*",
        "a.post_ln.*",
    ]);

    // All projector weights ride the target device.
    {
        let device = &mut pre.devices[target];
        device.weight.input += io_layers.bytes_where(|_| true);
        device.parameter.input += io_layers.elements_where(|_| true);
        device.weight.compute += tf_layers.bytes_where(|_| true);
        device.parameter.compute += tf_layers.elements_where(|_| true);
        device.weight.output += mm_layers.bytes_where(|_| true);
        device.parameter.output += mm_layers.elements_where(|_| true);
        device.handle_layers = tf_layers.count_blocks();
        device.handle_output_layer = true;
    }

    // Graph bookkeeping on the host.
    pre.devices[0].computation.footprint = graph::tensor_overhead() * PROJECTOR_MAX_NODES
        + graph::graph_overhead(PROJECTOR_MAX_NODES, false)
        + graph::SCHEDULER_OVERHEAD;

    if let Some(vision) = &clip.vision {
        accumulate_encoder(
            &mut pre.devices[target],
            vision,
            &clip.projector_type,
            &mm_layers,
            config.max_projected_image_size,
            file,
        );
    }
    if let Some(audio) = &clip.audio {
        accumulate_audio_encoder(&mut pre.devices[target], audio);
    }

    LlamaCppEstimate {
        architecture: arch.architecture.clone(),
        arch_type: ArchitectureType::Projector,
        flash_attention: false,
        context_size: 0,
        offload_layers: if offload { 1 } else { 0 },
        full_offloaded: offload,
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

fn accumulate_encoder(
    device: &mut crate::estimate::DeviceUsage,
    encoder: &ClipEncoder,
    projector_type: &str,
    mm_layers: &GgufLayers<'_>,
    max_projected_image_size: Option<u64>,
    file: &GgufFile,
) {
    let patch = encoder.patch_size.max(1);
    let merger_style = projector_type.contains("merger");

    // Merger projectors fold 2x2 patch grids, so they tolerate much larger
    // inputs; everything else is resized toward the training resolution.
    let image_size = max_projected_image_size.unwrap_or(if merger_style {
        1024
    } else {
        encoder.image_size.max(224)
    });

    let mut n_patches = if merger_style {
        let p = 2 * patch;
        let side = (image_size / p) * 2;
        side * side
    } else {
        let side = image_size / patch;
        side * side
    };
    if encoder.spatial_merge_size > 1 {
        n_patches /= encoder.spatial_merge_size * encoder.spatial_merge_size;
    }
    if encoder.scale_factor > 1 {
        n_patches /= encoder.scale_factor * encoder.scale_factor;
    }
    let has_class_embd =
        crate::decode::tensor::TensorInfos::get(file.tensors.as_slice(), "v.class_embd").is_some();
    let n_positions = n_patches + u64::from(has_class_embd);

    let patches_max_size = patches_max_size(projector_type);
    let projection_dim = projection_dim(encoder, projector_type, mm_layers);

    // Image-embed cache for the decoded patches.
    device.footprint += patches_max_size * n_patches * projection_dim * 4;

    // One encoder layer's scratch: norm, k/v projections, and the KQ
    // product.
    let f32_row = |elements: u64| GgmlDType::F32.row_size_of(elements);
    let norm = f32_row(encoder.embedding_length * n_positions);
    let kv = 2 * f32_row(encoder.embedding_length * n_positions);
    let kq = f32_row(n_positions * n_positions * encoder.head_count.max(1));
    device.computation.compute += norm + kv + kq;
}

fn accumulate_audio_encoder(device: &mut crate::estimate::DeviceUsage, encoder: &ClipEncoder) {
    // Audio encoders are position-driven; whisper-style mel windows give
    // 1500 positions when the file does not say otherwise.
    let n_positions = if encoder.image_size > 0 {
        encoder.image_size
    } else {
        1500
    };
    let f32_row = |elements: u64| GgmlDType::F32.row_size_of(elements);
    let norm = f32_row(encoder.embedding_length * n_positions);
    let kv = 2 * f32_row(encoder.embedding_length * n_positions);
    let kq = f32_row(n_positions * n_positions * encoder.head_count.max(1));
    device.computation.compute += norm + kv + kq;
}

/// How many decoded images the runtime keeps alive at once, by projector
/// family.
fn patches_max_size(projector_type: &str) -> u64 {
    match projector_type {
        t if t.contains("resampler") => 10,
        t if t.contains("merger") => 10,
        "adapter" | "gemma3" => 11,
        _ => 6,
    }
}

/// The projection head's output width, read from the projector tensors with
/// the encoder's declared dim as fallback.
fn projection_dim(
    encoder: &ClipEncoder,
    projector_type: &str,
    mm_layers: &GgufLayers<'_>,
) -> u64 {
    if encoder.projection_dim > 0 {
        return encoder.projection_dim;
    }
    let candidates: &[&str] = match projector_type {
        t if t.contains("resampler") => &["resampler.proj.weight"],
        t if t.contains("merger") => &["mm.2.weight", "mm.1.weight", "mm.0.weight"],
        _ => &["mm.2.weight", "mm.0.weight", "mm.input_projection.weight"],
    };
    for name in candidates {
        if let Some(t) = mm_layers.get(name) {
            if let Some(&dim) = t.dimensions.last() {
                return dim;
            }
        }
    }
    encoder.embedding_length
}
