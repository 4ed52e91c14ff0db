use gguf_estimate::{
    decode::GgmlDType,
    estimate::{DeviceMetrics, EstimateConfig, OverrideBuffer, TensorOverride},
    metadata::ArchitectureType,
    DecodeOptions, FileSource, GgufFile,
};

use crate::fixture::{FixtureBuilder, Val};

const EMBD: u64 = 64;
const HEADS: u64 = 8;
const HEADS_KV: u64 = 4;
const HEAD_DIM: u64 = EMBD / HEADS;
const FF: u64 = 160;
const VOCAB: usize = 128;
const CTX: u64 = 4096;

fn llama_fixture(blocks: u64) -> FixtureBuilder {
    let mut builder = FixtureBuilder::new()
        .kv("general.architecture", Val::Str("llama".to_string()))
        .kv("llama.block_count", Val::U32(blocks as u32))
        .kv("llama.context_length", Val::U32(CTX as u32))
        .kv("llama.embedding_length", Val::U32(EMBD as u32))
        .kv("llama.feed_forward_length", Val::U32(FF as u32))
        .kv("llama.attention.head_count", Val::U32(HEADS as u32))
        .kv("llama.attention.head_count_kv", Val::U32(HEADS_KV as u32))
        .kv("tokenizer.ggml.model", Val::Str("llama".to_string()))
        .kv(
            "tokenizer.ggml.tokens",
            Val::StrArr((0..VOCAB).map(|i| format!("t{i}")).collect()),
        )
        .tensor("token_embd.weight", &[EMBD, VOCAB as u64], 0);
    for i in 0..blocks {
        let blk = |suffix: &str| format!("blk.{i}.{suffix}");
        builder = builder
            .tensor(&blk("attn_norm.weight"), &[EMBD], 0)
            .tensor(&blk("attn_q.weight"), &[EMBD, EMBD], 0)
            .tensor(&blk("attn_k.weight"), &[EMBD, HEADS_KV * HEAD_DIM], 0)
            .tensor(&blk("attn_v.weight"), &[EMBD, HEADS_KV * HEAD_DIM], 0)
            .tensor(&blk("attn_output.weight"), &[EMBD, EMBD], 0)
            .tensor(&blk("ffn_norm.weight"), &[EMBD], 0)
            .tensor(&blk("ffn_gate.weight"), &[EMBD, FF], 0)
            .tensor(&blk("ffn_up.weight"), &[EMBD, FF], 0)
            .tensor(&blk("ffn_down.weight"), &[FF, EMBD], 0);
    }
    builder
        .tensor("output_norm.weight", &[EMBD], 0)
        .tensor("output.weight", &[EMBD, VOCAB as u64], 0)
}

fn decode(builder: &FixtureBuilder) -> GgufFile {
    let file = builder.write_file();
    let mut source = FileSource::open(file.path()).unwrap();
    GgufFile::decode(&mut source, DecodeOptions::default()).unwrap()
}

#[test]
fn test_full_offload_places_everything_on_the_gpu() {
    let gguf = decode(&llama_fixture(4));
    let estimate = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());

    assert_eq!(estimate.devices.len(), 2);
    assert!(estimate.full_offloaded);
    assert_eq!(estimate.offload_layers, 4);
    assert!(estimate.distributable);

    let host = &estimate.devices[0];
    let gpu = &estimate.devices[1];
    assert_eq!(host.weight.compute, 0);
    assert_eq!(gpu.handle_layers, 4);
    assert_eq!(gpu.handle_last_layer, 3);
    assert!(gpu.handle_output_layer);

    // Weight conservation: every tensor lands exactly once.
    let placed: u64 = estimate.devices.iter().map(|d| d.weight.total()).sum();
    assert_eq!(placed, gguf.model_bytes);
}

#[test]
fn test_zero_offload_keeps_everything_on_the_host() {
    let gguf = decode(&llama_fixture(4));
    let estimate =
        gguf.estimate_llama_cpp(&EstimateConfig::builder().offload_layers(0).build());

    let host = &estimate.devices[0];
    let gpu = &estimate.devices[1];
    assert!(!estimate.full_offloaded);
    assert_eq!(host.handle_layers, 4);
    assert!(host.handle_output_layer);
    assert_eq!(gpu.weight.total(), 0);
    assert_eq!(gpu.kv_cache.total(), 0);
    assert_eq!(host.weight.total(), gguf.model_bytes);
}

#[test]
fn test_kv_cache_bytes_match_the_formula() {
    let blocks = 4u64;
    let gguf = decode(&llama_fixture(blocks));
    let estimate = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());

    // F16 rows over head_kv * head_dim * padded context, per layer.
    let per_layer = GgmlDType::F16.row_size_of(HEADS_KV * HEAD_DIM * CTX);
    let gpu = &estimate.devices[1];
    assert_eq!(gpu.kv_cache.key, blocks * per_layer);
    assert_eq!(gpu.kv_cache.value, blocks * per_layer);
    assert_eq!(estimate.devices[0].kv_cache.total(), 0);
}

#[test]
fn test_kv_cache_can_stay_on_the_host() {
    let gguf = decode(&llama_fixture(4));
    let estimate = gguf.estimate_llama_cpp(
        &EstimateConfig::builder().offload_kv_cache(false).build(),
    );
    assert_eq!(estimate.devices[1].kv_cache.total(), 0);
    assert!(estimate.devices[0].kv_cache.total() > 0);
}

#[test]
fn test_offload_is_monotone_in_memory_demand() {
    let blocks = 4u64;
    let gguf = decode(&llama_fixture(blocks));
    let mut last_ram = u64::MAX;
    let mut last_vram = 0u64;
    for n in 0..=blocks + 1 {
        let estimate =
            gguf.estimate_llama_cpp(&EstimateConfig::builder().offload_layers(n).build());
        let summary = estimate.summarize(false, 0, 0);
        let ram = summary.items[0].ram.uma;
        let vram = summary.items[0].vrams[0].nonuma;
        assert!(ram <= last_ram, "host RAM grew when offloading layer {n}");
        assert!(vram >= last_vram, "VRAM shrank when offloading layer {n}");
        last_ram = ram;
        last_vram = vram;
    }
}

#[test]
fn test_sliding_window_shrinks_kv_for_patterned_layers() {
    let blocks = 4u64;
    let window = 64u64;
    let builder = llama_fixture(blocks)
        .kv("llama.attention.sliding_window", Val::U32(window as u32))
        .kv("llama.attention.sliding_window_pattern", Val::U32(2));
    let gguf = decode(&builder);
    let estimate = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());

    let gpu = &estimate.devices[1];
    assert_eq!(gpu.handle_sliding_window_layers, 2);

    let n_kv_swa = {
        let want = CTX.min(window + 2048); // window * n_seq + logical batch
        want.div_ceil(32) * 32
    };
    let full_row = GgmlDType::F16.row_size_of(HEADS_KV * HEAD_DIM * CTX);
    let swa_row = GgmlDType::F16.row_size_of(HEADS_KV * HEAD_DIM * n_kv_swa);
    assert_eq!(gpu.kv_cache.key, 2 * full_row + 2 * swa_row);

    // Demanding a full-size cache disables the shrink.
    let full = gguf.estimate_llama_cpp(
        &EstimateConfig::builder().full_size_swa_cache(true).build(),
    );
    assert_eq!(full.devices[1].kv_cache.key, blocks * full_row);
}

#[test]
fn test_tensor_split_balances_layers() {
    let gguf = decode(&llama_fixture(4));
    let estimate = gguf.estimate_llama_cpp(
        &EstimateConfig::builder()
            .tensor_split_fraction(vec![0.5, 0.5])
            .offload_layers(4)
            .build(),
    );
    assert_eq!(estimate.devices.len(), 3);
    let a = &estimate.devices[1];
    let b = &estimate.devices[2];
    assert!(a.handle_layers.abs_diff(b.handle_layers) <= 1);
    assert!(a.weight.compute > 0);
    assert!(b.weight.compute > 0);
    // One layer's worth of weights at most between the two shards.
    let layers = gguf.layers();
    let layer_bytes = layers.layer("blk.0").unwrap().bytes();
    assert!(a.weight.compute.abs_diff(b.weight.compute) <= layer_bytes);
}

#[test]
fn test_quantized_off_grid_rows_are_not_distributable() {
    let builder = llama_fixture(2).tensor("blk.0.ffn_extra.weight", &[544, 32], 2);
    let gguf = decode(&builder);
    let estimate = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());
    assert!(!estimate.distributable);
}

#[test]
fn test_moe_multiplies_device_inputs() {
    let blocks = 2u64;
    let dense = decode(&llama_fixture(blocks));
    let moe = decode(
        &llama_fixture(blocks)
            .kv("llama.expert_count", Val::U32(4))
            .kv("llama.expert_used_count", Val::U32(2)),
    );
    let config = EstimateConfig::builder().build();
    let dense_estimate = dense.estimate_llama_cpp(&config);
    let moe_estimate = moe.estimate_llama_cpp(&config);

    let n_tokens = 512u64;
    let inp_tokens = GgmlDType::I32.row_size_of(n_tokens);
    let dense_host = dense_estimate.devices[0].computation.input;
    assert_eq!(
        dense_estimate.devices[1].computation.input,
        dense_host - inp_tokens
    );
    assert_eq!(
        moe_estimate.devices[1].computation.input,
        4 * (moe_estimate.devices[0].computation.input - inp_tokens)
    );
}

#[test]
fn test_overridden_tensors_move_to_their_buffer() {
    let gguf = decode(&llama_fixture(4));
    let estimate = gguf.estimate_llama_cpp(
        &EstimateConfig::builder()
            .overridden_tensors(vec![TensorOverride {
                pattern: "blk.0.*".to_string(),
                buffer: OverrideBuffer::Cpu,
            }])
            .build(),
    );
    let layers = gguf.layers();
    let blk0_bytes = layers.layer("blk.0").unwrap().bytes();
    assert_eq!(estimate.devices[0].weight.compute_overridden, blk0_bytes);
    assert_eq!(estimate.devices[0].weight.compute, 0);
    // The pinned layer no longer counts toward the GPU's weights, but every
    // tensor still lands exactly once.
    let placed: u64 = estimate.devices.iter().map(|d| d.weight.total()).sum();
    assert_eq!(placed, gguf.model_bytes);
}

#[test]
fn test_missing_output_weight_duplicates_the_embedding() {
    let mut builder = FixtureBuilder::new()
        .kv("general.architecture", Val::Str("llama".to_string()))
        .kv("llama.block_count", Val::U32(1))
        .kv("llama.context_length", Val::U32(CTX as u32))
        .kv("llama.embedding_length", Val::U32(EMBD as u32))
        .kv("llama.attention.head_count", Val::U32(HEADS as u32))
        .tensor("token_embd.weight", &[EMBD, VOCAB as u64], 0);
    builder = builder
        .tensor("blk.0.attn_q.weight", &[EMBD, EMBD], 0)
        .tensor("output_norm.weight", &[EMBD], 0);
    let gguf = decode(&builder);
    let estimate = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());

    let embd_bytes = EMBD * VOCAB as u64 * 4;
    let output_device = &estimate.devices[1];
    assert!(output_device.weight.output >= embd_bytes);
    // The duplicate is the allowed overshoot past the file's own bytes.
    let placed: u64 = estimate.devices.iter().map(|d| d.weight.total()).sum();
    assert_eq!(placed, gguf.model_bytes + embd_bytes);
}

#[test]
fn test_embedding_only_models_batch_to_the_context() {
    let builder = llama_fixture(2).kv("llama.attention.causal", Val::Bool(false));
    let gguf = decode(&builder);
    let estimate = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());
    assert!(estimate.embedding_only);
    assert_eq!(estimate.logical_batch_size as u64, CTX);
    assert_eq!(estimate.physical_batch_size as u64, CTX);
}

#[test]
fn test_rpc_servers_mark_devices_remote() {
    let gguf = decode(&llama_fixture(4));
    let estimate = gguf.estimate_llama_cpp(
        &EstimateConfig::builder()
            .tensor_split_fraction(vec![0.5, 0.5])
            .rpc_servers(vec!["10.0.0.8:50052".to_string()])
            .build(),
    );
    assert!(estimate.devices[1].remote);
    assert_eq!(estimate.devices[1].position, 0);
    assert_eq!(
        estimate.devices[1].endpoint.as_deref(),
        Some("10.0.0.8:50052")
    );
    assert!(!estimate.devices[2].remote);
}

#[test]
fn test_flash_attention_pads_the_context_coarser() {
    let builder = llama_fixture(2).kv("llama.context_length", Val::U32(4000));
    let gguf = decode(&builder);
    let plain = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());
    let fused = gguf.estimate_llama_cpp(
        &EstimateConfig::builder().flash_attention(true).build(),
    );
    // 4000 pads to 4000 (32) vs 4096 (256).
    let plain_row = GgmlDType::F16.row_size_of(HEADS_KV * HEAD_DIM * 4000);
    let fused_row = GgmlDType::F16.row_size_of(HEADS_KV * HEAD_DIM * 4096);
    assert_eq!(plain.devices[1].kv_cache.key, 2 * plain_row);
    assert_eq!(fused.devices[1].kv_cache.key, 2 * fused_row);
    assert!(fused.flash_attention);
}

#[test]
fn test_projector_image_embed_cache() {
    let patch = 14u64;
    let proj_dim = 128u64;
    let builder = FixtureBuilder::new()
        .kv("general.architecture", Val::Str("clip".to_string()))
        .kv("clip.has_vision_encoder", Val::Bool(true))
        .kv("clip.projector_type", Val::Str("qwen2vl_merger".to_string()))
        .kv("clip.vision.image_size", Val::U32(1024))
        .kv("clip.vision.patch_size", Val::U32(patch as u32))
        .kv("clip.vision.embedding_length", Val::U32(64))
        .kv("clip.vision.block_count", Val::U32(2))
        .kv("clip.vision.attention.head_count", Val::U32(4))
        .kv("clip.vision.projection_dim", Val::U32(proj_dim as u32))
        .tensor("v.patch_embd.weight", &[588, 64], 0)
        .tensor("v.blk.0.attn_q.weight", &[64, 64], 0)
        .tensor("v.blk.1.attn_q.weight", &[64, 64], 0)
        .tensor("mm.0.weight", &[64, 128], 0);
    let gguf = decode(&builder);
    let estimate = gguf.estimate_llama_cpp(
        &EstimateConfig::builder().max_projected_image_size(1024).build(),
    );

    assert_eq!(estimate.arch_type, ArchitectureType::Projector);
    let p = 2 * patch;
    let side = (1024 / p) * 2;
    let expected = 10 * (side * side) * proj_dim * 4;
    assert_eq!(estimate.devices[1].footprint, expected);
    assert!(estimate.devices[1].weight.total() > 0);
}

#[test]
fn test_adapter_files_split_without_caches() {
    let builder = FixtureBuilder::new()
        .kv("general.architecture", Val::Str("llama".to_string()))
        .kv("general.type", Val::Str("adapter".to_string()))
        .kv("adapter.type", Val::Str("lora".to_string()))
        .tensor("blk.0.attn_q.weight.lora_a", &[EMBD, 8], 0)
        .tensor("blk.0.attn_q.weight.lora_b", &[8, EMBD], 0)
        .tensor("blk.1.attn_q.weight.lora_a", &[EMBD, 8], 0)
        .tensor("blk.1.attn_q.weight.lora_b", &[8, EMBD], 0);
    let gguf = decode(&builder);
    let estimate = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());

    assert_eq!(estimate.arch_type, ArchitectureType::Adapter);
    assert!(!estimate.distributable);
    for device in &estimate.devices {
        assert_eq!(device.kv_cache.total(), 0);
        assert_eq!(device.computation.compute, 0);
    }
    let placed: u64 = estimate.devices.iter().map(|d| d.weight.total()).sum();
    assert_eq!(placed, gguf.model_bytes);
}

#[test]
fn test_imatrix_files_stay_on_the_host() {
    let builder = FixtureBuilder::new()
        .kv("general.type", Val::Str("imatrix".to_string()))
        .kv("imatrix.chunk_count", Val::U32(32))
        .tensor("blk.0.attn_q.weight.in_sum2", &[EMBD], 0)
        .tensor("blk.0.ffn_up.weight.in_sum2", &[EMBD], 0);
    let gguf = decode(&builder);
    let estimate = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());

    assert_eq!(estimate.arch_type, ArchitectureType::Imatrix);
    assert!(!estimate.distributable);
    assert_eq!(estimate.devices[0].weight.total(), gguf.model_bytes);
    assert_eq!(estimate.devices[1].weight.total(), 0);
}

#[test]
fn test_device_metrics_enable_throughput_prediction() {
    let gguf = decode(&llama_fixture(4));
    let without = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());
    assert!(without.maximum_tokens_per_second.is_none());

    let with = gguf.estimate_llama_cpp(
        &EstimateConfig::builder()
            .device_metrics(vec![DeviceMetrics {
                flops: 1e12,
                up_bandwidth: 100e9,
                down_bandwidth: 100e9,
            }])
            .build(),
    );
    assert!(with.maximum_tokens_per_second.unwrap() > 0.0);
}

#[test]
fn test_attached_sub_estimates_roll_into_the_summary() {
    let gguf = decode(&llama_fixture(2));
    let drafter = gguf.estimate_llama_cpp(&EstimateConfig::builder().build());
    let combined = gguf.estimate_llama_cpp(
        &EstimateConfig::builder()
            .drafter(Box::new(drafter.clone()))
            .build(),
    );
    assert!(combined.drafter.is_some());

    let alone = drafter.summarize(false, 0, 0);
    let with_drafter = combined.summarize(false, 0, 0);
    assert!(
        with_drafter.items[0].vrams[0].uma > alone.items[0].vrams[0].uma,
        "drafter VRAM must accumulate on top"
    );
}
