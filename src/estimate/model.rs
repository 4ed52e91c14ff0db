//! Footprint estimation for full model files: weights, KV cache, and the
//! computation-graph working set, split across the host and any offload
//! devices.

use regex::Regex;

use crate::{
    decode::{
        dtype::GgmlDType,
        file::GgufFile,
        layers::GgufLayers,
        tensor::TensorInfos,
    },
    estimate::{
        config::EstimateConfig,
        graph,
        overrides::OverridePlan,
        prelude::Prelude,
        LlamaCppEstimate,
    },
    metadata::{Architecture, ArchitectureType, Tokenizer},
    scalar::pad,
};

pub(super) fn estimate(
    file: &GgufFile,
    arch: &Architecture,
    tokenizer: &Tokenizer,
    config: &EstimateConfig,
) -> LlamaCppEstimate {
    let mut pre = Prelude::resolve(config);
    let block_count = arch.block_count;

    // Grok graphs never fuse attention; a quantized value cache only works
    // fused, so it falls back to F16 otherwise.
    let flash_attention = config.flash_attention && arch.architecture != "grok";
    let cache_key_type = config.cache_key_type.unwrap_or(GgmlDType::F16);
    let mut cache_value_type = config.cache_value_type.unwrap_or(GgmlDType::F16);
    if cache_value_type.is_quantized() && !flash_attention {
        tracing::debug!("quantized value cache without flash attention; using F16");
        cache_value_type = GgmlDType::F16;
    }

    let mut context_size = config
        .context_size
        .map(|v| v.max(0) as u64)
        .unwrap_or(arch.max_context_length);
    if config.in_max_context_size && arch.max_context_length > 0 {
        context_size = context_size.min(arch.max_context_length);
    }
    if context_size == 0 {
        tracing::debug!("model advertises no context length; assuming 4096");
        context_size = 4096;
    }

    let (logical_batch, physical_batch) = if arch.embedding_only {
        (context_size, context_size)
    } else {
        (pre.logical_batch, pre.physical_batch)
    };

    let recurrent = arch.is_recurrent();
    let cache_padding = if flash_attention { 256 } else { 32 };
    let n_kv = pad(context_size, cache_padding);
    let n_seq = pre.parallel;
    let swa_enabled = arch.attention.sliding_window_pattern != 1
        && arch.attention.sliding_window > 0
        && !config.full_size_swa_cache
        && !recurrent;
    let n_kv_swa = pad(
        context_size.min(arch.attention.sliding_window * n_seq + logical_batch),
        cache_padding,
    );

    let n_tokens = context_size.min(physical_batch);
    let n_outputs = n_tokens;

    // "One extra layer" asks for the output layer as well.
    let requested = config.offload_layers.unwrap_or(block_count + 1);
    let offload_output = requested > block_count;
    let n_offload = requested.min(block_count);
    let n_load = block_count - n_offload;
    let full_offloaded = n_load == 0 && offload_output;

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
    let output_device = if full_offloaded && block_count > 0 {
        assign(block_count - 1)
    } else {
        0
    };

    // Bootstrap: the non-tensor file content plus a flat allowance, then the
    // token tables.
    pre.devices[0].footprint =
        graph::BOOTSTRAP_OVERHEAD + file.total_size.saturating_sub(file.model_bytes);
    let mut token_tables = tokenizer.tokens_len * 8;
    if tokenizer.model == "gpt2" {
        token_tables += tokenizer.merges_len * 104;
    }
    token_tables += tokenizer.tokens_len * 88;
    pre.devices[0].footprint += token_tables;

    let mut output_buffer = arch.embedding_length * n_outputs * 4;
    if arch.attention.causal {
        output_buffer += arch.vocabulary_length * n_outputs * 4;
    }
    pre.devices[output_device].footprint += output_buffer;

    // Weights: overridden tensors are pinned first and excluded from the
    // standard partitioning via the filter.
    let layers = file.layers();
    let (io_layers, tf_layers) = layers.cut(&[
        "position_*",
        "token_*",
        "cls.*",
        "output.*",
        "output_norm.*",
        "rope_factors_*",
    ]);
    let (input_layers, output_layers) = io_layers.cut(&["position_*", "token_*"]);

    let overrides = OverridePlan::compile(
        &config.overridden_tensors,
        config.rpc_servers.len(),
        pre.devices.len(),
        &config.rpc_servers,
    );
    for t in &file.tensors {
        if let Some(di) = overrides.target(&t.name) {
            pre.devices[di].weight.compute_overridden += t.bytes();
            pre.devices[di].parameter.compute_overridden += t.elements();
        }
    }
    let not_overridden = |name: &str| overrides.target(name).is_none();

    pre.devices[0].weight.input = input_layers.bytes_where(not_overridden);
    pre.devices[0].parameter.input = input_layers.elements_where(not_overridden);

    let offload_kv_cache = config.offload_kv_cache.unwrap_or(true);
    let swa_pattern = arch.attention.sliding_window_pattern.max(1) as u64;
    let kv_state = KvState::derive(arch, cache_key_type, cache_value_type, n_seq);

    for i in 0..block_count {
        let di = assign(i);
        let is_swa = swa_enabled && (i % swa_pattern != 0);
        {
            let device = &mut pre.devices[di];
            device.handle_layers += 1;
            device.handle_last_layer = i as i64;
            if is_swa {
                device.handle_sliding_window_layers += 1;
            }
        }
        if let Some(layer) = tf_layers.layer(&format!("blk.{i}")) {
            let device = &mut pre.devices[di];
            device.weight.compute += layer.bytes_where(not_overridden);
            device.parameter.compute += layer.elements_where(not_overridden);
        }

        let (key_bytes, value_bytes, kv_elements) =
            kv_state.layer(if is_swa { n_kv_swa } else { n_kv });
        let kv_device = if di == 0 || !offload_kv_cache { 0 } else { di };
        let device = &mut pre.devices[kv_device];
        device.kv_cache.key += key_bytes;
        device.kv_cache.value += value_bytes;
        device.parameter.kv_cache += kv_elements;
    }

    let mut output_bytes = output_layers.bytes_where(not_overridden);
    let mut output_elements = output_layers.elements_where(not_overridden);
    let output_weight = output_layers.get("output.weight");
    let token_embd = input_layers.get("token_embd.weight");
    if output_weight.is_none() {
        // The runtime reuses the input embedding as the unembedding matrix.
        if let Some(t) = token_embd {
            output_bytes += t.bytes();
            output_elements += t.elements();
        }
    }
    {
        let device = &mut pre.devices[output_device];
        device.weight.output += output_bytes;
        device.parameter.output += output_elements;
        device.handle_output_layer = true;
    }

    // Computation bookkeeping on the host.
    let tensor_count = file.header.tensor_count;
    let nodes = graph::max_nodes(tensor_count);
    pre.devices[0].computation.footprint = graph::tensor_overhead() * nodes
        + graph::graph_overhead(nodes, false)
        + graph::SCHEDULER_OVERHEAD
        + 2 * graph::tensor_overhead() * (tensor_count + 1 + 3 * block_count);

    let f32_row = |elements: u64| GgmlDType::F32.row_size_of(elements);
    let i32_row = |elements: u64| GgmlDType::I32.row_size_of(elements);
    let inp_tokens = i32_row(n_tokens);
    let inp_embd = f32_row(arch.embedding_length * n_tokens);
    let inp_pos = i32_row(n_tokens);
    let inp_out_ids = i32_row(n_outputs);
    let inp_kq_mask = f32_row(n_kv * n_tokens);
    let inp_s_mask = f32_row(n_kv);
    let inp_s_seq = i32_row(n_kv * n_tokens);

    let host_inputs = if recurrent {
        inp_tokens + inp_embd + inp_s_mask + inp_s_seq + inp_out_ids
    } else {
        inp_tokens + inp_embd + inp_pos + inp_kq_mask + inp_out_ids
    };
    pre.devices[0].computation.input = host_inputs;
    if n_offload > 0 {
        let multiplier = if arch.expert_count > 0 {
            4
        } else if pre.fractions.len() > 1 && config.rpc_servers.is_empty() {
            2
        } else {
            1
        };
        let device_inputs = (host_inputs - inp_tokens) * multiplier;
        for device in pre.devices.iter_mut().skip(1) {
            device.computation.input = device_inputs;
        }
    }

    // Per-layer working set: layers run serially, so only the largest
    // layer's scratch counts.
    let scratch = layer_scratch(
        arch,
        &tf_layers,
        block_count,
        flash_attention,
        cache_key_type,
        n_kv,
        n_tokens,
        n_seq,
    );
    if block_count > 0 {
        if n_load > 0 {
            pre.devices[0].computation.compute = scratch.offload.max(scratch.load_attn);
        }
        for device in pre.devices.iter_mut().skip(1) {
            if device.handle_layers > 0 {
                device.computation.compute = scratch.offload;
            }
        }
        if n_load > 0 && scratch.load_attn > 0 {
            if let Some(j) = (1..pre.devices.len())
                .find(|&j| !pre.devices[j].remote && pre.devices[j].handle_layers > 0)
            {
                pre.devices[j].computation.compute += scratch.load_attn;
            }
        }
    }

    let output_row_tensor = output_weight.or(token_embd);
    if let Some(t) = output_row_tensor {
        let last_dim = t.dimensions.last().copied().unwrap_or(0);
        pre.devices[output_device].computation.output += f32_row(last_dim * n_tokens);
    }
    if recurrent {
        pre.devices[output_device].computation.output += inp_s_mask + inp_s_seq;
    }

    // Quantized tensors with a row dimension off the 512 grid cannot be
    // sharded over RPC.
    let distributable = !file.tensors.iter().any(|t| {
        t.dtype.is_quantized() && t.dimensions.first().is_some_and(|d| d % 512 != 0)
    });

    let maximum_tokens_per_second =
        super::perf::predict_tokens_per_second(&pre.devices, &pre.metrics, arch.embedding_length);

    LlamaCppEstimate {
        architecture: arch.architecture.clone(),
        arch_type: ArchitectureType::Model,
        flash_attention,
        context_size,
        offload_layers: n_offload,
        full_offloaded,
        embedding_only: arch.embedding_only,
        reranking: arch.reranking,
        distributable,
        logical_batch_size: logical_batch as i32,
        physical_batch_size: physical_batch as i32,
        devices: pre.devices,
        maximum_tokens_per_second,
        drafter: None,
        projector: None,
        adapters: Vec::new(),
    }
}

/// Per-layer cache state: recurrent models carry fixed-size conv/ssm states,
/// causal models carry key/value rows over the (possibly windowed) context.
struct KvState {
    recurrent: Option<(u64, u64)>,
    key_type: GgmlDType,
    value_type: GgmlDType,
    key_row_elements: u64,
    value_row_elements: u64,
    n_seq: u64,
}

impl KvState {
    fn derive(
        arch: &Architecture,
        key_type: GgmlDType,
        value_type: GgmlDType,
        n_seq: u64,
    ) -> Self {
        let recurrent = if let Some(ssm) = &arch.ssm {
            let conv = if ssm.group_count > 1 {
                ssm.conv_kernel.saturating_sub(1)
                    * (ssm.inner_size + 2 * ssm.group_count * ssm.state_size)
            } else {
                ssm.conv_kernel.saturating_sub(1) * ssm.inner_size
            };
            let state = ssm.state_size * ssm.inner_size;
            Some((conv, state))
        } else if let Some(rwkv) = &arch.rwkv {
            // Token-shift rows plus the wkv state matrix.
            let shift = 2 * arch.embedding_length;
            let state = rwkv.head_size * arch.embedding_length;
            Some((shift, state))
        } else {
            None
        };

        let attention = &arch.attention;
        let mla = attention.key_length_mla > 0 && attention.value_length_mla > 0;
        let (key_len, value_len, heads) = if mla {
            (attention.key_length_mla, attention.value_length_mla, 1)
        } else {
            (
                attention.key_length,
                attention.value_length,
                attention.head_count_kv,
            )
        };
        Self {
            recurrent,
            key_type,
            value_type,
            key_row_elements: heads * key_len,
            value_row_elements: heads * value_len,
            n_seq,
        }
    }

    /// (key bytes, value bytes, element count) of one layer's cache.
    fn layer(&self, n_kv: u64) -> (u64, u64, u64) {
        if let Some((r_elements, s_elements)) = self.recurrent {
            let r = r_elements * self.n_seq;
            let s = s_elements * self.n_seq;
            return (
                GgmlDType::F32.row_size_of(r),
                GgmlDType::F32.row_size_of(s),
                r + s,
            );
        }
        let key_elements = self.key_row_elements * n_kv;
        let value_elements = self.value_row_elements * n_kv;
        (
            self.key_type.row_size_of(key_elements),
            self.value_type.row_size_of(value_elements),
            key_elements + value_elements,
        )
    }
}

struct LayerScratch {
    /// Working set of one offloaded layer.
    offload: u64,
    /// The value projection that stays host-side while any layer is loaded.
    load_attn: u64,
}

#[allow(clippy::too_many_arguments)]
fn layer_scratch(
    arch: &Architecture,
    tf_layers: &GgufLayers<'_>,
    block_count: u64,
    flash_attention: bool,
    cache_key_type: GgmlDType,
    n_kv: u64,
    n_tokens: u64,
    n_seq: u64,
) -> LayerScratch {
    let f32_row = |elements: u64| GgmlDType::F32.row_size_of(elements);
    let last_layer = (block_count > 0)
        .then(|| tf_layers.layer(&format!("blk.{}", block_count - 1)))
        .flatten()
        .or_else(|| tf_layers.layer("blk.0"));
    let Some(last_layer) = last_layer else {
        return LayerScratch {
            offload: 0,
            load_attn: 0,
        };
    };
    let last_dim = |t: &crate::decode::TensorInfo| t.dimensions.last().copied().unwrap_or(0);

    if let Some(ssm) = &arch.ssm {
        // Conv scratch then SSM scan scratch; both live at once.
        let mut conv_inc = f32_row(ssm.conv_kernel.saturating_sub(1) * ssm.inner_size * n_seq);
        let conv_re = Regex::new(r".*\.(attn_norm|ssm_in|ssm_conv1d)\.weight").unwrap();
        for t in last_layer.search(&conv_re) {
            conv_inc += f32_row(last_dim(t) * n_tokens);
        }
        let mut ssm_inc = 2 * f32_row(ssm.state_size * ssm.inner_size * n_seq);
        let ssm_re = Regex::new(r".*\.ssm_(dt|a|d|out)\.weight").unwrap();
        for t in last_layer.search(&ssm_re) {
            ssm_inc += f32_row(last_dim(t) * n_tokens);
        }
        return LayerScratch {
            offload: conv_inc + ssm_inc,
            load_attn: 0,
        };
    }
    if let Some(rwkv) = &arch.rwkv {
        // Time-mix then channel-mix; their scratch adds up.
        let mut attn_inc = f32_row(rwkv.head_size * arch.embedding_length * n_seq);
        let attn_re =
            Regex::new(r".*\.time_mix_(key|value|receptance|gate|decay|output)\.weight").unwrap();
        for t in last_layer.search(&attn_re) {
            attn_inc += f32_row(last_dim(t) * n_tokens);
        }
        let mut ffn_inc = 0;
        let ffn_re = Regex::new(r".*\.channel_mix_(key|value|receptance)\.weight").unwrap();
        for t in last_layer.search(&ffn_re) {
            ffn_inc += f32_row(last_dim(t) * n_tokens);
        }
        return LayerScratch {
            offload: attn_inc + ffn_inc,
            load_attn: 0,
        };
    }

    let attention = &arch.attention;
    let kv_rows =
        cache_key_type.row_size_of(attention.key_length * n_kv * attention.head_count_kv);
    let mut attn_inc = 0u64;
    let mut load_attn = 0u64;
    if flash_attention {
        // Fused attention keeps a half-precision mask plus the projections.
        attn_inc = GgmlDType::F16.row_size_of(n_kv * n_tokens);
        let re = Regex::new(r".*\.attn_(norm|q|qkv)\.weight").unwrap();
        for t in last_layer.search(&re) {
            if t.name.ends_with(".attn_norm.weight") {
                attn_inc += f32_row(last_dim(t) * n_tokens);
            } else {
                attn_inc += t.bytes();
            }
        }
        attn_inc += kv_rows;
    } else {
        let re = Regex::new(r".*\.attn_(norm|q|qkv|q_b)\.weight").unwrap();
        for t in last_layer.search(&re) {
            if t.name.ends_with(".attn_norm.weight") {
                attn_inc += f32_row(last_dim(t) * n_tokens);
            } else if t.name.ends_with(".attn_q.weight") {
                let rs = f32_row(t.dimensions[0] * n_tokens);
                attn_inc += rs * 2; // Qcur
                load_attn = rs; // Vcur
                attn_inc += f32_row(n_kv * n_tokens * attention.head_count); // kq
                attn_inc += kv_rows * 2;
            } else if t.name.ends_with(".attn_qkv.weight") {
                let fused = last_dim(t);
                let rs = f32_row(fused * n_tokens);
                attn_inc += rs * 2;
                load_attn = rs;
                attn_inc += f32_row(n_kv * n_tokens * attention.head_count);
                attn_inc += kv_rows * 2;
            } else if t.name.ends_with(".attn_q_b.weight") {
                let rs = f32_row(last_dim(t) * n_tokens);
                attn_inc += rs * 2;
                attn_inc += f32_row(n_kv * n_tokens * attention.head_count);
            }
        }
    }

    let mut ffn_inc = 0u64;
    let ffn_re = Regex::new(r".*\.ffn_(norm|gate|up)\.weight").unwrap();
    for t in last_layer.search(&ffn_re) {
        ffn_inc += f32_row(last_dim(t) * n_tokens);
    }
    if arch.expert_count > 0 {
        ffn_inc += f32_row(arch.embedding_length * n_tokens); // ffn_gate_input
        ffn_inc += f32_row(arch.expert_count as u64 * n_tokens); // ffn_moe_logits
        ffn_inc += f32_row(arch.feed_forward_length * n_tokens); // ffn_moe_down
    }

    LayerScratch {
        offload: attn_inc.max(ffn_inc),
        load_attn,
    }
}
