//! Interpreted, read-only view over the metadata table, keyed by
//! `general.architecture`.
//!
//! Lookups try `<arch>.<key>` first and fall back to a short alias list for
//! historical spellings. Missing keys resolve to documented defaults so the
//! estimator never has to re-derive them.

use serde::{Deserialize, Serialize};

use crate::decode::{file::GgufFile, file::MetadataTable, tensor::TensorInfos};

/// What kind of GGUF payload this file is. Distinguished from the tensor set
/// and `general.type`, not just the architecture string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchitectureType {
    Model,
    Projector,
    Adapter,
    Imatrix,
}

/// Core hyper-parameters of the model, resolved with defaults applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Architecture {
    pub arch_type: ArchitectureType,

    /// The raw `general.architecture` value ("llama", "qwen2", "clip", ...).
    pub architecture: String,

    /// Transformer block count (`n_layer`). Zero for projector-only files.
    pub block_count: u64,

    /// Hidden dimension (`n_embd`).
    pub embedding_length: u64,

    /// FFN hidden dimension (`n_ff`).
    pub feed_forward_length: u64,

    /// Maximum context the model was trained for (`n_ctx_train`).
    pub max_context_length: u64,

    /// Vocabulary size; falls back to the tokenizer token count.
    pub vocabulary_length: u64,

    /// Mixture-of-experts expert count; zero for dense models.
    pub expert_count: u32,

    /// Experts routed per token (top-k); zero for dense models.
    pub expert_used_count: u32,

    pub attention: Attention,
    pub rope: Rope,

    /// State-space parameters, present for Mamba-family architectures.
    pub ssm: Option<Ssm>,

    /// RWKV parameters.
    pub rwkv: Option<Rwkv>,

    /// Vision/audio encoder parameters, present for clip-style projectors.
    pub clip: Option<Clip>,

    /// True when the attention is non-causal: the model only embeds.
    pub embedding_only: bool,

    /// True when `cls.*` tensors exist: the model reranks.
    pub reranking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attention {
    /// Attention heads per block (`n_head`).
    pub head_count: u64,

    /// Key/value head count for grouped-query attention. Defaults to
    /// `head_count` when absent (no GQA).
    pub head_count_kv: u64,

    /// Per-head key dimension. Defaults to `embedding_length / head_count`.
    pub key_length: u64,

    /// Per-head value dimension. Defaults like `key_length`.
    pub value_length: u64,

    /// Multi-head latent attention key/value lengths; zero when MLA is not
    /// used.
    pub key_length_mla: u64,
    pub value_length_mla: u64,

    /// False for embedding-only (bidirectional) models.
    pub causal: bool,

    /// Sliding attention window in tokens; zero when unused.
    pub sliding_window: u64,

    /// Every n-th layer keeps a full-context cache; 1 means no SWA at all.
    pub sliding_window_pattern: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rope {
    pub dimension_count: u64,
    pub freq_base: f32,
    pub freq_scale: f32,
    pub scaling_type: Option<String>,
    pub scaling_factor: Option<f32>,
    pub scaling_original_context_length: Option<u64>,
}

/// State-space (Mamba) dimensions driving the recurrent cache size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ssm {
    pub conv_kernel: u64,
    pub inner_size: u64,
    pub state_size: u64,
    pub time_step_rank: u64,
    pub group_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rwkv {
    pub head_size: u64,
}

/// Clip-style projector description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clip {
    pub projector_type: String,
    pub vision: Option<ClipEncoder>,
    pub audio: Option<ClipEncoder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipEncoder {
    pub block_count: u64,
    pub embedding_length: u64,
    pub feed_forward_length: u64,
    pub head_count: u64,
    pub image_size: u64,
    pub patch_size: u64,
    pub projection_dim: u64,
    pub spatial_merge_size: u64,
    pub scale_factor: u64,
}

/// `<arch>.<key>` lookup with alias fallback.
struct Keys<'a> {
    metadata: &'a MetadataTable,
    arch: String,
}

impl<'a> Keys<'a> {
    fn value(&self, key: &str) -> Option<&'a crate::decode::Value> {
        if let Some(v) = self.metadata.get(&format!("{}.{}", self.arch, key)) {
            return Some(v);
        }
        for alias in aliases(key) {
            if let Some(v) = self.metadata.get(&format!("{}.{}", self.arch, alias)) {
                return Some(v);
            }
        }
        None
    }

    fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.value(key)
            .and_then(|v| v.as_u64().ok())
            .unwrap_or(default)
    }

    fn u32_or(&self, key: &str, default: u32) -> u32 {
        self.value(key)
            .and_then(|v| v.as_u32().ok())
            .unwrap_or(default)
    }

    fn f32_or(&self, key: &str, default: f32) -> f32 {
        self.value(key)
            .and_then(|v| v.as_f32().ok())
            .unwrap_or(default)
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.value(key)
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(default)
    }

    fn string(&self, key: &str) -> Option<String> {
        self.value(key)
            .and_then(|v| v.as_str().ok())
            .map(str::to_owned)
    }
}

/// Historical spellings kept by old conversion scripts.
fn aliases(key: &str) -> &'static [&'static str] {
    match key {
        "context_length" => &["n_ctx", "max_position_embeddings"],
        "embedding_length" => &["n_embd", "hidden_size"],
        "block_count" => &["n_layer", "num_hidden_layers"],
        "feed_forward_length" => &["n_ff", "intermediate_size"],
        "attention.head_count" => &["n_head", "num_attention_heads"],
        "attention.head_count_kv" => &["n_head_kv", "num_key_value_heads"],
        "rope.dimension_count" => &["n_rot"],
        _ => &[],
    }
}

impl Architecture {
    pub fn from_file(file: &GgufFile) -> Self {
        let architecture = file
            .metadata
            .get("general.architecture")
            .and_then(|v| v.as_str().ok())
            .unwrap_or("llama")
            .to_string();
        let keys = Keys {
            metadata: &file.metadata,
            arch: architecture.clone(),
        };

        let arch_type = discriminate_type(file, &architecture);

        let block_count = keys.u64_or("block_count", 0);
        let embedding_length = keys.u64_or("embedding_length", 0);
        let head_count = keys.u64_or("attention.head_count", 0);
        let head_count_kv = keys.u64_or("attention.head_count_kv", head_count);
        let default_head_dim = if head_count > 0 {
            embedding_length / head_count
        } else {
            0
        };

        let attention = Attention {
            head_count,
            head_count_kv,
            key_length: keys.u64_or("attention.key_length", default_head_dim),
            value_length: keys.u64_or("attention.value_length", default_head_dim),
            key_length_mla: keys.u64_or("attention.key_length_mla", 0),
            value_length_mla: keys.u64_or("attention.value_length_mla", 0),
            causal: keys.bool_or("attention.causal", true),
            sliding_window: keys.u64_or("attention.sliding_window", 0),
            sliding_window_pattern: keys.u32_or("attention.sliding_window_pattern", 1),
        };

        let rope = Rope {
            dimension_count: keys.u64_or("rope.dimension_count", attention.key_length),
            freq_base: keys.f32_or("rope.freq_base", 10_000.0),
            freq_scale: keys.f32_or("rope.scale_linear", 1.0),
            scaling_type: keys.string("rope.scaling.type"),
            scaling_factor: keys.value("rope.scaling.factor").and_then(|v| v.as_f32().ok()),
            scaling_original_context_length: keys
                .value("rope.scaling.original_context_length")
                .and_then(|v| v.as_u64().ok()),
        };

        let ssm = keys.value("ssm.conv_kernel").map(|_| Ssm {
            conv_kernel: keys.u64_or("ssm.conv_kernel", 0),
            inner_size: keys.u64_or("ssm.inner_size", 0),
            state_size: keys.u64_or("ssm.state_size", 0),
            time_step_rank: keys.u64_or("ssm.time_step_rank", 0),
            group_count: keys.u64_or("ssm.group_count", 1),
        });

        let rwkv = keys.value("wkv.head_size").map(|_| Rwkv {
            head_size: keys.u64_or("wkv.head_size", 0),
        });

        let clip = if architecture == "clip" {
            Some(read_clip(&file.metadata))
        } else {
            None
        };

        let vocabulary_length = keys.u64_or(
            "vocab_size",
            file.metadata
                .get("tokenizer.ggml.tokens")
                .and_then(|v| v.as_array().ok())
                .map(|a| a.len)
                .unwrap_or(0),
        );

        let reranking = TensorInfos::get(file.tensors.as_slice(), "cls.weight").is_some()
            || TensorInfos::get(file.tensors.as_slice(), "cls.bias").is_some();

        Self {
            arch_type,
            block_count,
            embedding_length,
            feed_forward_length: keys.u64_or("feed_forward_length", 0),
            max_context_length: keys.u64_or("context_length", 0),
            vocabulary_length,
            expert_count: keys.u32_or("expert_count", 0),
            expert_used_count: keys.u32_or("expert_used_count", 0),
            embedding_only: !attention.causal,
            reranking,
            attention,
            rope,
            ssm,
            rwkv,
            clip,
            architecture,
        }
    }

    /// Recurrent state instead of a KV cache: Mamba and RWKV families.
    pub fn is_recurrent(&self) -> bool {
        self.ssm.is_some() || self.rwkv.is_some() || self.architecture.starts_with("mamba")
            || self.architecture.starts_with("rwkv")
    }
}

fn discriminate_type(file: &GgufFile, architecture: &str) -> ArchitectureType {
    if let Some(general_type) = file
        .metadata
        .get("general.type")
        .and_then(|v| v.as_str().ok())
    {
        match general_type {
            "adapter" => return ArchitectureType::Adapter,
            "imatrix" => return ArchitectureType::Imatrix,
            "projector" => return ArchitectureType::Projector,
            _ => {}
        }
    }
    if file.metadata.contains("adapter.type") {
        return ArchitectureType::Adapter;
    }
    if architecture == "clip"
        || file
            .metadata
            .get("clip.has_vision_encoder")
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(false)
        || file
            .metadata
            .get("clip.has_audio_encoder")
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(false)
    {
        return ArchitectureType::Projector;
    }
    // An imatrix file carries only the importance statistics key set.
    if file.metadata.contains("imatrix.chunk_count")
        || file.metadata.contains("imatrix.datasets")
    {
        return ArchitectureType::Imatrix;
    }
    ArchitectureType::Model
}

fn read_clip(metadata: &MetadataTable) -> Clip {
    let projector_type = metadata
        .get("clip.projector_type")
        .and_then(|v| v.as_str().ok())
        .unwrap_or("mlp")
        .to_string();
    let encoder = |section: &str, enabled: bool| {
        if !enabled {
            return None;
        }
        let get = |key: &str| {
            metadata
                .get(&format!("clip.{section}.{key}"))
                .and_then(|v| v.as_u64().ok())
                .unwrap_or(0)
        };
        Some(ClipEncoder {
            block_count: get("block_count"),
            embedding_length: get("embedding_length"),
            feed_forward_length: get("feed_forward_length"),
            head_count: get("attention.head_count"),
            image_size: get("image_size"),
            patch_size: get("patch_size"),
            projection_dim: get("projection_dim"),
            spatial_merge_size: get("spatial_merge_size"),
            scale_factor: {
                let sf = get("projector.scale_factor");
                if sf == 0 {
                    get("scale_factor")
                } else {
                    sf
                }
            },
        })
    };
    let has = |key: &str| {
        metadata
            .get(key)
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(false)
    };
    Clip {
        vision: encoder("vision", has("clip.has_vision_encoder")),
        audio: encoder("audio", has("clip.has_audio_encoder")),
        projector_type,
    }
}
