//! Interpreted view of the embedded tokenizer definition.
//!
//! Only the quantities the footprint accounting needs: list lengths, the
//! byte sizes they occupy, and the special-token ids. The chat template is
//! deliberately not sized here.

use serde::{Deserialize, Serialize};

use crate::decode::file::GgufFile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokenizer {
    /// Tokenizer algorithm class: "gpt2" (byte-level BPE), "llama"
    /// (SentencePiece), "rwkv", ...
    pub model: String,

    /// Vocabulary entry count.
    pub tokens_len: u64,

    /// Bytes the token list occupies on disk, elision-safe.
    pub tokens_size: u64,

    /// BPE merge rule count; zero for non-BPE tokenizers.
    pub merges_len: u64,

    pub merges_size: u64,

    pub added_tokens_len: u64,

    /// Special-token ids; -1 when absent.
    pub bos_token_id: i64,
    pub eos_token_id: i64,
    pub eot_token_id: i64,
    pub unknown_token_id: i64,
    pub separator_token_id: i64,
    pub padding_token_id: i64,
}

impl Tokenizer {
    pub fn from_file(file: &GgufFile) -> Self {
        let array = |key: &str| {
            file.metadata
                .get(key)
                .and_then(|v| v.as_array().ok())
                .map(|a| (a.len, a.encoded_size))
                .unwrap_or((0, 0))
        };
        let token_id = |key: &str| {
            file.metadata
                .get(key)
                .and_then(|v| v.as_i64().ok())
                .unwrap_or(-1)
        };

        let (tokens_len, tokens_size) = array("tokenizer.ggml.tokens");
        let (merges_len, merges_size) = array("tokenizer.ggml.merges");
        let (added_tokens_len, _) = array("tokenizer.ggml.added_tokens");

        Self {
            model: file
                .metadata
                .get("tokenizer.ggml.model")
                .and_then(|v| v.as_str().ok())
                .unwrap_or("")
                .to_string(),
            tokens_len,
            tokens_size,
            merges_len,
            merges_size,
            added_tokens_len,
            bos_token_id: token_id("tokenizer.ggml.bos_token_id"),
            eos_token_id: token_id("tokenizer.ggml.eos_token_id"),
            eot_token_id: token_id("tokenizer.ggml.eot_token_id"),
            unknown_token_id: token_id("tokenizer.ggml.unknown_token_id"),
            separator_token_id: token_id("tokenizer.ggml.separator_token_id"),
            padding_token_id: token_id("tokenizer.ggml.padding_token_id"),
        }
    }
}
