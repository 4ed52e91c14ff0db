use std::time::Duration;

use gguf_estimate::{
    cache::DiskCache,
    decode::{TensorInfos, ValueType},
    CancelToken, DecodeOptions, FileSource, GgufError, GgufFile, MmapSource,
};

use crate::fixture::{FixtureBuilder, Val};

fn small_model() -> FixtureBuilder {
    FixtureBuilder::new()
        .kv("general.architecture", Val::Str("llama".to_string()))
        .kv("llama.block_count", Val::U32(2))
        .kv("llama.context_length", Val::U32(4096))
        .kv("llama.embedding_length", Val::U32(64))
        .kv("llama.attention.head_count", Val::U32(8))
        .kv(
            "tokenizer.ggml.model",
            Val::Str("llama".to_string()),
        )
        .kv(
            "tokenizer.ggml.tokens",
            Val::StrArr((0..100).map(|i| format!("token{i}")).collect()),
        )
        .kv("tokenizer.ggml.scores", Val::F32Arr(vec![0.0; 100]))
        .tensor("token_embd.weight", &[64, 128], 0)
        .tensor("blk.0.attn_q.weight", &[64, 64], 0)
        .tensor("blk.0.ffn_up.weight", &[64, 256], 12)
        .tensor("blk.1.attn_q.weight", &[64, 64], 0)
        .tensor("blk.1.ffn_up.weight", &[64, 256], 12)
        .tensor("output_norm.weight", &[64], 0)
}

#[test]
fn test_decodes_header_metadata_and_tensors() {
    let file = small_model().write_file();
    let mut source = FileSource::open(file.path()).unwrap();
    let gguf = GgufFile::decode(&mut source, DecodeOptions::default()).unwrap();

    assert_eq!(gguf.header.version, 3);
    assert_eq!(gguf.header.tensor_count, 6);
    assert_eq!(gguf.header.metadata_kv_count, 8);

    assert_eq!(
        gguf.metadata
            .get("general.architecture")
            .unwrap()
            .as_str()
            .unwrap(),
        "llama"
    );
    assert_eq!(
        gguf.metadata
            .get("llama.block_count")
            .unwrap()
            .as_u64()
            .unwrap(),
        2
    );

    // Tensor data region starts on the default alignment.
    assert_eq!(gguf.alignment, 32);
    assert_eq!(gguf.tensor_data_start_offset % 32, 0);

    // Byte accounting: plain types are a straight product, quantized types
    // count whole blocks.
    let embd = TensorInfos::get(gguf.tensors.as_slice(), "token_embd.weight").unwrap();
    assert_eq!(embd.bytes(), 64 * 128 * 4);
    let q4k = TensorInfos::get(gguf.tensors.as_slice(), "blk.0.ffn_up.weight").unwrap();
    assert_eq!(q4k.bytes(), (64 * 256 / 256) * 144);
    assert_eq!(
        gguf.model_bytes,
        gguf.tensors.iter().map(|t| t.bytes()).sum::<u64>()
    );
    assert!(gguf.bits_per_weight > 0.0);

    // Every offset stays inside the file, tail padding permitted.
    assert!(gguf.model_bytes + gguf.tensor_data_start_offset as u64 <= gguf.total_size);
}

#[test]
fn test_mmap_source_matches_file_source() {
    let file = small_model().write_file();
    let mut fs = FileSource::open(file.path()).unwrap();
    let mut ms = MmapSource::open(file.path()).unwrap();
    let from_file = GgufFile::decode(&mut fs, DecodeOptions::default()).unwrap();
    let from_mmap = GgufFile::decode(&mut ms, DecodeOptions::default()).unwrap();
    assert_eq!(from_file.model_bytes, from_mmap.model_bytes);
    assert_eq!(
        from_file.tensor_data_start_offset,
        from_mmap.tensor_data_start_offset
    );
}

#[test]
fn test_skip_large_metadata_keeps_lengths() {
    let file = small_model().write_file();
    let mut source = FileSource::open(file.path()).unwrap();
    let full = GgufFile::decode(&mut source, DecodeOptions::default()).unwrap();

    let mut source = FileSource::open(file.path()).unwrap();
    let skipped = GgufFile::decode(
        &mut source,
        DecodeOptions {
            skip_large_metadata: true,
            ..Default::default()
        },
    )
    .unwrap();

    let full_tokens = full
        .metadata
        .get("tokenizer.ggml.tokens")
        .unwrap()
        .as_array()
        .unwrap();
    let elided_tokens = skipped
        .metadata
        .get("tokenizer.ggml.tokens")
        .unwrap()
        .as_array()
        .unwrap();
    assert_eq!(full_tokens.values.len(), 100);
    assert!(elided_tokens.is_elided());
    assert_eq!(elided_tokens.len, 100);
    assert_eq!(elided_tokens.encoded_size, full_tokens.encoded_size);
    assert_eq!(elided_tokens.kind, ValueType::String);

    // The tokenizer view sizes identically either way.
    assert_eq!(full.tokenizer().tokens_size, skipped.tokenizer().tokens_size);

    // Small scalars survive untouched.
    assert_eq!(
        skipped
            .metadata
            .get("llama.embedding_length")
            .unwrap()
            .as_u64()
            .unwrap(),
        64
    );
}

#[test]
fn test_approximate_matches_full_header() {
    let file = small_model().trailing(64).write_file();
    let mut source = FileSource::open(file.path()).unwrap();
    let full = GgufFile::decode(&mut source, DecodeOptions::default()).unwrap();

    let mut source = FileSource::open(file.path()).unwrap();
    let approx = GgufFile::decode(
        &mut source,
        DecodeOptions {
            approximate: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(approx.header.tensor_count, full.header.tensor_count);
    assert_eq!(
        approx.header.metadata_kv_count,
        full.header.metadata_kv_count
    );
    assert_eq!(
        approx.tensor_data_start_offset,
        full.tensor_data_start_offset
    );
    assert!(approx.tensors.is_empty());
    assert_eq!(
        approx.model_bytes,
        approx.total_size - approx.tensor_data_start_offset as u64
    );
    // The guess falls back to the analytic estimate for this toy model.
    assert!(approx.model_params > 0);
}

#[test]
fn test_version_1_widens_lengths() {
    let blob = FixtureBuilder::new()
        .version(1)
        .kv("general.architecture", Val::Str("llama".to_string()))
        .tensor("token_embd.weight", &[64, 16], 0)
        .build();
    let file = crate::fixture::write_blob(&blob);
    let mut source = FileSource::open(file.path()).unwrap();
    let gguf = GgufFile::decode(&mut source, DecodeOptions::default()).unwrap();
    assert_eq!(gguf.header.version, 1);
    assert_eq!(gguf.tensors[0].dimensions, vec![64, 16]);
}

#[test]
fn test_big_endian_files_decode() {
    let blob = FixtureBuilder::new()
        .big_endian()
        .kv("general.architecture", Val::Str("llama".to_string()))
        .kv("llama.block_count", Val::U32(2))
        .build();
    let file = crate::fixture::write_blob(&blob);
    let mut source = FileSource::open(file.path()).unwrap();
    let gguf = GgufFile::decode(&mut source, DecodeOptions::default()).unwrap();
    assert_eq!(
        gguf.metadata
            .get("llama.block_count")
            .unwrap()
            .as_u64()
            .unwrap(),
        2
    );
}

#[test]
fn test_nested_arrays_decode() {
    let blob = FixtureBuilder::new()
        .kv(
            "custom.nested",
            Val::NestedArr(vec![vec![1, 2], vec![3, 4, 5]]),
        )
        .build();
    let file = crate::fixture::write_blob(&blob);
    let mut source = FileSource::open(file.path()).unwrap();
    let gguf = GgufFile::decode(&mut source, DecodeOptions::default()).unwrap();
    let outer = gguf
        .metadata
        .get("custom.nested")
        .unwrap()
        .as_array()
        .unwrap();
    assert_eq!(outer.len, 2);
    let inner = outer.values[1].as_array().unwrap();
    assert_eq!(inner.values.len(), 3);
    assert_eq!(inner.values[2].as_u64().unwrap(), 5);
}

#[test]
fn test_cancellation_between_reads() {
    let file = small_model().write_file();
    let mut source = FileSource::open(file.path()).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = GgufFile::decode(
        &mut source,
        DecodeOptions {
            cancel: Some(cancel),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(GgufError::Cancelled { .. })));
}

#[test]
fn test_truncated_file() {
    let mut blob = small_model().build();
    blob.truncate(40);
    let file = crate::fixture::write_blob(&blob);
    let mut source = FileSource::open(file.path()).unwrap();
    let result = GgufFile::decode(&mut source, DecodeOptions::default());
    assert!(matches!(result, Err(GgufError::Truncated { .. })));
}

#[test]
fn test_invalid_alignment_is_rejected() {
    let blob = FixtureBuilder::new()
        .kv("general.alignment", Val::U32(12))
        .build();
    let file = crate::fixture::write_blob(&blob);
    let mut source = FileSource::open(file.path()).unwrap();
    let result = GgufFile::decode(&mut source, DecodeOptions::default());
    assert!(matches!(result, Err(GgufError::InvalidAlignment(12))));
}

#[test]
fn test_cache_round_trip_of_decoded_file() {
    let file = small_model().write_file();
    let mut source = FileSource::open(file.path()).unwrap();
    let gguf = GgufFile::decode(&mut source, DecodeOptions::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path()).unwrap();
    cache.put("fixture", &gguf).unwrap();
    let cached = cache.get("fixture", Duration::from_secs(3600)).unwrap();
    assert_eq!(cached.model_bytes, gguf.model_bytes);
    assert_eq!(cached.tensors.len(), gguf.tensors.len());
}
