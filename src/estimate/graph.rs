//! ggml bookkeeping sizes: tensor/graph overheads mirrored from the runtime
//! so the scratch accounting lines up with what llama.cpp actually
//! allocates.

use crate::scalar::pad;

pub const GGML_OBJECT_SIZE: u64 = 32;
pub const GGML_TENSOR_SIZE: u64 = 336;
pub const GGML_CGRAPH_SIZE: u64 = 80;
pub const GGML_MEM_ALIGN: u64 = 16;

pub const SCHEDULER_OVERHEAD: u64 = 4 * 1024 * 1024;
pub const BOOTSTRAP_OVERHEAD: u64 = 5 * 1024 * 1024;

/// Bytes one tensor descriptor costs inside a ggml context.
pub fn tensor_overhead() -> u64 {
    GGML_OBJECT_SIZE + GGML_TENSOR_SIZE
}

/// Graph node budget: the runtime reserves the larger of a fixed floor and
/// eight nodes per tensor.
pub fn max_nodes(tensor_count: u64) -> u64 {
    (8 * tensor_count).max(1024)
}

/// Smallest hash size the runtime would pick for `min` entries: the next
/// prime from its table, or `min | 1` beyond it.
pub fn hash_size(min: u64) -> u64 {
    const PRIMES: [u64; 32] = [
        2, 3, 5, 11, 17, 37, 67, 131, 257, 521, 1031, 2053, 4099, 8209, 16411, 32771, 65537,
        131101, 262147, 524309, 1048583, 2097169, 4194319, 8388617, 16777259, 33554467, 67108879,
        134217757, 268435459, 536870923, 1073741827, 2147483659,
    ];
    match PRIMES.iter().find(|&&p| p >= min) {
        Some(&p) => p,
        None => min | 1,
    }
}

fn bitset_bytes(n: u64) -> u64 {
    n.div_ceil(32) * 4
}

/// Bytes of an empty computation graph of `nodes` nodes, matching the
/// runtime's layout: the graph struct, node and leaf pointer arrays, the
/// visited-hash keys (and gradient slots when `grads`), and the hash bitset.
pub fn graph_overhead(nodes: u64, grads: bool) -> u64 {
    const PTR: u64 = 8;
    let hash = hash_size(nodes * 2);
    let mut bytes = GGML_CGRAPH_SIZE;
    bytes += PTR * nodes; // nodes
    bytes += PTR * nodes; // leafs
    bytes += PTR * hash; // hash keys
    if grads {
        bytes += 2 * PTR * hash; // grads + grad accumulators
    }
    bytes += bitset_bytes(hash);
    GGML_OBJECT_SIZE + pad(bytes, GGML_MEM_ALIGN)
}
