//! Byte-addressable sources the decoder reads from.
//!
//! Everything the decoder touches goes through [`ByteSource`]: a local file,
//! a memory-mapped region, or a remote file fulfilled over HTTP range
//! requests. Reads either succeed fully or fail; there are no short reads.

mod file;
mod mmap;
mod remote;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub use file::FileSource;
pub use mmap::MmapSource;
pub use remote::RemoteSource;

use crate::error::GgufResult;

/// Random-access reader of known length. A current position advances with
/// each read; `seek` repositions it absolutely.
pub trait ByteSource {
    /// Total length of the underlying data in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current read position.
    fn position(&self) -> u64;

    /// Reposition absolutely. Seeking past the end is permitted; the next
    /// read fails instead.
    fn seek(&mut self, pos: u64) -> GgufResult<()>;

    /// Fill `dst` from the current position, advancing it. Fails with
    /// `Truncated` when fewer than `dst.len()` bytes remain.
    fn read_exact(&mut self, dst: &mut [u8]) -> GgufResult<()>;

    /// Advisory read size for sources that buffer. Default is a no-op.
    fn set_buffer_hint(&mut self, _hint: usize) {}
}

/// Cloneable cancellation flag. The decoder checks it between reads and
/// aborts the in-flight parse with `GgufError::Cancelled`; a signal delivered
/// mid-read is honored as soon as the read returns.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
