use std::{fs::File, path::Path};

use memmap2::Mmap;

use crate::{
    bytes::ByteSource,
    error::{GgufError, GgufResult},
};

/// Memory-mapped source. Reads are slice copies and never block on I/O once
/// the pages are resident.
#[derive(Debug)]
pub struct MmapSource {
    mmap: Mmap,
    position: u64,
}

impl MmapSource {
    pub fn open(path: impl AsRef<Path>) -> GgufResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| GgufError::from_io_error("file", e))?;
        let mmap =
            unsafe { Mmap::map(&file) }.map_err(|e| GgufError::from_io_error("mmap", e))?;
        tracing::trace!(len = mmap.len(), "mapped file");
        Ok(Self { mmap, position: 0 })
    }

    /// Wrap an already-established mapping.
    pub fn from_mmap(mmap: Mmap) -> Self {
        Self { mmap, position: 0 }
    }
}

impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, pos: u64) -> GgufResult<()> {
        self.position = pos;
        Ok(())
    }

    fn read_exact(&mut self, dst: &mut [u8]) -> GgufResult<()> {
        let start = self.position as usize;
        let end = start.checked_add(dst.len()).ok_or(GgufError::Truncated {
            field: "mmap read",
        })?;
        if end > self.mmap.len() {
            return Err(GgufError::Truncated { field: "mmap read" });
        }
        dst.copy_from_slice(&self.mmap[start..end]);
        self.position = end as u64;
        Ok(())
    }
}
