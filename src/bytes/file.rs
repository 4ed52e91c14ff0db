use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use crate::{
    bytes::ByteSource,
    error::{GgufError, GgufResult},
};

/// Local file source. Reads go straight to the file; the OS page cache does
/// the buffering.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
    position: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> GgufResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| GgufError::from_io_error("file", e))?;
        let len = file
            .metadata()
            .map_err(|e| GgufError::from_io_error("file metadata", e))?
            .len();
        Ok(Self {
            file,
            len,
            position: 0,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, pos: u64) -> GgufResult<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| GgufError::from_io_error("seek", e))?;
        self.position = pos;
        Ok(())
    }

    fn read_exact(&mut self, dst: &mut [u8]) -> GgufResult<()> {
        self.file
            .read_exact(dst)
            .map_err(|e| GgufError::from_io_error("read", e))?;
        self.position += dst.len() as u64;
        Ok(())
    }
}
