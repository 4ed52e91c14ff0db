use url::Url;

use crate::{
    bytes::ByteSource,
    error::{GgufError, GgufResult},
};

/// Minimum and default size of the pull-through buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Remote file fulfilled over HTTP `Range` requests.
///
/// A single pull-through buffer of at least 32 KiB absorbs the decoder's
/// small sequential reads; a read that misses the buffered window refills it
/// starting at the requested position. Retry, proxy, and auth policy belong
/// to the caller's `reqwest` client configuration, not here.
pub struct RemoteSource {
    client: reqwest::blocking::Client,
    url: Url,
    len: u64,
    position: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    buffer_size: usize,
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource")
            .field("url", &self.url.as_str())
            .field("len", &self.len)
            .field("position", &self.position)
            .finish()
    }
}

impl RemoteSource {
    /// Probe `url` for its total length and prepare a source with the default
    /// buffer size.
    pub fn open(url: Url) -> GgufResult<Self> {
        Self::open_with(reqwest::blocking::Client::new(), url, DEFAULT_BUFFER_SIZE)
    }

    /// As [`RemoteSource::open`], with a caller-configured client and buffer
    /// size. Sizes below 32 KiB are raised to it.
    pub fn open_with(
        client: reqwest::blocking::Client,
        url: Url,
        buffer_size: usize,
    ) -> GgufResult<Self> {
        let len = Self::probe_len(&client, &url)?;
        Ok(Self {
            client,
            url,
            len,
            position: 0,
            buffer: Vec::new(),
            buffer_start: 0,
            buffer_size: buffer_size.max(DEFAULT_BUFFER_SIZE),
        })
    }

    fn probe_len(client: &reqwest::blocking::Client, url: &Url) -> GgufResult<u64> {
        let response = client
            .head(url.clone())
            .send()
            .map_err(|e| remote_io("length probe", e))?;
        if let Some(len) = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            return Ok(len);
        }
        // Some endpoints strip Content-Length from HEAD; fall back to a
        // one-byte range probe and parse Content-Range.
        let response = client
            .get(url.clone())
            .header(reqwest::header::RANGE, "bytes=0-0")
            .send()
            .map_err(|e| remote_io("length probe", e))?;
        response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                GgufError::InvalidFormat(format!("no length available for '{url}'"))
            })
    }

    fn fill_buffer(&mut self, start: u64, min_len: usize) -> GgufResult<()> {
        let want = min_len.max(self.buffer_size) as u64;
        let end = (start + want).min(self.len);
        if start >= end {
            return Err(GgufError::Truncated { field: "remote read" });
        }
        let range_val = format!("bytes={}-{}", start, end - 1);
        tracing::trace!(range = %range_val, "remote fetch");
        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::RANGE, range_val)
            .send()
            .map_err(|e| remote_io("remote read", e))?;
        let bytes = response.bytes().map_err(|e| remote_io("remote read", e))?;
        if bytes.is_empty() {
            return Err(GgufError::Truncated { field: "remote read" });
        }
        self.buffer = bytes.to_vec();
        self.buffer_start = start;
        Ok(())
    }
}

fn remote_io(field: &'static str, error: reqwest::Error) -> GgufError {
    GgufError::Io {
        field,
        source: std::io::Error::other(error),
    }
}

impl ByteSource for RemoteSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, pos: u64) -> GgufResult<()> {
        self.position = pos;
        Ok(())
    }

    fn set_buffer_hint(&mut self, hint: usize) {
        self.buffer_size = hint.max(DEFAULT_BUFFER_SIZE);
    }

    fn read_exact(&mut self, dst: &mut [u8]) -> GgufResult<()> {
        if self.position + dst.len() as u64 > self.len {
            return Err(GgufError::Truncated { field: "remote read" });
        }
        let mut filled = 0usize;
        while filled < dst.len() {
            let pos = self.position + filled as u64;
            let in_buffer = pos >= self.buffer_start
                && pos < self.buffer_start + self.buffer.len() as u64;
            if !in_buffer {
                self.fill_buffer(pos, dst.len() - filled)?;
            }
            let offset = (self.position + filled as u64 - self.buffer_start) as usize;
            let available = self.buffer.len() - offset;
            let take = available.min(dst.len() - filled);
            dst[filled..filled + take].copy_from_slice(&self.buffer[offset..offset + take]);
            filled += take;
        }
        self.position += dst.len() as u64;
        Ok(())
    }
}
