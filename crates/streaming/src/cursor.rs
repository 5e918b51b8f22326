//! Byte accounting over the decompressed transport stream.

use std::io::{self, Read};

/// A sequential reader that counts every byte handed to its consumer.
///
/// `bytes_read` reflects the logical bytes consumed by the decoder, not what
/// an inner buffer may have prefetched: wrap a `BufReader` inside, never
/// outside, a `TrackedReader`.
///
/// With a limit, reads stop at exactly `limit` bytes and report end of
/// input, so a decoder that tries to run past the declared segment size
/// fails as a truncation instead of consuming the next segment's bytes.
#[derive(Debug)]
pub struct TrackedReader<R> {
    inner: R,
    bytes_read: u64,
    limit: Option<u64>,
}

impl<R: Read> TrackedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
            limit: None,
        }
    }

    pub fn with_limit(inner: R, limit: u64) -> Self {
        Self {
            inner,
            bytes_read: 0,
            limit: Some(limit),
        }
    }

    /// Bytes consumed so far. Never decreases.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = match self.limit {
            Some(limit) => {
                let remaining = limit.saturating_sub(self.bytes_read);
                if remaining == 0 {
                    return Ok(0);
                }
                buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            None => buf.len(),
        };
        let n = self.inner.read(&mut buf[..want])?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}
