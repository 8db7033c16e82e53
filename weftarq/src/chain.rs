//! Chunked byte buffer with read/write cursor semantics.
//!
//! A `ByteChain` is a list of [`Bytes`] chunks. Appending is the write
//! cursor; `skip`/`read`/`read_all` advance the read cursor. Concatenation
//! and sub-views are cheap: chunks are reference-counted slices, so `sub`
//! never copies and `coalesce` merges chunks only when a caller actually
//! needs a contiguous view.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// A byte sequence assembled from reference-counted chunks.
#[derive(Debug, Default, Clone)]
pub struct ByteChain {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ByteChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
        }
    }

    /// Create a chain over a fully-written buffer (read cursor at 0, write
    /// cursor at `bytes.len()`).
    pub fn from_full(bytes: Bytes) -> Self {
        let len = bytes.len();
        let mut chunks = VecDeque::new();
        if len > 0 {
            chunks.push_back(bytes);
        }
        Self { chunks, len }
    }

    /// Append a chunk at the write cursor. Empty chunks are discarded.
    pub fn push(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.chunks.push_back(bytes);
    }

    /// Bytes between the read and write cursors.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Advance the read cursor by `n` bytes (saturating at the write cursor).
    /// Returns the number of bytes actually skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let mut remaining = n.min(self.len);
        let skipped = remaining;
        while remaining > 0 {
            let front = self.chunks.front_mut().expect("len tracks chunks");
            if front.len() <= remaining {
                remaining -= front.len();
                self.chunks.pop_front();
            } else {
                front.advance(remaining);
                remaining = 0;
            }
        }
        self.len -= skipped;
        skipped
    }

    /// Copy bytes from the read cursor into `dst`, advancing it. Returns the
    /// number of bytes copied.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let take = front.len().min(dst.len() - copied);
            dst[copied..copied + take].copy_from_slice(&front[..take]);
            copied += take;
            if take == front.len() {
                self.chunks.pop_front();
            } else {
                front.advance(take);
            }
        }
        self.len -= copied;
        copied
    }

    /// Drain everything between the cursors into one contiguous buffer.
    pub fn read_all(&mut self) -> Bytes {
        let out = match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.pop_front().expect("checked length"),
            _ => {
                let mut buf = BytesMut::with_capacity(self.len);
                for chunk in self.chunks.drain(..) {
                    buf.extend_from_slice(&chunk);
                }
                buf.freeze()
            }
        };
        self.len = 0;
        out
    }

    /// A contiguous view of all buffered bytes. Merges chunks only when more
    /// than one is present, so repeated calls after a single append are free.
    pub fn coalesce(&mut self) -> &[u8] {
        if self.chunks.len() > 1 {
            let mut buf = BytesMut::with_capacity(self.len);
            for chunk in self.chunks.drain(..) {
                buf.extend_from_slice(&chunk);
            }
            self.chunks.push_back(buf.freeze());
        }
        self.chunks.front().map(|c| &c[..]).unwrap_or(&[])
    }

    /// Concatenate two chains without copying payload bytes.
    pub fn concat(mut self, mut other: ByteChain) -> ByteChain {
        self.len += other.len;
        self.chunks.append(&mut other.chunks);
        self
    }

    /// A zero-copy view of `len` bytes starting `offset` past the read
    /// cursor. Panics if the range exceeds the buffered bytes, mirroring
    /// slice indexing.
    pub fn sub(&self, offset: usize, len: usize) -> ByteChain {
        assert!(
            offset + len <= self.len,
            "sub range {}..{} out of bounds (len {})",
            offset,
            offset + len,
            self.len
        );
        let mut out = ByteChain::new();
        let mut skip = offset;
        let mut want = len;
        for chunk in &self.chunks {
            if want == 0 {
                break;
            }
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            let take = (chunk.len() - skip).min(want);
            out.push(chunk.slice(skip..skip + take));
            skip = 0;
            want -= take;
        }
        out
    }
}
