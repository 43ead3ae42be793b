/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

/// Destination buffer for received protocol bytes.
///
/// `writable` exposes the next contiguous writable chunk, which is empty once
/// the buffer cannot take more bytes. `advance_mut` commits bytes written
/// into that chunk.
pub trait WriteBuffer {
    /// Next contiguous writable chunk, empty when the buffer is full.
    fn writable(&mut self) -> &mut [u8];

    /// Commit `n` bytes written into the chunk returned by
    /// [`writable`](Self::writable).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the size of that chunk.
    fn advance_mut(&mut self, n: usize);

    /// Writable capacity still available, including unallocated room.
    fn writable_remaining(&self) -> usize;
}

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Growable receive buffer with chunked allocation.
///
/// Room is allocated in `chunk_size` steps, clamped to an optional hard
/// capacity limit so a peer cannot make us buffer without bound.
pub struct GrowBuf {
    buf: Vec<u8>,
    filled: usize,
    chunk_size: usize,
    limit: Option<usize>,
}

impl Default for GrowBuf {
    fn default() -> Self {
        GrowBuf::new(DEFAULT_CHUNK_SIZE, None)
    }
}

impl GrowBuf {
    pub fn new(chunk_size: usize, limit: Option<usize>) -> Self {
        assert!(chunk_size > 0, "chunk size may not be zero");
        GrowBuf {
            buf: Vec::new(),
            filled: 0,
            chunk_size,
            limit,
        }
    }

    /// Bytes received so far.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.filled = 0;
    }

    fn allocated_spare(&self) -> usize {
        self.buf.len() - self.filled
    }
}

impl WriteBuffer for GrowBuf {
    fn writable(&mut self) -> &mut [u8] {
        if self.allocated_spare() == 0 {
            let grow = match self.limit {
                Some(limit) => self.chunk_size.min(limit.saturating_sub(self.buf.len())),
                None => self.chunk_size,
            };
            if grow == 0 {
                return &mut [];
            }
            self.buf.resize(self.buf.len() + grow, 0);
        }
        &mut self.buf[self.filled..]
    }

    fn advance_mut(&mut self, n: usize) {
        assert!(n <= self.allocated_spare(), "advance beyond writable chunk");
        self.filled += n;
    }

    fn writable_remaining(&self) -> usize {
        match self.limit {
            Some(limit) => limit.saturating_sub(self.filled),
            None => usize::MAX - self.filled,
        }
    }
}
