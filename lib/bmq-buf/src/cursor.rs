/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

/// Cursor over readable protocol bytes.
///
/// `peek` returns the next contiguous readable chunk, which is empty once the
/// cursor is exhausted. `advance` marks bytes as consumed; it may cross chunk
/// boundaries.
pub trait ReadCursor {
    /// Next contiguous readable chunk, empty when exhausted.
    fn peek(&self) -> &[u8];

    /// Consume `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`remaining`](Self::remaining).
    fn advance(&mut self, n: usize);

    /// Total unconsumed bytes left.
    fn remaining(&self) -> usize;
}

/// [`ReadCursor`] over a single byte slice.
pub struct SliceCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceCursor { data, pos: 0 }
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }
}

impl ReadCursor for SliceCursor<'_> {
    fn peek(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn advance(&mut self, n: usize) {
        assert!(n <= self.data.len() - self.pos, "advance beyond slice end");
        self.pos += n;
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// [`ReadCursor`] over an iovec-style list of byte segments.
///
/// The protocol layer builds outgoing requests as scatter/gather segments;
/// this cursor walks them in order without flattening.
pub struct SegmentedSlice<'a> {
    segments: &'a [&'a [u8]],
    seg_idx: usize,
    seg_off: usize,
    remaining: usize,
}

impl<'a> SegmentedSlice<'a> {
    pub fn new(segments: &'a [&'a [u8]]) -> Self {
        let remaining = segments.iter().map(|s| s.len()).sum();
        SegmentedSlice {
            segments,
            seg_idx: 0,
            seg_off: 0,
            remaining,
        }
    }
}

impl ReadCursor for SegmentedSlice<'_> {
    fn peek(&self) -> &[u8] {
        let mut idx = self.seg_idx;
        let mut off = self.seg_off;
        // skip empty segments
        while idx < self.segments.len() {
            let seg = self.segments[idx];
            if off < seg.len() {
                return &seg[off..];
            }
            idx += 1;
            off = 0;
        }
        &[]
    }

    fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining, "advance beyond segment list end");
        let mut left = n;
        while left > 0 {
            let seg = self.segments[self.seg_idx];
            let avail = seg.len() - self.seg_off;
            if left < avail {
                self.seg_off += left;
                left = 0;
            } else {
                left -= avail;
                self.seg_idx += 1;
                self.seg_off = 0;
            }
        }
        self.remaining -= n;
    }

    fn remaining(&self) -> usize {
        self.remaining
    }
}
