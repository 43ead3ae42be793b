/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Byte cursor and receive buffer abstractions shared by bmq transports.
//!
//! A transport drains outgoing protocol bytes through a [`ReadCursor`] and
//! fills incoming bytes through a [`WriteBuffer`]. Both work on contiguous
//! chunks so a non-blocking transfer loop can stop mid-way and resume on the
//! next readiness event without copying.

mod cursor;
pub use cursor::{ReadCursor, SegmentedSlice, SliceCursor};

mod buffer;
pub use buffer::{GrowBuf, WriteBuffer};
