/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use crate::TlsError;

/// Socket readiness a blocked session step is waiting for.
///
/// This is what the transport reports to the external poll loop; it never
/// registers interest itself. A library "want connect" condition maps to
/// [`Readiness::Writable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
}

/// Result of one non-blocking I/O attempt.
#[derive(Debug)]
pub enum IoOutcome {
    /// Bytes transferred in this call. May be fewer than requested; the
    /// remainder is picked up by the next invocation.
    Progress(usize),
    /// No progress was possible; re-invoke after the given readiness fires.
    WouldBlock(Readiness),
    /// Permanent failure of this connection.
    Fatal(TlsError),
}

impl IoOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, IoOutcome::Fatal(_))
    }
}
