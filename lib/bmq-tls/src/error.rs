/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use openssl::error::ErrorStack;
use thiserror::Error;

/// Sentinel diagnostic returned when the library error queue was empty.
///
/// It means "no further diagnostic information is available", not success.
pub const NO_ERROR: &str = "no error";

/// Upper bound for a single returned diagnostic string.
const MAX_DIAG_LEN: usize = 512;

/// Fatal outcome of a session-level TLS operation.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The peer closed the connection, either with a clean TLS shutdown or
    /// by dropping the transport without any queued diagnostic.
    #[error("disconnected")]
    Disconnected,
    /// The handshake failed permanently for this connection.
    #[error("tls handshake failed: {0}")]
    Handshake(String),
    /// A data-transfer step failed permanently for this connection.
    #[error("tls transport error: {0}")]
    Transport(String),
    /// An I/O operation was invoked on an already closed session.
    #[error("session is closed")]
    SessionClosed,
}

impl TlsError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TlsError::Disconnected)
    }
}

/// Drop any stale entries from the thread-local library error queue so the
/// next failing call reports its own diagnostics.
pub(crate) fn clear_error_queue() {
    unsafe { openssl_sys::ERR_clear_error() };
}

fn format_entry(e: &openssl::error::Error) -> String {
    let mut msg = format!(
        "{}:{}: {}: {}",
        e.library().unwrap_or("unknown"),
        e.line(),
        e.reason().unwrap_or("unknown error"),
        e.data().unwrap_or("")
    );
    if msg.len() > MAX_DIAG_LEN {
        msg.truncate(MAX_DIAG_LEN);
    }
    msg
}

fn log_entry(broker: Option<&str>, msg: &str) {
    match broker {
        Some(broker) => log::error!("broker {broker}: tls: {msg}"),
        None => log::error!("tls: {msg}"),
    }
}

/// Describe an already popped error stack: every entry but the last is
/// logged, the last one is returned as the diagnostic.
pub(crate) fn describe_error_stack(stack: &ErrorStack, broker: Option<&str>) -> String {
    let errors = stack.errors();
    let Some((last, head)) = errors.split_last() else {
        return NO_ERROR.to_string();
    };
    for e in head {
        log_entry(broker, &format_entry(e));
    }
    format_entry(last)
}

/// Drain the thread-local library error queue into one diagnostic.
///
/// Intermediate entries are logged (broker-scoped when a connection context
/// is available), only the terminal entry is returned. An empty queue yields
/// the [`NO_ERROR`] sentinel.
pub fn flush_error_queue(broker: Option<&str>) -> String {
    describe_error_stack(&ErrorStack::get(), broker)
}
