/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Non-blocking TLS transport layer for the bmq broker client.
//!
//! One [`TlsClientConfig`] is built per client instance and spawns one
//! [`TlsSession`] per broker socket. Sessions never block: every handshake,
//! send and receive step either makes progress or reports the socket
//! readiness it needs, and the owning poll loop re-invokes it when that
//! readiness fires.

mod error;
pub use error::{NO_ERROR, TlsError, flush_error_queue};

mod runtime;
pub use runtime::{TlsCapabilities, capabilities, library_init, library_term};

mod host;
pub use host::{Host, split_endpoint};

mod io;
pub use io::{IoOutcome, Readiness};

mod verify;
pub use verify::BrokerCertVerifier;

mod config;
pub use config::{CaSource, TlsClientConfig, TlsClientConfigBuilder};

mod session;
pub use session::{ConnectionMonitor, HandshakeStatus, SessionState, TlsSession};
