/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{Read, Write};

use anyhow::anyhow;
use openssl::ssl::{self, ErrorCode, Ssl, SslStream};
use openssl::x509::X509VerifyResult;

use bmq_buf::{ReadCursor, WriteBuffer};

use crate::TlsError;
use crate::error::{clear_error_queue, describe_error_stack, flush_error_queue};
use crate::io::{IoOutcome, Readiness};

/// Lifecycle hooks of the surrounding broker connection.
pub trait ConnectionMonitor {
    /// The transport is up, protocol traffic may start.
    fn transport_established(&self);
    /// The transport failed permanently; the connection manager decides
    /// whether to tear down and reconnect.
    fn transport_failed(&self, error: &TlsError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Handshaking,
    Established,
    Closed,
}

/// Outcome of one handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Re-invoke after the given socket readiness fires.
    InProgress(Readiness),
    Established,
}

/// Per-socket TLS session.
///
/// Owns exactly one SSL state bound to exactly one non-blocking stream
/// socket and is driven by exactly one thread at a time. Every step either
/// makes progress or reports the readiness it is waiting for; nothing here
/// ever blocks the caller.
pub struct TlsSession<S> {
    stream: Option<SslStream<S>>,
    state: SessionState,
    peer: String,
    verify_peer: bool,
    want: Readiness,
    monitor: Option<Box<dyn ConnectionMonitor + Send>>,
}

fn classify_ssl_error(e: ssl::Error, peer: &str) -> Result<Readiness, TlsError> {
    match e.code() {
        ErrorCode::WANT_READ => Ok(Readiness::Readable),
        ErrorCode::WANT_WRITE => Ok(Readiness::Writable),
        code if code.as_raw() == openssl_sys::SSL_ERROR_WANT_CONNECT => Ok(Readiness::Writable),
        ErrorCode::ZERO_RETURN => Err(TlsError::Disconnected),
        ErrorCode::SYSCALL => {
            if let Some(stack) = e.ssl_error() {
                Err(TlsError::Transport(describe_error_stack(stack, Some(peer))))
            } else if let Some(io_err) = e.io_error() {
                Err(TlsError::Transport(format!("transport error: {io_err}")))
            } else {
                // no queued diagnostic and no OS error: the peer went away
                Err(TlsError::Disconnected)
            }
        }
        _ => {
            let diag = match e.ssl_error() {
                Some(stack) => describe_error_stack(stack, Some(peer)),
                None => flush_error_queue(Some(peer)),
            };
            Err(TlsError::Transport(diag))
        }
    }
}

impl<S: Read + Write> TlsSession<S> {
    pub(crate) fn new(
        mut ssl: Ssl,
        socket: S,
        endpoint: &str,
        broker_id: i32,
        verify_peer: bool,
        monitor: Option<Box<dyn ConnectionMonitor + Send>>,
    ) -> anyhow::Result<Self> {
        ssl.set_connect_state();
        let stream = SslStream::new(ssl, socket)
            .map_err(|e| anyhow!("failed to bind ssl state to socket: {e}"))?;
        Ok(TlsSession {
            stream: Some(stream),
            state: SessionState::Created,
            peer: format!("{endpoint}/{broker_id}"),
            verify_peer,
            // the client speaks first, so the initial interest is a write
            want: Readiness::Writable,
            monitor,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Readiness the most recent blocked step asked for.
    pub fn wanted_readiness(&self) -> Readiness {
        self.want
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Attempt one handshake step.
    ///
    /// Call repeatedly, after the readiness reported by the previous call
    /// fired, until it yields [`HandshakeStatus::Established`] or an error.
    /// Errors are permanent for this connection; the session is closed and
    /// the connection monitor notified before they are returned.
    pub fn step_handshake(&mut self) -> Result<HandshakeStatus, TlsError> {
        match self.state {
            SessionState::Closed => return Err(TlsError::SessionClosed),
            SessionState::Established => return Ok(HandshakeStatus::Established),
            SessionState::Created | SessionState::Handshaking => {}
        }
        self.state = SessionState::Handshaking;

        let mut step_err: Option<ssl::Error> = None;
        {
            let Some(stream) = self.stream.as_mut() else {
                return Err(TlsError::SessionClosed);
            };
            clear_error_queue();
            if let Err(e) = stream.do_handshake() {
                step_err = Some(e);
            }
        }

        match step_err {
            None => self.finish_handshake(),
            Some(e) => match classify_ssl_error(e, &self.peer) {
                Ok(readiness) => {
                    self.want = readiness;
                    Ok(HandshakeStatus::InProgress(readiness))
                }
                Err(err) => Err(self.fail(wrap_handshake_error(err))),
            },
        }
    }

    fn finish_handshake(&mut self) -> Result<HandshakeStatus, TlsError> {
        if self.verify_peer {
            if let Some(err) = self.check_peer_verification() {
                return Err(self.fail(err));
            }
        }
        if let Some(stream) = self.stream.as_ref() {
            let ssl = stream.ssl();
            log::debug!(
                "broker {}: tls connection established, {} {}",
                self.peer,
                ssl.version_str(),
                ssl.current_cipher().map(|c| c.name()).unwrap_or("unknown")
            );
        }
        self.state = SessionState::Established;
        if let Some(monitor) = &self.monitor {
            monitor.transport_established();
        }
        Ok(HandshakeStatus::Established)
    }

    fn check_peer_verification(&self) -> Option<TlsError> {
        let stream = self.stream.as_ref()?;
        let ssl = stream.ssl();
        if ssl.peer_certificate().is_none() {
            return Some(TlsError::Handshake(
                "broker did not provide a certificate".to_string(),
            ));
        }
        let result = ssl.verify_result();
        if result != X509VerifyResult::OK {
            return Some(TlsError::Handshake(format!(
                "failed to verify broker certificate: {}",
                result.error_string()
            )));
        }
        log::debug!("broker {}: certificate verified", self.peer);
        None
    }

    /// Encrypt and send bytes from `slice`.
    ///
    /// Consumes chunk by chunk; a short write ends the call, the remainder
    /// stays in the cursor for the next invocation. Never blocks.
    pub fn send<C>(&mut self, slice: &mut C) -> IoOutcome
    where
        C: ReadCursor + ?Sized,
    {
        if let Some(err) = self.io_state_error() {
            return IoOutcome::Fatal(err);
        }

        let mut sum = 0usize;
        let mut step_err: Option<ssl::Error> = None;
        {
            let Some(stream) = self.stream.as_mut() else {
                return IoOutcome::Fatal(TlsError::SessionClosed);
            };
            loop {
                let chunk = slice.peek();
                if chunk.is_empty() {
                    break;
                }
                let want_len = chunk.len();
                clear_error_queue();
                match stream.ssl_write(chunk) {
                    Ok(n) => {
                        slice.advance(n);
                        sum += n;
                        if n < want_len {
                            // short write, pick the rest up next time
                            break;
                        }
                    }
                    Err(e) => {
                        step_err = Some(e);
                        break;
                    }
                }
            }
        }

        match step_err {
            None => IoOutcome::Progress(sum),
            Some(e) => self.blocked_or_failed(e, sum),
        }
    }

    /// Receive and decrypt bytes into `buf`.
    ///
    /// Fills chunk by chunk up to the buffer's writable capacity; a short
    /// read ends the call. Never blocks.
    pub fn receive<B>(&mut self, buf: &mut B) -> IoOutcome
    where
        B: WriteBuffer + ?Sized,
    {
        if let Some(err) = self.io_state_error() {
            return IoOutcome::Fatal(err);
        }

        let mut sum = 0usize;
        let mut step_err: Option<ssl::Error> = None;
        {
            let Some(stream) = self.stream.as_mut() else {
                return IoOutcome::Fatal(TlsError::SessionClosed);
            };
            loop {
                let chunk = buf.writable();
                if chunk.is_empty() {
                    break;
                }
                let want_len = chunk.len();
                clear_error_queue();
                match stream.ssl_read(chunk) {
                    Ok(n) => {
                        buf.advance_mut(n);
                        sum += n;
                        if n < want_len {
                            break;
                        }
                    }
                    Err(e) => {
                        step_err = Some(e);
                        break;
                    }
                }
            }
        }

        match step_err {
            None => IoOutcome::Progress(sum),
            Some(e) => self.blocked_or_failed(e, sum),
        }
    }

    fn io_state_error(&self) -> Option<TlsError> {
        match self.state {
            SessionState::Established => None,
            SessionState::Closed => Some(TlsError::SessionClosed),
            SessionState::Created | SessionState::Handshaking => Some(TlsError::Transport(
                "session is not established".to_string(),
            )),
        }
    }

    fn blocked_or_failed(&mut self, e: ssl::Error, progress: usize) -> IoOutcome {
        match classify_ssl_error(e, &self.peer) {
            Ok(readiness) => {
                self.want = readiness;
                if progress > 0 {
                    IoOutcome::Progress(progress)
                } else {
                    IoOutcome::WouldBlock(readiness)
                }
            }
            Err(err) => IoOutcome::Fatal(self.fail(err)),
        }
    }

    /// Record a permanent failure: notify the connection monitor, close the
    /// session, hand the error back for the caller to propagate.
    fn fail(&mut self, err: TlsError) -> TlsError {
        if err.is_disconnect() {
            log::debug!("broker {}: {err}", self.peer);
        } else {
            log::error!("broker {}: {err}", self.peer);
        }
        if let Some(monitor) = &self.monitor {
            monitor.transport_failed(&err);
        }
        self.close_stream();
        err
    }

    fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // best-effort close_notify towards the peer; a blocked or failed
            // shutdown must never stall the close path
            let _ = stream.shutdown();
        }
        self.state = SessionState::Closed;
    }

    /// Close the session. Safe in any state, idempotent, never blocks.
    ///
    /// Sends a best-effort protocol shutdown notification and frees the
    /// underlying SSL state before the socket itself is dropped.
    pub fn close(&mut self) {
        self.close_stream();
    }
}

fn wrap_handshake_error(err: TlsError) -> TlsError {
    match err {
        TlsError::Transport(msg) => {
            let hint = if msg.contains("unexpected message") {
                ": client authentication might be required (see broker log)"
            } else {
                ""
            };
            TlsError::Handshake(format!("{msg}{hint}"))
        }
        other => other,
    }
}
