/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Optional library features resolved once against the runtime library
/// version, so component logic queries a table of booleans instead of
/// checking version numbers at every call site.
#[derive(Debug, Clone, Copy)]
pub struct TlsCapabilities {
    /// `SSL_CTX_set1_groups_list` (1.0.2+)
    pub curve_list: bool,
    /// `SSL_CTX_set1_sigalgs_list` (1.0.2+)
    pub sigalg_list: bool,
    /// TLS server name indication (0.9.8f+ with TLSEXT)
    pub sni: bool,
    /// hostname checks via `X509_VERIFY_PARAM` (1.0.2+)
    pub endpoint_identification: bool,
}

impl TlsCapabilities {
    fn detect() -> Self {
        // OpenSSL version number layout: 0xMNNFFPPS
        let version = openssl::version::number() as u64;
        let at_least_102 = version >= 0x1_00_02_00_0;
        TlsCapabilities {
            curve_list: at_least_102,
            sigalg_list: at_least_102,
            sni: version >= 0x0_09_08_06_0,
            endpoint_identification: at_least_102,
        }
    }
}

static CAPABILITIES: OnceLock<TlsCapabilities> = OnceLock::new();

pub fn capabilities() -> &'static TlsCapabilities {
    CAPABILITIES.get_or_init(TlsCapabilities::detect)
}

static RUNTIME_REFS: AtomicUsize = AtomicUsize::new(0);

/// Process-wide library startup. Must be matched by [`library_term`].
///
/// Reference counted: several independent client instances may call this.
/// The first call triggers the one-time library initialization and resolves
/// the capability table. The library versions supported by the bindings
/// manage their own locking and thread-id state, so no lock table needs to
/// be installed here; matching [`library_term`] is still required so the
/// lifecycles stay balanced.
pub fn library_init() {
    if RUNTIME_REFS.fetch_add(1, Ordering::AcqRel) == 0 {
        openssl::init();
        let caps = capabilities();
        log::debug!(
            "tls: initialized {}, capabilities: {caps:?}",
            openssl::version::version()
        );
    }
}

/// Process-wide library teardown, matching one [`library_init`] call.
///
/// The last balanced call releases nothing the library does not release
/// itself; an unbalanced call is logged and otherwise ignored.
pub fn library_term() {
    let mut refs = RUNTIME_REFS.load(Ordering::Acquire);
    loop {
        if refs == 0 {
            log::error!("tls: library_term() called without matching library_init()");
            return;
        }
        match RUNTIME_REFS.compare_exchange(refs, refs - 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => break,
            Err(v) => refs = v,
        }
    }
    if refs == 1 {
        log::debug!("tls: released process-wide library state");
    }
}
