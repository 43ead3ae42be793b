/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use openssl::ssl::{SslRef, SslVerifyMode};
use openssl::x509::{X509NameRef, X509StoreContextRef, X509VerifyResult};

/// Application hook for per-certificate verification of a broker's chain.
///
/// Invoked once per certificate, leaf first, with the library's current
/// verdict for that certificate in `error` (`X509_V_OK` when the default
/// chain validation passed). The hook may rewrite `error` in both
/// directions: sharpen an accepted certificate into a failure, or clear a
/// library failure and accept anyway.
///
/// Return `Ok(())` to accept the certificate. Return `Err(diagnostic)` to
/// reject it; the value left in `error` then overrides the library's error
/// code for the chain.
pub trait BrokerCertVerifier: Send + Sync {
    fn verify(
        &self,
        hostname: &str,
        broker_id: i32,
        depth: u32,
        cert_der: &[u8],
        error: &mut i32,
    ) -> Result<(), String>;
}

fn x509_name_oneline(name: &X509NameRef) -> String {
    let mut s = String::new();
    for entry in name.entries() {
        let key = entry.object().nid().short_name().unwrap_or("?");
        if !s.is_empty() {
            s.push_str(", ");
        }
        s.push_str(key);
        s.push('=');
        s.push_str(&entry.data().to_string().unwrap_or_default());
    }
    s
}

fn run_verifier(
    verifier: &Arc<dyn BrokerCertVerifier>,
    hostname: &str,
    broker_id: i32,
    ctx: &mut X509StoreContextRef,
) -> bool {
    let Some(cert) = ctx.current_cert() else {
        log::error!("broker {hostname}/{broker_id}: no current certificate to verify");
        return false;
    };
    let der = match cert.to_der() {
        Ok(der) => der,
        Err(e) => {
            log::error!("broker {hostname}/{broker_id}: failed to encode certificate: {e}");
            return false;
        }
    };

    let depth = ctx.error_depth();
    let orig_error = ctx.error().as_raw();
    let mut error = orig_error;

    match verifier.verify(hostname, broker_id, depth, &der, &mut error) {
        Ok(()) => {
            if orig_error != openssl_sys::X509_V_OK && error == openssl_sys::X509_V_OK {
                // the hook cleared the library failure, make sure downstream
                // verification logic does not see the stale code
                ctx.set_error(X509VerifyResult::OK);
            }
            true
        }
        Err(reason) => {
            let subject = x509_name_oneline(cert.subject_name());
            let issuer = x509_name_oneline(cert.issuer_name());
            log::error!(
                "broker {hostname}/{broker_id}: certificate (subject={subject}, issuer={issuer}) \
                 verification callback failed: {reason}"
            );
            // the hook may report any raw verify code, including ones the
            // bindings have no named constant for
            ctx.set_error(unsafe { X509VerifyResult::from_raw(error) });
            false
        }
    }
}

/// Register the verification hook on one session.
///
/// The session's identity is captured by the closure so the hook needs no
/// thread-local "current session" lookup to find its context.
pub(crate) fn register_hook(
    ssl: &mut SslRef,
    mode: SslVerifyMode,
    verifier: Arc<dyn BrokerCertVerifier>,
    hostname: String,
    broker_id: i32,
) {
    ssl.set_verify_callback(mode, move |_preverify_ok, ctx| {
        run_verifier(&verifier, &hostname, broker_id, ctx)
    });
}
