/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{
    Ssl, SslConnector, SslConnectorBuilder, SslMethod, SslMode, SslOptions, SslVerifyMode,
};
use openssl::x509::X509;
use zeroize::Zeroize;

use crate::error::describe_error_stack;
use crate::runtime::capabilities;
use crate::session::{ConnectionMonitor, TlsSession};
use crate::verify::{BrokerCertVerifier, register_hook};
use crate::{Host, split_endpoint};

mod trust;
pub use trust::CaSource;
use trust::{cert_from_pem, install_ca_store, key_from_pem};

/// Built TLS configuration, one per client instance.
///
/// Immutable after construction and shared read-only by every session
/// spawned from it; cloning shares the underlying context.
#[derive(Clone)]
pub struct TlsClientConfig {
    ssl_context: openssl::ssl::SslContext,
    verify_peer: bool,
    check_endpoint_identity: bool,
    verifier: Option<Arc<dyn BrokerCertVerifier>>,
}

/// Policy for [`TlsClientConfig`] construction.
///
/// Owns all trust-material sources; [`build`](Self::build) consumes the
/// builder and moves every source into the configuration, so nothing of the
/// source representation is retained afterwards.
#[derive(Clone)]
pub struct TlsClientConfigBuilder {
    ca_source: Option<CaSource>,
    crl_file: Option<PathBuf>,
    cert_obj: Option<X509>,
    cert_file: Option<PathBuf>,
    cert_pem: Option<String>,
    key_obj: Option<PKey<Private>>,
    key_file: Option<PathBuf>,
    key_pem: Option<String>,
    key_password: Option<String>,
    keystore_file: Option<PathBuf>,
    keystore_password: Option<String>,
    cipher_suites: Option<String>,
    curves_list: Option<String>,
    sigalgs_list: Option<String>,
    verify_peer: bool,
    check_endpoint_identity: bool,
    verifier: Option<Arc<dyn BrokerCertVerifier>>,
}

impl Default for TlsClientConfigBuilder {
    fn default() -> Self {
        TlsClientConfigBuilder {
            ca_source: None,
            crl_file: None,
            cert_obj: None,
            cert_file: None,
            cert_pem: None,
            key_obj: None,
            key_file: None,
            key_pem: None,
            key_password: None,
            keystore_file: None,
            keystore_password: None,
            cipher_suites: None,
            curves_list: None,
            sigalgs_list: None,
            verify_peer: true,
            check_endpoint_identity: true,
            verifier: None,
        }
    }
}

impl TlsClientConfigBuilder {
    pub fn set_ca_certificates(&mut self, certs: Vec<X509>) -> anyhow::Result<()> {
        let mut all_der = Vec::with_capacity(certs.len());
        for (i, cert) in certs.into_iter().enumerate() {
            let der = cert
                .to_der()
                .map_err(|e| anyhow!("failed to encode ca certificate #{i}: {e}"))?;
            all_der.push(der);
        }
        self.ca_source = Some(CaSource::Certs(all_der));
        Ok(())
    }

    /// Use a PEM bundle file or hashed certificate directory as CA source.
    pub fn set_ca_path(&mut self, path: PathBuf) {
        self.ca_source = Some(CaSource::Path(path));
    }

    /// Probe the platform environment for a CA bundle.
    pub fn set_platform_ca(&mut self) {
        self.ca_source = Some(CaSource::Platform);
    }

    pub fn set_crl_file(&mut self, path: PathBuf) {
        self.crl_file = Some(path);
    }

    pub fn set_certificate(&mut self, cert: X509) {
        self.cert_obj = Some(cert);
    }

    pub fn set_certificate_file(&mut self, path: PathBuf) {
        self.cert_file = Some(path);
    }

    /// PEM text of the client certificate; armor lines are optional.
    pub fn set_certificate_pem(&mut self, pem: String) {
        self.cert_pem = Some(pem);
    }

    pub fn set_private_key(&mut self, key: PKey<Private>) {
        self.key_obj = Some(key);
    }

    pub fn set_private_key_file(&mut self, path: PathBuf) {
        self.key_file = Some(path);
    }

    /// PEM text of the client private key; armor lines are optional. The
    /// text is scrubbed from memory once the key is installed.
    pub fn set_private_key_pem(&mut self, pem: String) {
        self.key_pem = Some(pem);
    }

    /// Passphrase for encrypted private keys (PEM string, key file or
    /// PKCS#12 archive).
    pub fn set_key_password(&mut self, password: String) {
        self.key_password = Some(password);
    }

    /// PKCS#12 archive carrying both certificate and key; supersedes any
    /// individually configured certificate/key sources.
    pub fn set_keystore_file(&mut self, path: PathBuf, password: Option<String>) {
        self.keystore_file = Some(path);
        self.keystore_password = password;
    }

    pub fn set_cipher_suites(&mut self, ciphers: Vec<String>) {
        self.cipher_suites = Some(ciphers.join(":"));
    }

    pub fn set_curves_list(&mut self, curves: Vec<String>) {
        self.curves_list = Some(curves.join(":"));
    }

    pub fn set_sigalgs_list(&mut self, sigalgs: Vec<String>) {
        self.sigalgs_list = Some(sigalgs.join(":"));
    }

    pub fn set_verify_peer(&mut self, enable: bool) {
        self.verify_peer = enable;
    }

    pub fn set_check_endpoint_identity(&mut self, enable: bool) {
        self.check_endpoint_identity = enable;
    }

    pub fn set_cert_verifier(&mut self, verifier: Arc<dyn BrokerCertVerifier>) {
        self.verifier = Some(verifier);
    }

    fn install_certificate(&self, ctx_builder: &mut SslConnectorBuilder) -> anyhow::Result<()> {
        if let Some(cert) = &self.cert_obj {
            log::debug!("tls: loading client certificate from memory");
            ctx_builder
                .set_certificate(cert)
                .map_err(|e| anyhow!("client certificate (in-memory) failed: {e}"))?;
        } else if let Some(path) = &self.cert_file {
            log::debug!("tls: loading client certificate from file {}", path.display());
            ctx_builder
                .set_certificate_chain_file(path)
                .map_err(|e| anyhow!("client certificate file failed: {e}"))?;
        } else if let Some(pem) = &self.cert_pem {
            log::debug!("tls: loading client certificate from pem string");
            let cert = cert_from_pem(pem).map_err(|e| anyhow!("client certificate pem: {e}"))?;
            ctx_builder
                .set_certificate(&cert)
                .map_err(|e| anyhow!("client certificate pem failed: {e}"))?;
        }
        Ok(())
    }

    /// Returns true if a private key was installed.
    fn install_private_key(&mut self, ctx_builder: &mut SslConnectorBuilder) -> anyhow::Result<bool> {
        if let Some(key) = &self.key_obj {
            log::debug!("tls: loading client private key from memory");
            ctx_builder
                .set_private_key(key)
                .map_err(|e| anyhow!("client key (in-memory) failed: {e}"))?;
            return Ok(true);
        }
        if let Some(path) = &self.key_file {
            log::debug!("tls: loading client private key from file {}", path.display());
            // parsed in-process so an encrypted key without a configured
            // passphrase fails instead of prompting on the terminal
            let mut text = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("failed to read key file {}: {e}", path.display()))?;
            let key = key_from_pem(&text, self.key_password.as_deref());
            text.zeroize();
            let key = key.map_err(|e| anyhow!("client key file: {e}"))?;
            ctx_builder
                .set_private_key(&key)
                .map_err(|e| anyhow!("client key file failed: {e}"))?;
            return Ok(true);
        }
        if let Some(pem) = &mut self.key_pem {
            log::debug!("tls: loading client private key from pem string");
            let key = key_from_pem(pem, self.key_password.as_deref());
            // the key is cached in the context, no reason to keep the
            // sensitive source text around in either outcome
            pem.zeroize();
            let key = key.map_err(|e| anyhow!("client key pem: {e}"))?;
            ctx_builder
                .set_private_key(&key)
                .map_err(|e| anyhow!("client key pem failed: {e}"))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Returns true if the archive installed a private key.
    fn install_keystore(&self, ctx_builder: &mut SslConnectorBuilder) -> anyhow::Result<bool> {
        let Some(path) = &self.keystore_file else {
            return Ok(false);
        };
        log::debug!("tls: loading client keystore from file {}", path.display());
        let der = std::fs::read(path)
            .map_err(|e| anyhow!("failed to read keystore file {}: {e}", path.display()))?;
        let pkcs12 = openssl::pkcs12::Pkcs12::from_der(&der)
            .map_err(|e| anyhow!("error reading PKCS#12 file {}: {e}", path.display()))?;
        let parsed = pkcs12
            .parse2(self.keystore_password.as_deref().unwrap_or(""))
            .map_err(|e| anyhow!("failed to parse PKCS#12 file {}: {e}", path.display()))?;

        let cert = parsed
            .cert
            .ok_or_else(|| anyhow!("keystore {} holds no certificate", path.display()))?;
        let key = parsed
            .pkey
            .ok_or_else(|| anyhow!("keystore {} holds no private key", path.display()))?;
        ctx_builder
            .set_certificate(&cert)
            .map_err(|e| anyhow!("failed to use keystore certificate: {e}"))?;
        ctx_builder
            .set_private_key(&key)
            .map_err(|e| anyhow!("failed to use keystore private key: {e}"))?;
        Ok(true)
    }

    /// Build the configuration object.
    ///
    /// Consumes the builder: all trust material moves into the context.
    /// Aborts on the first source that fails to parse or apply; the error
    /// names the failing option.
    pub fn build(mut self) -> anyhow::Result<TlsClientConfig> {
        let caps = capabilities();

        let mut ctx_builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| anyhow!("failed to create ssl context builder: {e}"))?;

        // version 3 of the protocol is unsafe, never negotiate it
        ctx_builder.set_options(SslOptions::NO_SSLV3);

        if let Some(ciphers) = &self.cipher_suites {
            log::debug!("tls: setting cipher list: {ciphers}");
            ctx_builder
                .set_cipher_list(ciphers)
                .map_err(|e| anyhow!("cipher suites failed: {e}"))?;
        }
        if let Some(curves) = &self.curves_list {
            if caps.curve_list {
                log::debug!("tls: setting curves list: {curves}");
                ctx_builder
                    .set_groups_list(curves)
                    .map_err(|e| anyhow!("curves list failed: {e}"))?;
            } else {
                log::debug!("tls: curves list not supported by this library version, skipped");
            }
        }
        if let Some(sigalgs) = &self.sigalgs_list {
            if caps.sigalg_list {
                log::debug!("tls: setting signature algorithms list: {sigalgs}");
                ctx_builder
                    .set_sigalgs_list(sigalgs)
                    .map_err(|e| anyhow!("signature algorithms list failed: {e}"))?;
            } else {
                log::debug!("tls: sigalgs list not supported by this library version, skipped");
            }
        }

        ctx_builder.set_verify(if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        // writers may transfer fewer bytes than requested without error
        ctx_builder.set_mode(SslMode::ENABLE_PARTIAL_WRITE);

        let ca_source = self.ca_source.take().unwrap_or(CaSource::Default);
        install_ca_store(&mut ctx_builder, &ca_source, self.crl_file.as_deref())?;

        self.install_certificate(&mut ctx_builder)?;
        let mut check_pkey = self.install_private_key(&mut ctx_builder)?;
        check_pkey |= self.install_keystore(&mut ctx_builder)?;

        if check_pkey {
            ctx_builder.check_private_key().map_err(|e| {
                anyhow!("private key check failed: {}", describe_error_stack(&e, None))
            })?;
        }

        Ok(TlsClientConfig {
            ssl_context: ctx_builder.build().into_context(),
            verify_peer: self.verify_peer,
            check_endpoint_identity: self.check_endpoint_identity,
            verifier: self.verifier.take(),
        })
    }
}

impl TlsClientConfig {
    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    /// New per-connection SSL state bound to the given peer identity.
    fn build_ssl(&self, host: &Host, broker_id: i32) -> anyhow::Result<Ssl> {
        let caps = capabilities();
        let mut ssl = Ssl::new(&self.ssl_context)
            .map_err(|e| anyhow!("failed to get new Ssl state: {e}"))?;
        match host {
            Host::Domain(domain) => {
                if self.check_endpoint_identity {
                    if !caps.endpoint_identification {
                        return Err(anyhow!(
                            "endpoint identification is not supported by this library version"
                        ));
                    }
                    ssl.param_mut()
                        .set_host(domain)
                        .map_err(|e| anyhow!("failed to set cert verify domain: {e}"))?;
                }
                // numeric addresses are never sent in the SNI extension
                if caps.sni {
                    ssl.set_hostname(domain)
                        .map_err(|e| anyhow!("failed to set sni hostname: {e}"))?;
                }
            }
            Host::Ip(ip) => {
                if self.check_endpoint_identity {
                    if !caps.endpoint_identification {
                        return Err(anyhow!(
                            "endpoint identification is not supported by this library version"
                        ));
                    }
                    ssl.param_mut()
                        .set_ip(*ip)
                        .map_err(|e| anyhow!("failed to set cert verify ip: {e}"))?;
                }
            }
        }
        if let Some(verifier) = &self.verifier {
            let mode = if self.verify_peer {
                SslVerifyMode::PEER
            } else {
                SslVerifyMode::NONE
            };
            register_hook(&mut ssl, mode, verifier.clone(), host.to_string(), broker_id);
        }
        Ok(ssl)
    }

    /// Open a TLS session over an already connected non-blocking socket.
    ///
    /// `endpoint` is the broker address in `host[:port]` form; the port
    /// suffix is stripped before the hostname is used for SNI or identity
    /// checks. The handshake is not started here, drive it with
    /// [`TlsSession::step_handshake`].
    pub fn open_session<S>(
        &self,
        socket: S,
        endpoint: &str,
        broker_id: i32,
        monitor: Option<Box<dyn ConnectionMonitor + Send>>,
    ) -> anyhow::Result<TlsSession<S>>
    where
        S: Read + Write,
    {
        let (host, _port) = split_endpoint(endpoint)
            .map_err(|e| anyhow!("invalid broker endpoint {endpoint}: {e}"))?;
        let ssl = self.build_ssl(&host, broker_id)?;
        TlsSession::new(ssl, socket, endpoint, broker_id, self.verify_peer, monitor)
    }
}
