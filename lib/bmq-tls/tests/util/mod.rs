/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{Ssl, SslAcceptor, SslContext, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509, X509Builder, X509NameBuilder};

use bmq_tls::{ConnectionMonitor, HandshakeStatus, TlsError, TlsSession};

pub struct TestCa {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub fn new_ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let ec_key = EcKey::generate(&group).unwrap();
    PKey::from_ec_key(ec_key).unwrap()
}

fn subject(cn: &str) -> openssl::x509::X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("O", "bmq-test").unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.build()
}

static SERIAL: AtomicUsize = AtomicUsize::new(1);

fn next_serial() -> openssl::asn1::Asn1Integer {
    let serial = SERIAL.fetch_add(1, Ordering::Relaxed) as u32;
    BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap()
}

pub fn build_ca(cn: &str) -> TestCa {
    let key = new_ec_key();
    let name = subject(cn);

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&next_serial()).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    TestCa {
        cert: builder.build(),
        key,
    }
}

fn issue_leaf(ca: &TestCa, name: &str, ip_san: bool) -> (X509, PKey<Private>) {
    let key = new_ec_key();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&next_serial()).unwrap();
    builder.set_subject_name(&subject(name)).unwrap();
    builder
        .set_issuer_name(ca.cert.subject_name())
        .unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    let mut san = SubjectAlternativeName::new();
    if ip_san {
        san.ip(name);
    } else {
        san.dns(name);
    }
    let san = san
        .build(&builder.x509v3_context(Some(&ca.cert), None))
        .unwrap();
    builder.append_extension(san).unwrap();
    builder.sign(&ca.key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// Issue a server certificate for `dns_name`, signed by `ca`.
pub fn issue_server_cert(ca: &TestCa, dns_name: &str) -> (X509, PKey<Private>) {
    issue_leaf(ca, dns_name, false)
}

/// Issue a server certificate with an IP-address SAN, signed by `ca`.
pub fn issue_server_cert_for_ip(ca: &TestCa, ip: &str) -> (X509, PKey<Private>) {
    issue_leaf(ca, ip, true)
}

/// Self-signed leaf certificate, trusted by nobody.
pub fn self_signed_cert(dns_name: &str) -> (X509, PKey<Private>) {
    let ca = build_ca(dns_name);
    issue_server_cert(&ca, dns_name)
}

/// One-shot TLS echo server: accept a single connection, read `expect`
/// bytes, write them back, shut down. Handshake failures are swallowed so
/// negative tests can assert on the client side only.
pub fn spawn_tls_echo_server(
    cert: X509,
    key: PKey<Private>,
    expect: usize,
) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls()).unwrap();
        builder.set_certificate(&cert).unwrap();
        builder.set_private_key(&key).unwrap();
        builder.set_verify(SslVerifyMode::NONE);
        let acceptor = builder.build();

        let (socket, _peer) = listener.accept().unwrap();
        let mut stream = match acceptor.accept(socket) {
            Ok(stream) => stream,
            Err(_) => return,
        };

        let mut data = vec![0u8; expect];
        let mut filled = 0;
        while filled < expect {
            match stream.read(&mut data[filled..]) {
                Ok(0) => return,
                Ok(n) => filled += n,
                Err(_) => return,
            }
        }
        if stream.write_all(&data).is_err() {
            return;
        }
        let _ = stream.flush();
        let _ = stream.shutdown();
    });

    (addr, handle)
}

/// One-shot TLS server that completes an anonymous-cipher handshake and so
/// never presents a certificate.
pub fn spawn_anon_tls_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let mut builder = SslContext::builder(SslMethod::tls_server()).unwrap();
        // certificate-less suites only exist up to TLS 1.2 and below
        // security level 1
        builder.set_cipher_list("aNULL:@SECLEVEL=0").unwrap();
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_2))
            .unwrap();
        let ctx = builder.build();

        let (socket, _peer) = listener.accept().unwrap();
        // the client tears the connection down right after its
        // post-handshake certificate check
        let _ = Ssl::new(&ctx).unwrap().accept(socket);
    });

    (addr, handle)
}

/// Drive the handshake to completion against a live peer thread.
pub fn drive_handshake<S: Read + Write>(
    session: &mut TlsSession<S>,
) -> Result<HandshakeStatus, TlsError> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match session.step_handshake()? {
            HandshakeStatus::Established => return Ok(HandshakeStatus::Established),
            HandshakeStatus::InProgress(_) => {
                assert!(Instant::now() < deadline, "handshake timed out");
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }
}

/// Connection monitor recording the hooks it saw.
#[derive(Default)]
pub struct RecordingMonitor {
    pub established: Arc<AtomicBool>,
    pub failure: Arc<Mutex<Option<String>>>,
}

impl RecordingMonitor {
    pub fn boxed(&self) -> Box<dyn ConnectionMonitor + Send> {
        Box::new(RecordingMonitor {
            established: self.established.clone(),
            failure: self.failure.clone(),
        })
    }
}

impl ConnectionMonitor for RecordingMonitor {
    fn transport_established(&self) {
        self.established.store(true, Ordering::Release);
    }

    fn transport_failed(&self, error: &TlsError) {
        *self.failure.lock().unwrap() = Some(error.to_string());
    }
}

static TMP_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Unique scratch file path under the system temp directory.
pub fn temp_path(tag: &str) -> PathBuf {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("bmq-tls-test-{}-{seq}-{tag}", std::process::id()))
}
