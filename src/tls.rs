use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};

use crate::protocol::{CERT_FILE, KEY_FILE};

/// A certificate chain and its private key, loaded from PEM files.
pub struct Credentials {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Credentials {
    /// SHA-256 fingerprint of the leaf certificate.
    pub fn fingerprint(&self) -> Option<String> {
        self.certs.first().map(fingerprint_sha256)
    }
}

pub fn default_cert_paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(CERT_FILE), dir.join(KEY_FILE))
}

pub fn load_credentials(cert_path: &Path, key_path: &Path) -> Result<Credentials> {
    read_credentials(cert_path, key_path).with_context(|| {
        format!(
            "failed to load credential key pair ({}, {})",
            cert_path.display(),
            key_path.display()
        )
    })
}

fn read_credentials(cert_path: &Path, key_path: &Path) -> Result<Credentials> {
    let certs = {
        let mut rd = BufReader::new(fs::File::open(cert_path).context("open cert")?);
        let mut out = Vec::new();
        for c in rustls_pemfile::certs(&mut rd) {
            out.push(c.context("read cert")?);
        }
        if out.is_empty() {
            return Err(anyhow!("no certificates found in {}", cert_path.display()));
        }
        out
    };

    // Try pkcs8 (rcgen, openssl >= 3), then sec1 EC, then legacy rsa
    let open_key = || -> Result<BufReader<fs::File>> {
        Ok(BufReader::new(fs::File::open(key_path).context("open key")?))
    };
    let key = if let Some(k) = rustls_pemfile::pkcs8_private_keys(&mut open_key()?).next() {
        PrivateKeyDer::from(k.context("pkcs8 key")?)
    } else if let Some(k) = rustls_pemfile::ec_private_keys(&mut open_key()?).next() {
        PrivateKeyDer::from(k.context("ec key")?)
    } else {
        let k = rustls_pemfile::rsa_private_keys(&mut open_key()?)
            .next()
            .context("private key not found")??;
        PrivateKeyDer::from(k)
    };

    Ok(Credentials { certs, key })
}

/// Write a fresh self-signed pair into `dir` using the default file names.
pub fn generate_self_signed(dir: &Path, names: &[&str]) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let (cert_path, key_path) = default_cert_paths(dir);
    let sans: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let cert = rcgen::generate_simple_self_signed(sans).context("generate self-signed cert")?;
    fs::write(&cert_path, cert.serialize_pem().context("serialize cert")?)
        .context("write cert pem")?;
    fs::write(&key_path, cert.serialize_private_key_pem()).context("write key pem")?;
    Ok((cert_path, key_path))
}

pub fn fingerprint_sha256(cert: &CertificateDer<'_>) -> String {
    let mut h = Sha256::new();
    h.update(cert.as_ref());
    let digest = h.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect::<String>()
}

/// Whether the server asks connecting clients for a certificate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientAuthPolicy {
    /// Client certificates are neither requested nor checked.
    #[default]
    Skip,
    /// Client must present a certificate whose fingerprint matches the server's own.
    Pinned,
}

impl std::str::FromStr for ClientAuthPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ClientAuthPolicy::Skip),
            "pinned" => Ok(ClientAuthPolicy::Pinned),
            other => Err(format!("unknown client auth policy '{}' (skip|pinned)", other)),
        }
    }
}

/// How the client checks the server certificate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerVerification {
    /// Accept any server certificate.
    #[default]
    Skip,
    /// Server certificate fingerprint must match the locally loaded certificate.
    Pinned,
}

impl std::str::FromStr for ServerVerification {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ServerVerification::Skip),
            "pinned" => Ok(ServerVerification::Pinned),
            other => Err(format!("unknown server verification '{}' (skip|pinned)", other)),
        }
    }
}

fn signature_algorithms() -> WebPkiSupportedAlgorithms {
    rustls::crypto::ring::default_provider().signature_verification_algorithms
}

fn check_pin(expected: Option<&str>, cert: &CertificateDer<'_>) -> Result<(), rustls::Error> {
    match expected {
        None => Ok(()),
        Some(fp) if fp == fingerprint_sha256(cert) => Ok(()),
        Some(_) => Err(rustls::Error::General(
            "peer certificate does not match pinned fingerprint".into(),
        )),
    }
}

/// Server certificate check: fingerprint pin, or none at all.
/// Handshake signatures are verified either way.
#[derive(Debug)]
struct PinnedServerVerifier {
    expected: Option<String>,
    algs: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        check_pin(self.expected.as_deref(), end_entity)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algs.supported_schemes()
    }
}

#[derive(Debug)]
struct PinnedClientVerifier {
    expected: String,
    algs: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for PinnedClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        check_pin(Some(&self.expected), end_entity)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algs.supported_schemes()
    }
}

pub fn build_server_config(creds: Credentials, client_auth: ClientAuthPolicy) -> Result<rustls::ServerConfig> {
    let builder = rustls::ServerConfig::builder();
    let builder = match client_auth {
        ClientAuthPolicy::Skip => builder.with_no_client_auth(),
        ClientAuthPolicy::Pinned => {
            let expected = creds.fingerprint().context("server certificate chain is empty")?;
            builder.with_client_cert_verifier(Arc::new(PinnedClientVerifier {
                expected,
                algs: signature_algorithms(),
            }))
        }
    };
    builder
        .with_single_cert(creds.certs, creds.key)
        .context("build server tls config")
}

/// Client config presenting `creds`; the server is checked per `verification`.
pub fn build_client_config(creds: Credentials, verification: ServerVerification) -> Result<rustls::ClientConfig> {
    let expected = match verification {
        ServerVerification::Skip => None,
        ServerVerification::Pinned => Some(creds.fingerprint().context("certificate chain is empty")?),
    };
    let verifier = PinnedServerVerifier {
        expected,
        algs: signature_algorithms(),
    };
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(creds.certs, creds.key)
        .context("build client tls config")
}

pub fn server_name_for(host: &str) -> Result<ServerName<'static>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_string()).map_err(|_| anyhow!("Invalid server name for TLS: {}", host))
}
