//! Runtime settings for the client and server.
//!
//! Defaults are the fixed endpoint, directories and permissive TLS checks;
//! every security-relevant default is an explicit field.

use std::path::PathBuf;
use std::time::Duration;

use crate::client::UploadPolicy;
use crate::protocol::{
    timeouts, DEFAULT_BIND, DEFAULT_CHUNK_SIZE, DEFAULT_ENDPOINT, DEFAULT_ROOT, DEFAULT_TLS_DIR,
    MAX_FRAME_SIZE,
};
use crate::protocol_core::PathPolicy;
use crate::tls::{ClientAuthPolicy, ServerVerification};

#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub bind: String,
    pub root: PathBuf,
    pub tls_dir: PathBuf,
    pub path_policy: PathPolicy,
    pub client_auth: ClientAuthPolicy,
    pub io_timeout_secs: u64,
    /// JSONL record of every upload outcome
    pub transfer_log: Option<PathBuf>,
    /// Create a self-signed pair in `tls_dir` when none exists
    pub generate_cert: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            root: PathBuf::from(DEFAULT_ROOT),
            tls_dir: PathBuf::from(DEFAULT_TLS_DIR),
            path_policy: PathPolicy::default(),
            client_auth: ClientAuthPolicy::default(),
            io_timeout_secs: timeouts::FRAME_IO_SECS,
            transfer_log: None,
            generate_cert: false,
        }
    }
}

impl ServerSettings {
    pub fn io_deadline(&self) -> Option<Duration> {
        timeouts::frame_deadline(self.io_timeout_secs)
    }
}

#[derive(Clone, Debug)]
pub struct ClientSettings {
    /// host:port of the server
    pub endpoint: String,
    pub tls_dir: PathBuf,
    pub verify_server: ServerVerification,
    pub chunk_size: usize,
    pub io_timeout_secs: u64,
    pub policy: UploadPolicy,
    pub files: Vec<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            tls_dir: PathBuf::from(DEFAULT_TLS_DIR),
            verify_server: ServerVerification::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            io_timeout_secs: timeouts::FRAME_IO_SECS,
            policy: UploadPolicy::default(),
            files: Vec::new(),
        }
    }
}

impl ClientSettings {
    pub fn io_deadline(&self) -> Option<Duration> {
        timeouts::frame_deadline(self.io_timeout_secs)
    }

    /// Chunk size clamped to what a single frame can carry.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_FRAME_SIZE)
    }

    /// Host part of `endpoint`, brackets stripped for IPv6 literals.
    pub fn host(&self) -> &str {
        let host = match self.endpoint.rsplit_once(':') {
            Some((h, _)) => h,
            None => self.endpoint.as_str(),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            "localhost"
        } else {
            host
        }
    }
}
