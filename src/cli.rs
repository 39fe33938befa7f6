//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

use crate::client::UploadPolicy;
use crate::config::{ClientSettings, ServerSettings};
use crate::protocol::{timeouts, DEFAULT_BIND, DEFAULT_ENDPOINT, DEFAULT_ROOT, DEFAULT_TLS_DIR};
use crate::protocol_core::PathPolicy;
use crate::tls::{ClientAuthPolicy, ServerVerification};

/// Upload daemon options
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "uploadd - receive files over a TLS upload stream")]
pub struct ServerOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Directory uploaded files are written into
    #[arg(long, default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Directory holding server.crt and server.key
    #[arg(long = "tls-dir", default_value = DEFAULT_TLS_DIR)]
    pub tls_dir: PathBuf,

    /// How client file names map under the root (confined|unrestricted)
    #[arg(long = "path-policy", default_value = "confined")]
    pub path_policy: PathPolicy,

    /// Client certificate check (skip|pinned)
    #[arg(long = "client-auth", default_value = "skip")]
    pub client_auth: ClientAuthPolicy,

    /// Per-frame I/O deadline in seconds (0 = wait forever)
    #[arg(long = "io-timeout-secs", default_value_t = timeouts::FRAME_IO_SECS)]
    pub io_timeout_secs: u64,

    /// Append a JSONL record of every upload to this file
    #[arg(long = "transfer-log")]
    pub transfer_log: Option<PathBuf>,

    /// Write log lines to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Generate a self-signed certificate in --tls-dir if none exists
    #[arg(long = "generate-cert")]
    pub generate_cert: bool,
}

impl ServerOpts {
    pub fn settings(&self) -> ServerSettings {
        ServerSettings {
            bind: self.bind.clone(),
            root: self.root.clone(),
            tls_dir: self.tls_dir.clone(),
            path_policy: self.path_policy,
            client_auth: self.client_auth,
            io_timeout_secs: self.io_timeout_secs,
            transfer_log: self.transfer_log.clone(),
            generate_cert: self.generate_cert,
        }
    }
}

/// Upload client options
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "upload - send files to an uploadd server over TLS")]
pub struct ClientOpts {
    /// Files to upload, in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Server address (host:port)
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub server: String,

    /// Directory holding server.crt and server.key
    #[arg(long = "tls-dir", default_value = DEFAULT_TLS_DIR)]
    pub tls_dir: PathBuf,

    /// Server certificate check (skip|pinned)
    #[arg(long = "verify-server", default_value = "skip")]
    pub verify_server: ServerVerification,

    /// Chunk size in KiB
    #[arg(long = "chunk-kb", default_value_t = 32)]
    pub chunk_kb: usize,

    /// Per-frame I/O deadline in seconds (0 = wait forever)
    #[arg(long = "io-timeout-secs", default_value_t = timeouts::FRAME_IO_SECS)]
    pub io_timeout_secs: u64,

    /// Keep going after a file fails instead of stopping
    #[arg(long = "best-effort")]
    pub best_effort: bool,

    /// Write log lines to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl ClientOpts {
    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            endpoint: self.server.clone(),
            tls_dir: self.tls_dir.clone(),
            verify_server: self.verify_server,
            chunk_size: self.chunk_kb.saturating_mul(1024),
            io_timeout_secs: self.io_timeout_secs,
            policy: if self.best_effort {
                UploadPolicy::BestEffort
            } else {
                UploadPolicy::FailFast
            },
            files: self.files.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults() {
        let opts = ClientOpts::try_parse_from(["upload", "a.txt", "b.txt"]).unwrap();
        let s = opts.settings();
        assert_eq!(s.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(s.endpoint, "127.0.0.1:12345");
        assert_eq!(s.chunk_size, 32 * 1024);
        assert_eq!(s.policy, UploadPolicy::FailFast);
        assert_eq!(s.verify_server, ServerVerification::Skip);
    }

    #[test]
    fn client_requires_files() {
        assert!(ClientOpts::try_parse_from(["upload"]).is_err());
    }

    #[test]
    fn client_knobs() {
        let opts = ClientOpts::try_parse_from([
            "upload",
            "--best-effort",
            "--verify-server",
            "pinned",
            "--chunk-kb",
            "64",
            "x.bin",
        ])
        .unwrap();
        let s = opts.settings();
        assert_eq!(s.policy, UploadPolicy::BestEffort);
        assert_eq!(s.verify_server, ServerVerification::Pinned);
        assert_eq!(s.chunk_size, 64 * 1024);
    }

    #[test]
    fn server_knobs() {
        let opts = ServerOpts::try_parse_from([
            "uploadd",
            "--path-policy",
            "unrestricted",
            "--client-auth",
            "pinned",
            "--io-timeout-secs",
            "0",
        ])
        .unwrap();
        let s = opts.settings();
        assert_eq!(s.bind, "0.0.0.0:12345");
        assert_eq!(s.path_policy, PathPolicy::Unrestricted);
        assert_eq!(s.client_auth, ClientAuthPolicy::Pinned);
        assert_eq!(s.io_deadline(), None);
    }

    #[test]
    fn server_rejects_unknown_policy() {
        assert!(ServerOpts::try_parse_from(["uploadd", "--path-policy", "anything"]).is_err());
    }
}
