//! Shared protocol constants for the upload framed transport

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"UPLD";
pub const VERSION: u16 = 1;

// Frame header: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub const FRAME_HEADER_LEN: usize = 11;

// Maximum frame payload size (16MB) - prevents DoS via memory exhaustion.
// Client chunk sizes are validated against this before a transfer starts.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// Frame type IDs (keep numeric stable for wire compat)
pub mod frame {
    // Client -> server
    pub const HEADER: u8 = 1;
    pub const CHUNK: u8 = 2;
    // Half-close: no more frames for this upload
    pub const CLOSE: u8 = 3;
    // Client gave up mid-upload (local read error); payload is a UTF-8 reason
    pub const CANCEL: u8 = 4;

    // Server -> client, exactly once per upload
    pub const RESULT: u8 = 5;
}

pub const DEFAULT_BIND: &str = "0.0.0.0:12345";
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:12345";

pub const DEFAULT_TLS_DIR: &str = "tls";
pub const CERT_FILE: &str = "server.crt";
pub const KEY_FILE: &str = "server.key";

pub const DEFAULT_ROOT: &str = "static";

pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

// Content sniffing looks at this many leading bytes
pub const SNIFF_LEN: usize = 261;
pub const CONTENT_TYPE_KEY: &str = "content-type";
pub const UNKNOWN_CONTENT_TYPE: &str = "unknown";

// Centralized timeout constants for client and server
pub mod timeouts {
    use std::time::Duration;

    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5000;

    // TLS handshake timeout (ms)
    pub const HANDSHAKE_MS: u64 = 5000;

    // Default per-frame I/O deadline (s); 0 disables deadlines entirely
    pub const FRAME_IO_SECS: u64 = 60;

    pub fn frame_deadline(secs: u64) -> Option<Duration> {
        if secs == 0 {
            None
        } else {
            Some(Duration::from_secs(secs))
        }
    }
}
