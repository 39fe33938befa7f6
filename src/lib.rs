//! Upload library
//!
//! Streams local files to a server over TLS: one header frame, any number
//! of chunk frames, a close, then exactly one result per file.

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod log;
pub mod logger;
pub mod message;
pub mod protocol;
pub mod protocol_core;
pub mod server;
pub mod session;
pub mod sniff;
pub mod tls;

pub use error::UploadError;
pub use message::{Chunk, FileHeader, MetadataEntry, StatusCode, TransferResult, UploadRequest};
