//! Error kinds for the upload protocol core.
//!
//! Binaries and setup code wrap these in `anyhow` with context; the
//! protocol layers keep them typed so callers can tell a rejected upload
//! from a broken connection.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    /// First message of an upload was not a header.
    #[error("missing header: upload must start with a header frame")]
    MissingHeader,

    #[error("unexpected header: header already received for this upload")]
    UnexpectedHeader,

    #[error("failed to create file on server: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write received chunk data: {0}")]
    Write(#[source] io::Error),

    #[error("failed to read file data: {0}")]
    Read(#[source] io::Error),

    #[error("destination rejected: {0}")]
    PathRejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0} timeout ({1} ms)")]
    Timeout(&'static str, u64),

    #[error("got unexpected error: {0}")]
    Io(#[from] io::Error),

    /// The server answered the upload with a Failed result.
    #[error("{0}")]
    Rejected(String),

    #[error("cancelled by client: {0}")]
    Cancelled(String),

    #[error("connection closed mid-upload")]
    Disconnected,
}

impl UploadError {
    /// True when the error leaves the connection unusable for further uploads.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            UploadError::Protocol(_)
                | UploadError::Timeout(..)
                | UploadError::Io(_)
                | UploadError::Disconnected
        )
    }
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;
