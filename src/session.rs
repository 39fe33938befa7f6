//! Server side of one upload: header, chunks, then a single result.
//!
//! States: `AwaitHeader -> Receiving -> Completed`, with `Draining` taking
//! over after any error so the rest of the upload is consumed (and
//! discarded) before the one `TransferResult` goes back.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::UploadError;
use crate::logger::Logger;
use crate::message::{FileHeader, TransferResult, UploadRequest};
use crate::protocol_core::{resolve_destination, PathPolicy};

enum State {
    AwaitHeader,
    Receiving {
        file: File,
        dest: PathBuf,
        written: u64,
    },
    Draining {
        dest: Option<PathBuf>,
        written: u64,
        error: UploadError,
    },
}

/// Why the client stopped sending.
#[derive(Debug)]
pub enum SessionEnd {
    Close,
    Cancel(String),
    /// Transport failure or disconnect inside the upload.
    Aborted(UploadError),
}

/// What happened to one upload, for the result frame and the transfer log.
#[derive(Debug)]
pub struct SessionReport {
    pub header: Option<FileHeader>,
    pub destination: Option<PathBuf>,
    pub bytes_written: u64,
    pub result: TransferResult,
    /// The connection can't carry another upload.
    pub connection_broken: bool,
}

pub struct UploadSession<'a> {
    root: &'a Path,
    policy: PathPolicy,
    logger: &'a dyn Logger,
    header: Option<FileHeader>,
    state: State,
}

impl<'a> UploadSession<'a> {
    pub fn new(root: &'a Path, policy: PathPolicy, logger: &'a dyn Logger) -> Self {
        Self {
            root,
            policy,
            logger,
            header: None,
            state: State::AwaitHeader,
        }
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.state, State::Draining { .. })
    }

    /// Apply one client message. Errors move the session to draining
    /// rather than surfacing here; they are reported by `finish`.
    pub async fn accept(&mut self, req: UploadRequest) {
        let state = std::mem::replace(&mut self.state, State::AwaitHeader);
        self.state = self.step(state, req).await;
    }

    async fn step(&mut self, state: State, req: UploadRequest) -> State {
        match (state, req) {
            (draining @ State::Draining { .. }, _) => draining,
            (State::AwaitHeader, UploadRequest::Header(header)) => {
                let next = match self.create(&header).await {
                    Ok((file, dest)) => {
                        self.logger.header(&header);
                        State::Receiving {
                            file,
                            dest,
                            written: 0,
                        }
                    }
                    Err(error) => State::Draining {
                        dest: None,
                        written: 0,
                        error,
                    },
                };
                self.header = Some(header);
                next
            }
            (State::AwaitHeader, UploadRequest::Chunk(_)) => State::Draining {
                dest: None,
                written: 0,
                error: UploadError::MissingHeader,
            },
            (State::Receiving { dest, written, .. }, UploadRequest::Header(_)) => State::Draining {
                dest: Some(dest),
                written,
                error: UploadError::UnexpectedHeader,
            },
            (State::Receiving { mut file, dest, written }, UploadRequest::Chunk(chunk)) => {
                match file.write_all(&chunk.data).await {
                    Ok(()) => State::Receiving {
                        file,
                        dest,
                        written: written + chunk.data.len() as u64,
                    },
                    Err(e) => State::Draining {
                        dest: Some(dest),
                        written,
                        error: UploadError::Write(e),
                    },
                }
            }
        }
    }

    async fn create(&self, header: &FileHeader) -> Result<(File, PathBuf), UploadError> {
        let dest = resolve_destination(self.root, &header.name, self.policy)?;
        let file = File::create(&dest)
            .await
            .map_err(|source| UploadError::CreateFile {
                path: dest.clone(),
                source,
            })?;
        Ok((file, dest))
    }

    /// Close the destination and produce the single result for this upload.
    pub async fn finish(self, end: SessionEnd) -> SessionReport {
        let connection_broken = matches!(&end, SessionEnd::Aborted(e) if e.breaks_connection());

        let (destination, bytes_written, error) = match self.state {
            // First error wins over however the client ended the upload
            State::Draining { dest, written, error } => (dest, written, Some(error)),
            State::Receiving {
                mut file,
                dest,
                written,
            } => {
                let flushed = file.flush().await;
                drop(file);
                let error = match end {
                    SessionEnd::Close => flushed.err().map(UploadError::Write),
                    SessionEnd::Cancel(reason) => Some(UploadError::Cancelled(reason)),
                    SessionEnd::Aborted(e) => Some(e),
                };
                (Some(dest), written, error)
            }
            State::AwaitHeader => {
                let error = match end {
                    SessionEnd::Close => UploadError::MissingHeader,
                    SessionEnd::Cancel(reason) => UploadError::Cancelled(reason),
                    SessionEnd::Aborted(e) => e,
                };
                (None, 0, Some(error))
            }
        };

        let name = self.header.as_ref().map(|h| h.name.as_str()).unwrap_or("");
        let result = match &error {
            None => {
                self.logger.uploaded(name, bytes_written);
                TransferResult::Ok
            }
            Some(e) => {
                self.logger.upload_failed(name, &e.to_string());
                TransferResult::failed(e)
            }
        };

        SessionReport {
            header: self.header,
            destination,
            bytes_written,
            result,
            connection_broken,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogEvent, MemoryLogger};
    use crate::message::{Chunk, StatusCode};

    fn header(name: &str, size: i64) -> UploadRequest {
        let mut h = FileHeader::new(name, size);
        h.add("content-type", "unknown");
        UploadRequest::Header(h)
    }

    fn chunk(data: &[u8]) -> UploadRequest {
        UploadRequest::Chunk(Chunk::from(data.to_vec()))
    }

    #[tokio::test]
    async fn chunks_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let mut session = UploadSession::new(dir.path(), PathPolicy::Confined, &logger);

        session.accept(header("out.bin", 6)).await;
        let parts: [&[u8]; 4] = [b"ab", b"", b"cde", b"f"];
        for part in parts {
            session.accept(chunk(part)).await;
        }
        let report = session.finish(SessionEnd::Close).await;

        assert_eq!(report.result, TransferResult::Ok);
        assert_eq!(report.bytes_written, 6);
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"abcdef");
        assert!(logger
            .events()
            .contains(&LogEvent::Uploaded { name: "out.bin".into(), bytes: 6 }));
    }

    #[tokio::test]
    async fn chunk_before_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let mut session = UploadSession::new(dir.path(), PathPolicy::Confined, &logger);

        session.accept(chunk(b"data")).await;
        assert!(session.is_draining());
        // A late header must not resurrect the upload
        session.accept(header("late.txt", 4)).await;
        let report = session.finish(SessionEnd::Close).await;

        assert_eq!(report.result.status(), StatusCode::Failed);
        assert!(report.result.error_message().unwrap().contains("missing header"));
        assert!(!dir.path().join("late.txt").exists());
        assert!(!report.connection_broken);
    }

    #[tokio::test]
    async fn close_without_header_fails() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let session = UploadSession::new(dir.path(), PathPolicy::Confined, &logger);
        let report = session.finish(SessionEnd::Close).await;
        assert!(report.result.error_message().unwrap().contains("missing header"));
    }

    #[tokio::test]
    async fn second_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let mut session = UploadSession::new(dir.path(), PathPolicy::Confined, &logger);
        session.accept(header("a.txt", 1)).await;
        session.accept(header("b.txt", 1)).await;
        let report = session.finish(SessionEnd::Close).await;
        assert!(report.result.error_message().unwrap().contains("unexpected header"));
        assert_eq!(report.header.unwrap().name, "a.txt");
    }

    #[tokio::test]
    async fn create_failure_drains_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let mut session = UploadSession::new(dir.path(), PathPolicy::Confined, &logger);

        session.accept(header("no-such-dir/x.txt", 3)).await;
        session.accept(chunk(b"xyz")).await;
        let report = session.finish(SessionEnd::Close).await;

        let msg = report.result.error_message().unwrap().to_string();
        assert!(msg.contains("failed to create file on server"), "{msg}");
        assert_eq!(report.bytes_written, 0);
        // Metadata is only logged once the destination exists
        assert!(!logger.events().iter().any(|e| matches!(e, LogEvent::Header(_))));
    }

    #[tokio::test]
    async fn traversal_rejected_when_confined() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let mut session = UploadSession::new(dir.path(), PathPolicy::Confined, &logger);
        session.accept(header("../escape.txt", 0)).await;
        let report = session.finish(SessionEnd::Close).await;
        assert!(report.result.error_message().unwrap().contains("destination rejected"));
    }

    #[tokio::test]
    async fn cancel_reports_reason_and_keeps_connection() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let mut session = UploadSession::new(dir.path(), PathPolicy::Confined, &logger);
        session.accept(header("partial.bin", 10)).await;
        session.accept(chunk(b"12345")).await;
        let report = session.finish(SessionEnd::Cancel("disk on fire".into())).await;

        assert!(report.result.error_message().unwrap().contains("disk on fire"));
        assert!(!report.connection_broken);
        // Partial data stays where it landed
        assert_eq!(std::fs::read(dir.path().join("partial.bin")).unwrap(), b"12345");
    }

    #[tokio::test]
    async fn disconnect_breaks_connection() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let mut session = UploadSession::new(dir.path(), PathPolicy::Confined, &logger);
        session.accept(header("d.bin", 10)).await;
        let report = session.finish(SessionEnd::Aborted(UploadError::Disconnected)).await;
        assert!(report.connection_broken);
        assert_eq!(report.result.status(), StatusCode::Failed);
    }
}
