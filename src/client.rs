//! Client driver: one upload per file, strictly in sequence, over one
//! TLS connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::codec;
use crate::config::ClientSettings;
use crate::error::{Result, UploadError};
use crate::logger::Logger;
use crate::message::{FileHeader, TransferResult};
use crate::protocol::{timeouts, CONTENT_TYPE_KEY, DEFAULT_CHUNK_SIZE, MAX_FRAME_SIZE, SNIFF_LEN, UNKNOWN_CONTENT_TYPE};
use crate::sniff::sniff_content_type;
use crate::tls;

/// What to do with the remaining files once one fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UploadPolicy {
    /// Stop at the first failure.
    #[default]
    FailFast,
    /// Record the failure and move on, unless the connection itself broke.
    BestEffort,
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub completed: Vec<(PathBuf, u64)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Error)]
#[error("{}: {error}", path.display())]
pub struct UploadFailure {
    pub path: PathBuf,
    #[source]
    pub error: UploadError,
}

pub struct UploadClient<S> {
    stream: S,
    chunk_size: usize,
    deadline: Option<Duration>,
    logger: Arc<dyn Logger>,
}

impl<S> UploadClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, logger: Arc<dyn Logger>) -> Self {
        Self {
            stream,
            chunk_size: DEFAULT_CHUNK_SIZE,
            deadline: timeouts::frame_deadline(timeouts::FRAME_IO_SECS),
            logger,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_FRAME_SIZE);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Start a new upload on this connection.
    pub fn open_stream(&mut self) -> UploadStream<'_, S> {
        UploadStream {
            client: self,
            header_sent: false,
        }
    }

    /// Upload one file; returns the number of bytes sent.
    pub async fn upload_file(&mut self, path: &Path) -> Result<u64> {
        let mut file = File::open(path).await.map_err(UploadError::Read)?;
        let meta = file.metadata().await.map_err(UploadError::Read)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let mut header = FileHeader::new(name.clone(), meta.len() as i64);
        header.add(CONTENT_TYPE_KEY, sniff_file(&mut file).await?);

        let mut buf = vec![0u8; self.chunk_size];
        let mut stream = self.open_stream();
        stream.send_header(&header).await?;

        let mut sent = 0u64;
        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    // Keep the connection aligned: the server answers the cancel
                    stream.cancel(&e.to_string()).await?;
                    return Err(UploadError::Read(e));
                }
            };
            stream.send_chunk(&buf[..n]).await?;
            sent += n as u64;
        }

        match stream.close_and_recv().await? {
            TransferResult::Ok => {
                self.logger.send_complete(&name);
                Ok(sent)
            }
            TransferResult::Failed { message } => Err(UploadError::Rejected(message)),
        }
    }

    pub async fn upload_all(
        &mut self,
        paths: &[PathBuf],
        policy: UploadPolicy,
    ) -> std::result::Result<UploadReport, UploadFailure> {
        let mut report = UploadReport::default();
        for path in paths {
            match self.upload_file(path).await {
                Ok(bytes) => report.completed.push((path.clone(), bytes)),
                Err(error) => {
                    if policy == UploadPolicy::FailFast || error.breaks_connection() {
                        return Err(UploadFailure {
                            path: path.clone(),
                            error,
                        });
                    }
                    self.logger.error(&path.display().to_string(), &error.to_string());
                    report.failed.push((path.clone(), error.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Close the connection cleanly (TLS close_notify).
    pub async fn shutdown(mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

/// One upload in flight: header once, then chunks, then close.
pub struct UploadStream<'a, S> {
    client: &'a mut UploadClient<S>,
    header_sent: bool,
}

impl<'a, S> UploadStream<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn send_header(&mut self, header: &FileHeader) -> Result<()> {
        if self.header_sent {
            return Err(UploadError::UnexpectedHeader);
        }
        codec::write_header(&mut self.client.stream, header, self.client.deadline).await?;
        self.header_sent = true;
        Ok(())
    }

    pub async fn send_chunk(&mut self, data: &[u8]) -> Result<()> {
        if !self.header_sent {
            return Err(UploadError::MissingHeader);
        }
        codec::write_chunk(&mut self.client.stream, data, self.client.deadline).await
    }

    /// Half-close the upload and wait for the server's single answer.
    pub async fn close_and_recv(self) -> Result<TransferResult> {
        codec::write_close(&mut self.client.stream, self.client.deadline).await?;
        codec::read_result(&mut self.client.stream, self.client.deadline).await
    }

    pub async fn cancel(self, reason: &str) -> Result<TransferResult> {
        codec::write_cancel(&mut self.client.stream, reason, self.client.deadline).await?;
        codec::read_result(&mut self.client.stream, self.client.deadline).await
    }
}

/// Content type from the file's leading bytes; leaves the cursor at 0.
async fn sniff_file(file: &mut File) -> Result<&'static str> {
    let mut head = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    file.seek(std::io::SeekFrom::Start(0))
        .await
        .map_err(UploadError::Read)?;
    Ok(sniff_content_type(&head[..filled]).unwrap_or(UNKNOWN_CONTENT_TYPE))
}

/// Load credentials, then open the TLS connection to the server.
pub async fn connect(settings: &ClientSettings) -> anyhow::Result<TlsStream<TcpStream>> {
    let (cert, key) = tls::default_cert_paths(&settings.tls_dir);
    let creds = tls::load_credentials(&cert, &key)?;
    let config = tls::build_client_config(creds, settings.verify_server)?;
    let server_name = tls::server_name_for(settings.host())?;

    let tcp = timeout(
        Duration::from_millis(timeouts::CONNECT_MS),
        TcpStream::connect(&settings.endpoint),
    )
    .await
    .map_err(|_| anyhow!("Connection timeout"))?
    .with_context(|| format!("Failed to connect to uploader at {}", settings.endpoint))?;
    let _ = tcp.set_nodelay(true);

    let cx = TlsConnector::from(Arc::new(config));
    let stream = timeout(
        Duration::from_millis(timeouts::HANDSHAKE_MS),
        cx.connect(server_name, tcp),
    )
    .await
    .map_err(|_| anyhow!("TLS handshake timeout"))?
    .with_context(|| format!("TLS handshake with {} failed", settings.endpoint))?;
    Ok(stream)
}

/// Full client run: connect, upload every file per policy, close.
pub async fn run(settings: &ClientSettings, logger: Arc<dyn Logger>) -> anyhow::Result<UploadReport> {
    let stream = connect(settings).await?;
    let mut client = UploadClient::new(stream, logger)
        .with_chunk_size(settings.effective_chunk_size())
        .with_deadline(settings.io_deadline());
    let report = client.upload_all(&settings.files, settings.policy).await?;
    let _ = client.shutdown().await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_client_frame, ClientFrame};
    use crate::logger::{LogEvent, MemoryLogger};
    use crate::message::UploadRequest;
    use tokio::io::duplex;

    #[tokio::test]
    async fn chunk_before_header_is_refused_locally() {
        let (a, _b) = duplex(1024);
        let mut client = UploadClient::new(a, Arc::new(MemoryLogger::new()));
        let mut stream = client.open_stream();
        let err = stream.send_chunk(b"x").await.unwrap_err();
        assert!(matches!(err, UploadError::MissingHeader));

        stream.send_header(&FileHeader::new("a", 0)).await.unwrap();
        let err = stream.send_header(&FileHeader::new("b", 0)).await.unwrap_err();
        assert!(matches!(err, UploadError::UnexpectedHeader));
    }

    #[tokio::test]
    async fn upload_file_frames_header_chunks_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        let mut body = b"\x89PNG\r\n\x1a\n".to_vec();
        body.extend(std::iter::repeat(7u8).take(20));
        std::fs::write(&path, &body).unwrap();

        let (a, mut b) = duplex(64 * 1024);
        let logger = Arc::new(MemoryLogger::new());
        let mut client = UploadClient::new(a, logger.clone()).with_chunk_size(8);

        let server = tokio::spawn(async move {
            let mut frames = Vec::new();
            loop {
                let f = read_client_frame(&mut b, None).await.unwrap().unwrap();
                let done = f == ClientFrame::Close;
                frames.push(f);
                if done {
                    break;
                }
            }
            codec::write_result(&mut b, &TransferResult::Ok, None).await.unwrap();
            frames
        });

        let sent = client.upload_file(&path).await.unwrap();
        assert_eq!(sent, body.len() as u64);
        let frames = server.await.unwrap();

        match &frames[0] {
            ClientFrame::Request(UploadRequest::Header(h)) => {
                assert_eq!(h.name, "pic.png");
                assert_eq!(h.size, body.len() as i64);
                assert_eq!(h.get("content-type"), Some("image/png"));
            }
            other => panic!("expected header, got {:?}", other),
        }
        let mut data = Vec::new();
        for f in &frames[1..frames.len() - 1] {
            match f {
                ClientFrame::Request(UploadRequest::Chunk(c)) => {
                    assert!(c.data.len() <= 8);
                    data.extend_from_slice(&c.data);
                }
                other => panic!("expected chunk, got {:?}", other),
            }
        }
        assert_eq!(data, body);
        assert_eq!(logger.events(), vec![LogEvent::SendComplete("pic.png".into())]);
    }

    #[tokio::test]
    async fn empty_file_sends_no_chunks_and_unknown_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        let (a, mut b) = duplex(4096);
        let mut client = UploadClient::new(a, Arc::new(MemoryLogger::new()));
        let server = tokio::spawn(async move {
            let first = read_client_frame(&mut b, None).await.unwrap().unwrap();
            let second = read_client_frame(&mut b, None).await.unwrap().unwrap();
            codec::write_result(&mut b, &TransferResult::Ok, None).await.unwrap();
            (first, second)
        });

        assert_eq!(client.upload_file(&path).await.unwrap(), 0);
        let (first, second) = server.await.unwrap();
        match first {
            ClientFrame::Request(UploadRequest::Header(h)) => {
                assert_eq!(h.size, 0);
                assert_eq!(h.get("content-type"), Some("unknown"));
            }
            other => panic!("expected header, got {:?}", other),
        }
        assert_eq!(second, ClientFrame::Close);
    }

    #[tokio::test]
    async fn failed_result_becomes_rejected_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();

        let (a, mut b) = duplex(4096);
        let mut client = UploadClient::new(a, Arc::new(MemoryLogger::new()));
        tokio::spawn(async move {
            while let Some(f) = read_client_frame(&mut b, None).await.unwrap() {
                if f == ClientFrame::Close {
                    break;
                }
            }
            let failed = TransferResult::Failed { message: "no space".into() };
            codec::write_result(&mut b, &failed, None).await.unwrap();
        });

        let err = client.upload_file(&path).await.unwrap_err();
        assert!(matches!(err, UploadError::Rejected(ref m) if m == "no space"));
    }

    #[tokio::test]
    async fn missing_local_file_fails_before_any_frame() {
        let (a, mut b) = duplex(4096);
        let mut client = UploadClient::new(a, Arc::new(MemoryLogger::new()));
        let err = client.upload_file(Path::new("/definitely/not/here.txt")).await.unwrap_err();
        assert!(matches!(err, UploadError::Read(_)));
        drop(client);
        assert_eq!(read_client_frame(&mut b, None).await.unwrap(), None);
    }
}
