//! Async frame I/O shared by the client and server.
//!
//! Works over any `AsyncRead`/`AsyncWrite` (TLS, plain TCP, in-memory
//! pipes). Every operation takes an optional deadline; `None` waits forever.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Result, UploadError};
use crate::message::{decode_payload, encode_payload, Chunk, FileHeader, TransferResult, UploadRequest};
use crate::protocol::{frame, FRAME_HEADER_LEN};
use crate::protocol_core::{build_frame_header, parse_frame_header, validate_frame_size};

/// Everything a client may put on the wire for one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    Request(UploadRequest),
    /// Half-close: the upload has no more data.
    Close,
    Cancel(String),
}

async fn with_deadline<F, T>(what: &'static str, deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        None => fut.await,
        Some(d) => match timeout(d, fut).await {
            Ok(res) => res,
            Err(_) => Err(UploadError::Timeout(what, d.as_millis() as u64)),
        },
    }
}

pub async fn write_frame<W>(stream: &mut W, t: u8, payload: &[u8], deadline: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    validate_frame_size(payload.len())?;
    with_deadline("frame write", deadline, async {
        let hdr = build_frame_header(t, payload.len() as u32);
        stream.write_all(&hdr).await?;
        if !payload.is_empty() {
            stream.write_all(payload).await?;
        }
        stream.flush().await?;
        Ok::<(), UploadError>(())
    })
    .await
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(stream: &mut R, deadline: Option<Duration>) -> Result<Option<(u8, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    with_deadline("frame read", deadline, async {
        let mut hdr = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < hdr.len() {
            let n = stream.read(&mut hdr[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(UploadError::Disconnected);
            }
            filled += n;
        }
        let (typ, len) = parse_frame_header(&hdr)?;
        let len = len as usize;
        validate_frame_size(len)?;
        let mut payload = vec![0u8; len];
        if len > 0 {
            stream.read_exact(&mut payload).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    UploadError::Disconnected
                } else {
                    UploadError::Io(e)
                }
            })?;
        }
        Ok::<_, UploadError>(Some((typ, payload)))
    })
    .await
}

pub fn decode_client_frame(typ: u8, payload: Vec<u8>) -> Result<ClientFrame> {
    match typ {
        frame::HEADER => Ok(ClientFrame::Request(UploadRequest::Header(decode_payload(
            "header", &payload,
        )?))),
        frame::CHUNK => Ok(ClientFrame::Request(UploadRequest::Chunk(Chunk::from(payload)))),
        frame::CLOSE => Ok(ClientFrame::Close),
        frame::CANCEL => Ok(ClientFrame::Cancel(String::from_utf8_lossy(&payload).into_owned())),
        other => Err(UploadError::Protocol(format!("unexpected client frame type: {}", other))),
    }
}

pub async fn read_client_frame<R>(stream: &mut R, deadline: Option<Duration>) -> Result<Option<ClientFrame>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(stream, deadline).await? {
        Some((typ, payload)) => decode_client_frame(typ, payload).map(Some),
        None => Ok(None),
    }
}

pub async fn write_header<W>(stream: &mut W, header: &FileHeader, deadline: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode_payload(header)?;
    write_frame(stream, frame::HEADER, &payload, deadline).await
}

pub async fn write_chunk<W>(stream: &mut W, data: &[u8], deadline: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(stream, frame::CHUNK, data, deadline).await
}

pub async fn write_close<W>(stream: &mut W, deadline: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(stream, frame::CLOSE, &[], deadline).await
}

pub async fn write_cancel<W>(stream: &mut W, reason: &str, deadline: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(stream, frame::CANCEL, reason.as_bytes(), deadline).await
}

pub async fn write_result<W>(stream: &mut W, result: &TransferResult, deadline: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode_payload(result)?;
    write_frame(stream, frame::RESULT, &payload, deadline).await
}

/// Read the server's terminal answer for the current upload.
pub async fn read_result<R>(stream: &mut R, deadline: Option<Duration>) -> Result<TransferResult>
where
    R: AsyncRead + Unpin,
{
    match read_frame(stream, deadline).await? {
        Some((frame::RESULT, payload)) => decode_payload("result", &payload),
        Some((other, _)) => Err(UploadError::Protocol(format!(
            "expected RESULT frame, got type {}",
            other
        ))),
        None => Err(UploadError::Disconnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAGIC;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_frames_survive_the_pipe() {
        let (mut a, mut b) = duplex(64 * 1024);
        let mut header = FileHeader::new("a.bin", 5);
        header.add("content-type", "unknown");

        write_header(&mut a, &header, None).await.unwrap();
        write_chunk(&mut a, b"hello", None).await.unwrap();
        write_close(&mut a, None).await.unwrap();
        drop(a);

        let f1 = read_client_frame(&mut b, None).await.unwrap().unwrap();
        assert_eq!(f1, ClientFrame::Request(UploadRequest::Header(header)));
        let f2 = read_client_frame(&mut b, None).await.unwrap().unwrap();
        assert_eq!(f2, ClientFrame::Request(UploadRequest::Chunk(Chunk::from(b"hello".to_vec()))));
        assert_eq!(read_client_frame(&mut b, None).await.unwrap(), Some(ClientFrame::Close));
        assert_eq!(read_client_frame(&mut b, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_inside_frame_is_disconnect() {
        let (mut a, mut b) = duplex(1024);
        a.write_all(&MAGIC[..]).await.unwrap();
        drop(a);
        let err = read_frame(&mut b, None).await.unwrap_err();
        assert!(matches!(err, UploadError::Disconnected));
    }

    #[tokio::test]
    async fn truncated_payload_is_disconnect() {
        let (mut a, mut b) = duplex(1024);
        let hdr = build_frame_header(frame::CHUNK, 100);
        a.write_all(&hdr).await.unwrap();
        a.write_all(&[0u8; 10]).await.unwrap();
        drop(a);
        let err = read_frame(&mut b, None).await.unwrap_err();
        assert!(matches!(err, UploadError::Disconnected));
    }

    #[tokio::test]
    async fn unknown_frame_type_is_rejected() {
        let err = decode_client_frame(99, Vec::new()).unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));
    }

    #[tokio::test]
    async fn read_deadline_fires() {
        let (_a, mut b) = duplex(1024);
        let err = read_frame(&mut b, Some(Duration::from_millis(20))).await.unwrap_err();
        assert!(matches!(err, UploadError::Timeout("frame read", 20)));
    }

    #[tokio::test]
    async fn result_expected_after_close() {
        let (mut a, mut b) = duplex(1024);
        write_chunk(&mut a, b"x", None).await.unwrap();
        let err = read_result(&mut b, None).await.unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));

        let failed = TransferResult::Failed { message: "boom".into() };
        write_result(&mut a, &failed, None).await.unwrap();
        assert_eq!(read_result(&mut b, None).await.unwrap(), failed);
    }
}
