//! Upload messages: the per-file header, data chunks and the terminal result.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};
use crate::protocol::MAX_FRAME_SIZE;

/// One metadata key with its ordered values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub values: Vec<String>,
}

/// First message of an upload: destination name, declared size and metadata.
///
/// `size` is informational; the receiver never checks it against the bytes
/// actually written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub name: String,
    pub size: i64,
    pub metadata: Vec<MetadataEntry>,
}

impl FileHeader {
    pub fn new(name: impl Into<String>, size: i64) -> Self {
        Self {
            name: name.into(),
            size,
            metadata: Vec::new(),
        }
    }

    /// Append `value` to the first entry for `key`, or start a new entry.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.metadata.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.values.push(value),
            None => self.metadata.push(MetadataEntry {
                key: key.to_string(),
                values: vec![value],
            }),
        }
    }

    /// First value of the first entry for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|e| e.key == key)
            .and_then(|e| e.values.first())
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<u8>,
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self {
        Chunk { data }
    }
}

/// A client-to-server message within one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadRequest {
    Header(FileHeader),
    Chunk(Chunk),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Failed,
}

/// Terminal server answer, sent once per upload after the client closes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferResult {
    Ok,
    Failed { message: String },
}

impl TransferResult {
    pub fn failed(err: &UploadError) -> Self {
        TransferResult::Failed {
            message: err.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TransferResult::Ok => StatusCode::Ok,
            TransferResult::Failed { .. } => StatusCode::Failed,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            TransferResult::Ok => None,
            TransferResult::Failed { message } => Some(message),
        }
    }
}

fn payload_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_FRAME_SIZE as u64)
}

pub(crate) fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    payload_options()
        .serialize(value)
        .map_err(|e| UploadError::Protocol(format!("encode payload: {}", e)))
}

pub(crate) fn decode_payload<'a, T: Deserialize<'a>>(what: &str, bytes: &'a [u8]) -> Result<T> {
    payload_options()
        .deserialize(bytes)
        .map_err(|e| UploadError::Protocol(format!("malformed {} payload: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_appends_to_existing_key() {
        let mut h = FileHeader::new("a.txt", 3);
        h.add("content-type", "text/plain");
        h.add("x-tag", "one");
        h.add("content-type", "text/markdown");

        assert_eq!(h.metadata.len(), 2);
        assert_eq!(h.metadata[0].values, vec!["text/plain", "text/markdown"]);
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("x-tag"), Some("one"));
    }

    #[test]
    fn get_absent_key_is_none() {
        let h = FileHeader::new("a.txt", 0);
        assert_eq!(h.get("content-type"), None);
    }

    #[test]
    fn get_uses_first_matching_entry() {
        let h = FileHeader {
            name: "dup".into(),
            size: 0,
            metadata: vec![
                MetadataEntry { key: "k".into(), values: vec![] },
                MetadataEntry { key: "k".into(), values: vec!["second".into()] },
            ],
        };
        // First match has no values; lookup does not fall through
        assert_eq!(h.get("k"), None);
    }

    #[test]
    fn header_payload_preserves_metadata_order() {
        let mut h = FileHeader::new("report.pdf", 1 << 33);
        h.add("content-type", "application/pdf");
        h.add("b", "2");
        h.add("a", "1");
        let bytes = encode_payload(&h).unwrap();
        let back: FileHeader = decode_payload("header", &bytes).unwrap();
        assert_eq!(back, h);
        let keys: Vec<_> = back.metadata.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["content-type", "b", "a"]);
    }

    #[test]
    fn truncated_payload_is_protocol_error() {
        let h = FileHeader::new("name.bin", 10);
        let bytes = encode_payload(&h).unwrap();
        let err = decode_payload::<FileHeader>("header", &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));
    }

    #[test]
    fn result_status_and_message() {
        let ok = TransferResult::Ok;
        assert_eq!(ok.status(), StatusCode::Ok);
        assert_eq!(ok.error_message(), None);

        let failed = TransferResult::failed(&UploadError::MissingHeader);
        assert_eq!(failed.status(), StatusCode::Failed);
        assert!(failed.error_message().unwrap().contains("missing header"));
    }
}
