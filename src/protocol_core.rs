//! Shared protocol logic for the client and server halves
//!
//! Frame header building/parsing and destination path resolution live
//! here so both sides agree on them without touching the network.

use crate::error::{Result, UploadError};
use crate::protocol::{FRAME_HEADER_LEN, MAGIC, MAX_FRAME_SIZE, VERSION};
use std::path::{Component, Path, PathBuf};

/// How a client-supplied file name is mapped under the server root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PathPolicy {
    /// Plain lexical join: root/prefix components
    /// are dropped and `..` pops a component, so names can escape the root.
    Unrestricted,
    /// Reject traversal, absolute names and symlink escapes.
    #[default]
    Confined,
}

impl std::str::FromStr for PathPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "confined" => Ok(PathPolicy::Confined),
            "unrestricted" => Ok(PathPolicy::Unrestricted),
            other => Err(format!("unknown path policy '{}' (confined|unrestricted)", other)),
        }
    }
}

/// Resolve the destination for `name` under `root` according to `policy`.
pub fn resolve_destination(root: &Path, name: &str, policy: PathPolicy) -> Result<PathBuf> {
    match policy {
        PathPolicy::Unrestricted => Ok(lexical_join(root, Path::new(name))),
        PathPolicy::Confined => normalize_under_root(root, Path::new(name)),
    }
}

fn lexical_join(root: &Path, name: &Path) -> PathBuf {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    let mut out = root.to_path_buf();
    for component in name.components() {
        match component {
            Normal(s) => out.push(s),
            ParentDir => match out.components().next_back() {
                Some(Normal(_)) => {
                    out.pop();
                }
                // Can't climb above a filesystem root
                Some(RootDir) | Some(Prefix(_)) => {}
                _ => out.push(".."),
            },
            CurDir | RootDir | Prefix(_) => {}
        }
    }
    out
}

/// Normalize a path to be safely under a root directory.
/// This prevents path traversal attacks by:
/// 1. Rejecting absolute paths, parent directory components, and root/prefix components
/// 2. Rejecting NUL bytes and empty names
/// 3. On Windows, rejecting ':' in path components (ADS defense)
/// 4. Canonicalizing the final path to resolve symlinks
/// 5. Ensuring the result is under the canonical root
pub fn normalize_under_root(root: &Path, p: &Path) -> Result<PathBuf> {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    let path_str = p.to_string_lossy();
    if path_str.contains('\0') {
        return Err(UploadError::PathRejected("path contains NUL byte".into()));
    }

    let mut safe = PathBuf::new();
    for component in p.components() {
        match component {
            CurDir => {}
            Normal(s) => {
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err(UploadError::PathRejected(
                        "path component contains colon (potential ADS attack)".into(),
                    ));
                }
                safe.push(s);
            }
            ParentDir | RootDir | Prefix(_) => {
                return Err(UploadError::PathRejected(format!(
                    "path {:?} contains disallowed component: {:?}",
                    p, component
                )));
            }
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(UploadError::PathRejected("empty file name".into()));
    }

    let canon_root = root.canonicalize().map_err(|e| {
        UploadError::PathRejected(format!("server root {:?} unavailable: {}", root, e))
    })?;
    let joined = canon_root.join(&safe);

    // For existing paths, canonicalize to resolve symlinks
    // For new files, canonicalize parent then append filename
    let final_path = if joined.exists() {
        joined.canonicalize().map_err(|e| {
            UploadError::PathRejected(format!("failed to canonicalize {:?}: {}", joined, e))
        })?
    } else {
        match (joined.parent(), joined.file_name()) {
            (Some(parent), Some(file_name)) if parent.exists() => parent
                .canonicalize()
                .map_err(|e| {
                    UploadError::PathRejected(format!(
                        "failed to canonicalize parent {:?}: {}",
                        parent, e
                    ))
                })?
                .join(file_name),
            _ => joined,
        }
    };

    if !final_path.starts_with(&canon_root) {
        return Err(UploadError::PathRejected(format!(
            "path {:?} escapes root {:?}",
            p, root
        )));
    }

    Ok(final_path)
}

/// Validate frame payload size against protocol::MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > MAX_FRAME_SIZE {
        return Err(UploadError::Protocol(format!(
            "frame payload too large: {} bytes (max: {})",
            size, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; FRAME_HEADER_LEN] {
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = frame_type;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<(u8, u32)> {
    if &header[0..4] != MAGIC {
        return Err(UploadError::Protocol("invalid magic in frame header".into()));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(UploadError::Protocol(format!(
            "protocol version mismatch: got {}, expected {}",
            version, VERSION
        )));
    }

    let frame_type = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

    Ok((frame_type, payload_len))
}
