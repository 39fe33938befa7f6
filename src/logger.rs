use anyhow::Result;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

use crate::message::FileHeader;

/// Log sink injected into the client and server; every method defaults to a no-op.
pub trait Logger: Send + Sync {
    fn listening(&self, _addr: &SocketAddr) {}
    fn connection(&self, _peer: &SocketAddr) {}
    fn header(&self, _header: &FileHeader) {}
    fn uploaded(&self, _name: &str, _bytes: u64) {}
    fn upload_failed(&self, _name: &str, _msg: &str) {}
    fn send_complete(&self, _name: &str) {}
    fn warn(&self, _msg: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

/// Timestamped text lines to stderr or an append-only file.
pub struct TextLogger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(Box::new(f)),
        })
    }

    pub fn stderr() -> Self {
        Self {
            out: Mutex::new(Box::new(std::io::stderr())),
        }
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.out.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn listening(&self, addr: &SocketAddr) {
        self.line(&format!("server started: {}", addr));
    }
    fn connection(&self, peer: &SocketAddr) {
        self.line(&format!("connection from {}", peer));
    }
    fn header(&self, header: &FileHeader) {
        self.line(&format!("File size: {}", header.size));
        for entry in &header.metadata {
            self.line(&format!("Key: {}", entry.key));
            for value in &entry.values {
                self.line(&format!("    : {}", value));
            }
        }
    }
    fn uploaded(&self, name: &str, bytes: u64) {
        self.line(&format!("Uploaded: {} bytes={}", name, bytes));
    }
    fn upload_failed(&self, name: &str, msg: &str) {
        self.line(&format!("FAILED name={} msg={}", name, msg));
    }
    fn send_complete(&self, name: &str) {
        self.line(&format!("Send complete: {}", name));
    }
    fn warn(&self, msg: &str) {
        self.line(&format!("WARNING {}", msg));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEvent {
    Listening(SocketAddr),
    Connection(SocketAddr),
    Header(FileHeader),
    Uploaded { name: String, bytes: u64 },
    UploadFailed { name: String, msg: String },
    SendComplete(String),
    Warn(String),
    Error { context: String, msg: String },
}

/// Records events in memory; lets tests assert on what was logged.
#[derive(Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, ev: LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(ev);
        }
    }
}

impl Logger for MemoryLogger {
    fn listening(&self, addr: &SocketAddr) {
        self.push(LogEvent::Listening(*addr));
    }
    fn connection(&self, peer: &SocketAddr) {
        self.push(LogEvent::Connection(*peer));
    }
    fn header(&self, header: &FileHeader) {
        self.push(LogEvent::Header(header.clone()));
    }
    fn uploaded(&self, name: &str, bytes: u64) {
        self.push(LogEvent::Uploaded { name: name.to_string(), bytes });
    }
    fn upload_failed(&self, name: &str, msg: &str) {
        self.push(LogEvent::UploadFailed {
            name: name.to_string(),
            msg: msg.to_string(),
        });
    }
    fn send_complete(&self, name: &str) {
        self.push(LogEvent::SendComplete(name.to_string()));
    }
    fn warn(&self, msg: &str) {
        self.push(LogEvent::Warn(msg.to_string()));
    }
    fn error(&self, context: &str, msg: &str) {
        self.push(LogEvent::Error {
            context: context.to_string(),
            msg: msg.to_string(),
        });
    }
}
