use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Failed,
}

/// One line of the server's JSONL upload record.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub peer: Option<String>,
    pub name: String,
    pub destination: Option<PathBuf>,
    pub declared_size: i64,
    pub bytes_written: u64,
    pub content_type: Option<String>,
    pub status: TransferStatus,
    pub error: Option<String>,
}

impl TransferLogEntry {
    pub fn now(name: &str, status: TransferStatus) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            peer: None,
            name: name.to_string(),
            destination: None,
            declared_size: 0,
            bytes_written: 0,
            content_type: None,
            status,
            error: None,
        }
    }
}

pub struct TransferLog {
    log_file_path: PathBuf,
    // Serializes appends from concurrent connection tasks
    lock: Mutex<()>,
}

impl TransferLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        TransferLog {
            log_file_path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn add_entry(&self, entry: &TransferLogEntry) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("transfer log lock poisoned"))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open transfer log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<TransferLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open transfer log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TransferLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
