//! Audit log of write attempts
//!
//! Every write or admin request is appended as a single JSON line, whether it
//! was allowed or not. Appends are serialized through one mutex so lines from
//! concurrent requests never interleave.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use derive_more::Display;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::web::metrics;

/// Environment name recorded for requests without a valid token
pub const UNAUTHORIZED_ENVIRONMENT: &str = "UNAUTHORIZED";

#[derive(Debug, Display)]
pub enum AuditError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        AuditError::Io(err)
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Serialization(err)
    }
}

impl std::error::Error for AuditError {}

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub environment: String,
    pub method: String,
    pub path: String,
    pub payload: Value,
    pub status_code: u16,
}

impl AuditEntry {
    pub fn new(environment: &str, method: &str, path: &str, body: &[u8], status_code: u16) -> Self {
        AuditEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            environment: environment.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            payload: audit_payload(method, body),
            status_code,
        }
    }
}

/// The request body as recorded: parsed JSON when possible, the raw text
/// otherwise, null for DELETE and empty bodies.
fn audit_payload(method: &str, body: &[u8]) -> Value {
    if body.is_empty() || method.eq_ignore_ascii_case("DELETE") {
        return Value::Null;
    }

    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Line writer that never lets a new entry continue a partially written one
struct LineWriter<W: Write> {
    out: W,
    torn: bool,
}

impl<W: Write> LineWriter<W> {
    fn new(out: W) -> LineWriter<W> {
        LineWriter { out, torn: false }
    }

    fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
        let result = self.write_line(line);
        self.torn = result.is_err();
        result
    }

    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        if self.torn {
            self.out.write_all(b"\n")?;
        }
        self.out.write_all(line)?;
        self.out.flush()
    }
}

pub struct AuditSink {
    path: Option<PathBuf>,
    file: Option<Mutex<LineWriter<File>>>,
}

impl AuditSink {
    /// Append to `path`, creating the file if necessary
    pub fn open(path: &Path) -> Result<AuditSink> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("Writing audit log to {}", path.display());

        Ok(AuditSink {
            path: Some(path.to_path_buf()),
            file: Some(Mutex::new(LineWriter::new(file))),
        })
    }

    /// A sink that drops every entry
    pub fn disabled() -> AuditSink {
        AuditSink {
            path: None,
            file: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one entry as a complete line
    pub fn record(&self, entry: &AuditEntry) -> Result<()> {
        let file = match self.file {
            Some(ref file) => file,
            None => return Ok(()),
        };

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        file.lock().append(&line)?;

        Ok(())
    }

    /// Append one entry; failures are logged and counted but never returned
    pub fn record_or_warn(&self, entry: &AuditEntry) {
        if let Err(e) = self.record(entry) {
            metrics::AUDIT_FAILURES.inc();
            log::warn!(
                "Failed to write audit entry for {} {} {}: {}",
                entry.environment,
                entry.method,
                entry.path,
                e
            );
        }
    }
}
