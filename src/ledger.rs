//! Append-only record of remote items already fully processed for one save
//! directory.
//!
//! Each line is `<remote id>\t<RFC 3339 timestamp>\t<destination>`. Lines in
//! the older `youtube <id>` archive form are understood as well. The file is
//! read once per batch; entries appended by another process mid-batch are not
//! observed.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const LEDGER_FILE: &str = "_completed.txt";

/// One line of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRecord {
    pub remote_id: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub destination: Option<PathBuf>,
}

impl CompletionRecord {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        let head = fields.next()?.trim();
        let remote_id = head.split_whitespace().last()?.to_owned();
        let completed_at = fields
            .next()
            .and_then(|value| DateTime::parse_from_rfc3339(value.trim()).ok())
            .map(|value| value.with_timezone(&Utc));
        let destination = fields
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Some(Self {
            remote_id,
            completed_at,
            destination,
        })
    }

    fn to_line(&self) -> String {
        let timestamp = self
            .completed_at
            .map(|value| value.to_rfc3339())
            .unwrap_or_default();
        let destination = self
            .destination
            .as_deref()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}\t{}\t{}", self.remote_id, timestamp, destination)
    }
}

/// In-memory view of the ledger plus the file it appends to.
#[derive(Debug)]
pub struct CompletionLedger {
    path: PathBuf,
    entries: HashSet<String>,
}

impl CompletionLedger {
    /// Loads every identifier from `path`. A missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = read_records(&path)?
            .into_iter()
            .map(|record| record.remote_id)
            .collect();
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.entries.contains(remote_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `remote_id` unless it is already present. The line is synced
    /// to disk before returning. Returns whether a line was written.
    pub fn record(&mut self, remote_id: &str, destination: &Path) -> io::Result<bool> {
        if self.entries.contains(remote_id) {
            return Ok(false);
        }

        let record = CompletionRecord {
            remote_id: remote_id.to_owned(),
            completed_at: Some(Utc::now()),
            destination: Some(destination.to_path_buf()),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", record.to_line())?;
        file.sync_data()?;

        self.entries.insert(remote_id.to_owned());
        Ok(true)
    }
}

/// Reads the full records, in insertion order. Blank lines are ignored.
pub fn read_records(path: &Path) -> io::Result<Vec<CompletionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(record) = CompletionRecord::parse(&line) {
            records.push(record);
        }
    }
    Ok(records)
}
