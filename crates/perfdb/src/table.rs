//! On-disk backing tables.

use crate::error::StoreError;
use crate::record::PerformanceRecord;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Persistent storage behind a store. Loaded in bulk, written by key.
pub trait BackingTable: Send + Sync + fmt::Debug {
    fn path(&self) -> &Path;

    /// All records in write order. Later records for a key supersede earlier ones.
    fn load(&self) -> Result<Vec<PerformanceRecord>, StoreError>;

    fn append(&self, record: &PerformanceRecord) -> Result<(), StoreError>;

    /// Replaces the whole table with `records`.
    fn rewrite(&self, records: &[&PerformanceRecord]) -> Result<(), StoreError>;
}

/// One JSON object per line; updates are appended.
#[derive(Debug, Clone)]
pub struct JsonLinesTable {
    path: PathBuf,
}

impl JsonLinesTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.clone(),
            source,
        }
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
            }
        }
        Ok(())
    }
}

impl BackingTable for JsonLinesTable {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<PerformanceRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for (idx, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<PerformanceRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping malformed performance record"
                ),
            }
        }
        Ok(records)
    }

    fn append(&self, record: &PerformanceRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        self.ensure_parent()?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_error(e))?;

        // Start on a fresh line if an interrupted writer left a torn one.
        let mut buf = String::with_capacity(line.len() + 2);
        if !ends_with_newline(&mut file).map_err(|e| self.write_error(e))? {
            buf.push('\n');
        }
        buf.push_str(&line);
        buf.push('\n');
        file.write_all(buf.as_bytes()).map_err(|e| self.write_error(e))?;
        Ok(())
    }

    fn rewrite(&self, records: &[&PerformanceRecord]) -> Result<(), StoreError> {
        self.ensure_parent()?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let file = fs::File::create(&tmp).map_err(|e| self.write_error(e))?;
        let mut writer = BufWriter::new(file);
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(writer, "{line}").map_err(|e| self.write_error(e))?;
        }
        writer.flush().map_err(|e| self.write_error(e))?;
        drop(writer);

        fs::rename(&tmp, &self.path).map_err(|e| self.write_error(e))?;
        Ok(())
    }
}

/// Whether `file` is empty or its last byte is a newline.
fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
