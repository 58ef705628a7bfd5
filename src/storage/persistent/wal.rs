//! Write-ahead log of key/value mutations.
//!
//! Every mutation is appended (and optionally fsynced) before the in-memory
//! view changes. Opening a log replays it; a damaged or torn tail is cut off
//! so later appends stay readable.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-framed WalEntry]
//! [ENTRY 2: codec-framed WalEntry]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec;
use crate::storage::traits::{lock_err, StorageError};

/// A logged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum LogRecord {
    Put { key: String, value: Vec<u8> },
    Remove { key: String },
}

/// A record with its position in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub record: LogRecord,
}

#[derive(Debug)]
struct LogWriter {
    out: BufWriter<File>,
    sequence: u64,
}

/// Append-only mutation log. Thread-safe via an internal mutex.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Opens or creates the log at `path` and returns it with the entries
    /// that survived replay.
    pub fn open(path: &Path, sync_on_write: bool) -> Result<(Self, Vec<WalEntry>), StorageError> {
        let exists = path.exists() && fs::metadata(path)?.len() >= codec::HEADER_LEN;
        let entries = if exists {
            let (entries, valid_len) = scan(path)?;
            let file = OpenOptions::new().write(true).open(path)?;
            if file.metadata()?.len() > valid_len {
                tracing::warn!(
                    log = %path.display(),
                    kept = entries.len(),
                    valid_len,
                    "truncating damaged log tail"
                );
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            entries
        } else {
            let mut file = File::create(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            Vec::new()
        };

        let sequence = entries.last().map_or(0, |e| e.sequence);
        let file = OpenOptions::new().append(true).open(path)?;
        let log = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                out: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        };
        Ok((log, entries))
    }

    /// Appends a record and returns its sequence number.
    pub fn append(&self, record: LogRecord) -> Result<u64, StorageError> {
        let mut writer = self.writer.lock().map_err(|_| lock_err("log writer"))?;
        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            record,
        })?;

        writer.out.write_all(&encoded)?;
        writer.out.flush()?;
        if self.sync_on_write {
            writer.out.get_ref().sync_all()?;
        }
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Replaces the log with `records`.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new log intact.
    pub fn compact(&self, records: impl IntoIterator<Item = LogRecord>) -> Result<(), StorageError> {
        let mut writer = self.writer.lock().map_err(|_| lock_err("log writer"))?;
        writer.out.flush()?;

        let staging = self.path.with_extension("compact");
        let mut sequence = 0;
        {
            let mut out = BufWriter::new(File::create(&staging)?);
            codec::write_header(&mut out)?;
            let timestamp = Utc::now();
            for record in records {
                sequence += 1;
                out.write_all(&codec::encode(&WalEntry {
                    sequence,
                    timestamp,
                    record,
                })?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = LogWriter {
            out: BufWriter::new(file),
            sequence,
        };
        Ok(())
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> Result<u64, StorageError> {
        Ok(self.writer.lock().map_err(|_| lock_err("log writer"))?.sequence)
    }

    pub fn size_bytes(&self) -> Result<u64, StorageError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads every intact entry and the byte length they occupy.
fn scan(path: &Path) -> Result<(Vec<WalEntry>, u64), StorageError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut entries = Vec::new();
    let mut valid_len = codec::HEADER_LEN;
    while valid_len < file_len {
        match codec::decode::<WalEntry>(&mut reader) {
            Ok(entry) => {
                entries.push(entry);
                valid_len = reader.stream_position()?;
            }
            Err(e) if codec::is_torn(&e) => break,
            Err(e @ StorageError::Corrupted(_)) => {
                tracing::warn!(
                    log = %path.display(),
                    after_sequence = entries.last().map_or(0, |e: &WalEntry| e.sequence),
                    error = %e,
                    "corrupted log entry; replay stops here"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok((entries, valid_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn put(key: &str, value: &[u8]) -> LogRecord {
        LogRecord::Put {
            key: key.to_string(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.wal");
        {
            let (log, replayed) = WriteAheadLog::open(&path, false).unwrap();
            assert!(replayed.is_empty());
            log.append(put("a", b"1")).unwrap();
            log.append(LogRecord::Remove { key: "a".to_string() }).unwrap();
            assert_eq!(log.current_sequence().unwrap(), 2);
        }
        let (log, replayed) = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].record, put("a", b"1"));
        assert_eq!(log.current_sequence().unwrap(), 2);
    }

    #[test]
    fn test_torn_tail_is_cut_and_appends_survive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.wal");
        {
            let (log, _) = WriteAheadLog::open(&path, false).unwrap();
            log.append(put("a", b"1")).unwrap();
            log.append(put("b", b"2")).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        {
            let (log, replayed) = WriteAheadLog::open(&path, false).unwrap();
            assert_eq!(replayed.len(), 1);
            log.append(put("c", b"3")).unwrap();
        }
        let (_, replayed) = WriteAheadLog::open(&path, false).unwrap();
        let keys: Vec<_> = replayed
            .iter()
            .map(|e| match &e.record {
                LogRecord::Put { key, .. } | LogRecord::Remove { key } => key.clone(),
            })
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_compact_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.wal");
        let (log, _) = WriteAheadLog::open(&path, false).unwrap();
        for i in 0..10u8 {
            log.append(put("a", &[i])).unwrap();
        }
        let before = log.size_bytes().unwrap();
        log.compact(vec![put("a", &[9])]).unwrap();
        assert!(log.size_bytes().unwrap() < before);
        assert_eq!(log.current_sequence().unwrap(), 1);
        log.append(put("b", b"x")).unwrap();
        drop(log);

        let (_, replayed) = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].record, put("a", &[9]));
        assert!(!path.with_extension("compact").exists());
    }
}
