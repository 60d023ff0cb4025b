//! Durable replicated command log
//!
//! A single append-only file holds `[entryLen:u32 LE][serialized LogEntry]`
//! records. Every append is fsynced before it is reported complete. On open
//! the file is scanned front to back and every record replays as an
//! append: a later record for the same index overwrites the earlier one
//! and invalidates the indices above it, which is how a tail overwritten
//! by a new leader reconciles with the append-only file. The in-memory
//! log is the dense sequence `[0..=maxIndex]` with index 0 always a
//! sentinel Noop; indices never written stay as gaps whose term reads
//! as 0.
//!
//! Indices are protocol-visible identifiers, so compaction never renumbers
//! entries: `truncate_before` is the only way to drop a prefix and is
//! expected to be paired with a snapshot pointer held by the consensus
//! module.

use crate::command::CommandError;
use bytes::{Buf, BufMut};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::RwLock;

/// Log file name inside a node's data directory
pub const LOG_FILE_NAME: &str = "raft.log";

/// `[index:u64][term:u64][kind:u8][cmdLen:u32]`
const ENTRY_HEADER_LEN: usize = 21;

/// Corruption guard: no record is larger than this
const MAX_ENTRY_LEN: u32 = 10 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// an LDAP mutation or config/ACL change
    Command = 0,
    /// a cluster membership change
    Config = 1,
    /// leader heartbeat / sentinel
    Noop = 2,
}

impl TryFrom<u8> for EntryKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(EntryKind::Command),
            1 => Ok(EntryKind::Config),
            2 => Ok(EntryKind::Noop),
            _ => Err(value),
        }
    }
}

/// One entry of the replicated log, immutable once appended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn noop(index: u64, term: u64) -> Self {
        LogEntry {
            index,
            term,
            kind: EntryKind::Noop,
            payload: Vec::new(),
        }
    }

    pub fn command(index: u64, term: u64, payload: Vec<u8>) -> Self {
        LogEntry {
            index,
            term,
            kind: EntryKind::Command,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENTRY_HEADER_LEN + self.payload.len());
        buf.put_u64_le(self.index);
        buf.put_u64_le(self.term);
        buf.put_u8(self.kind as u8);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<LogEntry, LogError> {
        if buf.remaining() < ENTRY_HEADER_LEN {
            return Err(LogError::Corrupted("entry shorter than header".into()));
        }
        let index = buf.get_u64_le();
        let term = buf.get_u64_le();
        let kind = EntryKind::try_from(buf.get_u8())
            .map_err(|k| LogError::Corrupted(format!("unknown entry kind {}", k)))?;
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(LogError::Corrupted("entry payload truncated".into()));
        }
        Ok(LogEntry {
            index,
            term,
            kind,
            payload: buf[..len].to_vec(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log corrupted: {0}")]
    Corrupted(String),

    #[error("log index out of range")]
    IndexOutOfRange,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<CommandError> for LogError {
    fn from(e: CommandError) -> Self {
        LogError::Corrupted(e.to_string())
    }
}

#[derive(Debug)]
struct LogInner {
    /// dense sequence, `entries[i]` holds index `first_index + i`;
    /// `None` marks an index that was never written (replay gap)
    entries: Vec<Option<LogEntry>>,
    /// first retained index, advanced by `truncate_before`
    first_index: u64,
    file: Option<File>,
}

/// The shared on-disk log
///
/// Reader-writer discipline: `append`, the truncations and `close` take the
/// write side; every query takes the read side. An append is observable
/// only after the record is both in memory and fsynced.
#[derive(Debug)]
pub struct RaftLog {
    inner: RwLock<LogInner>,
}

impl RaftLog {
    /// Open (or create) the log file and rebuild the in-memory sequence
    pub fn open(path: &Path) -> Result<RaftLog, LogError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let recovered = scan_log_file(&mut file)?;
        let max_index = recovered.keys().next_back().copied().unwrap_or(0);
        let mut entries: Vec<Option<LogEntry>> = Vec::with_capacity(max_index as usize + 1);
        for index in 0..=max_index {
            entries.push(recovered.get(&index).cloned());
        }
        if entries[0].is_none() {
            entries[0] = Some(LogEntry::noop(0, 0));
        }
        let gaps = entries.iter().filter(|e| e.is_none()).count();
        debug!(
            "log recovered: last_index={} records={} gaps={}",
            max_index,
            recovered.len(),
            gaps
        );
        Ok(RaftLog {
            inner: RwLock::new(LogInner {
                entries,
                first_index: 0,
                file: Some(file),
            }),
        })
    }

    /// Append one entry and fsync it; returns only after durability
    ///
    /// The entry's index must be exactly `last_index() + 1`: the consensus
    /// module owns index assignment and the log never renumbers.
    pub fn append(&self, entry: LogEntry) -> Result<(), LogError> {
        let mut inner = self.write();
        if entry.index != inner.next_index() {
            return Err(LogError::IndexOutOfRange);
        }
        if inner.file.is_none() {
            return Err(LogError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "log file closed",
            )));
        }
        let record = entry.to_bytes();
        inner.entries.push(Some(entry));
        let file = inner
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "log file closed"))?;
        let mut framed = Vec::with_capacity(4 + record.len());
        framed.put_u32_le(record.len() as u32);
        framed.put_slice(&record);
        file.write_all(&framed)?;
        file.sync_data()?;
        Ok(())
    }

    /// The entry at `index`; a gap or truncated index is out of range
    pub fn get(&self, index: u64) -> Result<LogEntry, LogError> {
        let inner = self.read();
        inner.at(index).cloned().ok_or(LogError::IndexOutOfRange)
    }

    /// Index of the newest entry
    pub fn last_index(&self) -> u64 {
        self.read().last_index()
    }

    /// Term of the newest entry, 0 when absent
    pub fn last_term(&self) -> u64 {
        let inner = self.read();
        inner.term_at(inner.last_index())
    }

    /// Term of the entry at `index`, 0 when absent
    pub fn term_at(&self, index: u64) -> u64 {
        self.read().term_at(index)
    }

    /// A copy of the suffix `[index..]`, so callers can iterate without
    /// holding the log lock; gaps are skipped
    pub fn get_from(&self, index: u64) -> Vec<LogEntry> {
        let inner = self.read();
        let start = index.max(inner.first_index);
        let mut out = Vec::new();
        let mut at = start;
        while at <= inner.last_index() {
            if let Some(entry) = inner.at(at) {
                out.push(entry.clone());
            }
            at += 1;
        }
        out
    }

    /// Drop `[index..]`, used when a follower's log conflicts with the
    /// leader's; the sentinel at index 0 is never dropped
    pub fn truncate_from(&self, index: u64) -> Result<(), LogError> {
        let mut inner = self.write();
        if index <= inner.first_index || index > inner.next_index() {
            return Err(LogError::IndexOutOfRange);
        }
        let keep = (index - inner.first_index) as usize;
        inner.entries.truncate(keep);
        Ok(())
    }

    /// Drop `[..index)` after a snapshot install; the remaining indices
    /// keep their values
    pub fn truncate_before(&self, index: u64) -> Result<(), LogError> {
        let mut inner = self.write();
        if index <= inner.first_index {
            return Ok(());
        }
        if index > inner.next_index() {
            return Err(LogError::IndexOutOfRange);
        }
        let drop = (index - inner.first_index) as usize;
        inner.entries.drain(..drop);
        inner.first_index = index;
        Ok(())
    }

    /// Flush and release the file handle
    pub fn close(&self) -> Result<(), LogError> {
        let mut inner = self.write();
        if let Some(file) = inner.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LogInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LogInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl LogInner {
    fn last_index(&self) -> u64 {
        self.first_index + self.entries.len() as u64 - 1
    }

    fn next_index(&self) -> u64 {
        self.first_index + self.entries.len() as u64
    }

    fn at(&self, index: u64) -> Option<&LogEntry> {
        if index < self.first_index || index > self.last_index() {
            return None;
        }
        self.entries[(index - self.first_index) as usize].as_ref()
    }

    fn term_at(&self, index: u64) -> u64 {
        self.at(index).map(|e| e.term).unwrap_or(0)
    }
}

/// Scan the whole file, replaying each record as an append
///
/// A record at index i overwrites an earlier record for i and invalidates
/// every index above i, exactly as the truncate-then-append of a new
/// leader did when the records were written. The scan stops at the first
/// unreadable record: clean EOF, a zero or oversize length prefix, a
/// short read, or a record that fails to parse. Everything replayed up to
/// that point is kept.
fn scan_log_file(file: &mut File) -> Result<BTreeMap<u64, LogEntry>, LogError> {
    let mut recovered = BTreeMap::new();
    let mut len_buf = [0u8; 4];
    loop {
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf);
        if len == 0 || len > MAX_ENTRY_LEN {
            warn!("log scan stopped at suspicious record length {}", len);
            break;
        }
        let mut record = vec![0u8; len as usize];
        match file.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!("log scan stopped at short record");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        match LogEntry::from_bytes(&record) {
            Ok(entry) => {
                let index = entry.index;
                recovered.insert(index, entry);
                let _ = recovered.split_off(&(index + 1));
            }
            Err(e) => {
                warn!("log scan stopped at unparseable record: {}", e);
                break;
            }
        }
    }
    Ok(recovered)
}
