//! Durable log and commit pipeline scenarios through the public API

use ldapd::backend::{Backend, Entry, MemoryBackend};
use ldapd::command::{Command, CommandType};
use ldapd::raft_log::{EntryKind, LogEntry, LogError, RaftLog, LOG_FILE_NAME};
use ldapd::replication::{apply_entry, LocalReplicator, Replicator};
use std::sync::Arc;
use std::time::Duration;

fn open_in(dir: &tempfile::TempDir) -> RaftLog {
    RaftLog::open(&dir.path().join(LOG_FILE_NAME)).expect("open log")
}

#[test]
fn test_hundred_appends_survive_reopen_and_truncation() {
    let dir = tempfile::tempdir().unwrap();
    {
        let log = open_in(&dir);
        for i in 1..=100u64 {
            let cmd = Command::put(0, format!("cn=user{},dc=example", i), vec![i as u8]);
            log.append(LogEntry::command(i, 1, cmd.to_bytes()))
                .expect("append");
            assert_eq!(log.last_index(), i);
        }
        log.close().unwrap();
    }
    {
        let log = open_in(&dir);
        assert_eq!(log.last_index(), 100);
        assert_eq!(log.term_at(50), 1);
        let entry = log.get(50).unwrap();
        assert_eq!(entry.index, 50);
        let cmd = Command::from_bytes(&entry.payload).unwrap();
        assert_eq!(cmd.command_type, CommandType::Put);
        assert_eq!(cmd.dn, "cn=user50,dc=example");

        // conflict with a new leader: drop the tail, write a new entry 60
        log.truncate_from(60).unwrap();
        assert_eq!(log.last_index(), 59);
        log.append(LogEntry::command(60, 2, vec![0xff])).unwrap();
        log.close().unwrap();
    }
    {
        let log = open_in(&dir);
        assert_eq!(log.last_index(), 60);
        assert_eq!(log.get(60).unwrap().term, 2);
        assert!(matches!(log.get(99), Err(LogError::IndexOutOfRange)));
    }
}

#[test]
fn test_snapshot_style_prefix_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_in(&dir);
    for i in 1..=20u64 {
        log.append(LogEntry::noop(i, 1)).unwrap();
    }
    log.truncate_before(10).unwrap();
    // indices are stable identifiers, nothing is renumbered
    assert_eq!(log.last_index(), 20);
    assert_eq!(log.get(10).unwrap().index, 10);
    assert!(matches!(log.get(9), Err(LogError::IndexOutOfRange)));
    assert_eq!(log.term_at(5), 0);
    let suffix = log.get_from(15);
    assert_eq!(suffix.len(), 6);
    assert_eq!(suffix[0].index, 15);
}

#[test]
fn test_commit_pipeline_rebuilds_state_machine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(LOG_FILE_NAME);
    {
        let log = Arc::new(RaftLog::open(&path).unwrap());
        let backend = Arc::new(MemoryBackend::new());
        let replicator = LocalReplicator::new(log.clone(), backend.clone());

        let mut suffix = Entry::new("dc=example,dc=com");
        suffix.set_attribute("objectClass", vec![b"domain".to_vec()]);
        replicator
            .submit(Command::put(0, "dc=example,dc=com", suffix.to_bytes()))
            .wait(Duration::from_secs(1))
            .unwrap();

        let mut bob = Entry::new("cn=bob,dc=example,dc=com");
        bob.set_attribute("cn", vec![b"bob".to_vec()]);
        replicator
            .submit(Command::put(0, "cn=bob,dc=example,dc=com", bob.to_bytes()))
            .wait(Duration::from_secs(1))
            .unwrap();
        replicator
            .submit(Command::delete(0, "cn=bob,dc=example,dc=com"))
            .wait(Duration::from_secs(1))
            .unwrap();
        log.close().unwrap();
    }
    // a fresh node replays the log into an empty backend
    let log = Arc::new(RaftLog::open(&path).unwrap());
    let backend = Arc::new(MemoryBackend::new());
    let replicator = LocalReplicator::new(log, backend.clone());
    assert_eq!(replicator.recover(), 3);
    assert!(backend.get(None, "dc=example,dc=com").is_ok());
    assert!(backend.get(None, "cn=bob,dc=example,dc=com").is_err());
}

#[test]
fn test_noop_and_config_entries_skip_the_state_machine() {
    let backend = MemoryBackend::new();
    apply_entry(&LogEntry::noop(1, 1), &backend).unwrap();
    let config_entry = LogEntry {
        index: 2,
        term: 1,
        kind: EntryKind::Config,
        payload: vec![1, 2, 3],
    };
    apply_entry(&config_entry, &backend).unwrap();
    assert!(backend.is_empty());
}
