//! Commit pipeline between the protocol layer and the consensus module
//!
//! The protocol layer packages a mutation as a [`Command`] and hands it to
//! a [`Replicator`]; the returned [`CommitFuture`] resolves once the entry
//! is committed and applied, and the operation's response is held back
//! until then. The log itself is stateless with respect to LDAP semantics:
//! [`apply_entry`] deserializes a committed payload and invokes the
//! matching applier on the backend.
//!
//! [`LocalReplicator`] is the bundled single-node driver: append, commit
//! immediately, apply. A multi-node consensus module replaces it behind
//! the same trait.

use crate::backend::{Backend, BackendError, Entry};
use crate::command::{AclCommand, Command, CommandError, CommandType, ConfigCommand};
use crate::raft_log::{EntryKind, LogEntry, LogError, RaftLog};
use log::{debug, warn};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("commit wait timed out")]
    Timeout,

    #[error("replication pipeline closed")]
    Closed,

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("corrupt command payload: {0}")]
    Command(#[from] CommandError),

    #[error("apply failed: {0}")]
    Apply(#[from] BackendError),
}

/// Pending commit handle; `wait` blocks the calling worker
#[derive(Debug)]
pub struct CommitFuture {
    rx: mpsc::Receiver<Result<u64, ReplicationError>>,
}

impl CommitFuture {
    /// Create an unresolved future plus its resolver side
    pub fn pending() -> (CommitResolver, CommitFuture) {
        let (tx, rx) = mpsc::channel();
        (CommitResolver { tx }, CommitFuture { rx })
    }

    /// A future that is already resolved
    pub fn resolved(result: Result<u64, ReplicationError>) -> CommitFuture {
        let (resolver, future) = CommitFuture::pending();
        resolver.resolve(result);
        future
    }

    /// Block until the command is applied or the timeout elapses; the
    /// success value is the log index the command committed at
    pub fn wait(self, timeout: Duration) -> Result<u64, ReplicationError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ReplicationError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ReplicationError::Closed),
        }
    }
}

#[derive(Debug)]
pub struct CommitResolver {
    tx: mpsc::Sender<Result<u64, ReplicationError>>,
}

impl CommitResolver {
    pub fn resolve(self, result: Result<u64, ReplicationError>) {
        // the waiter may have given up already
        let _ = self.tx.send(result);
    }
}

/// Consensus-module entry point consumed by the protocol layer
pub trait Replicator: Send + Sync {
    fn submit(&self, command: Command) -> CommitFuture;
}

/// Apply one committed log entry to the backend
///
/// Noop and Config entries carry nothing for the state machine (membership
/// changes are consumed by the consensus module itself). The consensus
/// module tracks `lastApplied`; re-applying a Put or ModifyDn is
/// idempotent, re-applying a Delete reports the entry as already gone.
pub fn apply_entry(entry: &LogEntry, backend: &dyn Backend) -> Result<(), ReplicationError> {
    match entry.kind {
        EntryKind::Noop | EntryKind::Config => Ok(()),
        EntryKind::Command => {
            let command = Command::from_bytes(&entry.payload)?;
            apply_command(&command, backend)
        }
    }
}

pub fn apply_command(command: &Command, backend: &dyn Backend) -> Result<(), ReplicationError> {
    match command.command_type {
        CommandType::Put => {
            let entry = Entry::from_bytes(&command.entry_data)?;
            backend.apply_put(command.database_id, &command.dn, entry)?;
        }
        CommandType::Delete => {
            backend.apply_delete(command.database_id, &command.dn)?;
        }
        CommandType::ModifyDn => {
            let entry = Entry::from_bytes(&command.entry_data)?;
            // tolerate a re-applied rename whose source is already gone
            match backend.apply_delete(command.database_id, &command.old_dn) {
                Ok(()) | Err(BackendError::EntryNotFound) => {}
                Err(e) => return Err(e.into()),
            }
            backend.apply_put(command.database_id, &command.dn, entry)?;
        }
        CommandType::ConfigUpdate => {
            let config = ConfigCommand::from_bytes(&command.config_data)?;
            // configuration consumers live outside the core; the record is
            // validated here so corruption surfaces at apply time
            debug!(
                "config update applied: section={} version={}",
                config.section, config.version
            );
        }
        acl_type if acl_type.is_acl() => {
            let acl = AclCommand::from_bytes(&command.acl_data)?;
            debug!(
                "acl change applied: type={:?} version={} rules={}",
                acl_type,
                acl.version,
                acl.rules.len()
            );
        }
        other => {
            return Err(ReplicationError::Apply(BackendError::Other(format!(
                "unknown command type {:?}",
                other
            ))));
        }
    }
    Ok(())
}

/// Single-node replication driver
///
/// Appends to the durable log, treats the entry as committed immediately
/// (a single voter is its own majority) and applies it inline. The commit
/// future handed back is therefore already resolved.
pub struct LocalReplicator {
    log: Arc<RaftLog>,
    backend: Arc<dyn Backend>,
    term: u64,
    /// serializes index assignment with the append
    submit_lock: Mutex<()>,
}

impl std::fmt::Debug for LocalReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReplicator")
            .field("term", &self.term)
            .field("last_index", &self.log.last_index())
            .finish_non_exhaustive()
    }
}

impl LocalReplicator {
    pub fn new(log: Arc<RaftLog>, backend: Arc<dyn Backend>) -> Self {
        let term = log.last_term().max(1);
        LocalReplicator {
            log,
            backend,
            term,
            submit_lock: Mutex::new(()),
        }
    }

    /// Rebuild backend state by replaying every recovered entry
    pub fn recover(&self) -> usize {
        let mut applied = 0;
        for entry in self.log.get_from(1) {
            match apply_entry(&entry, &*self.backend) {
                Ok(()) => applied += 1,
                Err(e) => warn!("skipping log entry {} during recovery: {}", entry.index, e),
            }
        }
        applied
    }
}

impl Replicator for LocalReplicator {
    fn submit(&self, command: Command) -> CommitFuture {
        let _guard = self.submit_lock.lock().unwrap_or_else(|e| e.into_inner());
        let index = self.log.last_index() + 1;
        let entry = LogEntry::command(index, self.term, command.to_bytes());
        let result = self
            .log
            .append(entry.clone())
            .map_err(ReplicationError::from)
            .and_then(|()| apply_entry(&entry, &*self.backend))
            .map(|()| index);
        CommitFuture::resolved(result)
    }
}
