use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The kind of a log entry.
///
/// `BARRIER` carries no payload; it exists purely to force a commit-by-count
/// at a new leader's term (see `replication::advance_commit_index`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Command,
    Barrier,
    Configuration,
}

/// A single entry in the replicated log.
///
/// `index` and `term` are both 1-based; index 0 and term 0 both mean
/// "absent" and are used as sentinels by `LogStore::last_index`/`last_term`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub payload: Bytes,
}

impl LogEntry {
    pub fn command(index: u64, term: u64, payload: Bytes) -> Self {
        LogEntry { index, term, kind: EntryKind::Command, payload }
    }

    pub fn barrier(index: u64, term: u64) -> Self {
        LogEntry { index, term, kind: EntryKind::Barrier, payload: Bytes::new() }
    }

    pub fn configuration(index: u64, term: u64, payload: Bytes) -> Self {
        LogEntry { index, term, kind: EntryKind::Configuration, payload }
    }
}

/// Durable per-server metadata: current term and the id voted for (0 = none).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub current_term: u64,
    pub voted_for: u64,
}

/// A point-in-time snapshot of FSM state plus the log position it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub configuration: crate::configuration::Configuration,
    pub fsm_state: Bytes,
}
