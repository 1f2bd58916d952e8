//! The abstract boundary to time, randomness, persistence and transport
//! (§4.7). The consensus core never touches a clock, an RNG, a disk or a
//! socket directly — it only ever goes through a `RaftIo`.

use crate::entry::{LogEntry, Snapshot};
use serde::{Deserialize, Serialize};

/// A monotonically increasing token minted by the core for every
/// asynchronous `append`/`send` it issues. The `RaftIo` implementation hands
/// the token back (via `IoEvent`) when the operation completes; the core's
/// request pool reclaims the slot at that point. No pointer or callback
/// closure ever needs to cross the boundary (see SPEC_FULL.md's
/// "callback-allocated request objects" note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub u64);

/// The four RPC kinds plus snapshot installation, addressed to a specific
/// peer by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from_id: u64,
    pub from_address: String,
    pub to_id: u64,
    pub body: MessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageBody {
    RequestVote(RequestVoteArgs),
    RequestVoteResult(RequestVoteResult),
    AppendEntries(AppendEntriesArgs),
    AppendEntriesResult(AppendEntriesResult),
    InstallSnapshot(InstallSnapshotArgs),
    InstallSnapshotResult(InstallSnapshotResult),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResult {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResult {
    pub term: u64,
    pub success: bool,
    pub last_log_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    pub term: u64,
    pub leader_id: u64,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResult {
    pub term: u64,
    pub success: bool,
}

/// Something the core must react to: a tick, an inbound message, or the
/// completion of a previously issued asynchronous operation.
#[derive(Debug, Clone)]
pub enum IoEvent {
    Tick,
    Message(Message),
    AppendDone(RequestToken, Result<u64, String>),
    SendDone(RequestToken, Result<(), String>),
}

/// The I/O contract consumed by the core (§4.7).
///
/// Synchronous methods (`set_term`, `set_vote`, `truncate`, the snapshot
/// pair) must be durable before they return. `append` and `send` are
/// fire-and-forget from the core's point of view: their outcome is reported
/// later through `poll`, tagged with the `RequestToken` the core minted when
/// issuing them, which is how the core tolerates stale completions racing a
/// role transition (§5).
pub trait RaftIo {
    /// Monotonic virtual or wall-clock time, in milliseconds.
    fn time(&self) -> u64;

    /// A pseudo-random integer in `[lo, hi)`.
    fn random(&mut self, lo: u64, hi: u64) -> u64;

    fn set_term(&mut self, term: u64) -> crate::error::Result<()>;

    fn set_vote(&mut self, id: u64) -> crate::error::Result<()>;

    /// Durably appends `entries`, completing `token` via `poll` once fsynced.
    fn append(&mut self, entries: Vec<LogEntry>, token: RequestToken);

    fn truncate(&mut self, index: u64) -> crate::error::Result<()>;

    fn snapshot_put(&mut self, snapshot: Snapshot) -> crate::error::Result<()>;

    fn snapshot_get(&self) -> Option<Snapshot>;

    /// Sends `message`, completing `token` via `poll` once the transport has
    /// released the buffer.
    fn send(&mut self, message: Message, token: RequestToken);

    /// Drains everything that has become ready since the last call:
    /// due ticks, inbound messages, and completions of previously issued
    /// `append`/`send` operations. Called once per iteration of the core's
    /// dispatch loop; never invoked reentrantly from within itself.
    fn poll(&mut self) -> Vec<IoEvent>;
}
