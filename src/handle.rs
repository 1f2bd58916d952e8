//! Client-facing request bookkeeping: the pending-request tables that back
//! `apply`/`barrier`/`promote`/`add`/`remove`, and the token housekeeping for
//! outstanding `append`/`send` I/O operations (§5, §6).

use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::oneshot;

/// Completed with the FSM's result once the originating COMMAND entry is
/// applied; completed with an error if it is instead truncated away or the
/// instance closes first.
pub type ApplyHandle = oneshot::Receiver<Result<Bytes>>;

/// Completed once a no-op entry proposed after the `barrier()` call commits.
pub type BarrierHandle = oneshot::Receiver<Result<()>>;

/// Completed once the corresponding CONFIGURATION entry commits (or is
/// abandoned).
pub type MembershipHandle = oneshot::Receiver<Result<()>>;

/// What an in-flight `send` was for — purely for logging and for deciding
/// whether a transport fault warrants any follow-up action (generally none;
/// the normal heartbeat/replication loop will retry).
#[derive(Debug, Clone, Copy)]
pub enum PendingSend {
    RequestVote,
    RequestVoteResult { to: u64 },
    AppendEntries { peer_id: u64 },
    AppendEntriesResult { to: u64 },
    InstallSnapshot { peer_id: u64 },
    InstallSnapshotResult { to: u64 },
}

/// What an in-flight `append` was for. Followers reply to AppendEntries
/// synchronously rather than waiting on this crate's simplified durability
/// model (see DESIGN.md's Open Question on `append_entry`), so the only
/// case tracked here is the leader's own durability step.
#[derive(Debug, Clone)]
pub enum PendingAppend {
    Leader,
}

/// The tables of outstanding client operations, keyed by the log index whose
/// commit (or removal) resolves them.
#[derive(Default)]
pub struct PendingRequests {
    pub applies: BTreeMap<u64, oneshot::Sender<Result<Bytes>>>,
    pub barriers: BTreeMap<u64, oneshot::Sender<Result<()>>>,
    /// Keyed by the CONFIGURATION entry's log index.
    pub memberships: BTreeMap<u64, oneshot::Sender<Result<()>>>,
}

impl PendingRequests {
    /// Resolves every applies/barriers/memberships entry at or before
    /// `index` with `outcome`. Used both for successful commit (`outcome` is
    /// computed per-entry by the caller via `take_*`) and for closing.
    pub fn fail_up_to(&mut self, index: u64, err: Error) {
        let apply_keys: Vec<u64> = self.applies.range(..=index).map(|(k, _)| *k).collect();
        for key in apply_keys {
            if let Some(tx) = self.applies.remove(&key) {
                let _ = tx.send(Err(err.clone()));
            }
        }
        let barrier_keys: Vec<u64> = self.barriers.range(..=index).map(|(k, _)| *k).collect();
        for key in barrier_keys {
            if let Some(tx) = self.barriers.remove(&key) {
                let _ = tx.send(Err(err.clone()));
            }
        }
        let membership_keys: Vec<u64> = self.memberships.range(..=index).map(|(k, _)| *k).collect();
        for key in membership_keys {
            if let Some(tx) = self.memberships.remove(&key) {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    /// Resolves every entry at or after `index` with `err`. Used when the
    /// log is truncated (a conflicting leader overwrote our uncommitted
    /// suffix) or leadership is lost.
    pub fn fail_from(&mut self, index: u64, err: Error) {
        let apply_keys: Vec<u64> = self.applies.range(index..).map(|(k, _)| *k).collect();
        for key in apply_keys {
            if let Some(tx) = self.applies.remove(&key) {
                let _ = tx.send(Err(err.clone()));
            }
        }
        let barrier_keys: Vec<u64> = self.barriers.range(index..).map(|(k, _)| *k).collect();
        for key in barrier_keys {
            if let Some(tx) = self.barriers.remove(&key) {
                let _ = tx.send(Err(err.clone()));
            }
        }
        let membership_keys: Vec<u64> = self.memberships.range(index..).map(|(k, _)| *k).collect();
        for key in membership_keys {
            if let Some(tx) = self.memberships.remove(&key) {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    pub fn fail_all(&mut self, err: Error) {
        for (_, tx) in self.applies.split_off(&0) {
            let _ = tx.send(Err(err.clone()));
        }
        for (_, tx) in self.barriers.split_off(&0) {
            let _ = tx.send(Err(err.clone()));
        }
        for (_, tx) in self.memberships.split_off(&0) {
            let _ = tx.send(Err(err.clone()));
        }
    }

    pub fn take_apply(&mut self, index: u64) -> Option<oneshot::Sender<Result<Bytes>>> {
        self.applies.remove(&index)
    }

    pub fn take_barrier(&mut self, index: u64) -> Option<oneshot::Sender<Result<()>>> {
        self.barriers.remove(&index)
    }

    pub fn take_membership(&mut self, index: u64) -> Option<oneshot::Sender<Result<()>>> {
        self.memberships.remove(&index)
    }
}
