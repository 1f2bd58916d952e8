//! A deterministic, single-threaded Raft consensus core.
//!
//! The core never touches a clock, an RNG, a disk or a socket directly —
//! every such effect is delegated to an embedder-supplied [`io::RaftIo`].
//! That boundary is what makes [`sim`]'s deterministic multi-server
//! simulation possible: the same `RaftIo` trait is implemented once by a
//! production transport/store and once by an in-memory virtual clock, and
//! the role state machine in [`raft`]/[`election`]/[`replication`]/
//! [`membership`] cannot tell the difference.

pub mod configuration;
pub mod election;
pub mod entry;
pub mod error;
pub mod fsm;
pub mod handle;
pub mod io;
pub mod log;
pub mod membership;
pub mod options;
pub mod raft;
pub mod replication;
pub mod role;
pub mod sim;

#[cfg(test)]
mod test_support;

pub use configuration::{Configuration, ConfigurationChange, Server};
pub use entry::{EntryKind, LogEntry, Metadata, Snapshot};
pub use error::{Error, Result};
pub use fsm::{CounterFsm, Fsm};
pub use handle::{ApplyHandle, BarrierHandle, MembershipHandle};
pub use io::{Message, MessageBody, RaftIo, RequestToken};
pub use log::{LogStore, MemoryLog};
pub use options::RaftOptions;
pub use raft::Raft;
pub use role::RoleTag;
