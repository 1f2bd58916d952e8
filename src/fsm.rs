//! The user-supplied application state machine that interprets committed
//! entries. This crate only specifies the interface; what it does with a
//! command is entirely up to the embedder.

use bytes::Bytes;

/// Applies committed command entries in order, exactly once per server.
///
/// The core calls `apply` for each index in `(last_applied, commit_index]`
/// as `commit_index` advances (§4.5). BARRIER and CONFIGURATION entries are
/// never passed to the FSM — only COMMAND entries carry an opaque payload
/// meant for it.
pub trait Fsm {
    /// Applies `payload` at `index` and returns an opaque result. On the
    /// leader, this result is surfaced on the `apply` request handle that
    /// originated the command; on followers it is computed but discarded.
    fn apply(&mut self, index: u64, payload: &Bytes) -> Bytes;

    /// Serializes the current FSM state for inclusion in a snapshot.
    fn snapshot(&self) -> Bytes;

    /// Replaces the FSM's state with a previously snapshotted one, e.g.
    /// after receiving an InstallSnapshot RPC.
    fn restore(&mut self, state: &Bytes);
}

/// A trivial FSM used by unit and integration tests: it keeps a running
/// count of applied commands and, for commands encoding a single `u64`
/// delta, an accumulator `x` (mirroring the `add_x` fixture used by the
/// reference test suite's concrete scenarios).
#[derive(Debug, Default, Clone)]
pub struct CounterFsm {
    pub x: i64,
    pub applied: u64,
}

impl CounterFsm {
    pub fn new() -> Self {
        CounterFsm::default()
    }

    /// Encodes an `add_x(delta)` command.
    pub fn encode_add(delta: i64) -> Bytes {
        Bytes::copy_from_slice(&delta.to_le_bytes())
    }
}

impl Fsm for CounterFsm {
    fn apply(&mut self, _index: u64, payload: &Bytes) -> Bytes {
        if payload.len() == 8 {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(payload);
            self.x += i64::from_le_bytes(buf);
        }
        self.applied += 1;
        Bytes::copy_from_slice(&self.x.to_le_bytes())
    }

    fn snapshot(&self) -> Bytes {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&self.x.to_le_bytes());
        buf.extend_from_slice(&self.applied.to_le_bytes());
        Bytes::from(buf)
    }

    fn restore(&mut self, state: &Bytes) {
        if state.len() == 16 {
            let mut x_buf = [0u8; 8];
            let mut applied_buf = [0u8; 8];
            x_buf.copy_from_slice(&state[0..8]);
            applied_buf.copy_from_slice(&state[8..16]);
            self.x = i64::from_le_bytes(x_buf);
            self.applied = u64::from_le_bytes(applied_buf);
        }
    }
}
