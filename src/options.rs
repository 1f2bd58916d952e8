//! Runtime configuration recognized by the core (§6).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tunables that shape timing and replication behavior. Defaults match the
/// spec exactly; embedders are expected to call [`RaftOptions::validate`]
/// (done automatically by [`RaftOptions::from_config`]) before handing the
/// options to [`crate::raft::Raft::bootstrap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftOptions {
    /// Minimum randomized election timeout, in milliseconds. The actual
    /// per-election value is sampled uniformly from
    /// `[election_timeout, 2 * election_timeout)`.
    pub election_timeout_ms: u64,

    /// Leader-to-follower heartbeat cadence, in milliseconds. Must be
    /// strictly less than `election_timeout_ms`.
    pub heartbeat_timeout_ms: u64,

    /// Timeout for an InstallSnapshot exchange, in milliseconds.
    pub install_snapshot_timeout_ms: u64,

    /// Log length at which the leader should take a snapshot.
    pub snapshot_threshold: u64,

    /// Number of trailing entries retained after a snapshot (so that a
    /// slightly lagging follower can still be caught up without a full
    /// snapshot transfer).
    pub snapshot_trailing: u64,

    /// Upper bound on pipelined, unacknowledged AppendEntries per follower.
    pub max_inflight_per_peer: u64,

    /// Tick cadence used by a host driving this instance in real time, in
    /// milliseconds. The deterministic simulation harness (`sim`) overrides
    /// this with its own fixed-step clock and does not read this field.
    pub tick_interval_ms: u64,
}

impl Default for RaftOptions {
    fn default() -> Self {
        RaftOptions {
            election_timeout_ms: 1000,
            heartbeat_timeout_ms: 100,
            install_snapshot_timeout_ms: 30_000,
            snapshot_threshold: 8192,
            snapshot_trailing: 4096,
            max_inflight_per_peer: 64,
            tick_interval_ms: 100,
        }
    }
}

impl RaftOptions {
    /// Validates the invariants implied by §6: heartbeats strictly inside
    /// the election window, a nonzero election timeout, and a sane
    /// snapshot-retention relationship.
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_ms == 0 {
            return Err(Error::InvalidArgument("election_timeout_ms must be nonzero".into()));
        }
        if self.heartbeat_timeout_ms >= self.election_timeout_ms {
            return Err(Error::InvalidArgument(
                "heartbeat_timeout_ms must be strictly less than election_timeout_ms".into(),
            ));
        }
        if self.max_inflight_per_peer == 0 {
            return Err(Error::InvalidArgument("max_inflight_per_peer must be nonzero".into()));
        }
        if self.snapshot_trailing > self.snapshot_threshold {
            return Err(Error::InvalidArgument(
                "snapshot_trailing must not exceed snapshot_threshold".into(),
            ));
        }
        Ok(())
    }

    /// Loads options from a config file overlaid with `RAFT_`-prefixed
    /// environment variables, falling back to [`Default::default`] for
    /// anything unset, mirroring how the teacher codebase's `Config::new`
    /// layers `config::File` and `config::Environment`.
    pub fn from_config(path: &str) -> Result<Self> {
        let defaults = RaftOptions::default();
        let built = config::Config::builder()
            .set_default("election_timeout_ms", defaults.election_timeout_ms)?
            .set_default("heartbeat_timeout_ms", defaults.heartbeat_timeout_ms)?
            .set_default("install_snapshot_timeout_ms", defaults.install_snapshot_timeout_ms)?
            .set_default("snapshot_threshold", defaults.snapshot_threshold)?
            .set_default("snapshot_trailing", defaults.snapshot_trailing)?
            .set_default("max_inflight_per_peer", defaults.max_inflight_per_peer)?
            .set_default("tick_interval_ms", defaults.tick_interval_ms)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("RAFT"))
            .build()?;
        let options: RaftOptions = built.try_deserialize()?;
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RaftOptions::default().validate().is_ok());
    }

    #[test]
    fn rejects_heartbeat_at_or_above_election_timeout() {
        let mut options = RaftOptions::default();
        options.heartbeat_timeout_ms = options.election_timeout_ms;
        assert!(options.validate().is_err());
    }

    #[test]
    fn rejects_trailing_greater_than_threshold() {
        let mut options = RaftOptions::default();
        options.snapshot_trailing = options.snapshot_threshold + 1;
        assert!(options.validate().is_err());
    }
}
