//! Promote/demote/add/remove via log entries; single-change invariant;
//! uncommitted-change rollback; promotion rounds (§4.6).

use crate::configuration::{Configuration, ConfigurationChange, Server};
use crate::entry::{EntryKind, LogEntry};
use crate::error::{Error, Result};
use crate::fsm::Fsm;
use crate::handle::MembershipHandle;
use crate::io::RaftIo;
use crate::raft::Raft;
use crate::role::PromotionRound;
use bytes::Bytes;
use log::info;
use tokio::sync::oneshot;

/// Number of consecutive successful catch-up rounds required before a
/// promotion's CONFIGURATION entry is appended.
const PROMOTION_ROUNDS_REQUIRED: u64 = 5;

/// Minimum fraction of the log a catching-up server must close within one
/// election timeout for a round to count as successful.
const PROMOTION_MIN_PROGRESS: u64 = 1;

/// Called whenever an entry is appended to the log, by the leader's own
/// proposal or by a follower processing AppendEntries. A CONFIGURATION entry
/// takes effect immediately (optimistically), ahead of its own commit.
pub fn on_entry_appended<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>, entry: &LogEntry) {
    if entry.kind != EntryKind::Configuration {
        return;
    }
    let new_configuration: Configuration = match bincode::deserialize(&entry.payload) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("server {} got malformed configuration entry: {err}", raft.id);
            return;
        }
    };
    raft.configuration = new_configuration;
    raft.uncommitted_configuration_index = entry.index;
    raft.rebuild_leader_progress();
    info!(
        "server {} adopted configuration at index {} ({} voting)",
        raft.id,
        entry.index,
        raft.configuration.num_voting()
    );
}

/// Called once `index` commits. Clears the uncommitted marker if this was
/// the pending change, snapshots the now-committed configuration for future
/// rollback, and resolves the requester's handle.
pub fn on_configuration_committed<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>, index: u64) {
    if raft.uncommitted_configuration_index == index {
        raft.uncommitted_configuration_index = 0;
    }
    raft.committed_configuration = raft.configuration.clone();
    if let Some(tx) = raft.pending.take_membership(index) {
        let _ = tx.send(Ok(()));
    }
}

/// Called when the log is truncated at or before an uncommitted
/// CONFIGURATION entry's index: the optimistic configuration is rolled back
/// to the last committed snapshot.
pub fn on_truncate_rollback<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>, truncate_from_index: u64) {
    if raft.uncommitted_configuration_index != 0 && raft.uncommitted_configuration_index >= truncate_from_index
    {
        raft.configuration = raft.committed_configuration.clone();
        raft.uncommitted_configuration_index = 0;
        raft.rebuild_leader_progress();
        info!("server {} rolled back uncommitted configuration change", raft.id);
    }
}

/// Proposes a configuration change. Only the leader may call this, and only
/// when no other change is still uncommitted.
pub fn propose_change<Io: RaftIo, F: Fsm>(
    raft: &mut Raft<Io, F>,
    change: ConfigurationChange,
) -> Result<MembershipHandle> {
    if !raft.role.is_leader() {
        return Err(Error::NotLeader { leader_hint: raft.current_leader_hint() });
    }
    if raft.uncommitted_configuration_index != 0 {
        return Err(Error::ConfigurationBusy);
    }
    let new_configuration = raft.configuration.with_change(&change)?;
    let payload = Bytes::from(bincode::serialize(&new_configuration)?);
    let index = crate::replication::propose(raft, EntryKind::Configuration, payload)?;
    let (tx, rx) = oneshot::channel();
    raft.pending.memberships.insert(index, tx);
    Ok(rx)
}

/// Begins (or continues) tracking a non-voting server's catch-up progress.
/// Called once per tick for every non-voting server currently being
/// promoted. When enough consecutive rounds succeed, proposes the promotion
/// to voting; when too many fail, abandons it.
pub fn drive_promotion<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>, server_id: u64) -> Result<()> {
    if !raft.role.is_leader() {
        return Ok(());
    }
    let now = raft.io.time();
    let election_timeout = raft.options.election_timeout_ms;
    let match_index = raft
        .role
        .leader_state()
        .and_then(|l| l.progress.get(&server_id))
        .map(|p| p.match_index)
        .unwrap_or(0);

    let Some(leader) = raft.role.leader_state_mut() else { return Ok(()) };
    let round = leader.promotions.entry(server_id).or_insert_with(|| PromotionRound {
        round_index: 0,
        round_start_time: now,
        match_index_at_round_start: match_index,
    });

    if now.saturating_sub(round.round_start_time) < election_timeout {
        return Ok(());
    }

    let progressed = match_index.saturating_sub(round.match_index_at_round_start) >= PROMOTION_MIN_PROGRESS
        || match_index >= raft.log.last_index();

    if progressed {
        round.round_index += 1;
        round.round_start_time = now;
        round.match_index_at_round_start = match_index;
        let completed_rounds = round.round_index;
        if completed_rounds >= PROMOTION_ROUNDS_REQUIRED || match_index >= raft.log.last_index() {
            raft.role.leader_state_mut().unwrap().promotions.remove(&server_id);
            propose_change(raft, ConfigurationChange::SetVoting { id: server_id, voting: true })?;
        }
    } else {
        raft.role.leader_state_mut().unwrap().promotions.remove(&server_id);
        log::warn!("server {} abandoned promotion of {server_id}: catch-up stalled", raft.id);
    }
    Ok(())
}

/// Adds a new, initially non-voting server and begins tracking its
/// catch-up progress.
pub fn add_server<Io: RaftIo, F: Fsm>(
    raft: &mut Raft<Io, F>,
    id: u64,
    address: String,
    voting: bool,
) -> Result<MembershipHandle> {
    if id == 0 {
        return Err(Error::InvalidArgument("server id must be nonzero".into()));
    }
    let handle = propose_change(raft, ConfigurationChange::Add(Server { id, address, voting }))?;
    if !voting {
        if let Some(leader) = raft.role.leader_state_mut() {
            leader.promotions.insert(
                id,
                PromotionRound { round_index: 0, round_start_time: raft.io.time(), match_index_at_round_start: 0 },
            );
        }
    }
    Ok(handle)
}

pub fn remove_server<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>, id: u64) -> Result<MembershipHandle> {
    propose_change(raft, ConfigurationChange::Remove(id))
}

pub fn promote_server<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>, id: u64) -> Result<MembershipHandle> {
    propose_change(raft, ConfigurationChange::SetVoting { id, voting: true })
}
