//! Leader per-follower progress, AppendEntries construction, matchIndex /
//! nextIndex discipline, commit advancement, and the apply pipeline (§4.5).

use crate::entry::EntryKind;
use crate::error::Result;
use crate::fsm::Fsm;
use crate::io::{
    AppendEntriesArgs, AppendEntriesResult, InstallSnapshotArgs, InstallSnapshotResult, Message,
    MessageBody, RaftIo,
};
use crate::log::LogStore;
use crate::raft::Raft;
use crate::role::{ProgressState, Role};
use log::{debug, info, warn};

/// Builds and sends an AppendEntries (or, if the peer has fallen behind the
/// retained log prefix, an InstallSnapshot) to `peer_id`, governed by its
/// current `next_index` and inflight cap.
pub fn replicate_to<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>, peer_id: u64) -> Result<()> {
    let Some(peer) = raft.configuration.get(peer_id).cloned() else { return Ok(()) };

    let (next_index, state, inflight_count) = {
        let Some(leader) = raft.role.leader_state() else { return Ok(()) };
        let Some(progress) = leader.progress.get(&peer_id) else { return Ok(()) };
        (progress.next_index, progress.state, progress.inflight_count)
    };

    if state != ProgressState::Snapshot && inflight_count >= raft.options.max_inflight_per_peer {
        // Too many unacknowledged sends outstanding: fall back to PROBE so
        // the peer is resynchronized one entry at a time before pipelining
        // resumes, rather than piling up further sends indefinitely.
        if let Some(leader) = raft.role.leader_state_mut() {
            if let Some(progress) = leader.progress.get_mut(&peer_id) {
                progress.state = ProgressState::Probe;
                progress.inflight_count = 0;
            }
        }
        return Ok(());
    }

    if next_index <= raft.log.first_index() && raft.log.first_index() > 1 {
        return send_install_snapshot(raft, &peer);
    }

    let prev_log_index = next_index.saturating_sub(1);
    let prev_log_term = if prev_log_index == 0 {
        0
    } else {
        match raft.log.get(prev_log_index) {
            Some(entry) => entry.term,
            None => return send_install_snapshot(raft, &peer),
        }
    };

    let entries: Vec<_> = match state {
        ProgressState::Probe => {
            // One entry at a time until the peer is known caught up.
            raft.log.get(next_index).cloned().into_iter().collect()
        }
        ProgressState::Pipeline => {
            let mut batch = Vec::new();
            let mut index = next_index;
            while let Some(entry) = raft.log.get(index) {
                batch.push(entry.clone());
                index += 1;
            }
            batch
        }
        ProgressState::Snapshot => Vec::new(),
    };

    let term = raft.metadata.current_term;
    let message = Message {
        from_id: raft.id,
        from_address: raft.address.clone(),
        to_id: peer.id,
        body: MessageBody::AppendEntries(AppendEntriesArgs {
            term,
            leader_id: raft.id,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: raft.commit_index,
        }),
    };
    let token = raft.next_request_token();
    raft.pending_sends.insert(token, crate::handle::PendingSend::AppendEntries { peer_id });
    raft.io.send(message, token);

    if let Some(leader) = raft.role.leader_state_mut() {
        if let Some(progress) = leader.progress.get_mut(&peer_id) {
            progress.inflight_count += 1;
        }
    }
    Ok(())
}

fn send_install_snapshot<Io: RaftIo, F: Fsm>(
    raft: &mut Raft<Io, F>,
    peer: &crate::configuration::Server,
) -> Result<()> {
    let snapshot = match raft.current_snapshot() {
        Some(snapshot) => snapshot,
        None => {
            warn!("server {} has no snapshot to send to {}", raft.id, peer.id);
            return Ok(());
        }
    };
    let term = raft.metadata.current_term;
    let message = Message {
        from_id: raft.id,
        from_address: raft.address.clone(),
        to_id: peer.id,
        body: MessageBody::InstallSnapshot(InstallSnapshotArgs { term, leader_id: raft.id, snapshot }),
    };
    let token = raft.next_request_token();
    raft.pending_sends.insert(token, crate::handle::PendingSend::InstallSnapshot { peer_id: peer.id });
    raft.io.send(message, token);
    if let Some(leader) = raft.role.leader_state_mut() {
        if let Some(progress) = leader.progress.get_mut(&peer.id) {
            progress.state = ProgressState::Snapshot;
            progress.inflight_count += 1;
        }
    }
    Ok(())
}

/// Sends a heartbeat (or real replication, if there's something new) to
/// every peer whose `last_contact_time` exceeds `heartbeat_timeout`.
/// Returns whether contact with a voting quorum is still within the
/// election timeout (the tick handler uses this for the leader step-down
/// check).
pub fn send_heartbeats_due<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>) -> Result<()> {
    let now = raft.io.time();
    let heartbeat_timeout = raft.options.heartbeat_timeout_ms;
    let peer_ids: Vec<u64> = {
        let Some(leader) = raft.role.leader_state() else { return Ok(()) };
        leader
            .progress
            .iter()
            .filter(|(_, progress)| now.saturating_sub(progress.last_contact_time) >= heartbeat_timeout)
            .map(|(id, _)| *id)
            .collect()
    };
    for peer_id in peer_ids {
        replicate_to(raft, peer_id)?;
    }
    Ok(())
}

/// Whether a voting quorum (including self) has been in contact within the
/// election timeout — the leader steps down if not (§4.3's "leader check").
pub fn leader_has_quorum_contact<Io: RaftIo, F: Fsm>(raft: &Raft<Io, F>) -> bool {
    let now = raft.io.time();
    let election_timeout = raft.options.election_timeout_ms;
    let Some(leader) = raft.role.leader_state() else { return true };
    let mut contacted = 1; // self
    for server in raft.configuration.voting_servers() {
        if server.id == raft.id {
            continue;
        }
        if let Some(progress) = leader.progress.get(&server.id) {
            if now.saturating_sub(progress.last_contact_time) < election_timeout {
                contacted += 1;
            }
        }
    }
    contacted >= raft.configuration.quorum()
}

/// Receiver-side handling of an AppendEntries RPC (§4.5 receiver rules
/// 3-6). Rules 1-2 (stale-term rejection, term adoption, demotion) are
/// applied by the central dispatcher in `raft.rs` before this is called.
pub fn handle_append_entries<Io: RaftIo, F: Fsm>(
    raft: &mut Raft<Io, F>,
    from_address: String,
    args: AppendEntriesArgs,
) -> Result<()> {
    let term = raft.metadata.current_term;

    if args.prev_log_index > 0 {
        match raft.log.get(args.prev_log_index) {
            Some(entry) if entry.term == args.prev_log_term => {}
            _ => {
                let result = AppendEntriesResult {
                    term,
                    success: false,
                    last_log_index: raft.log.last_index(),
                };
                return raft.reply_append_entries(args.leader_id, from_address, result);
            }
        }
    }

    let mut index = args.prev_log_index + 1;
    for entry in args.entries {
        if let Some(existing) = raft.log.get(index) {
            if existing.term != entry.term {
                raft.truncate_log(index)?;
                raft.append_entry(entry)?;
            }
            // else: identical entry already present, nothing to do.
        } else {
            raft.append_entry(entry)?;
        }
        index += 1;
    }
    let last_new_index = index - 1;

    if args.leader_commit > raft.commit_index {
        let new_commit = args.leader_commit.min(last_new_index.max(raft.commit_index));
        advance_follower_commit_index(raft, new_commit)?;
    }

    let result = AppendEntriesResult { term, success: true, last_log_index: last_new_index };
    raft.reply_append_entries(args.leader_id, from_address, result)
}

/// Leader-side handling of an AppendEntriesResult reply: nextIndex/matchIndex
/// discipline and, on success, a fresh attempt at advancing `commit_index`.
pub fn handle_append_entries_result<Io: RaftIo, F: Fsm>(
    raft: &mut Raft<Io, F>,
    from_id: u64,
    result: AppendEntriesResult,
) -> Result<()> {
    let now = raft.io.time();
    let prev_next_index = {
        let Some(leader) = raft.role.leader_state_mut() else { return Ok(()) };
        let Some(progress) = leader.progress.get_mut(&from_id) else { return Ok(()) };
        progress.last_contact_time = now;
        progress.inflight_count = progress.inflight_count.saturating_sub(1);
        progress.next_index
    };

    if result.success {
        let match_index = result.last_log_index;
        let next_index = if let Some(leader) = raft.role.leader_state_mut() {
            if let Some(progress) = leader.progress.get_mut(&from_id) {
                progress.match_index = progress.match_index.max(match_index);
                progress.next_index = progress.match_index + 1;
                progress.state = ProgressState::Pipeline;
                Some(progress.next_index)
            } else {
                None
            }
        } else {
            None
        };
        advance_leader_commit_index(raft)?;
        if let Some(next_index) = next_index {
            if raft.log.last_index() >= next_index {
                replicate_to(raft, from_id)?;
            }
        }
    } else {
        let backoff = if result.last_log_index > 0 {
            (result.last_log_index + 1).min(prev_next_index.saturating_sub(1).max(1))
        } else {
            prev_next_index.saturating_sub(1).max(1)
        };
        if let Some(leader) = raft.role.leader_state_mut() {
            if let Some(progress) = leader.progress.get_mut(&from_id) {
                progress.next_index = backoff.max(1);
                progress.state = ProgressState::Probe;
            }
        }
        replicate_to(raft, from_id)?;
    }
    Ok(())
}

/// Advances `commit_index` on a follower to `min(leader_commit, last new
/// entry index)`, applying anything newly committed.
pub fn advance_follower_commit_index<Io: RaftIo, F: Fsm>(
    raft: &mut Raft<Io, F>,
    new_commit: u64,
) -> Result<()> {
    if new_commit > raft.commit_index {
        raft.commit_index = new_commit;
        apply_committed(raft)?;
    }
    Ok(())
}

/// Advances `commit_index` to the highest `N > commit_index` backed by a
/// voting quorum's matchIndex *and* whose entry was written in the current
/// term — the term check is why a BARRIER entry is appended on leader
/// ascension (counting by quorum alone would risk re-committing, and then
/// silently losing, an earlier term's entries).
pub fn advance_leader_commit_index<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>) -> Result<bool> {
    let current_term = raft.metadata.current_term;
    let last_index = raft.log.last_index();
    if last_index <= raft.commit_index {
        return Ok(false);
    }

    let quorum = raft.configuration.quorum();
    let mut candidate = raft.commit_index;
    for n in (raft.commit_index + 1..=last_index).rev() {
        let Some(entry) = raft.log.get(n) else { continue };
        if entry.term != current_term {
            continue;
        }
        let mut count = 1; // self
        if let Some(leader) = raft.role.leader_state() {
            for server in raft.configuration.voting_servers() {
                if server.id == raft.id {
                    continue;
                }
                if leader.progress.get(&server.id).map(|p| p.match_index).unwrap_or(0) >= n {
                    count += 1;
                }
            }
        }
        if count >= quorum {
            candidate = n;
            break;
        }
    }

    if candidate > raft.commit_index {
        raft.commit_index = candidate;
        apply_committed(raft)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Applies every entry in `(last_applied, commit_index]` in order, firing
/// whatever client handle originated each COMMAND/BARRIER/CONFIGURATION
/// entry.
pub fn apply_committed<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>) -> Result<()> {
    while raft.last_applied < raft.commit_index {
        let index = raft.last_applied + 1;
        let Some(entry) = raft.log.get(index).cloned() else { break };
        match entry.kind {
            EntryKind::Command => {
                let result = raft.fsm.apply(index, &entry.payload);
                if let Some(tx) = raft.pending.take_apply(index) {
                    let _ = tx.send(Ok(result));
                }
            }
            EntryKind::Barrier => {
                if let Some(tx) = raft.pending.take_barrier(index) {
                    let _ = tx.send(Ok(()));
                }
            }
            EntryKind::Configuration => {
                crate::membership::on_configuration_committed(raft, index);
            }
        }
        raft.last_applied = index;
        debug!("server {} applied index {}", raft.id, index);
    }
    raft.maybe_snapshot()?;
    Ok(())
}

/// Appends `entry` to the leader's own log and broadcasts it. Returns the
/// assigned index. Used by `apply`/`barrier`/membership changes and by the
/// BARRIER appended on leader ascension.
pub fn propose<Io: RaftIo, F: Fsm>(
    raft: &mut Raft<Io, F>,
    kind: EntryKind,
    payload: bytes::Bytes,
) -> Result<u64> {
    let index = raft.log.last_index() + 1;
    let term = raft.metadata.current_term;
    let entry = crate::entry::LogEntry { index, term, kind, payload };
    raft.append_entry(entry)?;

    if let Some(leader) = raft.role.leader_state_mut() {
        if let Some(progress) = leader.progress.get_mut(&raft.id) {
            progress.match_index = index;
        }
    }

    let peer_ids: Vec<u64> = raft
        .configuration
        .servers()
        .iter()
        .filter(|s| s.id != raft.id)
        .map(|s| s.id)
        .collect();
    for peer_id in peer_ids {
        replicate_to(raft, peer_id)?;
    }

    if raft.configuration.num_voting() == 1 && raft.configuration.is_voting(raft.id) {
        advance_leader_commit_index(raft)?;
    }

    Ok(index)
}

/// Initializes per-follower progress and appends the ascension BARRIER, on
/// a CANDIDATE → LEADER transition.
pub fn on_become_leader<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>) -> Result<()> {
    let last_index = raft.log.last_index();
    raft.role = Role::init_leader();
    if let Some(leader) = raft.role.leader_state_mut() {
        for server in raft.configuration.servers() {
            leader
                .progress
                .insert(server.id, crate::role::PeerProgress::new(last_index + 1));
        }
        if let Some(progress) = leader.progress.get_mut(&raft.id) {
            progress.match_index = last_index;
        }
    }
    info!("server {} became leader for term {}", raft.id, raft.metadata.current_term);
    propose(raft, EntryKind::Barrier, bytes::Bytes::new())?;
    Ok(())
}
