//! The central per-server state machine (§3). `Raft<Io, F>` owns every piece
//! of volatile and durable-through-`Io` state; `election`, `replication` and
//! `membership` are free functions over `&mut Raft<Io, F>` rather than
//! inherent methods, so each concern stays in its own file while still
//! reading like ordinary methods at the call site.

use std::collections::HashMap;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::configuration::Configuration;
use crate::election;
use crate::entry::{LogEntry, Metadata, Snapshot};
use crate::error::{Error, Result};
use crate::fsm::Fsm;
use crate::handle::{ApplyHandle, BarrierHandle, MembershipHandle, PendingAppend, PendingRequests, PendingSend};
use crate::io::{
    AppendEntriesArgs, AppendEntriesResult, IoEvent, Message, MessageBody, RaftIo, RequestToken,
    RequestVoteArgs, RequestVoteResult, InstallSnapshotArgs, InstallSnapshotResult,
};
use crate::log::{LogStore, MemoryLog};
use crate::membership;
use crate::options::RaftOptions;
use crate::replication;
use crate::role::{Role, RoleTag};

/// A single server's view of the replicated state machine.
///
/// Generic over the I/O boundary (`Io`) and the embedder's application state
/// machine (`F`), so that swapping either never touches this module or
/// `election`/`replication`/`membership`.
pub struct Raft<Io: RaftIo, F: Fsm> {
    pub(crate) id: u64,
    pub(crate) address: String,
    pub(crate) io: Io,
    pub(crate) fsm: F,
    pub(crate) log: Box<dyn LogStore>,

    pub(crate) configuration: Configuration,
    pub(crate) committed_configuration: Configuration,
    /// Log index of an uncommitted CONFIGURATION entry, or 0 if none.
    pub(crate) uncommitted_configuration_index: u64,

    pub(crate) options: RaftOptions,
    pub(crate) metadata: Metadata,
    pub(crate) commit_index: u64,
    pub(crate) last_applied: u64,
    pub(crate) election_timer_start: u64,
    pub(crate) role: Role,

    next_token: u64,
    pub(crate) pending_sends: HashMap<RequestToken, PendingSend>,
    pending_appends: HashMap<RequestToken, PendingAppend>,
    pub(crate) pending: PendingRequests,

    pub(crate) last_snapshot: Option<Snapshot>,
    closed: bool,
}

impl<Io: RaftIo, F: Fsm> Raft<Io, F> {
    /// Starts a brand-new server: empty log, term 0, no vote cast. Every
    /// server in a freshly bootstrapped cluster must be constructed this way
    /// with an identical `configuration`.
    pub fn bootstrap(
        id: u64,
        address: String,
        configuration: Configuration,
        fsm: F,
        io: Io,
        options: RaftOptions,
    ) -> Result<Self> {
        configuration.validate()?;
        options.validate()?;
        let mut raft = Raft {
            id,
            address,
            io,
            fsm,
            log: Box::new(MemoryLog::new()),
            committed_configuration: configuration.clone(),
            configuration,
            uncommitted_configuration_index: 0,
            options,
            metadata: Metadata::default(),
            commit_index: 0,
            last_applied: 0,
            election_timer_start: 0,
            role: Role::init_follower(),
            next_token: 1,
            pending_sends: HashMap::new(),
            pending_appends: HashMap::new(),
            pending: PendingRequests::default(),
            last_snapshot: None,
            closed: false,
        };
        election::election_reset_timer(&mut raft);
        Ok(raft)
    }

    /// Restarts a server from state the embedder already loaded from
    /// persistent storage: the durable `metadata`, the reconstructed `log`,
    /// and, if one exists, the most recent `snapshot` (whose configuration
    /// and FSM state take precedence over whatever `fsm` was constructed
    /// with).
    pub fn restore(
        id: u64,
        address: String,
        metadata: Metadata,
        log: Box<dyn LogStore>,
        mut fsm: F,
        snapshot: Option<Snapshot>,
        io: Io,
        options: RaftOptions,
    ) -> Result<Self> {
        options.validate()?;
        let configuration = match &snapshot {
            Some(snapshot) => snapshot.configuration.clone(),
            None => Configuration::new(vec![crate::configuration::Server {
                id,
                address: address.clone(),
                voting: true,
            }])?,
        };
        let commit_index = snapshot.as_ref().map(|s| s.last_included_index).unwrap_or(0);
        if let Some(snapshot) = &snapshot {
            fsm.restore(&snapshot.fsm_state);
        }
        let mut raft = Raft {
            id,
            address,
            io,
            fsm,
            log,
            committed_configuration: configuration.clone(),
            configuration,
            uncommitted_configuration_index: 0,
            options,
            metadata,
            commit_index,
            last_applied: commit_index,
            election_timer_start: 0,
            role: Role::init_follower(),
            next_token: 1,
            pending_sends: HashMap::new(),
            pending_appends: HashMap::new(),
            pending: PendingRequests::default(),
            last_snapshot: snapshot,
            closed: false,
        };
        election::election_reset_timer(&mut raft);
        Ok(raft)
    }

    // ---- inspection -----------------------------------------------------

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> RoleTag {
        RoleTag::from(&self.role)
    }

    pub fn current_term(&self) -> u64 {
        self.metadata.current_term
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn fsm(&self) -> &F {
        &self.fsm
    }

    pub fn log_last_index(&self) -> u64 {
        self.log.last_index()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ---- client-facing operations (§5) -----------------------------------

    /// Proposes a COMMAND entry. Only the leader can do this; everyone else
    /// gets `Error::NotLeader`.
    pub fn apply(&mut self, command: Bytes) -> Result<ApplyHandle> {
        self.require_open()?;
        self.require_leader()?;
        let index = replication::propose(self, crate::entry::EntryKind::Command, command)?;
        let (tx, rx) = oneshot::channel();
        self.pending.applies.insert(index, tx);
        Ok(rx)
    }

    /// Proposes a BARRIER entry and returns a handle that resolves once
    /// everything proposed before it has committed.
    pub fn barrier(&mut self) -> Result<BarrierHandle> {
        self.require_open()?;
        self.require_leader()?;
        let index = replication::propose(self, crate::entry::EntryKind::Barrier, Bytes::new())?;
        let (tx, rx) = oneshot::channel();
        self.pending.barriers.insert(index, tx);
        Ok(rx)
    }

    pub fn add(&mut self, id: u64, address: String, voting: bool) -> Result<MembershipHandle> {
        self.require_open()?;
        membership::add_server(self, id, address, voting)
    }

    pub fn remove(&mut self, id: u64) -> Result<MembershipHandle> {
        self.require_open()?;
        membership::remove_server(self, id)
    }

    pub fn promote(&mut self, id: u64) -> Result<MembershipHandle> {
        self.require_open()?;
        membership::promote_server(self, id)
    }

    /// Closes the instance: every outstanding handle is resolved with
    /// `Error::Cancelled` and all further client operations are rejected.
    /// The embedder is expected to stop calling `tick`/`handle_message`
    /// afterward, though both are harmless no-ops once closed.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.fail_all(Error::Cancelled);
    }

    fn require_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    fn require_leader(&self) -> Result<()> {
        if !self.role.is_leader() {
            return Err(Error::NotLeader { leader_hint: self.current_leader_hint() });
        }
        Ok(())
    }

    // ---- event loop (§4.7) -----------------------------------------------

    /// Drains and handles everything the `Io` has ready: due ticks, inbound
    /// messages, and completions of previously issued `append`/`send`
    /// operations. Intended to be called in a loop by whatever drives this
    /// instance in real time; the simulation harness instead calls `tick`
    /// and `handle_message` directly on a controlled schedule.
    pub fn poll_io(&mut self) -> Result<()> {
        let events = self.io.poll();
        for event in events {
            match event {
                IoEvent::Tick => self.tick()?,
                IoEvent::Message(message) => self.handle_message(message)?,
                IoEvent::AppendDone(token, result) => self.handle_append_done(token, result),
                IoEvent::SendDone(token, result) => self.handle_send_done(token, result),
            }
        }
        Ok(())
    }

    /// Advances the role state machine by one tick: checks the election
    /// timer (FOLLOWER/CANDIDATE) or sends due heartbeats and checks quorum
    /// contact (LEADER).
    pub fn tick(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        match &self.role {
            Role::Follower { .. } | Role::Candidate { .. } => {
                if election::election_timer_expired(self) {
                    self.start_election()?;
                }
            }
            Role::Leader(_) => {
                replication::send_heartbeats_due(self)?;
                if !replication::leader_has_quorum_contact(self) {
                    info!("server {} stepping down: lost contact with a voting quorum", self.id);
                    self.role = Role::init_follower();
                    election::election_reset_timer(self);
                } else {
                    let catching_up: Vec<u64> = self
                        .configuration
                        .servers()
                        .iter()
                        .filter(|s| !s.voting)
                        .map(|s| s.id)
                        .collect();
                    for server_id in catching_up {
                        membership::drive_promotion(self, server_id)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Forces an election to start right now, bypassing the timer. Used by
    /// the simulation harness's `elect`; production embedders only ever
    /// reach this indirectly, by letting `tick` observe an expired timer.
    pub(crate) fn start_election(&mut self) -> Result<()> {
        let n_voting = self.configuration.num_voting();
        self.role = Role::init_candidate(n_voting);
        election::election_start(self)?;
        if self.candidate_has_quorum() {
            replication::on_become_leader(self)?;
        }
        Ok(())
    }

    fn candidate_has_quorum(&self) -> bool {
        let Role::Candidate { votes, .. } = &self.role else { return false };
        let n_voting = self.configuration.num_voting();
        votes.iter().filter(|v| **v).count() >= n_voting / 2 + 1
    }

    /// Dispatches a single inbound RPC or RPC reply.
    pub fn handle_message(&mut self, message: Message) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        match message.body {
            MessageBody::RequestVote(args) => {
                self.receive_request_vote(message.from_id, message.from_address, args)
            }
            MessageBody::RequestVoteResult(result) => {
                self.receive_request_vote_result(message.from_id, result)
            }
            MessageBody::AppendEntries(args) => {
                self.receive_append_entries(message.from_id, message.from_address, args)
            }
            MessageBody::AppendEntriesResult(result) => {
                self.receive_append_entries_result(message.from_id, result)
            }
            MessageBody::InstallSnapshot(args) => {
                self.receive_install_snapshot(message.from_id, message.from_address, args)
            }
            MessageBody::InstallSnapshotResult(result) => {
                self.receive_install_snapshot_result(message.from_id, result)
            }
        }
    }

    /// Forces a leader to step down immediately, without having actually
    /// lost quorum contact or observed a higher term. Used by the
    /// simulation harness's `depose`.
    pub(crate) fn force_step_down(&mut self) {
        if self.role.is_leader() {
            info!("server {} forced to step down", self.id);
        }
        self.role = Role::init_follower();
        election::election_reset_timer(self);
    }

    pub(crate) fn handle_append_done(&mut self, token: RequestToken, result: std::result::Result<u64, String>) {
        self.pending_appends.remove(&token);
        if let Err(err) = result {
            warn!("server {} log persistence failed, halting: {err}", self.id);
            self.closed = true;
            self.pending.fail_all(Error::IoFault(err));
        }
    }

    pub(crate) fn handle_send_done(&mut self, token: RequestToken, result: std::result::Result<(), String>) {
        let Some(pending) = self.pending_sends.remove(&token) else { return };
        if let Err(err) = result {
            debug!("server {} send failed (non-fatal): {err}", self.id);
            let peer_id = match pending {
                PendingSend::AppendEntries { peer_id } => Some(peer_id),
                PendingSend::InstallSnapshot { peer_id } => Some(peer_id),
                _ => None,
            };
            if let Some(peer_id) = peer_id {
                if let Some(leader) = self.role.leader_state_mut() {
                    if let Some(progress) = leader.progress.get_mut(&peer_id) {
                        progress.inflight_count = progress.inflight_count.saturating_sub(1);
                    }
                }
            }
        }
    }

    // ---- RPC receipt (§4.4, §4.5) -----------------------------------------

    /// Mirrors the reference's exact receipt ordering: a FOLLOWER that
    /// already knows a leader rejects outright, without adopting the term,
    /// rather than silently discarding the request — it still always sends
    /// a reply, just with `vote_granted = false`.
    fn receive_request_vote(&mut self, from_id: u64, from_address: String, args: RequestVoteArgs) -> Result<()> {
        let has_known_leader =
            matches!(&self.role, Role::Follower { current_leader_id, .. } if *current_leader_id != 0);

        let mut granted = false;
        if !has_known_leader {
            self.maybe_step_down(args.term)?;
            if args.term == self.metadata.current_term {
                granted = election::election_vote(self, &args)?;
            }
            // else: our term is still higher than the request's (a stale
            // candidate); granted stays false.
        }
        let term = self.metadata.current_term;
        self.reply_request_vote(from_id, from_address, term, granted)
    }

    fn receive_request_vote_result(&mut self, from_id: u64, result: RequestVoteResult) -> Result<()> {
        if result.term > self.metadata.current_term {
            self.maybe_step_down(result.term)?;
            return Ok(());
        }
        if !self.role.is_candidate() || result.term < self.metadata.current_term {
            return Ok(());
        }
        if result.vote_granted && election::election_tally(self, from_id) {
            replication::on_become_leader(self)?;
        }
        Ok(())
    }

    /// Receiver rules 1-2 (stale-term rejection, term adoption and
    /// demotion); rules 3-6 are `replication::handle_append_entries`.
    fn receive_append_entries(&mut self, from_id: u64, from_address: String, args: AppendEntriesArgs) -> Result<()> {
        if args.term < self.metadata.current_term {
            let result =
                AppendEntriesResult { term: self.metadata.current_term, success: false, last_log_index: self.log.last_index() };
            return self.reply_append_entries(from_id, from_address, result);
        }
        self.maybe_step_down(args.term)?;
        self.become_follower_of(args.leader_id);
        replication::handle_append_entries(self, from_address, args)
    }

    fn receive_append_entries_result(&mut self, from_id: u64, result: AppendEntriesResult) -> Result<()> {
        if result.term > self.metadata.current_term {
            self.maybe_step_down(result.term)?;
            return Ok(());
        }
        if !self.role.is_leader() || result.term < self.metadata.current_term {
            return Ok(());
        }
        replication::handle_append_entries_result(self, from_id, result)
    }

    fn receive_install_snapshot(&mut self, from_id: u64, from_address: String, args: InstallSnapshotArgs) -> Result<()> {
        if args.term < self.metadata.current_term {
            let term = self.metadata.current_term;
            return self.reply_install_snapshot(from_id, from_address, term, false);
        }
        self.maybe_step_down(args.term)?;
        self.become_follower_of(args.leader_id);
        self.install_snapshot(args.snapshot)?;
        let term = self.metadata.current_term;
        self.reply_install_snapshot(from_id, from_address, term, true)
    }

    fn receive_install_snapshot_result(&mut self, from_id: u64, result: InstallSnapshotResult) -> Result<()> {
        if result.term > self.metadata.current_term {
            self.maybe_step_down(result.term)?;
            return Ok(());
        }
        if !self.role.is_leader() {
            return Ok(());
        }
        if result.success {
            if let Some(snapshot) = self.last_snapshot.clone() {
                if let Some(leader) = self.role.leader_state_mut() {
                    if let Some(progress) = leader.progress.get_mut(&from_id) {
                        progress.match_index = snapshot.last_included_index;
                        progress.next_index = progress.match_index + 1;
                        progress.state = crate::role::ProgressState::Pipeline;
                    }
                }
                replication::advance_leader_commit_index(self)?;
            }
        }
        // on failure, the peer's progress stays in `Snapshot` state and the
        // next heartbeat tick will retry the transfer.
        Ok(())
    }

    // ---- shared helpers -----------------------------------------------

    /// Adopts `rpc_term` and steps down to FOLLOWER if it is higher than our
    /// current term. Leaves the current leader unknown (0); a subsequent
    /// AppendEntries/InstallSnapshot from the new term's leader fills it in.
    pub(crate) fn maybe_step_down(&mut self, rpc_term: u64) -> Result<()> {
        if rpc_term > self.metadata.current_term {
            self.io.set_term(rpc_term)?;
            self.io.set_vote(0)?;
            self.metadata.current_term = rpc_term;
            self.metadata.voted_for = 0;
            if !self.role.is_follower() {
                info!("server {} stepping down to follower: observed higher term {rpc_term}", self.id);
            }
            self.role = Role::init_follower();
            election::election_reset_timer(self);
        }
        Ok(())
    }

    fn become_follower_of(&mut self, leader_id: u64) {
        match &mut self.role {
            Role::Follower { current_leader_id, .. } => *current_leader_id = leader_id,
            _ => self.role = Role::Follower { current_leader_id: leader_id, timer: Default::default() },
        }
        election::election_reset_timer(self);
    }

    fn install_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        if snapshot.last_included_index <= self.last_applied {
            return Ok(());
        }
        self.fsm.restore(&snapshot.fsm_state);
        self.log = Box::new(MemoryLog::starting_at(snapshot.last_included_index + 1));
        self.commit_index = snapshot.last_included_index;
        self.last_applied = snapshot.last_included_index;
        self.configuration = snapshot.configuration.clone();
        self.committed_configuration = snapshot.configuration.clone();
        self.uncommitted_configuration_index = 0;
        self.pending.fail_up_to(snapshot.last_included_index, Error::LeadershipLost);
        if let Some(leader) = self.role.leader_state_mut() {
            leader.progress.clear();
        }
        self.last_snapshot = Some(snapshot);
        Ok(())
    }

    /// Appends `entry` to the local log, runs the membership optimistic-
    /// apply hook, and hands the entry to `Io` for durability. The in-memory
    /// mutation is already visible to the rest of the role state machine by
    /// the time this returns; `Io::append`'s eventual `AppendDone` is used
    /// only to detect a fatal persistence fault (see `handle_append_done`),
    /// not to gate anything on durability having completed. An embedding
    /// backed by a real disk-based `LogStore` would instead defer the
    /// mutation itself until that callback fires.
    pub(crate) fn append_entry(&mut self, entry: LogEntry) -> Result<()> {
        self.log.append(entry.clone())?;
        membership::on_entry_appended(self, &entry);
        let token = self.next_request_token();
        self.pending_appends.insert(token, PendingAppend::Leader);
        self.io.append(vec![entry], token);
        Ok(())
    }

    pub(crate) fn next_request_token(&mut self) -> RequestToken {
        let token = RequestToken(self.next_token);
        self.next_token += 1;
        token
    }

    pub(crate) fn reply_request_vote(
        &mut self,
        to_id: u64,
        to_address: String,
        term: u64,
        vote_granted: bool,
    ) -> Result<()> {
        debug!("server {} replying to RequestVote from {to_id} ({to_address}): granted={vote_granted}", self.id);
        let message = Message {
            from_id: self.id,
            from_address: self.address.clone(),
            to_id,
            body: MessageBody::RequestVoteResult(RequestVoteResult { term, vote_granted }),
        };
        let token = self.next_request_token();
        self.pending_sends.insert(token, PendingSend::RequestVoteResult { to: to_id });
        self.io.send(message, token);
        Ok(())
    }

    pub(crate) fn reply_append_entries(
        &mut self,
        to_id: u64,
        to_address: String,
        result: AppendEntriesResult,
    ) -> Result<()> {
        debug!(
            "server {} replying to AppendEntries from {to_id} ({to_address}): success={}",
            self.id, result.success
        );
        let message = Message {
            from_id: self.id,
            from_address: self.address.clone(),
            to_id,
            body: MessageBody::AppendEntriesResult(result),
        };
        let token = self.next_request_token();
        self.pending_sends.insert(token, PendingSend::AppendEntriesResult { to: to_id });
        self.io.send(message, token);
        Ok(())
    }

    pub(crate) fn reply_install_snapshot(
        &mut self,
        to_id: u64,
        to_address: String,
        term: u64,
        success: bool,
    ) -> Result<()> {
        debug!("server {} replying to InstallSnapshot from {to_id} ({to_address}): success={success}", self.id);
        let message = Message {
            from_id: self.id,
            from_address: self.address.clone(),
            to_id,
            body: MessageBody::InstallSnapshotResult(InstallSnapshotResult { term, success }),
        };
        let token = self.next_request_token();
        self.pending_sends.insert(token, PendingSend::InstallSnapshotResult { to: to_id });
        self.io.send(message, token);
        Ok(())
    }

    /// Discards the log suffix at or after `index`. Forbidden below
    /// `commit_index + 1`, since a committed entry must never be undone.
    pub(crate) fn truncate_log(&mut self, index: u64) -> Result<()> {
        if index <= self.commit_index {
            return Err(Error::Internal(format!(
                "refusing to truncate committed suffix at index {index} (commit_index={})",
                self.commit_index
            )));
        }
        self.log.truncate_from(index)?;
        membership::on_truncate_rollback(self, index);
        self.pending.fail_from(index, Error::LeadershipLost);
        self.io.truncate(index)?;
        Ok(())
    }

    /// Rebuilds leader progress tracking to match the current configuration
    /// after an optimistic membership change takes effect or is rolled
    /// back: newly absent servers are dropped, newly present ones start at
    /// `last_index + 1` (§4.6).
    pub(crate) fn rebuild_leader_progress(&mut self) {
        let last_index = self.log.last_index();
        let ids: std::collections::HashSet<u64> = self.configuration.servers().iter().map(|s| s.id).collect();
        if let Some(leader) = self.role.leader_state_mut() {
            leader.progress.retain(|id, _| ids.contains(id));
            leader.promotions.retain(|id, _| ids.contains(id));
            for id in &ids {
                leader.progress.entry(*id).or_insert_with(|| crate::role::PeerProgress::new(last_index + 1));
            }
        }
    }

    pub(crate) fn current_leader_hint(&self) -> u64 {
        match &self.role {
            Role::Follower { current_leader_id, .. } => *current_leader_id,
            Role::Candidate { .. } => 0,
            Role::Leader(_) => self.id,
        }
    }

    pub(crate) fn current_snapshot(&self) -> Option<Snapshot> {
        self.last_snapshot.clone().or_else(|| self.io.snapshot_get())
    }

    /// Takes a new snapshot once the log has grown past
    /// `options.snapshot_threshold`, then compacts the log prefix down to
    /// `options.snapshot_trailing` entries before the new boundary.
    pub(crate) fn maybe_snapshot(&mut self) -> Result<()> {
        if self.last_applied == 0 {
            return Ok(());
        }
        let retained = self.last_applied.saturating_sub(self.log.first_index()) + 1;
        if retained < self.options.snapshot_threshold {
            return Ok(());
        }
        let last_included_term = self.log.get(self.last_applied).map(|e| e.term).unwrap_or(0);
        let snapshot = Snapshot {
            last_included_index: self.last_applied,
            last_included_term,
            configuration: self.committed_configuration.clone(),
            fsm_state: self.fsm.snapshot(),
        };
        self.io.snapshot_put(snapshot.clone())?;
        let compact_to = self.last_applied.saturating_sub(self.options.snapshot_trailing);
        self.log.compact_to(compact_to);
        self.last_snapshot = Some(snapshot);
        debug!("server {} snapshotted through index {}", self.id, self.last_applied);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::single_server_cluster;

    #[test]
    fn bootstrap_starts_as_follower_at_term_zero() {
        let raft = single_server_cluster();
        assert_eq!(raft.role(), RoleTag::Follower);
        assert_eq!(raft.current_term(), 0);
    }

    #[test]
    fn single_voting_server_becomes_leader_on_first_election() {
        let mut raft = single_server_cluster();
        raft.start_election().unwrap();
        assert_eq!(raft.role(), RoleTag::Leader);
        assert_eq!(raft.current_term(), 1);
    }

    #[test]
    fn close_resolves_pending_apply_with_cancelled() {
        let mut raft = single_server_cluster();
        raft.start_election().unwrap();
        let handle = raft.apply(Bytes::from_static(b"x")).unwrap();
        raft.close();
        assert!(matches!(handle.try_recv(), Ok(Err(Error::Cancelled))));
        assert!(matches!(raft.apply(Bytes::from_static(b"y")), Err(Error::Shutdown)));
    }

    #[test]
    fn stale_request_vote_reply_is_ignored_by_a_leader() {
        let mut raft = single_server_cluster();
        raft.start_election().unwrap();
        let term = raft.current_term();
        raft.receive_request_vote_result(99, RequestVoteResult { term: term - 1, vote_granted: true }).unwrap();
        assert_eq!(raft.role(), RoleTag::Leader);
    }
}
