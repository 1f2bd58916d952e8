//! Deterministic multi-server simulation harness (§4.8): a virtual clock, a
//! network latency model, and an event-at-a-time driver, so that a whole
//! cluster's behavior over time is exactly reproducible from one run to the
//! next.
//!
//! Grounded in the reference test fixture's `raft_fixture_step` family
//! (`step`/`step_n`/`elect`/`depose`/`step_until_applied`): each `step()`
//! advances virtual time to the single earliest pending event across the
//! whole cluster and delivers exactly that one event.

use std::cell::Cell;
use std::rc::Rc;

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::configuration::{Configuration, Server};
use crate::entry::{LogEntry, Snapshot};
use crate::error::Result;
use crate::fsm::CounterFsm;
use crate::handle::ApplyHandle;
use crate::io::{IoEvent, Message, RaftIo, RequestToken};
use crate::options::RaftOptions;
use crate::raft::Raft;
use crate::role::RoleTag;

/// What kind of event a `step()` delivered, for assertions that care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Tick,
    Network,
    Disk,
}

/// One `step()`'s result: which server it was delivered to, and what kind
/// of event it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub server_index: usize,
    pub kind: EventKind,
}

/// The `RaftIo` used by every server in a [`Cluster`]. Time is a shared
/// handle the `Cluster` alone advances; everything this struct's `append`
/// and `send` issue is just buffered here until the `Cluster` drains it
/// into the cluster-wide schedule.
pub struct SimIo {
    clock: Rc<Cell<u64>>,
    rng: SmallRng,
    snapshot: Option<Snapshot>,
    outbox: Vec<(Message, RequestToken)>,
    append_queue: Vec<(RequestToken, std::result::Result<u64, String>)>,
}

impl SimIo {
    fn new(clock: Rc<Cell<u64>>, seed: u64) -> Self {
        SimIo { clock, rng: SmallRng::seed_from_u64(seed), snapshot: None, outbox: Vec::new(), append_queue: Vec::new() }
    }
}

impl RaftIo for SimIo {
    fn time(&self) -> u64 {
        self.clock.get()
    }

    fn random(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            lo
        } else {
            self.rng.gen_range(lo..hi)
        }
    }

    fn set_term(&mut self, _term: u64) -> Result<()> {
        Ok(())
    }

    fn set_vote(&mut self, _id: u64) -> Result<()> {
        Ok(())
    }

    fn append(&mut self, entries: Vec<LogEntry>, token: RequestToken) {
        let last_index = entries.last().map(|e| e.index).unwrap_or(0);
        self.append_queue.push((token, Ok(last_index)));
    }

    fn truncate(&mut self, _index: u64) -> Result<()> {
        Ok(())
    }

    fn snapshot_put(&mut self, snapshot: Snapshot) -> Result<()> {
        self.snapshot = Some(snapshot);
        Ok(())
    }

    fn snapshot_get(&self) -> Option<Snapshot> {
        self.snapshot.clone()
    }

    fn send(&mut self, message: Message, token: RequestToken) {
        self.outbox.push((message, token));
    }

    /// Never called: the `Cluster` drives every server's `tick`/
    /// `handle_message`/`handle_append_done` directly on its own schedule
    /// instead of looping on `poll`.
    fn poll(&mut self) -> Vec<IoEvent> {
        Vec::new()
    }
}

struct PendingNetwork {
    due: u64,
    target: usize,
    message: Message,
}

struct PendingDisk {
    due: u64,
    server: usize,
    token: RequestToken,
    result: std::result::Result<u64, String>,
}

/// A deterministic cluster of servers sharing one virtual clock (§4.8).
pub struct Cluster {
    servers: Vec<Raft<SimIo, CounterFsm>>,
    clock: Rc<Cell<u64>>,
    next_tick_due: Vec<u64>,
    network: Vec<PendingNetwork>,
    disk: Vec<PendingDisk>,
    tick_interval_ms: u64,
    election_timeout_ms: u64,
    network_latency_ms: u64,
    append_latency_ms: u64,
}

impl Cluster {
    /// Bootstraps an `n`-server voting cluster, every server starting as a
    /// FOLLOWER at term 0 with an empty log, `options` shared by all of
    /// them. `seed` drives every server's `SimIo` RNG (offset by id), so the
    /// whole run is reproducible end to end.
    pub fn new(n: u64, options: RaftOptions, seed: u64) -> Result<Self> {
        let servers_cfg: Vec<Server> =
            (0..n).map(|i| Server { id: i + 1, address: format!("127.0.0.1:{}", i + 1), voting: true }).collect();
        let configuration = Configuration::new(servers_cfg)?;
        let clock = Rc::new(Cell::new(0));

        let mut servers = Vec::with_capacity(n as usize);
        for i in 0..n {
            let id = i + 1;
            let io = SimIo::new(clock.clone(), seed.wrapping_add(id));
            servers.push(Raft::bootstrap(
                id,
                format!("127.0.0.1:{id}"),
                configuration.clone(),
                CounterFsm::new(),
                io,
                options,
            )?);
        }

        Ok(Cluster {
            next_tick_due: vec![options.tick_interval_ms; n as usize],
            servers,
            clock,
            network: Vec::new(),
            disk: Vec::new(),
            tick_interval_ms: options.tick_interval_ms,
            election_timeout_ms: options.election_timeout_ms,
            network_latency_ms: 15,
            append_latency_ms: 5,
        })
    }

    pub fn time(&self) -> u64 {
        self.clock.get()
    }

    pub fn server(&self, i: usize) -> &Raft<SimIo, CounterFsm> {
        &self.servers[i]
    }

    pub fn states(&self) -> Vec<RoleTag> {
        self.servers.iter().map(|s| s.role()).collect()
    }

    /// Proposes a COMMAND entry on server `i`, encoding `payload` as the
    /// caller's opaque bytes. `i` must currently be the leader.
    pub fn apply(&mut self, i: usize, payload: Bytes) -> Result<ApplyHandle> {
        let handle = self.servers[i].apply(payload)?;
        self.drain_io(i);
        Ok(handle)
    }

    /// Forces server `i` to become leader immediately: starts an election
    /// out of band and pumps the cluster until it wins (or until 5 election
    /// timeouts' worth of virtual time pass, which only happens if `i` is
    /// not actually able to reach a quorum).
    pub fn elect(&mut self, i: usize) -> Result<()> {
        self.servers[i].start_election()?;
        self.drain_io(i);
        let deadline_ms = 5 * 2 * self.election_timeout_ms;
        self.step_until(|c| c.servers[i].role() == RoleTag::Leader, deadline_ms)
    }

    /// Forces the current leader (if any) to step down right now.
    pub fn depose(&mut self) {
        if let Some(i) = self.servers.iter().position(|s| s.role() == RoleTag::Leader) {
            self.servers[i].force_step_down();
            self.drain_io(i);
        }
    }

    /// Steps until `predicate` holds or `deadline_ms` of additional virtual
    /// time has passed. Returns whether the predicate was satisfied.
    pub fn step_until(&mut self, predicate: impl Fn(&Cluster) -> bool, deadline_ms: u64) -> Result<()> {
        let cutoff = self.clock.get() + deadline_ms;
        while !predicate(self) {
            if self.clock.get() > cutoff || self.step()?.is_none() {
                return Err(crate::error::Error::Internal("step_until deadline exceeded".into()));
            }
        }
        Ok(())
    }

    /// Steps until every server has applied through `index`, or
    /// `deadline_ms` of additional virtual time passes.
    pub fn step_until_applied(&mut self, index: u64, deadline_ms: u64) -> bool {
        let cutoff = self.clock.get() + deadline_ms;
        loop {
            if self.servers.iter().all(|s| s.last_applied() >= index) {
                return true;
            }
            if self.clock.get() > cutoff {
                return false;
            }
            if self.step().ok().flatten().is_none() {
                return false;
            }
        }
    }

    pub fn step_n(&mut self, n: usize) -> Result<Option<Event>> {
        let mut last = None;
        for _ in 0..n {
            last = self.step()?;
        }
        Ok(last)
    }

    /// Advances virtual time to the single earliest pending event across
    /// the whole cluster and delivers exactly that one event.
    pub fn step(&mut self) -> Result<Option<Event>> {
        let earliest_tick = self.next_tick_due.iter().enumerate().min_by_key(|(_, &due)| due);
        let earliest_network = self.network.iter().enumerate().min_by_key(|(_, p)| p.due);
        let earliest_disk = self.disk.iter().enumerate().min_by_key(|(_, p)| p.due);

        let tick_due = earliest_tick.map(|(_, &due)| due);
        let network_due = earliest_network.map(|(_, p)| p.due);
        let disk_due = earliest_disk.map(|(_, p)| p.due);

        let min_due = [tick_due, network_due, disk_due].into_iter().flatten().min();
        let Some(min_due) = min_due else { return Ok(None) };

        if disk_due == Some(min_due) {
            let idx = earliest_disk.unwrap().0;
            let entry = self.disk.swap_remove(idx);
            self.clock.set(entry.due);
            let server = entry.server;
            self.servers[server].handle_append_done(entry.token, entry.result);
            self.drain_io(server);
            return Ok(Some(Event { server_index: server, kind: EventKind::Disk }));
        }

        if network_due == Some(min_due) {
            let idx = earliest_network.unwrap().0;
            let entry = self.network.swap_remove(idx);
            self.clock.set(entry.due);
            let target = entry.target;
            self.servers[target].handle_message(entry.message)?;
            self.drain_io(target);
            return Ok(Some(Event { server_index: target, kind: EventKind::Network }));
        }

        let idx = earliest_tick.unwrap().0;
        self.clock.set(min_due);
        self.next_tick_due[idx] = min_due + self.tick_interval_ms;
        self.servers[idx].tick()?;
        self.drain_io(idx);
        Ok(Some(Event { server_index: idx, kind: EventKind::Tick }))
    }

    /// Moves every message `server_index` has queued for sending, and every
    /// append it has issued, onto the cluster-wide schedule.
    fn drain_io(&mut self, server_index: usize) {
        let now = self.clock.get();
        let outbox: Vec<(Message, RequestToken)> = self.servers[server_index].io.outbox.drain(..).collect();
        let append_queue: Vec<(RequestToken, std::result::Result<u64, String>)> =
            self.servers[server_index].io.append_queue.drain(..).collect();

        for (message, _token) in outbox {
            if let Some(target) = self.servers.iter().position(|s| s.id() == message.to_id) {
                self.network.push(PendingNetwork { due: now + self.network_latency_ms, target, message });
            }
        }
        for (token, result) in append_queue {
            self.disk.push(PendingDisk { due: now + self.append_latency_ms, server: server_index, token, result });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_cadence_visits_every_server_round_robin() {
        let mut cluster = Cluster::new(3, RaftOptions::default(), 1).unwrap();
        let e0 = cluster.step().unwrap().unwrap();
        assert_eq!(e0.server_index, 0);
        assert_eq!(e0.kind, EventKind::Tick);
        assert_eq!(cluster.time(), 100);

        let e1 = cluster.step().unwrap().unwrap();
        assert_eq!(e1.server_index, 1);
        let e2 = cluster.step().unwrap().unwrap();
        assert_eq!(e2.server_index, 2);
        assert_eq!(cluster.time(), 100);

        let e3 = cluster.step().unwrap().unwrap();
        assert_eq!(e3.server_index, 0);
        assert_eq!(cluster.time(), 200);
    }

    #[test]
    fn forced_election_produces_a_lone_leader_with_an_ascension_barrier() {
        let mut cluster = Cluster::new(3, RaftOptions::default(), 1).unwrap();
        cluster.elect(0).unwrap();
        assert_eq!(cluster.states(), vec![RoleTag::Leader, RoleTag::Follower, RoleTag::Follower]);
        assert_eq!(cluster.server(0).log_last_index(), 1);
    }

    #[test]
    fn leadership_change_via_elect_depose_elect() {
        let mut cluster = Cluster::new(3, RaftOptions::default(), 7).unwrap();
        cluster.elect(0).unwrap();
        // Let the ascension barrier replicate before deposing, otherwise
        // server 1's empty log would correctly lose every subsequent
        // election to whichever voter already holds it.
        cluster.step_until(|c| c.server(1).log_last_index() >= 1 && c.server(2).log_last_index() >= 1, 2_000).unwrap();
        cluster.depose();
        cluster.elect(1).unwrap();
        assert_eq!(cluster.states(), vec![RoleTag::Follower, RoleTag::Leader, RoleTag::Follower]);
    }

    #[test]
    fn apply_one_entry_is_visible_on_every_fsm() {
        let mut cluster = Cluster::new(3, RaftOptions::default(), 3).unwrap();
        cluster.elect(0).unwrap();
        let _handle = cluster.apply(0, CounterFsm::encode_add(1)).unwrap();
        assert!(cluster.step_until_applied(2, 5_000));
        for i in 0..3 {
            assert_eq!(cluster.server(i).fsm().x, 1);
        }
    }

    #[test]
    fn apply_two_entries_advances_last_applied_on_every_server() {
        let mut cluster = Cluster::new(3, RaftOptions::default(), 5).unwrap();
        cluster.elect(0).unwrap();
        let _h1 = cluster.apply(0, CounterFsm::encode_add(1)).unwrap();
        let _h2 = cluster.apply(0, CounterFsm::encode_add(1)).unwrap();
        assert!(cluster.step_until_applied(3, 5_000));
        for i in 0..3 {
            assert_eq!(cluster.server(i).fsm().x, 2);
            assert_eq!(cluster.server(i).last_applied(), 3);
        }
    }
}
