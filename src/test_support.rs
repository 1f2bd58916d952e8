//! Minimal fixtures for unit tests that live alongside the module they
//! exercise. The fuller deterministic harness with a shared virtual clock
//! and controllable latency lives in `sim`; this module is for tests that
//! only need a server or two and don't care about wall-clock realism.

#![cfg(test)]

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::configuration::{Configuration, Server};
use crate::entry::{LogEntry, Snapshot};
use crate::fsm::CounterFsm;
use crate::io::{IoEvent, Message, RaftIo, RequestToken};
use crate::options::RaftOptions;
use crate::raft::Raft;

/// A `RaftIo` with its own free-running logical clock and a seeded RNG.
/// `send` just records the message; tests that care about outgoing traffic
/// inspect `sent` directly instead of routing it anywhere.
pub struct TestIo {
    time: u64,
    rng: SmallRng,
    pub sent: Vec<Message>,
}

impl TestIo {
    pub fn new(seed: u64) -> Self {
        TestIo { time: 0, rng: SmallRng::seed_from_u64(seed), sent: Vec::new() }
    }

    pub fn advance(&mut self, millis: u64) {
        self.time += millis;
    }
}

impl RaftIo for TestIo {
    fn time(&self) -> u64 {
        self.time
    }

    fn random(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            lo
        } else {
            self.rng.gen_range(lo..hi)
        }
    }

    fn set_term(&mut self, _term: u64) -> crate::error::Result<()> {
        Ok(())
    }

    fn set_vote(&mut self, _id: u64) -> crate::error::Result<()> {
        Ok(())
    }

    fn append(&mut self, _entries: Vec<LogEntry>, _token: RequestToken) {}

    fn truncate(&mut self, _index: u64) -> crate::error::Result<()> {
        Ok(())
    }

    fn snapshot_put(&mut self, _snapshot: Snapshot) -> crate::error::Result<()> {
        Ok(())
    }

    fn snapshot_get(&self) -> Option<Snapshot> {
        None
    }

    fn send(&mut self, message: Message, _token: RequestToken) {
        self.sent.push(message);
    }

    fn poll(&mut self) -> Vec<IoEvent> {
        Vec::new()
    }
}

/// A single-voting-server cluster, for tests of the degenerate case where a
/// candidate is its own quorum.
pub fn single_server_cluster() -> Raft<TestIo, CounterFsm> {
    let configuration =
        Configuration::new(vec![Server { id: 1, address: "127.0.0.1:1".into(), voting: true }]).unwrap();
    Raft::bootstrap(1, "127.0.0.1:1".into(), configuration, CounterFsm::new(), TestIo::new(1), RaftOptions::default())
        .unwrap()
}

pub struct TestCluster {
    pub servers: Vec<Raft<TestIo, CounterFsm>>,
}

/// An `n`-server voting cluster, each with its own `TestIo`, all starting at
/// term 0 with an empty log.
pub fn test_cluster(n: u64) -> TestCluster {
    let configured: Vec<Server> =
        (1..=n).map(|id| Server { id, address: format!("127.0.0.1:{id}"), voting: true }).collect();
    let configuration = Configuration::new(configured).unwrap();
    let servers = (1..=n)
        .map(|id| {
            Raft::bootstrap(
                id,
                format!("127.0.0.1:{id}"),
                configuration.clone(),
                CounterFsm::new(),
                TestIo::new(id),
                RaftOptions::default(),
            )
            .unwrap()
        })
        .collect();
    TestCluster { servers }
}
