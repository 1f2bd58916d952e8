//! End-to-end coverage of the simulation harness's documented scenarios,
//! exercised through the crate's public API rather than `sim`'s own
//! `#[cfg(test)]` unit tests.

use little_raft_core::sim::{Cluster, EventKind};
use little_raft_core::{CounterFsm, RaftOptions, RoleTag};
use pretty_assertions::assert_eq;

#[test]
fn tick_cadence_visits_every_server_in_order() {
    let mut cluster = Cluster::new(3, RaftOptions::default(), 11).unwrap();

    let events: Vec<(usize, EventKind)> = (0..4)
        .map(|_| {
            let event = cluster.step().unwrap().unwrap();
            (event.server_index, event.kind)
        })
        .collect();

    assert_eq!(
        events,
        vec![(0, EventKind::Tick), (1, EventKind::Tick), (2, EventKind::Tick), (0, EventKind::Tick)]
    );
    assert_eq!(cluster.time(), 200);
}

#[test]
fn an_expired_election_timer_turns_exactly_one_follower_into_a_candidate() {
    let options = RaftOptions::default();
    let mut cluster = Cluster::new(3, options, 11).unwrap();

    // Every server's randomized timeout lands in [election_timeout, 2x); the
    // first one to fire must do so inside that window and nobody else
    // should have moved off FOLLOWER before then.
    cluster
        .step_until(|c| c.states().iter().any(|s| *s != RoleTag::Follower), 2 * options.election_timeout_ms)
        .unwrap();

    assert!(cluster.time() >= options.election_timeout_ms);
    let candidates = cluster.states().iter().filter(|s| **s == RoleTag::Candidate).count();
    assert_eq!(candidates, 1);
}

#[test]
fn forced_election_elects_a_lone_leader() {
    let mut cluster = Cluster::new(3, RaftOptions::default(), 11).unwrap();
    cluster.elect(0).unwrap();
    assert_eq!(cluster.states(), vec![RoleTag::Leader, RoleTag::Follower, RoleTag::Follower]);
    assert_eq!(cluster.server(0).log_last_index(), 1);
}

#[test]
fn leadership_changes_across_two_forced_elections() {
    let mut cluster = Cluster::new(3, RaftOptions::default(), 7).unwrap();
    cluster.elect(0).unwrap();
    cluster.step_until(|c| c.server(1).log_last_index() >= 1 && c.server(2).log_last_index() >= 1, 2_000).unwrap();
    cluster.depose();
    cluster.elect(1).unwrap();

    assert_eq!(cluster.states(), vec![RoleTag::Follower, RoleTag::Leader, RoleTag::Follower]);
    assert_eq!(cluster.server(1).current_term(), 2);
}

#[test]
fn a_single_command_is_visible_on_every_fsm_once_applied() {
    let mut cluster = Cluster::new(3, RaftOptions::default(), 3).unwrap();
    cluster.elect(0).unwrap();
    let _handle = cluster.apply(0, CounterFsm::encode_add(1)).unwrap();
    assert!(cluster.step_until_applied(2, 5_000));
    for i in 0..3 {
        assert_eq!(cluster.server(i).fsm().x, 1);
    }
}

#[test]
fn two_commands_advance_last_applied_on_every_server() {
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
