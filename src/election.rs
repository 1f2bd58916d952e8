//! Randomized timeout, candidate term bump, vote solicitation, vote grant
//! policy, tally (§4.4). Stateless helpers over [`crate::raft::Raft`]: they
//! read and mutate the role's state and emit outgoing messages through the
//! I/O handle, but hold no state of their own.

use crate::error::Result;
use crate::io::{Message, MessageBody, RequestToken, RequestVoteArgs};
use crate::raft::Raft;
use crate::role::Role;
use crate::{fsm::Fsm, io::RaftIo};
use log::{debug, warn};

/// Resamples the randomized election timeout in `[T, 2T)` and restarts the
/// timer. Valid for both FOLLOWER and CANDIDATE, via `Role::timer_mut`.
pub fn election_reset_timer<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>) {
    let lo = raft.options.election_timeout_ms;
    let hi = 2 * lo;
    let timeout = raft.io.random(lo, hi);
    let now = raft.io.time();
    if let Some(timer) = raft.role.timer_mut() {
        timer.randomized_election_timeout = timeout;
    }
    raft.election_timer_start = now;
}

/// Whether the election timer has elapsed, per the currently sampled
/// randomized timeout. Only meaningful for FOLLOWER/CANDIDATE.
pub fn election_timer_expired<Io: RaftIo, F: Fsm>(raft: &Raft<Io, F>) -> bool {
    match raft.role.timer() {
        Some(timer) => {
            let now = raft.io.time();
            now.saturating_sub(raft.election_timer_start) >= timer.randomized_election_timeout
        }
        None => false,
    }
}

/// Transitions from FOLLOWER to CANDIDATE and starts an election: bumps the
/// term, votes for self, resets the timer, and broadcasts RequestVote to
/// every other voting peer. A per-peer send failure is logged and does not
/// abort the election (preserved from the reference behavior).
pub fn election_start<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>) -> Result<()> {
    debug_assert!(raft.role.is_candidate());

    let n_voting = raft.configuration.num_voting();
    let voting_index = raft
        .configuration
        .index_of_voting(raft.id)
        .expect("election_start called on a non-voting server");

    let term = raft.metadata.current_term + 1;
    raft.io.set_term(term)?;
    raft.io.set_vote(raft.id)?;
    raft.metadata.current_term = term;
    raft.metadata.voted_for = raft.id;

    election_reset_timer(raft);

    if let Role::Candidate { votes, .. } = &mut raft.role {
        debug_assert_eq!(votes.len(), n_voting);
        for (i, vote) in votes.iter_mut().enumerate() {
            *vote = i == voting_index;
        }
    }

    let last_log_index = raft.log.last_index();
    let last_log_term = raft.log.last_term();
    let from_id = raft.id;
    let from_address = raft.address.clone();

    for server in raft.configuration.servers().to_vec() {
        if server.id == raft.id || !server.voting {
            continue;
        }
        let token = raft.next_request_token();
        let message = Message {
            from_id,
            from_address: from_address.clone(),
            to_id: server.id,
            body: MessageBody::RequestVote(RequestVoteArgs {
                term,
                candidate_id: raft.id,
                last_log_index,
                last_log_term,
            }),
        };
        raft.pending_sends.insert(token, crate::handle::PendingSend::RequestVote);
        raft.io.send(message, token);
    }

    Ok(())
}

/// Decides whether to grant a vote to `args`, persisting the vote on grant.
/// Mirrors the reference's exact ordering: empty-log special case, then term
/// comparison, then index comparison for equal terms.
pub fn election_vote<Io: RaftIo, F: Fsm>(
    raft: &mut Raft<Io, F>,
    args: &RequestVoteArgs,
) -> Result<bool> {
    if !raft.configuration.is_voting(raft.id) {
        debug!("server {} is not voting -> not granting vote", raft.id);
        return Ok(false);
    }

    if raft.metadata.voted_for != 0 && raft.metadata.voted_for != args.candidate_id {
        debug!("server {} already voted -> not granting vote", raft.id);
        return Ok(false);
    }

    let local_last_index = raft.log.last_index();
    let granted = if local_last_index == 0 {
        true
    } else {
        let local_last_term = raft.log.last_term();
        if args.last_log_term < local_last_term {
            false
        } else if args.last_log_term > local_last_term {
            true
        } else {
            local_last_index <= args.last_log_index
        }
    };

    if !granted {
        return Ok(false);
    }

    raft.io.set_vote(args.candidate_id)?;
    raft.metadata.voted_for = args.candidate_id;
    election_reset_timer(raft);

    Ok(true)
}

/// Marks `voter_id`'s vote as granted and reports whether a quorum has now
/// voted. Kept in the `half = n/2; votes >= half + 1` form rather than
/// `votes > n/2` to match the reference exactly (only differs at n==0,
/// which the no-empty-configuration invariant excludes).
pub fn election_tally<Io: RaftIo, F: Fsm>(raft: &mut Raft<Io, F>, voter_id: u64) -> bool {
    let voting_index = match raft.configuration.index_of_voting(voter_id) {
        Some(i) => i,
        None => {
            warn!("vote from non-voting or unknown server {voter_id} ignored");
            return false;
        }
    };
    let n_voting = raft.configuration.num_voting();
    let half = n_voting / 2;

    let votes = match &mut raft.role {
        Role::Candidate { votes, .. } => votes,
        _ => return false,
    };
    if voting_index < votes.len() {
        votes[voting_index] = true;
    }
    let granted = votes.iter().filter(|v| **v).count();
    granted >= half + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_cluster;

    #[test]
    fn empty_log_grants_regardless_of_candidate_log_length() {
        let mut cluster = test_cluster(3);
        let granted = election_vote(
            &mut cluster.servers[1],
            &RequestVoteArgs { term: 1, candidate_id: cluster.servers[0].id(), last_log_index: 0, last_log_term: 0 },
        )
        .unwrap();
        assert!(granted);
    }

    #[test]
    fn does_not_grant_a_second_vote_in_the_same_term() {
        let mut cluster = test_cluster(3);
        let args_from_1 = RequestVoteArgs { term: 1, candidate_id: 1, last_log_index: 0, last_log_term: 0 };
        assert!(election_vote(&mut cluster.servers[2], &args_from_1).unwrap());

        let args_from_2 = RequestVoteArgs { term: 1, candidate_id: 2, last_log_index: 0, last_log_term: 0 };
        assert!(!election_vote(&mut cluster.servers[2], &args_from_2).unwrap());
    }

    #[test]
    fn candidate_with_shorter_log_is_denied() {
        let mut cluster = test_cluster(3);
        cluster.servers[1].log.append(crate::entry::LogEntry::command(1, 1, Default::default())).unwrap();
        let args = RequestVoteArgs { term: 2, candidate_id: 3, last_log_index: 0, last_log_term: 0 };
        assert!(!election_vote(&mut cluster.servers[1], &args).unwrap());
    }

    #[test]
    fn election_tally_reaches_quorum_at_half_plus_one() {
        let mut cluster = test_cluster(5);
        election_start(&mut cluster.servers[0]).unwrap();
        assert!(!election_tally(&mut cluster.servers[0], 2));
        assert!(election_tally(&mut cluster.servers[0], 3));
    }
}
