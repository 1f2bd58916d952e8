//! The per-server role state machine's volatile substates (§3, §4.3).

use std::collections::HashMap;

/// The part of the follower and candidate substates that election timing
/// needs regardless of which of the two roles we're actually in. Modeled in
/// Rust as a value both variants embed, with [`Role::timer`] /
/// [`Role::timer_mut`] as the single accessor the reference implementation
/// gets "for free" from a shared struct prefix (see SPEC_FULL.md's design
/// notes).
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonTimerState {
    pub randomized_election_timeout: u64,
}

/// A leader's view of how far a given peer has been replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// One AppendEntries in flight at a time, used to re-synchronize
    /// `next_index` after a rejection or a fresh promotion.
    Probe,
    /// Multiple AppendEntries may be in flight, used once a peer is known
    /// to be caught up.
    Pipeline,
    /// The peer has fallen behind the log's retained prefix; it needs an
    /// InstallSnapshot before AppendEntries can resume.
    Snapshot,
}

#[derive(Debug, Clone, Copy)]
pub struct PeerProgress {
    pub next_index: u64,
    pub match_index: u64,
    pub state: ProgressState,
    pub last_contact_time: u64,
    pub inflight_count: u64,
}

impl PeerProgress {
    pub fn new(next_index: u64) -> Self {
        PeerProgress {
            next_index,
            match_index: 0,
            state: ProgressState::Probe,
            last_contact_time: 0,
            inflight_count: 0,
        }
    }
}

/// Tracks a non-voting server being caught up toward promotion (§4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct PromotionRound {
    pub round_index: u64,
    pub round_start_time: u64,
    pub match_index_at_round_start: u64,
}

#[derive(Debug, Default)]
pub struct LeaderState {
    /// Keyed by server id rather than by position or pointer into the
    /// configuration, so a membership change can rebuild this map by
    /// id-matching instead of invalidating references (SPEC_FULL.md design
    /// notes, "cyclic references").
    pub progress: HashMap<u64, PeerProgress>,
    pub promotions: HashMap<u64, PromotionRound>,
}

/// The three roles a server can be in (§4.3).
pub enum Role {
    Follower { current_leader_id: u64, timer: CommonTimerState },
    Candidate { timer: CommonTimerState, votes: Vec<bool> },
    Leader(LeaderState),
}

impl Role {
    pub fn init_follower() -> Role {
        Role::Follower { current_leader_id: 0, timer: CommonTimerState::default() }
    }

    pub fn init_candidate(num_voting: usize) -> Role {
        Role::Candidate { timer: CommonTimerState::default(), votes: vec![false; num_voting] }
    }

    pub fn init_leader() -> Role {
        Role::Leader(LeaderState::default())
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, Role::Follower { .. })
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate { .. })
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader(_))
    }

    /// The accessor the original source gets from a shared struct prefix:
    /// reaches the randomized election timeout regardless of whether we're
    /// a follower or a candidate. `None` while leader.
    pub fn timer(&self) -> Option<&CommonTimerState> {
        match self {
            Role::Follower { timer, .. } => Some(timer),
            Role::Candidate { timer, .. } => Some(timer),
            Role::Leader(_) => None,
        }
    }

    pub fn timer_mut(&mut self) -> Option<&mut CommonTimerState> {
        match self {
            Role::Follower { timer, .. } => Some(timer),
            Role::Candidate { timer, .. } => Some(timer),
            Role::Leader(_) => None,
        }
    }

    pub fn leader_state(&self) -> Option<&LeaderState> {
        match self {
            Role::Leader(state) => Some(state),
            _ => None,
        }
    }

    pub fn leader_state_mut(&mut self) -> Option<&mut LeaderState> {
        match self {
            Role::Leader(state) => Some(state),
            _ => None,
        }
    }
}

/// A coarse label for the role, used by logging and the simulation harness
/// (which wants to assert on role without borrowing the substate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleTag {
    Follower,
    Candidate,
    Leader,
}

impl From<&Role> for RoleTag {
    fn from(role: &Role) -> Self {
        match role {
            Role::Follower { .. } => RoleTag::Follower,
            Role::Candidate { .. } => RoleTag::Candidate,
            Role::Leader(_) => RoleTag::Leader,
        }
    }
}
