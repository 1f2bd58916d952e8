//! Ordered set of cluster members (§4.2).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A single member of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub address: String,
    pub voting: bool,
}

/// The ordered set of servers that make up the cluster at a point in time.
///
/// Order matters: the voting subsequence (the configuration filtered to
/// `voting == true`, in the same relative order) is what candidate vote
/// tallies and leader progress arrays are indexed by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    servers: Vec<Server>,
}

impl Configuration {
    pub fn new(servers: Vec<Server>) -> Result<Self> {
        let config = Configuration { servers };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::InvalidArgument("configuration must not be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.id == 0 {
                return Err(Error::InvalidArgument("server id must be nonzero".into()));
            }
            if !seen.insert(server.id) {
                return Err(Error::InvalidArgument(format!("duplicate server id {}", server.id)));
            }
        }
        if !self.servers.iter().any(|s| s.voting) {
            return Err(Error::InvalidArgument("configuration has no voting server".into()));
        }
        Ok(())
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn get(&self, id: u64) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    pub fn is_voting(&self, id: u64) -> bool {
        self.get(id).map(|s| s.voting).unwrap_or(false)
    }

    /// The voting subsequence, in configuration order.
    pub fn voting_servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(|s| s.voting)
    }

    pub fn num_voting(&self) -> usize {
        self.voting_servers().count()
    }

    /// Position of `id` within the voting subsequence, if it is a voting
    /// member.
    pub fn index_of_voting(&self, id: u64) -> Option<usize> {
        self.voting_servers().position(|s| s.id == id)
    }

    /// `num_voting() / 2 + 1`. Kept in this exact form (not
    /// `num_voting() > n/2`) to preserve the reference semantics at
    /// `num_voting() == 0`, which the empty-configuration invariant excludes
    /// anyway.
    pub fn quorum(&self) -> usize {
        self.num_voting() / 2 + 1
    }

    /// Applies a single add/remove/voting-flip relative to `self`, returning
    /// the new configuration. Used by the membership subsystem, which is
    /// responsible for enforcing the "one change at a time" invariant before
    /// calling this.
    pub fn with_change(&self, change: &ConfigurationChange) -> Result<Configuration> {
        let mut servers = self.servers.clone();
        match change {
            ConfigurationChange::Add(server) => {
                if servers.iter().any(|s| s.id == server.id) {
                    return Err(Error::InvalidArgument(format!(
                        "server {} already present",
                        server.id
                    )));
                }
                servers.push(server.clone());
            }
            ConfigurationChange::Remove(id) => {
                let before = servers.len();
                servers.retain(|s| s.id != *id);
                if servers.len() == before {
                    return Err(Error::InvalidArgument(format!("server {id} not present")));
                }
            }
            ConfigurationChange::SetVoting { id, voting } => {
                let server = servers
                    .iter_mut()
                    .find(|s| s.id == *id)
                    .ok_or_else(|| Error::InvalidArgument(format!("server {id} not present")))?;
                server.voting = *voting;
            }
        }
        Configuration::new(servers)
    }
}

/// A single membership change: the CONFIGURATION entry's logical payload
/// before it is flattened into a full `Configuration` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfigurationChange {
    Add(Server),
    Remove(u64),
    SetVoting { id: u64, voting: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: u64, voting: bool) -> Server {
        Server { id, address: format!("127.0.0.1:{id}"), voting }
    }

    #[test]
    fn rejects_empty_configuration() {
        assert!(Configuration::new(vec![]).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        assert!(Configuration::new(vec![server(1, true), server(1, true)]).is_err());
    }

    #[test]
    fn rejects_no_voting_members() {
        assert!(Configuration::new(vec![server(1, false)]).is_err());
    }

    #[test]
    fn quorum_matches_reference_formula() {
        let config = Configuration::new(vec![server(1, true), server(2, true), server(3, true)]).unwrap();
        assert_eq!(config.quorum(), 2);
        let config = Configuration::new(vec![server(1, true)]).unwrap();
        assert_eq!(config.quorum(), 1);
    }

    #[test]
    fn voting_index_follows_voting_subsequence() {
        let config = Configuration::new(vec![
            server(1, false),
            server(2, true),
            server(3, true),
        ])
        .unwrap();
        assert_eq!(config.index_of_voting(2), Some(0));
        assert_eq!(config.index_of_voting(3), Some(1));
        assert_eq!(config.index_of_voting(1), None);
    }

    #[test]
    fn with_change_add_and_remove() {
        let config = Configuration::new(vec![server(1, true), server(2, true)]).unwrap();
        let added = config.with_change(&ConfigurationChange::Add(server(3, false))).unwrap();
        assert!(added.contains(3));
        let removed = added.with_change(&ConfigurationChange::Remove(3)).unwrap();
        assert!(!removed.contains(3));
    }
}
