//! Consensus identity and state types (spec §4.N).

use serde::{Deserialize, Serialize};

/// Stable cluster-member identity. Opaque to this crate — the transport
/// port is responsible for resolving a `NodeId` to an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing election term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term(pub u64);

impl Term {
    #[must_use]
    pub fn next(self) -> Self {
        Term(self.0 + 1)
    }
}

/// Raft-subset node role (spec §4.N: "RequestVote + heartbeat, no log
/// replication").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusState {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone)]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate: NodeId,
}

#[derive(Debug, Clone)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone)]
pub struct HeartbeatArgs {
    pub term: Term,
    pub leader: NodeId,
}

#[derive(Debug, Clone)]
pub struct HeartbeatReply {
    pub term: Term,
    pub success: bool,
}
