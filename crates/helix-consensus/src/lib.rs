//! Raft-subset leader election for the control plane (spec §4.N).
//!
//! Only `RequestVote` + heartbeat are implemented — log replication is out
//! of scope for this revision. Task state itself is persisted through the
//! Worker Registry's repository port, not through this module.

mod election;
mod transport;
mod types;

pub use election::ConsensusNode;
pub use transport::{ConsensusTransport, SingleNodeTransport};
pub use types::{ConsensusState, HeartbeatArgs, HeartbeatReply, NodeId, RequestVoteArgs, RequestVoteReply, Term};
