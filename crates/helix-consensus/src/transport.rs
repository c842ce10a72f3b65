//! `ConsensusTransport` (spec §4.N): the abstract RequestVote/Heartbeat
//! RPC port. No wire format is specified — actual cross-process delivery
//! is left to whatever the deployment wires in; task state itself crosses
//! processes via the Worker Registry's repository port, not this one.

use async_trait::async_trait;
use helix_common::Result;

use crate::types::{HeartbeatArgs, HeartbeatReply, NodeId, RequestVoteArgs, RequestVoteReply};

#[async_trait]
pub trait ConsensusTransport: Send + Sync {
    async fn request_vote(&self, peer: &NodeId, args: RequestVoteArgs) -> Result<RequestVoteReply>;
    async fn heartbeat(&self, peer: &NodeId, args: HeartbeatArgs) -> Result<HeartbeatReply>;
    fn peers(&self) -> Vec<NodeId>;
}

/// A transport with no peers: every cluster is single-node, so this node
/// becomes Leader immediately (spec §4.N) and never sends an RPC.
pub struct SingleNodeTransport;

#[async_trait]
impl ConsensusTransport for SingleNodeTransport {
    async fn request_vote(&self, _peer: &NodeId, args: RequestVoteArgs) -> Result<RequestVoteReply> {
        Ok(RequestVoteReply { term: args.term, vote_granted: false })
    }

    async fn heartbeat(&self, _peer: &NodeId, args: HeartbeatArgs) -> Result<HeartbeatReply> {
        Ok(HeartbeatReply { term: args.term, success: false })
    }

    fn peers(&self) -> Vec<NodeId> {
        Vec::new()
    }
}
