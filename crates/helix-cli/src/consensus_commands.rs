//! Leader-election status (spec §4.N).
//!
//! No real multi-node transport exists in this crate set, so the only
//! thing this binary can demonstrate is a single-node cluster, which
//! becomes leader immediately.

use clap::Subcommand;
use helix_config::HelixConfig;
use helix_consensus::{ConsensusNode, NodeId, SingleNodeTransport};

#[derive(Subcommand)]
pub enum ConsensusAction {
    /// Start a single-node consensus node and print its resulting state.
    Status {
        /// Identity this node reports itself as.
        #[arg(long, default_value = "local")]
        node_id: String,
    },
}

pub async fn handle_consensus(action: ConsensusAction, config: &HelixConfig) -> anyhow::Result<()> {
    match action {
        ConsensusAction::Status { node_id } => {
            let node = ConsensusNode::new(NodeId(node_id.clone()), std::sync::Arc::new(SingleNodeTransport));
            println!("node: {node_id}");
            println!("state: {:?}", node.state().await);
            println!("term: {}", node.current_term().0);
            println!("is_leader: {}", node.is_leader().await);
            println!(
                "election_timeout_ms: {}, heartbeat_interval_ms: {}",
                config.consensus.election_timeout_ms, config.consensus.heartbeat_interval_ms
            );
            Ok(())
        },
    }
}
