//! `ConsensusNode` (spec §4.N): RequestVote + heartbeat leader election,
//! no log replication. Term/role guards mirror the teacher's
//! `ProviderState` combination of an atomic counter plus a
//! `Mutex<Option<Instant>>` last-seen timestamp.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures::future::join_all;
use helix_common::{Error, Result};
use helix_dispatch::Task;
use helix_metrics::{consensus as consensus_metrics, counter, gauge};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    transport::ConsensusTransport,
    types::{ConsensusState, HeartbeatArgs, NodeId, RequestVoteArgs, Term},
};

/// Base election timeout (spec §4.N). Actual wait is randomized in
/// `[ELECTION_TIMEOUT, ELECTION_TIMEOUT * 1.5)` to reduce split votes, the
/// same jitter shape the teacher uses for retry backoff.
const ELECTION_TIMEOUT: Duration = Duration::from_millis(500);
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

fn jittered_election_timeout() -> Duration {
    let base_ms = ELECTION_TIMEOUT.as_millis() as u64;
    let extra = rand::random::<u64>() % (base_ms / 2).max(1);
    Duration::from_millis(base_ms + extra)
}

pub struct ConsensusNode {
    id: NodeId,
    transport: Arc<dyn ConsensusTransport>,
    term: AtomicU64,
    state: RwLock<ConsensusState>,
    voted_for: Mutex<Option<(Term, NodeId)>>,
    last_contact: Mutex<Instant>,
}

impl ConsensusNode {
    /// Single-node clusters become Leader immediately — there's no one to
    /// vote for (spec §4.N).
    #[must_use]
    pub fn new(id: NodeId, transport: Arc<dyn ConsensusTransport>) -> Arc<Self> {
        let initial_state = if transport.peers().is_empty() { ConsensusState::Leader } else { ConsensusState::Follower };
        if initial_state == ConsensusState::Leader {
            info!(node = %id, "single-node cluster, becoming leader immediately");
        }
        Arc::new(Self {
            id,
            transport,
            term: AtomicU64::new(0),
            state: RwLock::new(initial_state),
            voted_for: Mutex::new(None),
            last_contact: Mutex::new(Instant::now()),
        })
    }

    pub async fn state(&self) -> ConsensusState {
        *self.state.read().await
    }

    pub async fn is_leader(&self) -> bool {
        self.state().await == ConsensusState::Leader
    }

    #[must_use]
    pub fn current_term(&self) -> Term {
        Term(self.term.load(Ordering::SeqCst))
    }

    /// `ProposeTask` (spec §4.N): valid only on the Leader. This revision
    /// has no log replication, so acceptance doesn't append to a
    /// replicated log — the caller (the Task Dispatcher) owns persisting
    /// the task via the Worker Registry's repository port.
    pub async fn propose_task(&self, task: &Task) -> Result<()> {
        if !self.is_leader().await {
            return Err(Error::Internal(format!("propose_task called on non-leader node {}", self.id)));
        }
        debug!(task_id = %task.id, node = %self.id, "task proposed on leader");
        Ok(())
    }

    /// Drives the election/heartbeat state machine forever. Spawn with
    /// `tokio::spawn(node.clone().run())`.
    pub async fn run(self: Arc<Self>) {
        loop {
            let current_state = self.state().await;
            match current_state {
                ConsensusState::Leader => {
                    self.send_heartbeats().await;
                    tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                },
                ConsensusState::Follower | ConsensusState::Candidate => {
                    let timeout = jittered_election_timeout();
                    tokio::time::sleep(timeout).await;
                    let elapsed = self.last_contact.lock().await.elapsed();
                    if elapsed >= timeout && self.state().await != ConsensusState::Leader {
                        self.start_election().await;
                    }
                },
            }
        }
    }

    async fn start_election(&self) {
        let new_term = self.term.fetch_add(1, Ordering::SeqCst) + 1;
        let new_term = Term(new_term);
        *self.state.write().await = ConsensusState::Candidate;
        *self.voted_for.lock().await = Some((new_term, self.id.clone()));
        counter!(consensus_metrics::ELECTIONS_TOTAL).increment(1);
        gauge!(consensus_metrics::TERM).set(new_term.0 as f64);
        info!(node = %self.id, term = new_term.0, "starting election");

        let peers = self.transport.peers();
        if peers.is_empty() {
            *self.state.write().await = ConsensusState::Leader;
            gauge!(consensus_metrics::IS_LEADER).set(1.0);
            return;
        }

        let votes: Vec<_> = join_all(peers.iter().map(|peer| {
            let transport = Arc::clone(&self.transport);
            let args = RequestVoteArgs { term: new_term, candidate: self.id.clone() };
            async move { transport.request_vote(peer, args).await }
        }))
        .await;

        let mut granted = 1usize; // vote for self
        let mut highest_term = new_term;
        for vote in votes {
            match vote {
                Ok(reply) => {
                    highest_term = highest_term.max(reply.term);
                    if reply.vote_granted {
                        granted += 1;
                    }
                },
                Err(err) => warn!(error = %err, "request_vote RPC failed"),
            }
        }

        let majority = (peers.len() + 1) / 2 + 1;
        if highest_term > new_term {
            self.step_down(highest_term).await;
            return;
        }

        if granted >= majority {
            *self.state.write().await = ConsensusState::Leader;
            gauge!(consensus_metrics::IS_LEADER).set(1.0);
            info!(node = %self.id, term = new_term.0, votes = granted, "won election");
        } else {
            *self.state.write().await = ConsensusState::Follower;
            *self.last_contact.lock().await = Instant::now();
        }
    }

    async fn send_heartbeats(&self) {
        let peers = self.transport.peers();
        let term = self.current_term();
        let replies = join_all(peers.iter().map(|peer| {
            let transport = Arc::clone(&self.transport);
            let args = HeartbeatArgs { term, leader: self.id.clone() };
            async move { transport.heartbeat(peer, args).await }
        }))
        .await;

        let highest = replies.into_iter().filter_map(std::result::Result::ok).map(|reply| reply.term).max();
        if let Some(highest) = highest {
            if highest > term {
                self.step_down(highest).await;
            }
        }
    }

    /// Any RPC that observes a higher term steps this node down to
    /// Follower and adopts that term (standard Raft rule).
    async fn step_down(&self, new_term: Term) {
        self.term.store(new_term.0, Ordering::SeqCst);
        *self.state.write().await = ConsensusState::Follower;
        *self.last_contact.lock().await = Instant::now();
        gauge!(consensus_metrics::IS_LEADER).set(0.0);
        gauge!(consensus_metrics::TERM).set(new_term.0 as f64);
    }

    /// Inbound `RequestVote` handler: grant iff the candidate's term is at
    /// least as high as ours and we haven't already voted this term.
    pub async fn handle_request_vote(&self, args: RequestVoteArgs) -> crate::types::RequestVoteReply {
        let current_term = self.current_term();
        if args.term < current_term {
            return crate::types::RequestVoteReply { term: current_term, vote_granted: false };
        }
        if args.term > current_term {
            self.step_down(args.term).await;
        }

        let mut voted_for = self.voted_for.lock().await;
        let already_voted = matches!(&*voted_for, Some((term, candidate)) if *term == args.term && *candidate != args.candidate);
        if already_voted {
            return crate::types::RequestVoteReply { term: args.term, vote_granted: false };
        }

        *voted_for = Some((args.term, args.candidate));
        *self.last_contact.lock().await = Instant::now();
        crate::types::RequestVoteReply { term: args.term, vote_granted: true }
    }

    /// Inbound `Heartbeat` handler: resets the election timer and steps
    /// down to Follower if the leader's term is current or higher.
    pub async fn handle_heartbeat(&self, args: HeartbeatArgs) -> crate::types::HeartbeatReply {
        let current_term = self.current_term();
        if args.term < current_term {
            return crate::types::HeartbeatReply { term: current_term, success: false };
        }
        if args.term > current_term || self.state().await != ConsensusState::Follower {
            self.step_down(args.term).await;
        }
        *self.last_contact.lock().await = Instant::now();
        crate::types::HeartbeatReply { term: args.term, success: true }
    }
}
