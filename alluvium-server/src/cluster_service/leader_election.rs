use crate::resources::LEADER_PATH;
use crate::server_metrics::LEADER_ELECTION_STATE;
use alluvium_coordination::{CoordinationError, CoordinationStorage, CoordinationStore};
use metrics::gauge;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Interval;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LeaderElectionState {
    NoLeader,
    Leading,
    Following,
}

// Leader election through a session-scoped latch in the coordination store.
// Every node periodically tries to create `/leader` with its own id; the
// winner leads until its session ends, at which point the entry vanishes and
// the next check elects a new leader.
#[derive(Debug, Clone)]
pub(crate) struct LeaderElection {
    node_id: u32,
    store: CoordinationStorage,
    path: String,
    state: Arc<Mutex<LeaderElectionState>>,
}

impl LeaderElection {
    pub fn new(store: CoordinationStorage, node_id: u32) -> Self {
        Self {
            node_id,
            store,
            path: LEADER_PATH.to_owned(),
            state: Arc::new(Mutex::new(LeaderElectionState::NoLeader)),
        }
    }

    pub async fn start(&mut self, mut leader_check_interval: Interval) {
        loop {
            self.check_leader().await;
            leader_check_interval.tick().await;
        }
    }

    pub async fn get_state(&self) -> LeaderElectionState {
        let state = self.state.lock().await;
        state.clone()
    }

    async fn set_state(&self, new_state: LeaderElectionState) {
        let mut state = self.state.lock().await;
        if *state != new_state {
            *state = new_state;
            // 0 = Following/NoLeader, 1 = Leading
            let value = match *state {
                LeaderElectionState::Leading => 1.0,
                _ => 0.0,
            };
            gauge!(LEADER_ELECTION_STATE.name).set(value);
        }
    }

    pub(crate) async fn check_leader(&mut self) {
        let payload = self.node_id.to_string();
        match self.store.create_ephemeral(&self.path, payload.as_bytes()).await {
            Ok(()) => {
                debug!(node_id = %self.node_id, "acquired the leader latch");
                self.set_state(LeaderElectionState::Leading).await;
            }
            Err(CoordinationError::KeyExists(_)) => match self.store.read(&self.path).await {
                Ok(Some(bytes)) if bytes == payload.as_bytes() => {
                    self.set_state(LeaderElectionState::Leading).await;
                }
                Ok(Some(bytes)) => {
                    debug!(
                        node_id = %self.node_id,
                        leader = %String::from_utf8_lossy(&bytes),
                        "following the current leader"
                    );
                    self.set_state(LeaderElectionState::Following).await;
                }
                // The leader's session expired between create and read; the
                // next check will contend for the latch again.
                Ok(None) => self.set_state(LeaderElectionState::NoLeader).await,
                Err(e) => {
                    warn!(node_id = %self.node_id, error = %e, "failed to read the leader latch");
                    self.set_state(LeaderElectionState::NoLeader).await;
                }
            },
            Err(e) => {
                warn!(node_id = %self.node_id, error = %e, "failed to contend for the leader latch");
                self.set_state(LeaderElectionState::NoLeader).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alluvium_coordination::MemoryStore;

    /// The first node to check wins the latch; a later node follows.
    #[tokio::test]
    async fn test_first_node_leads_second_follows() {
        let tree = MemoryStore::new();
        let mut first = LeaderElection::new(CoordinationStorage::InMemory(tree.clone()), 1);
        let mut second = LeaderElection::new(CoordinationStorage::InMemory(tree.handle()), 2);

        first.check_leader().await;
        second.check_leader().await;

        assert_eq!(first.get_state().await, LeaderElectionState::Leading);
        assert_eq!(second.get_state().await, LeaderElectionState::Following);
    }

    /// Leadership is sticky across checks: the holder re-reads its own id
    /// and keeps leading.
    #[tokio::test]
    async fn test_leader_keeps_leading() {
        let tree = MemoryStore::new();
        let mut election = LeaderElection::new(CoordinationStorage::InMemory(tree), 3);

        election.check_leader().await;
        election.check_leader().await;

        assert_eq!(election.get_state().await, LeaderElectionState::Leading);
    }

    /// When the leader's session expires the latch frees up and a follower
    /// takes over on its next check.
    #[tokio::test]
    async fn test_failover_after_leader_session_expires() {
        let tree = MemoryStore::new();
        let leader_session = tree.clone();
        let mut first = LeaderElection::new(CoordinationStorage::InMemory(leader_session.clone()), 1);
        let mut second = LeaderElection::new(CoordinationStorage::InMemory(tree.handle()), 2);

        first.check_leader().await;
        second.check_leader().await;
        assert_eq!(second.get_state().await, LeaderElectionState::Following);

        leader_session.expire_session();
        second.check_leader().await;
        assert_eq!(second.get_state().await, LeaderElectionState::Leading);
    }
}
