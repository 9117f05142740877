pub(crate) mod even;
pub(crate) mod local;

use alluvium_coordination::{CoordinationError, CoordinationStorage, CoordinationStore};
use anyhow::Result;
use metrics::{counter, histogram};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use crate::{
    resources::BASE_ASSIGNMENTS_PATH,
    server_metrics::{
        ASSIGNMENTS_CREATED_TOTAL, ASSIGNMENTS_DELETED_TOTAL, BALANCE_CYCLES_ABORTED_TOTAL,
        BALANCE_CYCLE_DURATION_SECONDS,
    },
    utils::join_path,
};

use super::leader_election::{LeaderElection, LeaderElectionState};
use super::metadata_source::{assignment_name, ClusterSnapshot, StoreMetadataSource};
use super::node_register::NodeInfo;
use even::EvenBalancer;
use local::LocalBalancer;

/// LoadBalancer - Partition Assignment and Failover Management
///
/// The leader-only service that keeps the `/assignments` tree consistent
/// with cluster membership and the partition metadata the log brokers
/// publish.
///
/// ## Balance cycle:
/// 1. **Gather**: read live members, the broker metadata snapshot, and the
///    current assignments.
/// 2. **Reap**: delete assignments held by nodes that are no longer live;
///    their eligible partitions rejoin the unassigned pool.
/// 3. **Shed**: the strategy evicts partitions from overloaded nodes.
/// 4. **Place**: the strategy assigns every unassigned eligible partition
///    to a node.
///
/// ## Leadership:
/// Cycles run only while this node holds the leader latch, and leadership
/// is re-checked between steps. A cycle that loses leadership mid-flight is
/// abandoned; the new leader rebuilds its view from the store, which is the
/// single source of truth, so a half-applied cycle converges on the next
/// pass.
///
/// ## Write failures:
/// Individual assignment writes are best effort. A create that loses a race
/// is reconciled by reading the winner; any other failed write is logged
/// and retried naturally on the next cycle.
pub(crate) struct LoadBalancer {
    node_id: u32,
    store: CoordinationStorage,
    metadata: StoreMetadataSource,
    leader_election: LeaderElection,
    balancer: Balancer,
    topics: Vec<String>,
}

/// Balancing strategy, selected from the config at startup.
pub(crate) enum Balancer {
    Even(EvenBalancer),
    Local(LocalBalancer),
}

impl Balancer {
    pub(crate) fn plan(&mut self, view: &mut LoadView) -> Plan {
        match self {
            Balancer::Even(balancer) => balancer.plan(view),
            Balancer::Local(balancer) => balancer.plan(view),
        }
    }
}

/// Load carried by one live node, keyed by assignment entry names.
#[derive(Debug, Clone)]
pub(crate) struct NodeLoad {
    pub(crate) node_id: u32,
    pub(crate) hostname: String,
    pub(crate) weight: f64,
    pub(crate) assigned: Vec<String>,
}

/// The cluster state one balance cycle works on.
///
/// Partitions without a known leader broker are deliberately absent from
/// every field except `stale_drops`: their locality cannot be judged this
/// cycle, so they are neither counted, shed, nor placed.
#[derive(Debug, Clone)]
pub(crate) struct LoadView {
    /// Live nodes ordered by node id, each with the assignments it holds.
    pub(crate) nodes: Vec<NodeLoad>,
    /// Leader broker hostname per partition, where known.
    pub(crate) home: HashMap<String, String>,
    /// Partitions of configured topics with a known leader.
    pub(crate) eligible: BTreeSet<String>,
    /// Eligible partitions no live node holds.
    pub(crate) unassigned: Vec<String>,
    /// Assignments held by dead nodes, to be deleted before balancing.
    pub(crate) stale_drops: Vec<String>,
    pub(crate) total_eligible: usize,
}

/// Store mutations one balance cycle decided on.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Plan {
    pub(crate) remove: Vec<String>,
    pub(crate) assign: Vec<(String, u32)>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum CycleOutcome {
    Completed,
    Aborted,
}

/// Number of partitions a node should carry: its weight-proportional share
/// of the eligible partitions, rounded up.
pub(crate) fn target_load(total_eligible: usize, weight: f64, total_weight: f64) -> usize {
    if total_weight <= 0.0 {
        return 0;
    }
    (total_eligible as f64 * weight / total_weight).ceil() as usize
}

/// Build the cycle's working view from the raw store reads.
pub(crate) fn build_view(
    members: &HashMap<u32, NodeInfo>,
    snapshot: &ClusterSnapshot,
    assignments: &HashMap<String, u32>,
    topics: &[String],
) -> LoadView {
    let topic_set: BTreeSet<&str> = topics.iter().map(|t| t.as_str()).collect();

    let mut home = HashMap::new();
    let mut eligible = BTreeSet::new();
    for meta in &snapshot.partitions {
        if let Some(host) = snapshot.leader_host(meta) {
            let name = assignment_name(&meta.topic, meta.partition);
            home.insert(name.clone(), host.to_owned());
            if topic_set.contains(meta.topic.as_str()) {
                eligible.insert(name);
            }
        }
    }

    let mut nodes: Vec<NodeLoad> = members
        .iter()
        .map(|(&node_id, info)| NodeLoad {
            node_id,
            hostname: info.hostname.clone(),
            weight: info.weight,
            assigned: Vec::new(),
        })
        .collect();
    nodes.sort_by_key(|node| node.node_id);
    let index: HashMap<u32, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.node_id, i))
        .collect();

    let mut stale_drops = Vec::new();
    let mut held = BTreeSet::new();
    for (name, holder) in assignments {
        match index.get(holder) {
            Some(&i) => {
                held.insert(name.clone());
                // Unknown home: left untouched until the leader reappears.
                if home.contains_key(name) {
                    nodes[i].assigned.push(name.clone());
                }
            }
            None => stale_drops.push(name.clone()),
        }
    }
    for node in nodes.iter_mut() {
        node.assigned.sort();
    }
    stale_drops.sort();

    let unassigned: Vec<String> = eligible
        .iter()
        .filter(|name| !held.contains(*name))
        .cloned()
        .collect();

    LoadView {
        nodes,
        home,
        total_eligible: eligible.len(),
        eligible,
        unassigned,
        stale_drops,
    }
}

impl LoadBalancer {
    pub(crate) fn new(
        node_id: u32,
        store: CoordinationStorage,
        leader_election: LeaderElection,
        balancer: Balancer,
        topics: Vec<String>,
    ) -> Self {
        LoadBalancer {
            node_id,
            metadata: StoreMetadataSource::new(store.clone()),
            store,
            leader_election,
            balancer,
            topics,
        }
    }

    pub(crate) async fn start(
        &mut self,
        mut balance_interval: Interval,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = balance_interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if self.leader_election.get_state().await != LeaderElectionState::Leading {
                continue;
            }
            let started = Instant::now();
            match self.run_cycle().await {
                Ok(CycleOutcome::Completed) => {
                    histogram!(BALANCE_CYCLE_DURATION_SECONDS.name)
                        .record(started.elapsed().as_secs_f64());
                }
                Ok(CycleOutcome::Aborted) => {
                    counter!(BALANCE_CYCLES_ABORTED_TOTAL.name).increment(1);
                    info!(node_id = %self.node_id, "balance cycle abandoned after losing leadership");
                }
                Err(e) => {
                    warn!(node_id = %self.node_id, error = %e, "balance cycle failed");
                }
            }
        }
    }

    pub(crate) async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let members = super::node_register::read_members(&self.store).await?;
        if members.is_empty() {
            // Without a membership view every assignment would look stale;
            // touch nothing until nodes reappear.
            info!("no live members, leaving assignments untouched");
            return Ok(CycleOutcome::Completed);
        }
        let snapshot = self.metadata.snapshot().await?;
        let assignments = self.read_assignments().await?;
        let mut view = build_view(&members, &snapshot, &assignments, &self.topics);
        debug!(
            members = view.nodes.len(),
            eligible = view.total_eligible,
            unassigned = view.unassigned.len(),
            stale = view.stale_drops.len(),
            "balance cycle view"
        );

        if !self.still_leading().await {
            return Ok(CycleOutcome::Aborted);
        }
        for name in std::mem::take(&mut view.stale_drops) {
            self.delete_assignment(&name).await;
        }

        if !self.still_leading().await {
            return Ok(CycleOutcome::Aborted);
        }
        let plan = self.balancer.plan(&mut view);
        for name in &plan.remove {
            self.delete_assignment(name).await;
        }

        if !self.still_leading().await {
            return Ok(CycleOutcome::Aborted);
        }
        for (name, node_id) in &plan.assign {
            self.create_assignment(name, *node_id).await;
        }
        Ok(CycleOutcome::Completed)
    }

    async fn still_leading(&self) -> bool {
        self.leader_election.get_state().await == LeaderElectionState::Leading
    }

    async fn read_assignments(&self) -> Result<HashMap<String, u32>> {
        let mut assignments = HashMap::new();
        for name in self.store.children(BASE_ASSIGNMENTS_PATH).await? {
            let path = join_path(&[BASE_ASSIGNMENTS_PATH, &name]);
            match self.store.read(&path).await? {
                Some(bytes) => {
                    let holder = std::str::from_utf8(&bytes)
                        .ok()
                        .and_then(|s| s.trim().parse::<u32>().ok());
                    match holder {
                        Some(holder) => {
                            assignments.insert(name, holder);
                        }
                        None => {
                            warn!(partition = %name, "assignment holder is not a node id, skipping");
                        }
                    }
                }
                // Deleted between listing and reading.
                None => continue,
            }
        }
        Ok(assignments)
    }

    async fn delete_assignment(&self, name: &str) {
        let path = join_path(&[BASE_ASSIGNMENTS_PATH, name]);
        match self.store.delete(&path).await {
            Ok(()) => {
                counter!(ASSIGNMENTS_DELETED_TOTAL.name).increment(1);
                info!(partition = %name, "assignment deleted");
            }
            // Already gone, which is what we wanted.
            Err(CoordinationError::NotFound(_)) => {}
            Err(e) => {
                warn!(partition = %name, error = %e, "failed to delete assignment");
            }
        }
    }

    async fn create_assignment(&self, name: &str, node_id: u32) {
        let path = join_path(&[BASE_ASSIGNMENTS_PATH, name]);
        let value = node_id.to_string();
        match self.store.create_persistent(&path, value.as_bytes()).await {
            Ok(()) => {
                counter!(ASSIGNMENTS_CREATED_TOTAL.name).increment(1);
                info!(partition = %name, node_id = %node_id, "partition assigned");
            }
            Err(CoordinationError::KeyExists(_)) => match self.store.read(&path).await {
                Ok(Some(bytes)) => {
                    info!(
                        partition = %name,
                        holder = %String::from_utf8_lossy(&bytes),
                        "assignment already exists, keeping the current holder"
                    );
                }
                Ok(None) | Err(_) => {
                    warn!(partition = %name, "assignment raced and could not be re-read");
                }
            },
            Err(e) => {
                warn!(partition = %name, error = %e, "failed to create assignment");
            }
        }
    }
}

#[cfg(test)]
#[path = "load_balancer_test.rs"]
mod load_balancer_test;
