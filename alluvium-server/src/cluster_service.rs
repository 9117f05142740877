pub(crate) mod leader_election;
pub(crate) mod load_balancer;
pub(crate) mod metadata_source;
pub(crate) mod node_register;
pub(crate) mod supervisor;

pub(crate) use leader_election::LeaderElection;
pub(crate) use load_balancer::{Balancer, LoadBalancer};
pub(crate) use supervisor::AssignmentSupervisor;

use alluvium_coordination::{CoordinationStorage, CoordinationStore};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::{
    resources::{Resources, BASE_CLIENTS_PATH},
    service_configuration::ServiceConfiguration,
    utils::join_path,
};

use node_register::NodeInfo;

/// ClusterService coordinates and runs all the node services: leader
/// election, the (leader-only) load balancer, and the assignment
/// supervisor driving the partition workers.
pub(crate) struct ClusterService {
    config: ServiceConfiguration,
    store: CoordinationStorage,
    leader_election: LeaderElection,
    load_balancer: LoadBalancer,
    supervisor: AssignmentSupervisor,
}

impl ClusterService {
    pub(crate) fn new(
        config: ServiceConfiguration,
        store: CoordinationStorage,
        leader_election: LeaderElection,
        load_balancer: LoadBalancer,
        supervisor: AssignmentSupervisor,
    ) -> Self {
        ClusterService {
            config,
            store,
            leader_election,
            load_balancer,
            supervisor,
        }
    }

    pub(crate) async fn start(self) -> Result<()> {
        let node_id = self.config.node_id;

        let resources = Resources::new(self.store.clone());
        resources.ensure_layout(&self.config.topics).await?;

        // Registration is fatal after the retries run out; a node that
        // cannot publish its membership must not consume.
        let info = NodeInfo {
            hostname: self.config.hostname.clone(),
            weight: self.config.weight,
        };
        node_register::register_node(&self.store, node_id, &info).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut election = self.leader_election.clone();
        let leader_check_interval = interval(Duration::from_secs(
            self.config.balancer.leader_check_tick_secs.unwrap_or(5),
        ));
        let election_handle = tokio::spawn(async move {
            election.start(leader_check_interval).await;
        });

        let mut load_balancer = self.load_balancer;
        let balance_interval = interval(Duration::from_secs(
            self.config.balancer.balance_tick_secs.unwrap_or(10),
        ));
        let balancer_shutdown = shutdown_rx.clone();
        let balancer_handle = tokio::spawn(async move {
            load_balancer.start(balance_interval, balancer_shutdown).await;
        });

        let mut supervisor = self.supervisor;
        let supervise_interval = interval(Duration::from_secs(
            self.config.balancer.supervise_tick_secs.unwrap_or(10),
        ));
        let supervisor_shutdown = shutdown_rx.clone();
        let supervisor_handle = tokio::spawn(async move {
            supervisor.start(supervise_interval, supervisor_shutdown).await;
        });

        info!(
            node_id = %node_id,
            cluster = %self.config.cluster_name,
            "Alluvium node services are up"
        );

        tokio::signal::ctrl_c().await?;
        info!(node_id = %node_id, "shutdown signal received");

        let _ = shutdown_tx.send(true);
        election_handle.abort();
        let _ = balancer_handle.await;
        // The supervisor stops and joins its workers before exiting.
        let _ = supervisor_handle.await;

        // Drop the membership entry now instead of waiting for the session
        // TTL, so the next balance cycle sees this node gone.
        let member_path = join_path(&[BASE_CLIENTS_PATH, &node_id.to_string()]);
        if let Err(e) = self.store.delete(&member_path).await {
            warn!(node_id = %node_id, error = %e, "failed to drop the membership entry");
        }
        if let Err(e) = self.store.close().await {
            warn!(node_id = %node_id, error = %e, "failed to close the coordination session");
        }

        info!(node_id = %node_id, "Alluvium node stopped");
        Ok(())
    }
}
