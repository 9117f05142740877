mod args_parse;
mod cluster_service;
mod resources;
mod server_metrics;
mod service_configuration;
mod utils;
mod worker;

use std::{fs::read_to_string, path::Path, sync::Arc, time::Duration};

use crate::{
    args_parse::Args,
    cluster_service::{
        load_balancer::even::EvenBalancer, load_balancer::local::LocalBalancer,
        AssignmentSupervisor, Balancer, ClusterService, LeaderElection, LoadBalancer,
    },
    server_metrics::init_metrics,
    service_configuration::{BalancerStrategy, LoadConfiguration, ServiceConfiguration},
    worker::{IdleConsumer, TaskWorkerFactory},
};

use alluvium_coordination::{CoordinationStorage, StoreConfig};
use anyhow::{Context, Result};
use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Parse command line arguments
    let args = Args::parse()?;

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))?;
    let mut load_config: LoadConfiguration = serde_yaml::from_str(&config_content)?;

    // If `node_id` is provided via command-line args, override the value from the config file
    if let Some(node_id) = args.node_id {
        load_config.node_id = node_id
            .parse()
            .context(format!("Failed to parse into a node id: {}", node_id))?;
    }

    // If `hostname` is provided via command-line args
    if let Some(hostname) = args.hostname {
        load_config.hostname = Some(hostname);
    }

    // Attempt to transform LoadConfiguration into ServiceConfiguration
    let mut service_config: ServiceConfiguration = load_config.try_into()?;

    // If `store_addr` is provided via command-line args, override the value from the config file
    if let Some(store_addr) = args.store_addr {
        service_config.store_addr = store_addr;
    }

    // If `prom_exporter` is provided via command-line args, override the value from the config file
    if let Some(prom_exporter) = args.prom_exporter {
        let prom_address: SocketAddr = prom_exporter.parse().context(format!(
            "Failed to parse into Socket address: {}",
            prom_exporter
        ))?;
        service_config.prom_exporter = Some(prom_address);
    }

    // Init metrics with or without prometheus exporter
    init_metrics(service_config.prom_exporter, service_config.node_id);

    // initialize the coordination store layer for the Alluvium node
    info!("Initializing ETCD as coordination store");
    let store = CoordinationStorage::new(StoreConfig::Etcd {
        addr: service_config.store_addr.clone(),
        session_ttl_secs: service_config.session_ttl_secs,
    })
    .await?;

    let node_id = service_config.node_id;

    // one node per cluster holds the leader latch and runs the balancer.
    let leader_election = LeaderElection::new(store.clone(), node_id);

    let balancer = match service_config.balancer.strategy {
        BalancerStrategy::Even => Balancer::Even(EvenBalancer::new()),
        BalancerStrategy::Local => Balancer::Local(LocalBalancer::new()),
    };
    let load_balancer = LoadBalancer::new(
        node_id,
        store.clone(),
        leader_election.clone(),
        balancer,
        service_config.topics.clone(),
    );

    // the supervisor runs the partition workers this node is assigned.
    let factory = TaskWorkerFactory::new(Arc::new(IdleConsumer {
        poll_interval: Duration::from_secs(1),
    }));
    let supervisor = AssignmentSupervisor::new(node_id, store.clone(), Box::new(factory));

    info!(
        node_id = %node_id,
        hostname = %service_config.hostname,
        "Initializing Alluvium consumer node"
    );

    // ClusterService coordinates and starts all the services
    let service = ClusterService::new(
        service_config,
        store,
        leader_election,
        load_balancer,
        supervisor,
    );

    service
        .start()
        .await
        .context("Alluvium node service unable to start")?;

    Ok(())
}
