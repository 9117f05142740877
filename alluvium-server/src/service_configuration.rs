use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Alluvium cluster name
    pub(crate) cluster_name: String,
    /// Numeric identity of this node, unique within the cluster
    pub(crate) node_id: u32,
    /// Hostname used for partition locality decisions; when absent the
    /// HOSTNAME environment variable is used
    pub(crate) hostname: Option<String>,
    /// Relative share of partitions this node should carry; defaults to the
    /// number of available CPU cores
    pub(crate) weight: Option<f64>,
    /// Coordination store configuration
    pub(crate) coordination_store: CoordinationStoreConfig,
    /// Topics this cluster ingests
    pub(crate) topics: Vec<String>,
    /// Balancer configuration
    #[serde(default)]
    pub(crate) balancer: Option<BalancerConfig>,
    /// Prometheus metrics exporter port (optional)
    pub(crate) prometheus_port: Option<usize>,
}

/// configuration settings for the Alluvium node service
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ServiceConfiguration {
    /// Alluvium cluster name
    pub(crate) cluster_name: String,
    /// Numeric identity of this node, unique within the cluster
    pub(crate) node_id: u32,
    /// Hostname used for partition locality decisions
    pub(crate) hostname: String,
    /// Relative share of partitions this node should carry
    pub(crate) weight: f64,
    /// Coordination store (etcd) address
    pub(crate) store_addr: String,
    /// Session lease TTL in seconds
    pub(crate) session_ttl_secs: i64,
    /// Topics this cluster ingests
    pub(crate) topics: Vec<String>,
    /// Balancer configuration
    pub(crate) balancer: BalancerConfig,
    /// Prometheus exporter address
    pub(crate) prom_exporter: Option<SocketAddr>,
}

/// Coordination store configuration
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CoordinationStoreConfig {
    /// Hostname or IP address of the coordination store (etcd)
    pub(crate) host: String,
    /// Port of the coordination store
    pub(crate) port: usize,
    /// Session lease TTL in seconds (defaults to 10)
    pub(crate) session_ttl_secs: Option<i64>,
}

/// Balancer configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct BalancerConfig {
    /// Balancing strategy to run while leading
    #[serde(default)]
    pub(crate) strategy: BalancerStrategy,
    /// Seconds between balance cycles (defaults to 10)
    pub(crate) balance_tick_secs: Option<u64>,
    /// Seconds between leader checks (defaults to 5)
    pub(crate) leader_check_tick_secs: Option<u64>,
    /// Seconds between supervision passes (defaults to 10)
    pub(crate) supervise_tick_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BalancerStrategy {
    #[default]
    Even,
    Local,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        BalancerConfig {
            strategy: BalancerStrategy::Even,
            balance_tick_secs: None,
            leader_check_tick_secs: None,
            supervise_tick_secs: None,
        }
    }
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ServiceConfiguration
impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let hostname = match config.hostname {
            Some(hostname) => hostname,
            None => std::env::var("HOSTNAME").context(
                "hostname not set in the config file and HOSTNAME is not in the environment",
            )?,
        };

        let weight = match config.weight {
            Some(weight) if weight > 0.0 => weight,
            Some(weight) => anyhow::bail!("node weight must be positive, got {}", weight),
            None => std::thread::available_parallelism()?.get() as f64,
        };

        if config.topics.is_empty() {
            anyhow::bail!("at least one topic must be configured");
        }

        // Construct store_addr from coordination_store.host and port
        let store_addr = format!(
            "{}:{}",
            config.coordination_store.host, config.coordination_store.port
        );

        // Construct prom_exporter from hostname-agnostic bind address if a port is provided
        let prom_exporter: Option<SocketAddr> = if let Some(prom_port) = config.prometheus_port {
            Some(
                format!("0.0.0.0:{}", prom_port)
                    .parse()
                    .context("Failed to create prom_exporter")?,
            )
        } else {
            None
        };

        Ok(ServiceConfiguration {
            cluster_name: config.cluster_name,
            node_id: config.node_id,
            hostname,
            weight,
            store_addr,
            session_ttl_secs: config.coordination_store.session_ttl_secs.unwrap_or(10),
            topics: config.topics,
            balancer: config.balancer.unwrap_or_default(),
            prom_exporter,
        })
    }
}
