use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub(crate) struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub(crate) const COUNTERS: [Metric; 5] = [
    ASSIGNMENTS_CREATED_TOTAL,
    ASSIGNMENTS_DELETED_TOTAL,
    BALANCE_CYCLES_ABORTED_TOTAL,
    WORKERS_DIED_TOTAL,
    WORKERS_KILLED_TOTAL,
];
pub(crate) const GAUGES: [Metric; 2] = [LEADER_ELECTION_STATE, WORKERS_RUNNING];
pub(crate) const HISTOGRAMS: [Metric; 1] = [BALANCE_CYCLE_DURATION_SECONDS];

// BALANCER Metrics --------------------------

pub(crate) const ASSIGNMENTS_CREATED_TOTAL: Metric = Metric {
    name: "alluvium_assignments_created_total",
    description: "Total number of partition assignments written by this node while leading",
};

pub(crate) const ASSIGNMENTS_DELETED_TOTAL: Metric = Metric {
    name: "alluvium_assignments_deleted_total",
    description: "Total number of partition assignments deleted by this node while leading",
};

pub(crate) const BALANCE_CYCLES_ABORTED_TOTAL: Metric = Metric {
    name: "alluvium_balance_cycles_aborted_total",
    description: "Total number of balance cycles abandoned after losing leadership mid-cycle",
};

pub(crate) const BALANCE_CYCLE_DURATION_SECONDS: Metric = Metric {
    name: "alluvium_balance_cycle_duration_seconds",
    description: "Duration of balance cycle execution in seconds",
};

pub(crate) const LEADER_ELECTION_STATE: Metric = Metric {
    name: "alluvium_leader_election_state",
    description: "Leader election state of this node (0=follower,1=leader)",
};

// SUPERVISOR Metrics --------------------------

pub(crate) const WORKERS_RUNNING: Metric = Metric {
    name: "alluvium_workers_running",
    description: "Number of partition workers currently running on this node",
};

pub(crate) const WORKERS_DIED_TOTAL: Metric = Metric {
    name: "alluvium_workers_died_total",
    description: "Total number of partition workers that exited on their own",
};

pub(crate) const WORKERS_KILLED_TOTAL: Metric = Metric {
    name: "alluvium_workers_killed_total",
    description: "Total number of partition workers killed after missing a ping",
};

pub(crate) fn init_metrics(prom_addr: Option<std::net::SocketAddr>, node_id: u32) {
    info!("initializing metrics exporter");

    if let Some(addr) = prom_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("node", node_id.to_string())
            .install()
            .expect("failed to install Prometheus recorder");
    }

    for name in COUNTERS {
        register_counter(name)
    }

    for name in GAUGES {
        register_gauge(name)
    }

    for name in HISTOGRAMS {
        register_histogram(name)
    }
}

/// Registers a counter with the given name.
fn register_counter(metric: Metric) {
    metrics::describe_counter!(metric.name, metric.description);
    let _counter = metrics::counter!(metric.name);
}

/// Registers a gauge with the given name.
fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}

/// Registers a histogram with the given name.
fn register_histogram(metric: Metric) {
    metrics::describe_histogram!(metric.name, metric.description);
    let _histogram = metrics::histogram!(metric.name);
}
