use alluvium_coordination::{CoordinationStorage, CoordinationStore};
use anyhow::Result;
use metrics::{counter, gauge};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::watch;
use tokio::time::Interval;
use tracing::{info, warn};

use crate::{
    resources::BASE_ASSIGNMENTS_PATH,
    server_metrics::{WORKERS_DIED_TOTAL, WORKERS_KILLED_TOTAL, WORKERS_RUNNING},
    utils::join_path,
    worker::{Worker, WorkerFactory},
};

use super::metadata_source::parse_assignment_name;

/// AssignmentSupervisor - Partition Worker Lifecycle Management
///
/// Every node runs a supervisor, leader or not. On each pass it reads the
/// assignments naming this node and converges the local worker set onto
/// them: spawning workers for new assignments, stopping workers whose
/// assignment moved away, and replacing workers that died or stopped
/// answering pings.
///
/// ## Liveness probe:
/// A pass pings each healthy worker; the worker loop acknowledges on its
/// next iteration. A worker that is still pinged but unacknowledged when
/// the next pass comes around has missed a full supervision interval and is
/// killed, then respawned in the same pass.
///
/// Stopping is asynchronous from the supervisor's point of view: a worker
/// whose assignment moved away is told to stop and parked in a draining set,
/// where it keeps being pinged. A draining worker wedged inside a poll never
/// sees the stop request, misses its ping, and is killed like any other
/// unresponsive worker. The pass itself never waits on a worker; joining
/// happens only on node shutdown.
pub(crate) struct AssignmentSupervisor {
    node_id: u32,
    store: CoordinationStorage,
    factory: Box<dyn WorkerFactory>,
    workers: HashMap<String, Box<dyn Worker>>,
    draining: Vec<(String, Box<dyn Worker>)>,
}

impl AssignmentSupervisor {
    pub(crate) fn new(
        node_id: u32,
        store: CoordinationStorage,
        factory: Box<dyn WorkerFactory>,
    ) -> Self {
        AssignmentSupervisor {
            node_id,
            store,
            factory,
            workers: HashMap::new(),
            draining: Vec::new(),
        }
    }

    pub(crate) async fn start(
        &mut self,
        mut supervise_interval: Interval,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = supervise_interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) = self.supervise().await {
                warn!(node_id = %self.node_id, error = %e, "supervision pass failed");
            }
        }
        self.shutdown_workers().await;
    }

    /// One supervision pass: converge the worker set onto the assignments
    /// currently naming this node.
    pub(crate) async fn supervise(&mut self) -> Result<()> {
        let mine = self.my_assignments().await?;

        for (name, worker) in std::mem::take(&mut self.draining) {
            if !worker.is_alive() {
                info!(partition = %name, "draining worker exited");
                continue;
            }
            if worker.pinged() && !worker.acknowledged() {
                counter!(WORKERS_KILLED_TOTAL.name).increment(1);
                warn!(partition = %name, "draining worker missed a ping, killing it");
                worker.kill();
                continue;
            }
            worker.ping();
            self.draining.push((name, worker));
        }

        for (name, worker) in std::mem::take(&mut self.workers) {
            if !worker.is_alive() {
                counter!(WORKERS_DIED_TOTAL.name).increment(1);
                warn!(partition = %name, "partition worker died, respawning if still assigned");
                continue;
            }
            if !mine.contains(&name) {
                info!(partition = %name, "assignment moved away, stopping worker");
                worker.stop();
                worker.ping();
                self.draining.push((name, worker));
                continue;
            }
            if worker.pinged() && !worker.acknowledged() {
                counter!(WORKERS_KILLED_TOTAL.name).increment(1);
                warn!(partition = %name, "worker missed a ping, killing it");
                worker.kill();
                continue;
            }
            worker.ping();
            self.workers.insert(name, worker);
        }

        for name in mine {
            if self.workers.contains_key(&name) {
                continue;
            }
            match parse_assignment_name(&name) {
                Some((topic, partition)) => {
                    info!(partition = %name, "starting partition worker");
                    let worker = self.factory.spawn(topic, partition);
                    self.workers.insert(name, worker);
                }
                None => {
                    warn!(entry = %name, "assignment entry has no partition index, ignoring");
                }
            }
        }

        gauge!(WORKERS_RUNNING.name).set(self.workers.len() as f64);
        Ok(())
    }

    /// Stop every worker and wait for them; used on node shutdown.
    pub(crate) async fn shutdown_workers(&mut self) {
        let workers: Vec<(String, Box<dyn Worker>)> = std::mem::take(&mut self.workers)
            .into_iter()
            .chain(std::mem::take(&mut self.draining))
            .collect();
        for (name, worker) in &workers {
            info!(partition = %name, "stopping partition worker");
            worker.stop();
        }
        for (_, worker) in &workers {
            worker.join().await;
        }
        gauge!(WORKERS_RUNNING.name).set(0.0);
    }

    async fn my_assignments(&self) -> Result<BTreeSet<String>> {
        let own_id = self.node_id.to_string();
        let mut mine = BTreeSet::new();
        for name in self.store.children(BASE_ASSIGNMENTS_PATH).await? {
            let path = join_path(&[BASE_ASSIGNMENTS_PATH, &name]);
            // An assignment deleted between listing and reading simply is
            // not ours anymore.
            if let Some(bytes) = self.store.read(&path).await? {
                if bytes == own_id.as_bytes() {
                    mine.insert(name);
                }
            }
        }
        Ok(mine)
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;
