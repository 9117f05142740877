use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running partition worker, owned by the assignment supervisor.
///
/// The ping/acknowledge pair is the liveness probe: the supervisor calls
/// `ping`, the worker loop answers by acknowledging on its next iteration,
/// and a worker that is still pinged but unacknowledged on the following
/// supervision pass is considered wedged.
#[async_trait]
pub(crate) trait Worker: Send + Sync {
    /// False once the worker loop has exited, for any reason.
    fn is_alive(&self) -> bool;

    /// Mark the worker as pinged and clear the previous acknowledgement.
    fn ping(&self);

    fn pinged(&self) -> bool;

    fn acknowledged(&self) -> bool;

    /// Ask the worker loop to finish its current iteration. Returns
    /// immediately; the loop may still be inside a poll.
    fn stop(&self);

    /// Wait for the worker task to finish. Call only after `stop` or `kill`.
    async fn join(&self);

    /// Abort the worker immediately, without waiting.
    fn kill(&self);
}

/// Spawns workers for partitions assigned to this node.
pub(crate) trait WorkerFactory: Send + Sync {
    fn spawn(&self, topic: &str, partition: u32) -> Box<dyn Worker>;
}

/// One unit of work for a partition worker loop. Implementations consume a
/// batch from the partition and land it downstream; errors end the worker,
/// which the supervisor then respawns against the surviving assignment.
#[async_trait]
pub(crate) trait PartitionConsumer: Send + Sync + 'static {
    async fn poll(&self, topic: &str, partition: u32) -> anyhow::Result<()>;
}

/// Pacing consumer used until an ingestion pipeline is wired in.
#[derive(Debug, Clone)]
pub(crate) struct IdleConsumer {
    pub(crate) poll_interval: Duration,
}

#[async_trait]
impl PartitionConsumer for IdleConsumer {
    async fn poll(&self, _topic: &str, _partition: u32) -> anyhow::Result<()> {
        tokio::time::sleep(self.poll_interval).await;
        Ok(())
    }
}

#[derive(Debug)]
struct WorkerState {
    shutdown: AtomicBool,
    alive: AtomicBool,
    pinged: AtomicBool,
    pong: AtomicBool,
}

/// Worker backed by a tokio task running a [`PartitionConsumer`] loop.
pub(crate) struct TaskWorker {
    state: Arc<WorkerState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Worker for TaskWorker {
    fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    fn ping(&self) {
        self.state.pong.store(false, Ordering::SeqCst);
        self.state.pinged.store(true, Ordering::SeqCst);
    }

    fn pinged(&self) -> bool {
        self.state.pinged.load(Ordering::SeqCst)
    }

    fn acknowledged(&self) -> bool {
        self.state.pong.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
    }

    async fn join(&self) {
        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "partition worker join failed");
                }
            }
        }
    }

    fn kill(&self) {
        if let Ok(guard) = self.handle.lock() {
            if let Some(handle) = guard.as_ref() {
                handle.abort();
            }
        }
        self.state.alive.store(false, Ordering::SeqCst);
    }
}

/// Spawns [`TaskWorker`]s that drive the shared consumer.
#[derive(Clone)]
pub(crate) struct TaskWorkerFactory {
    consumer: Arc<dyn PartitionConsumer>,
}

impl TaskWorkerFactory {
    pub(crate) fn new(consumer: Arc<dyn PartitionConsumer>) -> Self {
        TaskWorkerFactory { consumer }
    }
}

impl WorkerFactory for TaskWorkerFactory {
    fn spawn(&self, topic: &str, partition: u32) -> Box<dyn Worker> {
        let state = Arc::new(WorkerState {
            shutdown: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            pinged: AtomicBool::new(false),
            pong: AtomicBool::new(false),
        });

        let loop_state = state.clone();
        let consumer = self.consumer.clone();
        let topic = topic.to_owned();
        let handle = tokio::spawn(async move {
            debug!(topic = %topic, partition = partition, "partition worker started");
            loop {
                if loop_state.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if loop_state.pinged.load(Ordering::SeqCst) {
                    loop_state.pong.store(true, Ordering::SeqCst);
                }
                if let Err(e) = consumer.poll(&topic, partition).await {
                    warn!(topic = %topic, partition = partition, error = %e, "partition worker failed");
                    break;
                }
            }
            loop_state.alive.store(false, Ordering::SeqCst);
            debug!(topic = %topic, partition = partition, "partition worker exited");
        });

        Box::new(TaskWorker {
            state,
            handle: Mutex::new(Some(handle)),
        })
    }
}
