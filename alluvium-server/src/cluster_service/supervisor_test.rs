//! Tests for the assignment supervisor, using mock workers so that worker
//! death, acknowledgement, and wedging can be scripted.

use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

use alluvium_coordination::MemoryStore;

use crate::worker::{PartitionConsumer, TaskWorkerFactory};

#[derive(Debug, Default)]
struct MockState {
    alive: AtomicBool,
    pinged: AtomicBool,
    pong: AtomicBool,
    stopped: AtomicBool,
    killed: AtomicBool,
}

impl MockState {
    fn acknowledge(&self) {
        self.pong.store(true, Ordering::SeqCst);
    }

    fn die(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

struct MockWorker {
    state: Arc<MockState>,
}

#[async_trait]
impl Worker for MockWorker {
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
        self.state.stopped.store(true, Ordering::SeqCst);
    }

    async fn join(&self) {}

    fn kill(&self) {
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
    }
}

/// Records every spawn and hands out the worker states for scripting.
#[derive(Default, Clone)]
struct MockFactory {
    spawned: Arc<Mutex<Vec<(String, Arc<MockState>)>>>,
}

impl MockFactory {
    fn spawned(&self) -> Vec<(String, Arc<MockState>)> {
        self.spawned.lock().unwrap().clone()
    }

    fn state_of(&self, name: &str) -> Arc<MockState> {
        self.spawned()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, state)| state.clone())
            .expect("no worker spawned for partition")
    }
}

impl WorkerFactory for MockFactory {
    fn spawn(&self, topic: &str, partition: u32) -> Box<dyn Worker> {
        let state = Arc::new(MockState {
            alive: AtomicBool::new(true),
            ..Default::default()
        });
        self.spawned
            .lock()
            .unwrap()
            .push((format!("{}-{}", topic, partition), state.clone()));
        Box::new(MockWorker { state })
    }
}

async fn supervisor_with_store() -> (AssignmentSupervisor, CoordinationStorage, MockFactory) {
    let store = CoordinationStorage::InMemory(MemoryStore::new());
    let factory = MockFactory::default();
    let supervisor = AssignmentSupervisor::new(1, store.clone(), Box::new(factory.clone()));
    (supervisor, store, factory)
}

/// Workers are spawned only for assignments naming this node; foreign and
/// malformed entries are ignored.
#[tokio::test]
async fn test_spawns_only_own_assignments() {
    let (mut supervisor, store, factory) = supervisor_with_store().await;
    store
        .create_persistent("/assignments/logs-0", b"1")
        .await
        .unwrap();
    store
        .create_persistent("/assignments/logs-1", b"2")
        .await
        .unwrap();
    store
        .create_persistent("/assignments/garbage", b"1")
        .await
        .unwrap();

    supervisor.supervise().await.unwrap();

    let spawned = factory.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].0, "logs-0");
}

/// A worker whose assignment moved to another node is stopped gracefully
/// and not respawned.
#[tokio::test]
async fn test_stops_worker_when_assignment_moves() {
    let (mut supervisor, store, factory) = supervisor_with_store().await;
    store
        .create_persistent("/assignments/logs-0", b"1")
        .await
        .unwrap();
    supervisor.supervise().await.unwrap();

    store.delete("/assignments/logs-0").await.unwrap();
    store
        .create_persistent("/assignments/logs-0", b"2")
        .await
        .unwrap();
    supervisor.supervise().await.unwrap();

    let state = factory.state_of("logs-0");
    assert!(state.stopped.load(Ordering::SeqCst));
    assert!(!state.killed.load(Ordering::SeqCst));
    assert_eq!(factory.spawned().len(), 1);
}

/// A worker that dies on its own is replaced within the same pass while the
/// assignment still names this node.
#[tokio::test]
async fn test_respawns_dead_worker() {
    let (mut supervisor, store, factory) = supervisor_with_store().await;
    store
        .create_persistent("/assignments/logs-0", b"1")
        .await
        .unwrap();
    supervisor.supervise().await.unwrap();

    factory.state_of("logs-0").die();
    supervisor.supervise().await.unwrap();

    let spawned = factory.spawned();
    assert_eq!(spawned.len(), 2);
    assert!(spawned[1].1.alive.load(Ordering::SeqCst));
}

/// A healthy worker is pinged each pass and survives as long as it keeps
/// acknowledging.
#[tokio::test]
async fn test_acknowledged_worker_survives() {
    let (mut supervisor, store, factory) = supervisor_with_store().await;
    store
        .create_persistent("/assignments/logs-0", b"1")
        .await
        .unwrap();
    supervisor.supervise().await.unwrap();

    for _ in 0..3 {
        supervisor.supervise().await.unwrap();
        factory.state_of("logs-0").acknowledge();
    }

    let state = factory.state_of("logs-0");
    assert!(state.alive.load(Ordering::SeqCst));
    assert!(!state.killed.load(Ordering::SeqCst));
    assert_eq!(factory.spawned().len(), 1);
}

/// A worker that misses a full supervision interval without acknowledging
/// its ping is killed and replaced.
#[tokio::test]
async fn test_kills_unresponsive_worker() {
    let (mut supervisor, store, factory) = supervisor_with_store().await;
    store
        .create_persistent("/assignments/logs-0", b"1")
        .await
        .unwrap();
    supervisor.supervise().await.unwrap();
    // Second pass pings; the worker never acknowledges.
    supervisor.supervise().await.unwrap();
    // Third pass finds the ping unanswered.
    supervisor.supervise().await.unwrap();

    let spawned = factory.spawned();
    assert!(spawned[0].1.killed.load(Ordering::SeqCst));
    assert_eq!(spawned.len(), 2);
    assert!(spawned[1].1.alive.load(Ordering::SeqCst));
}

/// A draining worker that ignores the stop request is killed once it
/// misses a ping, like any other unresponsive worker.
#[tokio::test]
async fn test_kills_draining_worker_that_ignores_stop() {
    let (mut supervisor, store, factory) = supervisor_with_store().await;
    store
        .create_persistent("/assignments/logs-0", b"1")
        .await
        .unwrap();
    supervisor.supervise().await.unwrap();

    store.delete("/assignments/logs-0").await.unwrap();
    store
        .create_persistent("/assignments/logs-0", b"2")
        .await
        .unwrap();
    // Second pass parks the worker for draining with a ping pending; the
    // third pass finds the ping unanswered.
    supervisor.supervise().await.unwrap();
    supervisor.supervise().await.unwrap();

    let state = factory.state_of("logs-0");
    assert!(state.stopped.load(Ordering::SeqCst));
    assert!(state.killed.load(Ordering::SeqCst));
    assert_eq!(factory.spawned().len(), 1);
}

/// A worker wedged inside a poll cannot stall supervision: when its
/// assignment moves away the pass parks it for draining and completes
/// instead of waiting for the poll to return.
#[tokio::test]
async fn test_wedged_worker_does_not_block_supervision() {
    struct StuckConsumer;

    #[async_trait]
    impl PartitionConsumer for StuckConsumer {
        async fn poll(&self, _topic: &str, _partition: u32) -> anyhow::Result<()> {
            std::future::pending().await
        }
    }

    let store = CoordinationStorage::InMemory(MemoryStore::new());
    let factory = TaskWorkerFactory::new(Arc::new(StuckConsumer));
    let mut supervisor = AssignmentSupervisor::new(1, store.clone(), Box::new(factory));
    store
        .create_persistent("/assignments/logs-0", b"1")
        .await
        .unwrap();
    store
        .create_persistent("/assignments/logs-1", b"1")
        .await
        .unwrap();
    supervisor.supervise().await.unwrap();
    // Let the worker tasks enter their first poll.
    tokio::task::yield_now().await;

    store.delete("/assignments/logs-0").await.unwrap();
    store
        .create_persistent("/assignments/logs-0", b"2")
        .await
        .unwrap();

    // The pass must keep supervising logs-1 instead of waiting for the
    // wedged logs-0 worker to exit.
    timeout(Duration::from_secs(2), supervisor.supervise())
        .await
        .expect("supervision pass stalled on a wedged worker")
        .unwrap();
}

/// Shutdown stops every running worker.
#[tokio::test]
async fn test_shutdown_stops_all_workers() {
    let (mut supervisor, store, factory) = supervisor_with_store().await;
    for partition in 0..3 {
        let path = format!("/assignments/logs-{}", partition);
        store.create_persistent(&path, b"1").await.unwrap();
    }
    supervisor.supervise().await.unwrap();

    supervisor.shutdown_workers().await;

    let spawned = factory.spawned();
    assert_eq!(spawned.len(), 3);
    for (_, state) in spawned {
        assert!(state.stopped.load(Ordering::SeqCst));
    }
}
