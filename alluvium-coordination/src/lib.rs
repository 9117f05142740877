pub mod errors;
mod providers;
mod store;

pub use errors::{CoordinationError, Result};
pub use providers::etcd::EtcdStore;
pub use providers::in_memory::MemoryStore;
pub use store::CoordinationStore;

use async_trait::async_trait;

/// Configuration for the coordination store backend.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Etcd { addr: String, session_ttl_secs: i64 },
    InMemory,
}

/// The concrete coordination store used by the cluster services.
///
/// Enum dispatch keeps the services free of generics while tests swap in the
/// in-memory provider.
#[derive(Debug, Clone)]
pub enum CoordinationStorage {
    Etcd(EtcdStore),
    InMemory(MemoryStore),
}

impl CoordinationStorage {
    pub async fn new(config: StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::Etcd {
                addr,
                session_ttl_secs,
            } => Ok(CoordinationStorage::Etcd(
                EtcdStore::new(addr, session_ttl_secs).await?,
            )),
            StoreConfig::InMemory => Ok(CoordinationStorage::InMemory(MemoryStore::new())),
        }
    }

    /// End the session; the backend drops this client's ephemeral entries.
    pub async fn close(&self) -> Result<()> {
        match self {
            CoordinationStorage::Etcd(store) => store.close().await,
            CoordinationStorage::InMemory(store) => {
                store.expire_session();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for CoordinationStorage {
    async fn ensure_path(&self, path: &str) -> Result<()> {
        match self {
            CoordinationStorage::Etcd(store) => store.ensure_path(path).await,
            CoordinationStorage::InMemory(store) => store.ensure_path(path).await,
        }
    }

    async fn create_persistent(&self, path: &str, value: &[u8]) -> Result<()> {
        match self {
            CoordinationStorage::Etcd(store) => store.create_persistent(path, value).await,
            CoordinationStorage::InMemory(store) => store.create_persistent(path, value).await,
        }
    }

    async fn create_ephemeral(&self, path: &str, value: &[u8]) -> Result<()> {
        match self {
            CoordinationStorage::Etcd(store) => store.create_ephemeral(path, value).await,
            CoordinationStorage::InMemory(store) => store.create_ephemeral(path, value).await,
        }
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self {
            CoordinationStorage::Etcd(store) => store.read(path).await,
            CoordinationStorage::InMemory(store) => store.read(path).await,
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self {
            CoordinationStorage::Etcd(store) => store.delete(path).await,
            CoordinationStorage::InMemory(store) => store.delete(path).await,
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        match self {
            CoordinationStorage::Etcd(store) => store.children(path).await,
            CoordinationStorage::InMemory(store) => store.children(path).await,
        }
    }
}
