use alluvium_coordination::{CoordinationStorage, CoordinationStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::resources::BASE_CLIENTS_PATH;
use crate::utils::join_path;

const REGISTER_ATTEMPTS: u32 = 8;
const REGISTER_BACKOFF: Duration = Duration::from_millis(1000);

/// Membership payload published under `/clients/<node_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodeInfo {
    pub(crate) hostname: String,
    pub(crate) weight: f64,
}

/// Register this node as a cluster member with a session-scoped entry.
///
/// A previous incarnation of the node may still hold the entry until its
/// session expires, so registration retries with a doubling backoff. After
/// the last attempt the error is returned and the node must not start.
pub(crate) async fn register_node(
    store: &CoordinationStorage,
    node_id: u32,
    info: &NodeInfo,
) -> Result<()> {
    let path = join_path(&[BASE_CLIENTS_PATH, &node_id.to_string()]);
    let payload = serde_json::to_vec(info)?;

    let mut backoff = REGISTER_BACKOFF;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.create_ephemeral(&path, &payload).await {
            Ok(()) => {
                info!(
                    node_id = %node_id,
                    hostname = %info.hostname,
                    weight = %info.weight,
                    "node registered in the cluster"
                );
                return Ok(());
            }
            Err(e) if attempt < REGISTER_ATTEMPTS => {
                warn!(
                    node_id = %node_id,
                    attempt = attempt,
                    error = %e,
                    "node registration failed, retrying"
                );
                sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                error!(node_id = %node_id, error = %e, "node registration failed");
                return Err(e.into());
            }
        }
    }
}

/// Read the current cluster membership from `/clients`.
///
/// Entries with a non-numeric name or an unparseable payload are skipped so
/// that one bad entry cannot take balancing down.
pub(crate) async fn read_members(store: &CoordinationStorage) -> Result<HashMap<u32, NodeInfo>> {
    let mut members = HashMap::new();
    for name in store.children(BASE_CLIENTS_PATH).await? {
        let node_id: u32 = match name.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(entry = %name, "skipping member entry with non-numeric id");
                continue;
            }
        };
        let path = join_path(&[BASE_CLIENTS_PATH, &name]);
        match store.read(&path).await? {
            Some(bytes) => match serde_json::from_slice::<NodeInfo>(&bytes) {
                Ok(info) => {
                    members.insert(node_id, info);
                }
                Err(e) => {
                    warn!(node_id = %node_id, error = %e, "skipping member entry with unparseable payload");
                }
            },
            // The session expired between listing and reading.
            None => continue,
        }
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alluvium_coordination::MemoryStore;

    /// Registration publishes the membership payload and `read_members`
    /// round-trips it, skipping junk entries.
    #[tokio::test]
    async fn test_register_and_read_members() -> Result<()> {
        let store = CoordinationStorage::InMemory(MemoryStore::new());
        let info = NodeInfo {
            hostname: "worker-1".to_string(),
            weight: 8.0,
        };
        register_node(&store, 1, &info).await?;
        store
            .create_persistent("/clients/not-a-node", b"junk")
            .await?;
        store.create_persistent("/clients/2", b"junk").await?;

        let members = read_members(&store).await?;
        assert_eq!(members.len(), 1);
        assert_eq!(members[&1].hostname, "worker-1");
        assert_eq!(members[&1].weight, 8.0);
        Ok(())
    }

    /// After a clean shutdown (session closed) the same id can register
    /// again without leftovers from the previous incarnation.
    #[tokio::test]
    async fn test_reregister_after_session_close() -> Result<()> {
        let tree = MemoryStore::new();
        let info = NodeInfo {
            hostname: "worker-1".to_string(),
            weight: 2.0,
        };

        let first = CoordinationStorage::InMemory(tree.clone());
        register_node(&first, 3, &info).await?;
        first.close().await?;

        let second = CoordinationStorage::InMemory(tree.handle());
        register_node(&second, 3, &info).await?;

        let members = read_members(&second).await?;
        assert_eq!(members.len(), 1);
        assert_eq!(members[&3].weight, 2.0);
        Ok(())
    }

    /// A second registration under the same id fails after exhausting the
    /// retries; the node must treat this as fatal.
    #[tokio::test(start_paused = true)]
    async fn test_register_duplicate_id_is_fatal() {
        let store = CoordinationStorage::InMemory(MemoryStore::new());
        let info = NodeInfo {
            hostname: "worker-1".to_string(),
            weight: 1.0,
        };
        register_node(&store, 7, &info).await.unwrap();

        let result = register_node(&store, 7, &info).await;
        assert!(result.is_err());
    }
}
