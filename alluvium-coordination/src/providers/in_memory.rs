use crate::{
    errors::{CoordinationError, Result},
    store::CoordinationStore,
};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    /// Session id of the owner for ephemeral entries, `None` for persistent.
    owner: Option<u64>,
}

#[derive(Debug)]
struct StoreInner {
    entries: DashMap<String, MemoryEntry>,
    next_session: AtomicU64,
}

/// MemoryStore is a simple in-memory coordination store that implements the
/// CoordinationStore trait.
/// SHOULD BE USED ONLY FOR TESTING PURPOSES
///
/// Each handle carries its own session id; `handle()` opens a new session on
/// the same tree and `expire_session()` drops the handle's ephemeral entries,
/// standing in for a real session expiry.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
    session_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(StoreInner {
                entries: DashMap::new(),
                next_session: AtomicU64::new(2),
            }),
            session_id: 1,
        }
    }

    /// Open a new session over the same tree. Simulates a second cluster
    /// node connecting to the same coordination store.
    pub fn handle(&self) -> MemoryStore {
        MemoryStore {
            inner: self.inner.clone(),
            session_id: self.inner.next_session.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Drop every ephemeral entry owned by this handle's session.
    pub fn expire_session(&self) {
        self.inner
            .entries
            .retain(|_, entry| entry.owner != Some(self.session_id));
    }

    fn validate(path: &str) -> Result<()> {
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            return Err(CoordinationError::InvalidArguments(format!(
                "path must be absolute and non-empty: {}",
                path
            )));
        }
        Ok(())
    }

    fn create(&self, path: &str, value: &[u8], owner: Option<u64>) -> Result<()> {
        Self::validate(path)?;
        match self.inner.entries.entry(path.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CoordinationError::KeyExists(path.to_owned()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry {
                    value: value.to_vec(),
                    owner,
                });
                Ok(())
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn ensure_path(&self, path: &str) -> Result<()> {
        Self::validate(path)?;
        let mut ancestor = String::new();
        for segment in path.split('/').skip(1) {
            ancestor.push('/');
            ancestor.push_str(segment);
            self.inner
                .entries
                .entry(ancestor.clone())
                .or_insert(MemoryEntry {
                    value: Vec::new(),
                    owner: None,
                });
        }
        Ok(())
    }

    async fn create_persistent(&self, path: &str, value: &[u8]) -> Result<()> {
        self.create(path, value, None)
    }

    async fn create_ephemeral(&self, path: &str, value: &[u8]) -> Result<()> {
        self.create(path, value, Some(self.session_id))
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Self::validate(path)?;
        Ok(self
            .inner
            .entries
            .get(path)
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        Self::validate(path)?;
        match self.inner.entries.remove(path) {
            Some(_) => Ok(()),
            None => Err(CoordinationError::NotFound(path.to_owned())),
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        Self::validate(path)?;
        let prefix = format!("{}/", path);
        // BTreeSet dedupes grandchildren into their parent name and keeps
        // the listing order stable.
        let mut names = BTreeSet::new();
        for entry in self.inner.entries.iter() {
            if let Some(rest) = entry.key().strip_prefix(&prefix) {
                if let Some(name) = rest.split('/').next() {
                    if !name.is_empty() {
                        names.insert(name.to_owned());
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests basic create, read and delete operations with valid paths.
    #[tokio::test]
    async fn test_create_read_delete() -> Result<()> {
        let store = MemoryStore::new();

        store
            .create_persistent("/assignments/logs-0", b"3")
            .await?;

        let value = store.read("/assignments/logs-0").await?;
        assert_eq!(value, Some(b"3".to_vec()));

        store.delete("/assignments/logs-0").await?;
        assert!(store.read("/assignments/logs-0").await?.is_none());

        Ok(())
    }

    /// Delete of a missing key must surface `NotFound` so that callers can
    /// decide to tolerate the race.
    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let result = store.delete("/assignments/ghost-7").await;
        assert!(matches!(result, Err(CoordinationError::NotFound(_))));
    }

    /// Creating an already present key must fail with `KeyExists`, both for
    /// persistent and ephemeral entries.
    #[tokio::test]
    async fn test_create_existing_is_key_exists() -> Result<()> {
        let store = MemoryStore::new();
        store.create_persistent("/clients/1", b"a").await?;

        let result = store.create_persistent("/clients/1", b"b").await;
        assert!(matches!(result, Err(CoordinationError::KeyExists(_))));

        let result = store.create_ephemeral("/clients/1", b"b").await;
        assert!(matches!(result, Err(CoordinationError::KeyExists(_))));

        // Losing the race must not clobber the winner's value.
        assert_eq!(store.read("/clients/1").await?, Some(b"a".to_vec()));
        Ok(())
    }

    /// `children` returns immediate child names only, deduplicating deeper
    /// descendants into their top-level segment.
    #[tokio::test]
    async fn test_children_names() -> Result<()> {
        let store = MemoryStore::new();
        store.create_persistent("/clients/1", b"x").await?;
        store.create_persistent("/clients/2", b"y").await?;
        store
            .create_persistent("/brokers/topics/logs/partitions/0/state", b"{}")
            .await?;

        let clients = store.children("/clients").await?;
        assert_eq!(clients, vec!["1".to_string(), "2".to_string()]);

        let topics = store.children("/brokers/topics").await?;
        assert_eq!(topics, vec!["logs".to_string()]);

        assert!(store.children("/nothing").await?.is_empty());
        Ok(())
    }

    /// `ensure_path` is idempotent and creates ancestors.
    #[tokio::test]
    async fn test_ensure_path_idempotent() -> Result<()> {
        let store = MemoryStore::new();
        store.ensure_path("/brokers/topics").await?;
        store.ensure_path("/brokers/topics").await?;

        assert!(store.read("/brokers").await?.is_some());
        assert!(store.read("/brokers/topics").await?.is_some());
        Ok(())
    }

    /// Session expiry removes only that session's ephemeral entries;
    /// persistent entries and other sessions survive.
    #[tokio::test]
    async fn test_session_expiry_drops_ephemerals() -> Result<()> {
        let store = MemoryStore::new();
        let other = store.handle();

        store.create_ephemeral("/clients/1", b"one").await?;
        other.create_ephemeral("/clients/2", b"two").await?;
        store.create_persistent("/assignments/logs-0", b"1").await?;

        store.expire_session();

        assert!(store.read("/clients/1").await?.is_none());
        assert_eq!(store.read("/clients/2").await?, Some(b"two".to_vec()));
        assert_eq!(
            store.read("/assignments/logs-0").await?,
            Some(b"1".to_vec())
        );
        Ok(())
    }

    /// Invalid paths are rejected before touching the tree.
    #[tokio::test]
    async fn test_invalid_paths_rejected() {
        let store = MemoryStore::new();
        for bad in ["clients/1", "/", "/clients/"] {
            let result = store.read(bad).await;
            assert!(
                matches!(result, Err(CoordinationError::InvalidArguments(_))),
                "path {:?} should be rejected",
                bad
            );
        }
    }
}
