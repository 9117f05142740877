use async_trait::async_trait;

use super::errors::Result;

/// Client contract over a hierarchical, sequentially consistent key-value
/// store with session-scoped (ephemeral) entries.
///
/// Paths are `/`-separated, absolute, and values are opaque bytes. Ephemeral
/// entries are bound to the client session and disappear when it ends.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Idempotently create `path` and its ancestors as persistent entries.
    async fn ensure_path(&self, path: &str) -> Result<()>;

    /// Create a persistent entry; fails with `KeyExists` if present.
    async fn create_persistent(&self, path: &str, value: &[u8]) -> Result<()>;

    /// Create a session-scoped entry; fails with `KeyExists` if present.
    async fn create_ephemeral(&self, path: &str, value: &[u8]) -> Result<()>;

    /// Read the value at `path`, or `None` when absent.
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the entry at `path`; fails with `NotFound` when absent.
    /// Reconciliation callers treat `NotFound` as success.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Names of the immediate children of `path`, without the parent prefix.
    async fn children(&self, path: &str) -> Result<Vec<String>>;
}
