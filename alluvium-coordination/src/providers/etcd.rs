use crate::{
    errors::{CoordinationError, Result},
    store::CoordinationStore,
};

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// Etcd-backed coordination store.
///
/// The process holds a single client and a single lease; the lease is the
/// session. Ephemeral entries are created under the lease and vanish when
/// keep-alives stop, which is how dead nodes drop out of `/clients`.
#[derive(Clone)]
pub struct EtcdStore {
    client: Arc<Mutex<Client>>,
    lease_id: i64,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("lease_id", &self.lease_id)
            .finish()
    }
}

impl EtcdStore {
    pub async fn new(addr: String, session_ttl_secs: i64) -> Result<Self> {
        let mut client = Client::connect([addr], None).await?;
        let lease = client.lease_grant(session_ttl_secs, None).await?;
        let lease_id = lease.id();

        let (mut keeper, mut stream) = client.lease_keep_alive(lease_id).await?;
        let renew_interval = Duration::from_secs((session_ttl_secs as u64 / 3).max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(renew_interval);
            loop {
                tick.tick().await;
                if let Err(e) = keeper.keep_alive().await {
                    warn!(lease_id = %lease_id, error = %e, "lease keep-alive send failed");
                    break;
                }
                if let Err(e) = stream.message().await {
                    warn!(lease_id = %lease_id, error = %e, "lease keep-alive response failed");
                    break;
                }
            }
        });

        Ok(EtcdStore {
            client: Arc::new(Mutex::new(client)),
            lease_id,
        })
    }

    /// Revoke the session lease; all ephemeral entries disappear with it.
    pub async fn close(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        client.lease_revoke(self.lease_id).await?;
        Ok(())
    }

    async fn create(&self, path: &str, value: &[u8], options: Option<PutOptions>) -> Result<()> {
        // Compare-version-0 makes the put conditional on the key being
        // absent, which is the create semantics the balancer relies on for
        // at-most-one assignment per partition.
        let txn = Txn::new()
            .when(vec![Compare::version(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, value, options)]);

        let mut client = self.client.lock().await;
        let response = client.txn(txn).await?;
        if response.succeeded() {
            Ok(())
        } else {
            Err(CoordinationError::KeyExists(path.to_owned()))
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn ensure_path(&self, path: &str) -> Result<()> {
        // The keyspace is flat; ancestors are marker keys so that `read`
        // and `children` behave like a hierarchy.
        let mut ancestor = String::new();
        for segment in path.split('/').skip(1) {
            ancestor.push('/');
            ancestor.push_str(segment);
            match self.create(&ancestor, b"", None).await {
                Ok(()) | Err(CoordinationError::KeyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn create_persistent(&self, path: &str, value: &[u8]) -> Result<()> {
        self.create(path, value, None).await
    }

    async fn create_ephemeral(&self, path: &str, value: &[u8]) -> Result<()> {
        let options = PutOptions::new().with_lease(self.lease_id);
        self.create(path, value, Some(options)).await
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client.lock().await;
        let response = client.get(path, None).await?;
        Ok(response.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut client = self.client.lock().await;
        let response = client.delete(path, None::<DeleteOptions>).await?;
        if response.deleted() == 0 {
            return Err(CoordinationError::NotFound(path.to_owned()));
        }
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", path);
        let mut client = self.client.lock().await;
        let response = client
            .get(
                prefix.as_str(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await?;

        let mut names = BTreeSet::new();
        for kv in response.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| CoordinationError::Backend(e.to_string()))?;
            if let Some(rest) = key.strip_prefix(&prefix) {
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
