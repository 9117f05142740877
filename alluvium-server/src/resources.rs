use alluvium_coordination::{CoordinationStorage, CoordinationStore};
use anyhow::Result;

use crate::utils::join_path;

pub(crate) const LEADER_PATH: &str = "/leader";
pub(crate) const BASE_CLIENTS_PATH: &str = "/clients";
pub(crate) const BASE_ASSIGNMENTS_PATH: &str = "/assignments";
pub(crate) const BASE_FLAG_ASSIGNMENTS_PATH: &str = "/flag-assignments";
pub(crate) const BASE_TOPICS_PATH: &str = "/topics";

// Kafka-style metadata published by the log brokers.
pub(crate) const BASE_BROKER_IDS_PATH: &str = "/brokers/ids";
pub(crate) const BASE_BROKER_TOPICS_PATH: &str = "/brokers/topics";

/// Convenience functions for the coordination store layout the cluster
/// services rely on.
#[derive(Debug, Clone)]
pub(crate) struct Resources {
    store: CoordinationStorage,
}

impl Resources {
    pub(crate) fn new(store: CoordinationStorage) -> Self {
        Resources { store }
    }

    /// Create the base paths every node expects to exist. Safe to call from
    /// all nodes concurrently.
    pub(crate) async fn ensure_layout(&self, eligible_topics: &[String]) -> Result<()> {
        self.store.ensure_path(BASE_CLIENTS_PATH).await?;
        self.store.ensure_path(BASE_ASSIGNMENTS_PATH).await?;
        self.store.ensure_path(BASE_FLAG_ASSIGNMENTS_PATH).await?;
        for topic in eligible_topics {
            self.store
                .ensure_path(&join_path(&[BASE_TOPICS_PATH, topic]))
                .await?;
        }
        Ok(())
    }
}
