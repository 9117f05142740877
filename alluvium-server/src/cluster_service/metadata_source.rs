use alluvium_coordination::{CoordinationStorage, CoordinationStore};
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

use crate::{
    resources::{BASE_BROKER_IDS_PATH, BASE_BROKER_TOPICS_PATH},
    utils::join_path,
};

/// A broker of the partitioned log, as registered in the coordination store.
#[derive(Debug, Clone)]
pub(crate) struct Broker {
    pub(crate) host: String,
}

/// One partition of a topic, with the broker currently leading it.
/// `leader` is `None` while the partition is leaderless (broker restart,
/// election in flight).
#[derive(Debug, Clone)]
pub(crate) struct PartitionMeta {
    pub(crate) topic: String,
    pub(crate) partition: u32,
    pub(crate) leader: Option<u32>,
}

/// Point-in-time view of the log cluster, refreshed at the start of every
/// balance cycle.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClusterSnapshot {
    pub(crate) brokers: HashMap<u32, Broker>,
    pub(crate) partitions: Vec<PartitionMeta>,
}

impl ClusterSnapshot {
    /// Hostname of the broker leading this partition, when known.
    pub(crate) fn leader_host(&self, meta: &PartitionMeta) -> Option<&str> {
        meta.leader
            .and_then(|id| self.brokers.get(&id))
            .map(|broker| broker.host.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct BrokerPayload {
    host: String,
}

#[derive(Debug, Deserialize)]
struct PartitionStatePayload {
    leader: i64,
}

/// Reads the log cluster metadata the brokers publish into the coordination
/// store, under the Kafka-style `/brokers` layout.
#[derive(Debug, Clone)]
pub(crate) struct StoreMetadataSource {
    store: CoordinationStorage,
}

impl StoreMetadataSource {
    pub(crate) fn new(store: CoordinationStorage) -> Self {
        StoreMetadataSource { store }
    }

    pub(crate) async fn snapshot(&self) -> Result<ClusterSnapshot> {
        let mut snapshot = ClusterSnapshot::default();

        for name in self.store.children(BASE_BROKER_IDS_PATH).await? {
            let id: u32 = match name.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(entry = %name, "skipping broker entry with non-numeric id");
                    continue;
                }
            };
            let path = join_path(&[BASE_BROKER_IDS_PATH, &name]);
            match self.store.read(&path).await? {
                Some(bytes) => match serde_json::from_slice::<BrokerPayload>(&bytes) {
                    Ok(payload) => {
                        snapshot.brokers.insert(id, Broker { host: payload.host });
                    }
                    Err(e) => {
                        warn!(broker_id = %id, error = %e, "skipping broker entry with unparseable payload");
                    }
                },
                // Registration raced with our listing.
                None => continue,
            }
        }

        for topic in self.store.children(BASE_BROKER_TOPICS_PATH).await? {
            let partitions_path = join_path(&[BASE_BROKER_TOPICS_PATH, &topic, "partitions"]);
            for index in self.store.children(&partitions_path).await? {
                let partition: u32 = match index.parse() {
                    Ok(partition) => partition,
                    Err(_) => {
                        warn!(topic = %topic, entry = %index, "skipping non-numeric partition entry");
                        continue;
                    }
                };
                let state_path = join_path(&[&partitions_path, &index, "state"]);
                let leader = match self.store.read(&state_path).await? {
                    Some(bytes) => match serde_json::from_slice::<PartitionStatePayload>(&bytes) {
                        Ok(state) if state.leader >= 0 => Some(state.leader as u32),
                        Ok(_) => None,
                        Err(e) => {
                            warn!(topic = %topic, partition = partition, error = %e, "unparseable partition state");
                            None
                        }
                    },
                    None => None,
                };
                snapshot.partitions.push(PartitionMeta {
                    topic: topic.clone(),
                    partition,
                    leader,
                });
            }
        }

        Ok(snapshot)
    }
}

/// Name of the assignment entry for a partition: `<topic>-<index>`.
pub(crate) fn assignment_name(topic: &str, partition: u32) -> String {
    format!("{}-{}", topic, partition)
}

/// Split an assignment entry name back into topic and partition index.
///
/// Topic names may themselves contain dashes, so the partition index is the
/// digits after the last dash.
pub(crate) fn parse_assignment_name(name: &str) -> Option<(&str, u32)> {
    let (topic, index) = name.rsplit_once('-')?;
    if topic.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let partition: u32 = index.parse().ok()?;
    Some((topic, partition))
}
