use std::collections::{BTreeSet, HashSet};

use super::even::better;
use super::{target_load, LoadView, Plan};

/// Locality-first balancing.
///
/// Variant of the even strategy for clusters where cross-host partition
/// reads dominate cost. A partition held away from its leader broker's
/// host is shed whenever a node on that host is live, regardless of
/// targets; a partition already local is never evicted. Placement lands on
/// the least loaded node co-located with the partition's leader when one
/// is live, ignoring capacity, and falls back to the least loaded node by
/// load/target ratio otherwise. Partitions whose home host has no live
/// node settle on the fallback and stay there, so repeated passes do not
/// churn them.
#[derive(Debug)]
pub(crate) struct LocalBalancer;

impl LocalBalancer {
    pub(crate) fn new() -> Self {
        LocalBalancer
    }

    pub(crate) fn plan(&mut self, view: &mut LoadView) -> Plan {
        let mut plan = Plan::default();
        if view.nodes.is_empty() {
            return plan;
        }
        let total_weight: f64 = view.nodes.iter().map(|n| n.weight).sum();
        let live_hosts: HashSet<String> =
            view.nodes.iter().map(|n| n.hostname.clone()).collect();

        for node in view.nodes.iter_mut() {
            let mut shed = BTreeSet::new();
            for name in &node.assigned {
                match view.home.get(name) {
                    Some(home) if home != &node.hostname && live_hosts.contains(home) => {
                        shed.insert(name.clone());
                    }
                    _ => {}
                }
            }
            node.assigned.retain(|name| !shed.contains(name));
            plan.remove.extend(shed);
        }

        for name in &plan.remove {
            if view.eligible.contains(name) {
                view.unassigned.push(name.clone());
            }
        }
        view.unassigned.sort();
        view.unassigned.dedup();

        for name in std::mem::take(&mut view.unassigned) {
            if let Some(choice) = self.choose_node(view, &name, total_weight) {
                view.nodes[choice].assigned.push(name.clone());
                plan.assign.push((name, view.nodes[choice].node_id));
            }
        }
        plan
    }

    fn choose_node(&self, view: &LoadView, name: &str, total_weight: f64) -> Option<usize> {
        let home = view.home.get(name);
        let mut local_best: Option<(f64, u32, usize)> = None;
        let mut best: Option<(f64, u32, usize)> = None;

        for (index, node) in view.nodes.iter().enumerate() {
            let target = target_load(view.total_eligible, node.weight, total_weight);
            let ratio = if target == 0 {
                f64::INFINITY
            } else {
                node.assigned.len() as f64 / target as f64
            };
            if better(ratio, node.node_id, &best) {
                best = Some((ratio, node.node_id, index));
            }
            if home == Some(&node.hostname) && better(ratio, node.node_id, &local_best) {
                local_best = Some((ratio, node.node_id, index));
            }
        }
        local_best.or(best).map(|(_, _, index)| index)
    }
}
