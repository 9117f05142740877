use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;

use super::{target_load, LoadView, Plan};

/// Weight-proportional balancing.
///
/// Every node is held to `target_load` = ceil(eligible * weight / total
/// weight). Overloaded nodes shed down to their target, evicting remote
/// partitions before local ones and choosing victims at random so repeated
/// cycles do not always churn the same partitions. Placement prefers a node
/// local to the partition's leader broker when one still has spare capacity,
/// and otherwise falls back to the least loaded node relative to its target.
#[derive(Debug)]
pub(crate) struct EvenBalancer {
    rng: StdRng,
}

impl EvenBalancer {
    pub(crate) fn new() -> Self {
        EvenBalancer {
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_seed(seed: u64) -> Self {
        EvenBalancer {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub(crate) fn plan(&mut self, view: &mut LoadView) -> Plan {
        let mut plan = Plan::default();
        if view.nodes.is_empty() {
            return plan;
        }
        let total_weight: f64 = view.nodes.iter().map(|n| n.weight).sum();

        // Shed overload down to each node's target.
        for node in view.nodes.iter_mut() {
            let target = target_load(view.total_eligible, node.weight, total_weight);
            if node.assigned.len() <= target {
                continue;
            }
            let mut excess = node.assigned.len() - target;

            let (mut remote, mut local): (Vec<String>, Vec<String>) = node
                .assigned
                .iter()
                .cloned()
                .partition(|name| view.home.get(name) != Some(&node.hostname));
            remote.shuffle(&mut self.rng);
            local.shuffle(&mut self.rng);

            let mut shed = HashSet::new();
            for victim in remote.into_iter().chain(local) {
                if excess == 0 {
                    break;
                }
                shed.insert(victim.clone());
                plan.remove.push(victim);
                excess -= 1;
            }
            node.assigned.retain(|name| !shed.contains(name));
        }

        // Shed eligible partitions go back into the pool for this cycle.
        for name in &plan.remove {
            if view.eligible.contains(name) {
                view.unassigned.push(name.clone());
            }
        }
        view.unassigned.sort();
        view.unassigned.dedup();

        // Place, recomputing load ratios after every pick.
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
            if home == Some(&node.hostname)
                && node.assigned.len() < target
                && better(ratio, node.node_id, &local_best)
            {
                local_best = Some((ratio, node.node_id, index));
            }
        }
        local_best.or(best).map(|(_, _, index)| index)
    }
}

/// Lower ratio wins; ties go to the smaller node id for determinism.
pub(super) fn better(ratio: f64, node_id: u32, current: &Option<(f64, u32, usize)>) -> bool {
    match current {
        None => true,
        Some((best_ratio, best_id, _)) => {
            ratio < *best_ratio || (ratio == *best_ratio && node_id < *best_id)
        }
    }
}
