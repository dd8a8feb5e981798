//! Overload-driven load redistribution
//!
//! The corrective half of the control loop: drain every overloaded node
//! toward its rebalance target by shifting load onto directly connected
//! neighbours with spare capacity, most efficient neighbour first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::GridConfig;
use crate::grid::types::{NodeId, Transfer};
use crate::grid::{apply_transfer, Topology};
use crate::index::OrderedIndex;

/// Outcome of one balancing cycle
#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub overloaded: usize,
    pub balanced: usize,
    pub success_rate: f64,
}

/// Network-wide efficiency figures
#[derive(Debug, Clone, Serialize)]
pub struct EfficiencyReport {
    pub global_efficiency: f64,
    pub total_losses: f64,
    pub efficiency_ratio: f64,
}

/// Audit record of the transfers applied for one overloaded source
#[derive(Debug, Clone, Serialize)]
pub struct TransferBatch {
    pub source: NodeId,
    pub transfers: Vec<Transfer>,
    pub total_transferred: f64,
    pub at: DateTime<Utc>,
}

/// Balancer activity counters
#[derive(Debug, Clone, Serialize)]
pub struct BalancerStats {
    pub total_operations: usize,
    pub total_load_transferred: f64,
    pub avg_transfer_per_operation: f64,
}

struct Candidate {
    id: NodeId,
    available: f64,
    efficiency: f64,
}

/// Overload-driven neighbour redistribution engine
pub struct Balancer {
    overload_threshold: f64,
    rebalance_target: f64,
    history: VecDeque<TransferBatch>,
    history_limit: usize,
    total_transferred: f64,
    total_operations: usize,
}

impl Balancer {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            overload_threshold: config.overload_threshold,
            rebalance_target: config.rebalance_target,
            history: VecDeque::new(),
            history_limit: config.balancing_history_limit.max(1),
            total_transferred: 0.0,
            total_operations: 0,
        }
    }

    /// One balancing cycle over every overloaded node, in index order.
    ///
    /// Returns the report plus every transfer that was applied, so the
    /// caller can persist them.
    pub fn balance(
        &mut self,
        index: &mut OrderedIndex,
        topology: &mut Topology,
        now: DateTime<Utc>,
    ) -> (BalanceReport, Vec<Transfer>) {
        let overloaded = index.overloaded(self.overload_threshold);
        let mut balanced = 0usize;
        let mut applied = Vec::new();

        for entry in &overloaded {
            let excess = entry.state.current_load - self.rebalance_target * entry.state.capacity;
            if excess <= 0.0 {
                continue;
            }
            let transferred = self.redistribute(index, topology, &entry.id, excess, now, &mut applied);
            let residual = excess - transferred;
            if residual < excess * 0.1 {
                balanced += 1;
            } else {
                debug!(node = %entry.id, residual, "node still above target after redistribution");
            }
        }

        let report = BalanceReport {
            overloaded: overloaded.len(),
            balanced,
            success_rate: if overloaded.is_empty() {
                1.0
            } else {
                balanced as f64 / overloaded.len() as f64
            },
        };
        if report.overloaded > 0 {
            info!(
                overloaded = report.overloaded,
                balanced = report.balanced,
                transfers = applied.len(),
                "balancing cycle complete"
            );
        }
        (report, applied)
    }

    /// Shifts up to `excess` units away from `source`; returns how much moved.
    fn redistribute(
        &mut self,
        index: &mut OrderedIndex,
        topology: &mut Topology,
        source: &NodeId,
        excess: f64,
        now: DateTime<Utc>,
        applied: &mut Vec<Transfer>,
    ) -> f64 {
        let Ok(neighbours) = topology.neighbours(source) else {
            return 0.0;
        };

        let mut candidates: Vec<Candidate> = neighbours
            .into_iter()
            .filter(|(_, attr)| attr.is_active())
            .filter_map(|(id, _)| {
                let state = index.get(&id)?;
                let available = state.headroom();
                (available > 0.0).then(|| Candidate {
                    id,
                    available,
                    efficiency: state.efficiency,
                })
            })
            .collect();

        // Most efficient sink first; identifiers break ties deterministically
        candidates.sort_by(|a, b| {
            b.efficiency
                .total_cmp(&a.efficiency)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut remaining = excess;
        let mut batch = Vec::new();
        for candidate in candidates {
            if remaining <= 0.0 {
                break;
            }
            let amount = remaining.min(candidate.available);
            let transfer = Transfer {
                from: source.clone(),
                to: candidate.id,
                amount,
            };
            if apply_transfer(index, topology, &transfer).is_ok() {
                remaining -= amount;
                batch.push(transfer);
            }
        }

        let transferred = excess - remaining;
        if !batch.is_empty() {
            applied.extend(batch.iter().cloned());
            self.total_transferred += transferred;
            self.total_operations += 1;
            if self.history.len() >= self.history_limit {
                self.history.pop_front();
            }
            self.history.push_back(TransferBatch {
                source: source.clone(),
                transfers: batch,
                total_transferred: transferred,
                at: now,
            });
        }
        transferred
    }

    /// Load-weighted efficiency of the whole network
    pub fn network_efficiency(index: &OrderedIndex) -> EfficiencyReport {
        let mut weighted = 0.0;
        let mut total_load = 0.0;
        for (_, state) in index.in_order() {
            weighted += state.current_load * state.efficiency;
            total_load += state.current_load;
        }
        EfficiencyReport {
            global_efficiency: weighted,
            total_losses: if total_load > 0.0 { total_load - weighted } else { 0.0 },
            efficiency_ratio: if total_load > 0.0 { weighted / total_load } else { 0.0 },
        }
    }

    pub fn recent_batches(&self) -> impl Iterator<Item = &TransferBatch> {
        self.history.iter().rev().take(5)
    }

    pub fn stats(&self) -> BalancerStats {
        BalancerStats {
            total_operations: self.total_operations,
            total_load_transferred: self.total_transferred,
            avg_transfer_per_operation: if self.total_operations > 0 {
                self.total_transferred / self.total_operations as f64
            } else {
                0.0
            },
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.total_transferred = 0.0;
        self.total_operations = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::types::{NodeKind, NodeState};
    use chrono::TimeZone;

    fn build(nodes: &[(&str, f64, f64)], edges: &[(&str, &str)]) -> (OrderedIndex, Topology) {
        let mut index = OrderedIndex::new();
        let mut topo = Topology::new();
        for (id, load, efficiency) in nodes {
            topo.add_node(NodeId::from(*id), NodeKind::Transformer, 100.0, *efficiency, *load)
                .unwrap();
            index.upsert(
                NodeId::from(*id),
                NodeState {
                    kind: NodeKind::Transformer,
                    capacity: 100.0,
                    current_load: *load,
                    efficiency: *efficiency,
                },
            );
        }
        for (u, v) in edges {
            topo.add_edge(&NodeId::from(*u), &NodeId::from(*v), 1.0, 0.1)
                .unwrap();
        }
        (index, topo)
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
    }

    #[test]
    fn drains_overloaded_node_to_target() {
        let (mut index, mut topo) = build(
            &[("x", 95.0, 0.85), ("y", 10.0, 0.9), ("z", 10.0, 0.8)],
            &[("x", "y"), ("x", "z")],
        );
        let mut balancer = Balancer::new(&GridConfig::default());
        let (report, applied) = balancer.balance(&mut index, &mut topo, now());

        assert_eq!(report.overloaded, 1);
        assert_eq!(report.balanced, 1);
        assert_eq!(report.success_rate, 1.0);
        assert!(index.get(&NodeId::from("x")).unwrap().current_load <= 80.0);
        // the more efficient neighbour receives the load
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].to, NodeId::from("y"));
        assert!((applied[0].amount - 15.0).abs() < 1e-9);
    }

    #[test]
    fn spills_over_to_second_neighbour_when_first_fills() {
        let (mut index, mut topo) = build(
            &[("x", 100.0, 0.85), ("y", 85.0, 0.9), ("z", 10.0, 0.8)],
            &[("x", "y"), ("x", "z")],
        );
        let mut balancer = Balancer::new(&GridConfig::default());
        let (report, applied) = balancer.balance(&mut index, &mut topo, now());

        // 20 units of excess: y takes its 15 of headroom, z the rest
        assert_eq!(report.balanced, 1);
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].to, NodeId::from("y"));
        assert!((applied[0].amount - 15.0).abs() < 1e-9);
        assert_eq!(applied[1].to, NodeId::from("z"));
        assert!((applied[1].amount - 5.0).abs() < 1e-9);
    }

    #[test]
    fn no_overload_is_a_successful_noop() {
        let (mut index, mut topo) = build(&[("a", 50.0, 0.9), ("b", 60.0, 0.9)], &[("a", "b")]);
        let mut balancer = Balancer::new(&GridConfig::default());
        let (report, applied) = balancer.balance(&mut index, &mut topo, now());
        assert_eq!(report.overloaded, 0);
        assert_eq!(report.success_rate, 1.0);
        assert!(applied.is_empty());
        assert_eq!(index.get(&NodeId::from("a")).unwrap().current_load, 50.0);
    }

    #[test]
    fn isolated_overload_cannot_balance() {
        let (mut index, mut topo) = build(&[("x", 95.0, 0.85), ("y", 10.0, 0.9)], &[]);
        let mut balancer = Balancer::new(&GridConfig::default());
        let (report, _) = balancer.balance(&mut index, &mut topo, now());
        assert_eq!(report.overloaded, 1);
        assert_eq!(report.balanced, 0);
        assert_eq!(report.success_rate, 0.0);
    }

    #[test]
    fn conservation_across_the_cycle() {
        let (mut index, mut topo) = build(
            &[("x", 95.0, 0.85), ("y", 10.0, 0.9), ("z", 10.0, 0.8)],
            &[("x", "y"), ("x", "z")],
        );
        let before: f64 = index.in_order().iter().map(|(_, s)| s.current_load).sum();
        let mut balancer = Balancer::new(&GridConfig::default());
        balancer.balance(&mut index, &mut topo, now());
        let after: f64 = index.in_order().iter().map(|(_, s)| s.current_load).sum();
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn efficiency_report_weights_by_load() {
        let (index, _) = build(&[("a", 100.0, 0.8), ("b", 100.0, 1.0)], &[]);
        let report = Balancer::network_efficiency(&index);
        assert!((report.global_efficiency - 180.0).abs() < 1e-9);
        assert!((report.total_losses - 20.0).abs() < 1e-9);
        assert!((report.efficiency_ratio - 0.9).abs() < 1e-9);
    }

    #[test]
    fn stats_accumulate_over_cycles() {
        let (mut index, mut topo) = build(
            &[("x", 95.0, 0.85), ("y", 10.0, 0.9)],
            &[("x", "y")],
        );
        let mut balancer = Balancer::new(&GridConfig::default());
        balancer.balance(&mut index, &mut topo, now());
        let stats = balancer.stats();
        assert_eq!(stats.total_operations, 1);
        assert!((stats.total_load_transferred - 15.0).abs() < 1e-9);
        let recent: Vec<_> = balancer.recent_batches().collect();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].source, NodeId::from("x"));
    }
}
