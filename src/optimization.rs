//! Efficiency-directed load migration and adjacent reporting
//!
//! Where the balancer reacts to overload, the optimizer proactively pulls
//! load toward under-utilized high-efficiency nodes. The carbon and
//! renewable heuristics are pure functions over current state.

use serde::Serialize;
use tracing::info;

use crate::config::GridConfig;
use crate::grid::types::{NodeId, Transfer};
use crate::grid::{apply_transfer, Topology};
use crate::index::OrderedIndex;

/// kg CO2 per wasted unit of energy
const EMISSION_FACTOR: f64 = 0.5;

/// One efficient node's pull of load from weaker neighbours
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationDetail {
    pub target: NodeId,
    pub transfers: Vec<Transfer>,
    pub total_transferred: f64,
    pub efficiency_gain: f64,
}

/// Outcome of one optimization pass
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub optimizations_performed: usize,
    pub total_efficiency_gain: f64,
    pub details: Vec<OptimizationDetail>,
}

/// Estimated emissions from wasted energy, graded A-E
#[derive(Debug, Clone, Serialize)]
pub struct CarbonReport {
    pub total_co2_kg: f64,
    pub co2_per_unit: f64,
    pub efficiency_class: char,
}

/// Renewable integration source suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewableSource {
    SolarFarm,
    WindTurbine,
    SolarPanels,
}

/// A siting candidate for renewable integration
#[derive(Debug, Clone, Serialize)]
pub struct RenewableCandidate {
    pub node_id: NodeId,
    pub score: f64,
    pub current_load: f64,
    pub efficiency: f64,
    pub recommended_source: RenewableSource,
}

/// Greedy efficiency optimizer
pub struct Optimizer {
    underload_threshold: f64,
    min_efficiency: f64,
    migration_fraction: f64,
    cycles: usize,
    cumulative_gain: f64,
}

impl Optimizer {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            underload_threshold: config.optimizer_underload,
            min_efficiency: config.optimizer_min_efficiency,
            migration_fraction: config.optimizer_migration_fraction,
            cycles: 0,
            cumulative_gain: 0.0,
        }
    }

    /// One optimization pass: most efficient nodes first, each pulling up
    /// to a fraction of every weaker active neighbour's load until full.
    pub fn optimize(
        &mut self,
        index: &mut OrderedIndex,
        topology: &mut Topology,
    ) -> (OptimizeReport, Vec<Transfer>) {
        let mut nodes = index.in_order();
        // stable sort keeps id order among equal efficiencies
        nodes.sort_by(|a, b| b.1.efficiency.total_cmp(&a.1.efficiency));

        let mut details = Vec::new();
        let mut applied = Vec::new();

        for (id, _) in nodes {
            // re-read: earlier pulls in this pass may have moved this node
            let Some(state) = index.get(&id).cloned() else {
                continue;
            };
            if state.utilization() >= self.underload_threshold
                || state.efficiency <= self.min_efficiency
            {
                continue;
            }
            if let Some(detail) = self.attract_load(index, topology, &id, &mut applied) {
                details.push(detail);
            }
        }

        let total_gain: f64 = details.iter().map(|d| d.efficiency_gain).sum();
        self.cycles += 1;
        self.cumulative_gain += total_gain;
        if !details.is_empty() {
            info!(
                optimizations = details.len(),
                gain = total_gain,
                "optimization pass complete"
            );
        }
        (
            OptimizeReport {
                optimizations_performed: details.len(),
                total_efficiency_gain: total_gain,
                details,
            },
            applied,
        )
    }

    fn attract_load(
        &self,
        index: &mut OrderedIndex,
        topology: &mut Topology,
        target: &NodeId,
        applied: &mut Vec<Transfer>,
    ) -> Option<OptimizationDetail> {
        let target_state = index.get(target)?.clone();
        let headroom = target_state.headroom();
        if headroom <= 0.0 {
            return None;
        }

        let neighbours = topology.neighbours(target).ok()?;
        let mut transfers = Vec::new();
        let mut gain = 0.0;
        let mut total = 0.0;

        for (neighbour, attr) in neighbours {
            if !attr.is_active() {
                continue;
            }
            let Some(source_state) = index.get(&neighbour).cloned() else {
                continue;
            };
            if source_state.efficiency >= target_state.efficiency {
                continue;
            }
            let amount = (source_state.current_load * self.migration_fraction)
                .min(headroom - total);
            if amount <= 0.0 {
                continue;
            }
            let transfer = Transfer {
                from: neighbour,
                to: target.clone(),
                amount,
            };
            if apply_transfer(index, topology, &transfer).is_ok() {
                gain += amount * (target_state.efficiency - source_state.efficiency);
                total += amount;
                transfers.push(transfer);
                if total >= headroom {
                    break;
                }
            }
        }

        if transfers.is_empty() {
            return None;
        }
        applied.extend(transfers.iter().cloned());
        Some(OptimizationDetail {
            target: target.clone(),
            transfers,
            total_transferred: total,
            efficiency_gain: gain,
        })
    }

    /// Estimated footprint of the energy wasted by inefficiency
    pub fn carbon_footprint(index: &OrderedIndex) -> CarbonReport {
        let mut total_co2 = 0.0;
        let mut total_load = 0.0;
        for (_, state) in index.in_order() {
            total_co2 += state.current_load * (1.0 - state.efficiency) * EMISSION_FACTOR;
            total_load += state.current_load;
        }
        CarbonReport {
            total_co2_kg: total_co2,
            co2_per_unit: if total_load > 0.0 { total_co2 / total_load } else { 0.0 },
            efficiency_class: match total_co2 {
                co2 if co2 < 100.0 => 'A',
                co2 if co2 < 250.0 => 'B',
                co2 if co2 < 500.0 => 'C',
                co2 if co2 < 1000.0 => 'D',
                _ => 'E',
            },
        }
    }

    /// Top five siting candidates for renewable sources: high demand, low
    /// efficiency, good connectivity.
    pub fn suggest_renewables(index: &OrderedIndex, topology: &Topology) -> Vec<RenewableCandidate> {
        let mut candidates: Vec<RenewableCandidate> = index
            .in_order()
            .into_iter()
            .filter_map(|(id, state)| {
                let degree = topology.degree(&id);
                let score = 0.4 * state.utilization()
                    + 0.4 * (1.0 - state.efficiency)
                    + 0.2 * (degree as f64 / 10.0);
                (score > 0.5).then(|| RenewableCandidate {
                    recommended_source: recommend_source(state.current_load),
                    node_id: id,
                    score,
                    current_load: state.current_load,
                    efficiency: state.efficiency,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(5);
        candidates
    }

    pub fn stats(&self) -> OptimizerStats {
        OptimizerStats {
            total_cycles: self.cycles,
            total_efficiency_gain: self.cumulative_gain,
            avg_gain_per_cycle: if self.cycles > 0 {
                self.cumulative_gain / self.cycles as f64
            } else {
                0.0
            },
        }
    }

    pub fn clear(&mut self) {
        self.cycles = 0;
        self.cumulative_gain = 0.0;
    }
}

/// Optimizer activity counters
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerStats {
    pub total_cycles: usize,
    pub total_efficiency_gain: f64,
    pub avg_gain_per_cycle: f64,
}

fn recommend_source(load: f64) -> RenewableSource {
    if load > 500.0 {
        RenewableSource::SolarFarm
    } else if load > 200.0 {
        RenewableSource::WindTurbine
    } else {
        RenewableSource::SolarPanels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::types::{NodeKind, NodeState};

    fn build(nodes: &[(&str, f64, f64, f64)], edges: &[(&str, &str)]) -> (OrderedIndex, Topology) {
        let mut index = OrderedIndex::new();
        let mut topo = Topology::new();
        for (id, capacity, load, efficiency) in nodes {
            topo.add_node(NodeId::from(*id), NodeKind::Transformer, *capacity, *efficiency, *load)
                .unwrap();
            index.upsert(
                NodeId::from(*id),
                NodeState {
                    kind: NodeKind::Transformer,
                    capacity: *capacity,
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

    #[test]
    fn migrates_toward_efficient_node() {
        let (mut index, mut topo) = build(
            &[("t", 100.0, 30.0, 0.95), ("n", 100.0, 80.0, 0.70)],
            &[("t", "n")],
        );
        let mut optimizer = Optimizer::new(&GridConfig::default());
        let (report, applied) = optimizer.optimize(&mut index, &mut topo);

        assert_eq!(report.optimizations_performed, 1);
        assert!((report.total_efficiency_gain - 4.0).abs() < 1e-9);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].from, NodeId::from("n"));
        assert_eq!(applied[0].to, NodeId::from("t"));
        assert!((applied[0].amount - 16.0).abs() < 1e-9);
        assert!((index.get(&NodeId::from("t")).unwrap().current_load - 46.0).abs() < 1e-9);
        assert!((index.get(&NodeId::from("n")).unwrap().current_load - 64.0).abs() < 1e-9);
    }

    #[test]
    fn busy_or_inefficient_targets_do_not_pull() {
        // target at 70% utilization does not attract
        let (mut index, mut topo) = build(
            &[("t", 100.0, 70.0, 0.95), ("n", 100.0, 80.0, 0.70)],
            &[("t", "n")],
        );
        let mut optimizer = Optimizer::new(&GridConfig::default());
        let (report, _) = optimizer.optimize(&mut index, &mut topo);
        assert_eq!(report.optimizations_performed, 0);

        // efficient-enough neighbours are left alone
        let (mut index, mut topo) = build(
            &[("t", 100.0, 30.0, 0.95), ("n", 100.0, 80.0, 0.97)],
            &[("t", "n")],
        );
        let (report, _) = optimizer.optimize(&mut index, &mut topo);
        assert_eq!(report.optimizations_performed, 0);
    }

    #[test]
    fn pull_is_capped_by_headroom() {
        let (mut index, mut topo) = build(
            &[("t", 100.0, 55.0, 0.95), ("n", 1000.0, 400.0, 0.70)],
            &[("t", "n")],
        );
        let mut optimizer = Optimizer::new(&GridConfig::default());
        let (_, applied) = optimizer.optimize(&mut index, &mut topo);
        assert_eq!(applied.len(), 1);
        // 20% of 400 is 80, but only 45 units of headroom remain
        assert!((applied[0].amount - 45.0).abs() < 1e-9);
        assert!((index.get(&NodeId::from("t")).unwrap().current_load - 100.0).abs() < 1e-9);
    }

    #[test]
    fn carbon_grades_by_wasted_energy() {
        let (index, _) = build(&[("a", 1000.0, 100.0, 0.8)], &[]);
        // wasted 20 units -> 10 kg
        let report = Optimizer::carbon_footprint(&index);
        assert!((report.total_co2_kg - 10.0).abs() < 1e-9);
        assert_eq!(report.efficiency_class, 'A');

        let (index, _) = build(&[("a", 10_000.0, 4000.0, 0.5)], &[]);
        // wasted 2000 units -> 1000 kg
        let report = Optimizer::carbon_footprint(&index);
        assert_eq!(report.efficiency_class, 'E');
    }

    #[test]
    fn renewable_suggestions_rank_strained_inefficient_nodes() {
        let (index, topo) = build(
            &[
                ("hot", 100.0, 95.0, 0.6),
                ("cool", 100.0, 10.0, 0.98),
                ("warm", 100.0, 80.0, 0.7),
            ],
            &[("hot", "warm"), ("hot", "cool")],
        );
        let suggestions = Optimizer::suggest_renewables(&index, &topo);
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].node_id, NodeId::from("hot"));
        assert!(suggestions.iter().all(|c| c.score > 0.5));
        assert!(!suggestions.iter().any(|c| c.node_id == NodeId::from("cool")));
        assert_eq!(suggestions[0].recommended_source, RenewableSource::SolarPanels);
    }
}
