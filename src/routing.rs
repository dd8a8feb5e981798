//! Least-loss routing over the live topology
//!
//! Two interchangeable strategies run over the active subgraph: classic
//! Dijkstra, and a best-first search using a load/efficiency penalty
//! heuristic. The heuristic can overestimate, so the second strategy is a
//! deterministic best-first search rather than optimal A*; it is never
//! promoted as optimal. A k-redundant variant peels off the best path and
//! re-searches with its edges excluded for failover planning.
//!
//! Results are cached per `(source, destination, algorithm)` and the whole
//! cache is invalidated whenever the topology generation moves, so a stale
//! path is never returned.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Instant;

use lru::LruCache;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GridConfig;
use crate::error::{Error, Result};
use crate::grid::types::{NodeId, NodeState};
use crate::grid::Topology;

/// Routing strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Dijkstra,
    AStar,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Dijkstra => "dijkstra",
            Algorithm::AStar => "astar",
        }
    }

    /// The strategy to compare a result against
    pub fn other(&self) -> Algorithm {
        match self {
            Algorithm::Dijkstra => Algorithm::AStar,
            Algorithm::AStar => Algorithm::Dijkstra,
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dijkstra" => Ok(Algorithm::Dijkstra),
            "astar" | "a-star" | "a*" => Ok(Algorithm::AStar),
            other => Err(Error::InvalidArgument(format!("unknown algorithm: {}", other))),
        }
    }
}

/// Outcome of a single route query
///
/// An unreachable destination is a successful query with `found = false`
/// and no cost, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub path: Vec<NodeId>,
    pub cost: Option<f64>,
    pub algorithm: Algorithm,
    pub exec_ms: f64,
    pub hops: usize,
    pub found: bool,
}

/// One of up to k failover paths with its reliability score
#[derive(Debug, Clone, Serialize)]
pub struct RedundantRoute {
    pub path_id: usize,
    pub path: Vec<NodeId>,
    pub cost: f64,
    pub reliability: f64,
}

/// Rolling statistics over completed routes
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub total_routes: usize,
    pub cache_size: usize,
    pub avg_exec_ms: f64,
    pub avg_hops: f64,
    pub algorithms_seen: Vec<&'static str>,
}

struct RouteSample {
    algorithm: Algorithm,
    exec_ms: f64,
    hops: usize,
}

/// Frontier entry; the seq counter makes equal-cost pops deterministic
/// under the stable neighbour iteration order of the adjacency rows.
struct SearchNode {
    cost: f64,
    seq: u64,
    id: NodeId,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cost.total_cmp(&other.cost) == Ordering::Equal && self.seq == other.seq
    }
}

impl Eq for SearchNode {}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn undirected(u: &NodeId, v: &NodeId) -> (NodeId, NodeId) {
    if u <= v {
        (u.clone(), v.clone())
    } else {
        (v.clone(), u.clone())
    }
}

/// Shortest-path engine with a generation-keyed result cache
pub struct Router {
    cache: LruCache<(NodeId, NodeId, Algorithm), RouteResult>,
    cache_generation: u64,
    history: Vec<RouteSample>,
    nominal_voltage: f64,
    overload_threshold: f64,
    warning_threshold: f64,
}

impl Router {
    pub fn new(config: &GridConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.route_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            cache_generation: 0,
            history: Vec::new(),
            nominal_voltage: config.nominal_voltage,
            overload_threshold: config.overload_threshold,
            warning_threshold: config.warning_threshold,
        }
    }

    /// Drops every cached result once the topology has mutated.
    fn sync_cache(&mut self, generation: u64) {
        if generation != self.cache_generation {
            self.cache.clear();
            self.cache_generation = generation;
        }
    }

    /// Best path between two existing nodes over the active subgraph
    pub fn find_optimal(
        &mut self,
        topology: &Topology,
        src: &NodeId,
        dst: &NodeId,
        algorithm: Algorithm,
    ) -> Result<RouteResult> {
        for endpoint in [src, dst] {
            if !topology.contains(endpoint) {
                return Err(Error::NotFound(format!("node {}", endpoint)));
            }
        }

        self.sync_cache(topology.generation());
        let key = (src.clone(), dst.clone(), algorithm);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let started = Instant::now();
        let excluded = FxHashSet::default();
        let (path, cost) = match algorithm {
            Algorithm::Dijkstra => self.dijkstra(topology, src, dst, &excluded),
            Algorithm::AStar => self.best_first(topology, src, dst),
        };
        let exec_ms = started.elapsed().as_secs_f64() * 1000.0;

        let found = !path.is_empty();
        let result = RouteResult {
            hops: path.len().saturating_sub(1),
            cost: found.then_some(cost),
            path,
            algorithm,
            exec_ms,
            found,
        };

        if found {
            self.cache.put(key, result.clone());
            self.history.push(RouteSample {
                algorithm,
                exec_ms,
                hops: result.hops,
            });
        } else {
            debug!(%src, %dst, algo = algorithm.name(), "no active path");
        }
        Ok(result)
    }

    /// Up to k edge-disjoint failover paths, best first.
    ///
    /// Each attempt excludes every edge used by the previous ones; the
    /// exclusions live only for the duration of the call, so the topology
    /// (and with it the route cache) is untouched.
    pub fn find_redundant(
        &mut self,
        topology: &Topology,
        src: &NodeId,
        dst: &NodeId,
        k: usize,
    ) -> Result<Vec<RedundantRoute>> {
        for endpoint in [src, dst] {
            if !topology.contains(endpoint) {
                return Err(Error::NotFound(format!("node {}", endpoint)));
            }
        }

        let mut excluded: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();
        let mut routes = Vec::new();

        for attempt in 0..k {
            let (path, cost) = self.dijkstra(topology, src, dst, &excluded);
            if path.is_empty() {
                break;
            }
            for pair in path.windows(2) {
                excluded.insert(undirected(&pair[0], &pair[1]));
            }
            let reliability = self.path_reliability(topology, &path);
            routes.push(RedundantRoute {
                path_id: attempt + 1,
                path,
                cost,
                reliability,
            });
        }
        Ok(routes)
    }

    /// Reliability of a path from the health of its intermediate nodes
    fn path_reliability(&self, topology: &Topology, path: &[NodeId]) -> f64 {
        if path.len() < 2 {
            return 1.0;
        }
        let mut reliability = 1.0;
        for id in &path[1..path.len() - 1] {
            if let Some(state) = topology.node(id) {
                reliability *= state.efficiency * self.status_penalty(state);
            }
        }
        reliability
    }

    fn status_penalty(&self, state: &NodeState) -> f64 {
        let utilization = state.utilization();
        if utilization > self.overload_threshold {
            0.5
        } else if utilization > self.warning_threshold {
            0.8
        } else {
            1.0
        }
    }

    /// Estimated resistive loss along a path, I²R per line segment
    pub fn power_loss(&self, topology: &Topology, path: &[NodeId]) -> Result<f64> {
        if path.len() <= 1 {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for pair in path.windows(2) {
            let state = topology
                .node(&pair[0])
                .ok_or_else(|| Error::NotFound(format!("node {}", pair[0])))?;
            let attr = topology
                .edge_between(&pair[0], &pair[1])
                .ok_or_else(|| Error::NotFound(format!("edge {}-{}", pair[0], pair[1])))?;
            let current = state.current_load / self.nominal_voltage;
            total += current * current * attr.resistance * attr.distance;
        }
        Ok(total)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> RouterStats {
        let total = self.history.len();
        let (mut exec_sum, mut hop_sum) = (0.0, 0usize);
        let mut seen: Vec<&'static str> = Vec::new();
        for sample in &self.history {
            exec_sum += sample.exec_ms;
            hop_sum += sample.hops;
            if !seen.contains(&sample.algorithm.name()) {
                seen.push(sample.algorithm.name());
            }
        }
        seen.sort_unstable();
        RouterStats {
            total_routes: total,
            cache_size: self.cache.len(),
            avg_exec_ms: if total > 0 { exec_sum / total as f64 } else { 0.0 },
            avg_hops: if total > 0 {
                hop_sum as f64 / total as f64
            } else {
                0.0
            },
            algorithms_seen: seen,
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.cache_generation = 0;
        self.history.clear();
    }

    fn dijkstra(
        &self,
        topology: &Topology,
        src: &NodeId,
        dst: &NodeId,
        excluded: &FxHashSet<(NodeId, NodeId)>,
    ) -> (Vec<NodeId>, f64) {
        let mut dist: FxHashMap<NodeId, f64> = FxHashMap::default();
        let mut prev: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;

        dist.insert(src.clone(), 0.0);
        heap.push(SearchNode {
            cost: 0.0,
            seq,
            id: src.clone(),
        });

        while let Some(current) = heap.pop() {
            let best = dist.get(&current.id).copied().unwrap_or(f64::INFINITY);
            if current.cost > best {
                continue;
            }
            if current.id == *dst {
                break;
            }

            let Some(rows) = topology.adjacency_row(&current.id) else {
                continue;
            };
            for (neighbour, slot) in rows {
                let attr = topology.edge_slot_attr(*slot);
                if !attr.is_active() {
                    continue;
                }
                if !excluded.is_empty() && excluded.contains(&undirected(&current.id, neighbour)) {
                    continue;
                }
                let candidate = current.cost + attr.weight();
                let known = dist.get(neighbour).copied().unwrap_or(f64::INFINITY);
                if candidate < known {
                    dist.insert(neighbour.clone(), candidate);
                    prev.insert(neighbour.clone(), current.id.clone());
                    seq += 1;
                    heap.push(SearchNode {
                        cost: candidate,
                        seq,
                        id: neighbour.clone(),
                    });
                }
            }
        }

        match dist.get(dst) {
            Some(cost) => (reconstruct(&prev, src, dst), *cost),
            None => (Vec::new(), f64::INFINITY),
        }
    }

    /// Best-first search with an efficiency/utilization penalty heuristic.
    /// The heuristic may overestimate, so this trades optimality for a bias
    /// away from strained nodes.
    fn best_first(&self, topology: &Topology, src: &NodeId, dst: &NodeId) -> (Vec<NodeId>, f64) {
        let heuristic = |state: &NodeState| -> f64 {
            let eff_penalty = if state.efficiency < 0.85 { 1.2 } else { 1.0 };
            let util_penalty = if state.utilization() > 0.8 { 1.5 } else { 1.0 };
            eff_penalty * util_penalty
        };

        let mut g_score: FxHashMap<NodeId, f64> = FxHashMap::default();
        let mut prev: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;

        g_score.insert(src.clone(), 0.0);
        heap.push(SearchNode {
            cost: 0.0,
            seq,
            id: src.clone(),
        });

        while let Some(current) = heap.pop() {
            if current.id == *dst {
                break;
            }
            let g_current = g_score.get(&current.id).copied().unwrap_or(f64::INFINITY);

            let Some(rows) = topology.adjacency_row(&current.id) else {
                continue;
            };
            for (neighbour, slot) in rows {
                let attr = topology.edge_slot_attr(*slot);
                if !attr.is_active() {
                    continue;
                }
                let tentative = g_current + attr.weight();
                let known = g_score.get(neighbour).copied().unwrap_or(f64::INFINITY);
                if tentative < known {
                    g_score.insert(neighbour.clone(), tentative);
                    prev.insert(neighbour.clone(), current.id.clone());
                    let h = topology.node(neighbour).map_or(0.0, |s| heuristic(s));
                    seq += 1;
                    heap.push(SearchNode {
                        cost: tentative + h,
                        seq,
                        id: neighbour.clone(),
                    });
                }
            }
        }

        match g_score.get(dst) {
            Some(cost) => (reconstruct(&prev, src, dst), *cost),
            None => (Vec::new(), f64::INFINITY),
        }
    }
}

fn reconstruct(prev: &FxHashMap<NodeId, NodeId>, src: &NodeId, dst: &NodeId) -> Vec<NodeId> {
    let mut path = vec![dst.clone()];
    let mut current = dst;
    while current != src {
        match prev.get(current) {
            Some(parent) => {
                path.push(parent.clone());
                current = parent;
            }
            None => return Vec::new(),
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::types::{EdgeStatus, NodeKind};

    fn node(topo: &mut Topology, id: &str, load: f64, efficiency: f64) {
        topo.add_node(NodeId::from(id), NodeKind::Transformer, 100.0, efficiency, load)
            .unwrap();
    }

    fn line(topo: &mut Topology, u: &str, v: &str, distance: f64) {
        topo.add_edge(&NodeId::from(u), &NodeId::from(v), distance, 0.0)
            .unwrap();
    }

    fn chain() -> Topology {
        let mut topo = Topology::new();
        for id in ["a", "b", "c"] {
            node(&mut topo, id, 10.0, 0.9);
        }
        line(&mut topo, "a", "b", 1.0);
        line(&mut topo, "b", "c", 1.0);
        topo
    }

    #[test]
    fn dijkstra_finds_chain_path() {
        let topo = chain();
        let mut router = Router::new(&GridConfig::default());
        let result = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("c"), Algorithm::Dijkstra)
            .unwrap();
        assert!(result.found);
        assert_eq!(result.cost, Some(2.0));
        assert_eq!(result.hops, 2);
        assert_eq!(
            result.path,
            vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")]
        );
    }

    #[test]
    fn same_endpoint_is_trivial_path() {
        let topo = chain();
        let mut router = Router::new(&GridConfig::default());
        let result = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("a"), Algorithm::Dijkstra)
            .unwrap();
        assert!(result.found);
        assert_eq!(result.path, vec![NodeId::from("a")]);
        assert_eq!(result.cost, Some(0.0));
        assert_eq!(result.hops, 0);
    }

    #[test]
    fn unreachable_is_not_an_error() {
        let mut topo = Topology::new();
        node(&mut topo, "a", 10.0, 0.9);
        node(&mut topo, "b", 10.0, 0.9);
        let mut router = Router::new(&GridConfig::default());
        let result = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("b"), Algorithm::Dijkstra)
            .unwrap();
        assert!(!result.found);
        assert!(result.path.is_empty());
        assert_eq!(result.cost, None);
    }

    #[test]
    fn missing_endpoint_is_not_found() {
        let topo = chain();
        let mut router = Router::new(&GridConfig::default());
        let err = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("zz"), Algorithm::Dijkstra)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn picks_cheaper_of_two_routes() {
        let mut topo = Topology::new();
        for id in ["a", "b", "c"] {
            node(&mut topo, id, 10.0, 0.9);
        }
        line(&mut topo, "a", "c", 10.0);
        line(&mut topo, "a", "b", 1.0);
        line(&mut topo, "b", "c", 1.0);
        let mut router = Router::new(&GridConfig::default());
        let result = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("c"), Algorithm::Dijkstra)
            .unwrap();
        assert_eq!(result.cost, Some(2.0));
        assert_eq!(result.path.len(), 3);
    }

    #[test]
    fn disabled_edges_do_not_participate() {
        let mut topo = chain();
        topo.set_edge_status(&NodeId::from("a"), &NodeId::from("b"), EdgeStatus::TempDisabled)
            .unwrap();
        let mut router = Router::new(&GridConfig::default());
        let result = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("c"), Algorithm::Dijkstra)
            .unwrap();
        assert!(!result.found);
    }

    #[test]
    fn cache_is_invalidated_by_topology_mutation() {
        let mut topo = chain();
        let mut router = Router::new(&GridConfig::default());
        let first = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("c"), Algorithm::Dijkstra)
            .unwrap();
        assert_eq!(first.hops, 2);
        assert_eq!(router.cache_len(), 1);

        topo.set_edge_status(&NodeId::from("b"), &NodeId::from("c"), EdgeStatus::TempDisabled)
            .unwrap();
        let second = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("c"), Algorithm::Dijkstra)
            .unwrap();
        assert!(!second.found, "stale cached path returned after mutation");
    }

    #[test]
    fn redundant_paths_are_edge_disjoint() {
        let mut topo = Topology::new();
        for id in ["a", "b", "c", "d"] {
            node(&mut topo, id, 10.0, 0.9);
        }
        line(&mut topo, "a", "b", 1.0);
        line(&mut topo, "b", "d", 1.0);
        line(&mut topo, "a", "c", 1.0);
        line(&mut topo, "c", "d", 1.0);
        let mut router = Router::new(&GridConfig::default());
        let routes = router
            .find_redundant(&topo, &NodeId::from("a"), &NodeId::from("d"), 2)
            .unwrap();
        assert_eq!(routes.len(), 2);
        assert_ne!(routes[0].path, routes[1].path);
        for route in &routes {
            assert_eq!(route.cost, 2.0);
            assert_eq!(route.path.len(), 3);
        }
    }

    #[test]
    fn reliability_penalizes_strained_intermediates() {
        let mut topo = Topology::new();
        node(&mut topo, "a", 10.0, 0.9);
        node(&mut topo, "mid", 95.0, 0.9); // overloaded relay
        node(&mut topo, "c", 10.0, 0.9);
        line(&mut topo, "a", "mid", 1.0);
        line(&mut topo, "mid", "c", 1.0);
        let mut router = Router::new(&GridConfig::default());
        let routes = router
            .find_redundant(&topo, &NodeId::from("a"), &NodeId::from("c"), 1)
            .unwrap();
        assert_eq!(routes.len(), 1);
        assert!((routes[0].reliability - 0.9 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn power_loss_over_unit_line() {
        let mut topo = Topology::new();
        node(&mut topo, "a", 220.0, 0.9); // 220 units over 220 V: unit current
        node(&mut topo, "b", 10.0, 0.9);
        topo.add_edge(&NodeId::from("a"), &NodeId::from("b"), 3.0, 0.5)
            .unwrap();
        let router = Router::new(&GridConfig::default());
        let loss = router
            .power_loss(&topo, &[NodeId::from("a"), NodeId::from("b")])
            .unwrap();
        assert!((loss - 1.5).abs() < 1e-9);
        assert_eq!(router.power_loss(&topo, &[NodeId::from("a")]).unwrap(), 0.0);
    }

    #[test]
    fn best_first_reaches_same_endpoints() {
        let topo = chain();
        let mut router = Router::new(&GridConfig::default());
        let result = router
            .find_optimal(&topo, &NodeId::from("a"), &NodeId::from("c"), Algorithm::AStar)
            .unwrap();
        assert!(result.found);
        assert_eq!(
            result.path,
            vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")]
        );
        let stats = router.stats();
        assert_eq!(stats.total_routes, 1);
        assert_eq!(stats.algorithms_seen, vec!["astar"]);
    }
}
