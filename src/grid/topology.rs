//! Undirected weighted adjacency for the distribution network
//!
//! Edge attributes are stored once in a slab and referenced by index from
//! both adjacency rows, so a status change is visible from either endpoint
//! without reconciliation. Every mutation bumps a generation counter that
//! route caches key on.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::grid::types::{EdgeAttr, EdgeStatus, NodeId, NodeKind, NodeState};

/// Aggregate view over the current network
#[derive(Debug, Clone, Serialize)]
pub struct TopologyStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub total_capacity: f64,
    pub total_load: f64,
    pub utilization: f64,
    pub overloaded_count: usize,
    pub isolated_count: usize,
}

/// Weighted undirected graph of producers, relays and consumers
#[derive(Debug, Default)]
pub struct Topology {
    nodes: FxHashMap<NodeId, NodeState>,
    adjacency: FxHashMap<NodeId, Vec<(NodeId, usize)>>,
    edges: Vec<EdgeAttr>,
    edge_slots: FxHashMap<(NodeId, NodeId), usize>,
    generation: u64,
}

/// Normalized key for an undirected edge
fn edge_key(u: &NodeId, v: &NodeId) -> (NodeId, NodeId) {
    if u <= v {
        (u.clone(), v.clone())
    } else {
        (v.clone(), u.clone())
    }
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter incremented on every mutation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn add_node(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        capacity: f64,
        efficiency: f64,
        initial_load: f64,
    ) -> Result<()> {
        if capacity <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "capacity must be positive, got {}",
                capacity
            )));
        }
        if !(efficiency > 0.0 && efficiency <= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "efficiency must be in (0, 1], got {}",
                efficiency
            )));
        }
        if initial_load < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "load must be non-negative, got {}",
                initial_load
            )));
        }
        if self.nodes.contains_key(&id) {
            return Err(Error::Conflict(format!("node {} already exists", id)));
        }

        self.nodes.insert(
            id.clone(),
            NodeState {
                kind,
                capacity,
                current_load: initial_load,
                efficiency,
            },
        );
        self.adjacency.entry(id).or_default();
        self.generation += 1;
        Ok(())
    }

    pub fn add_edge(&mut self, u: &NodeId, v: &NodeId, distance: f64, resistance: f64) -> Result<()> {
        if u == v {
            return Err(Error::InvalidArgument(format!(
                "self-loop on {} rejected",
                u
            )));
        }
        if distance <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "distance must be positive, got {}",
                distance
            )));
        }
        if resistance < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "resistance must be non-negative, got {}",
                resistance
            )));
        }
        for endpoint in [u, v] {
            if !self.nodes.contains_key(endpoint) {
                return Err(Error::NotFound(format!("node {}", endpoint)));
            }
        }
        let key = edge_key(u, v);
        if self.edge_slots.contains_key(&key) {
            return Err(Error::Conflict(format!("edge {}-{} already exists", u, v)));
        }

        let slot = self.edges.len();
        self.edges.push(EdgeAttr::new(distance, resistance));
        self.edge_slots.insert(key, slot);
        self.adjacency
            .entry(u.clone())
            .or_default()
            .push((v.clone(), slot));
        self.adjacency
            .entry(v.clone())
            .or_default()
            .push((u.clone(), slot));
        self.generation += 1;
        Ok(())
    }

    /// Sets the current load and returns the new utilization.
    ///
    /// Detection of the overload condition is the controller's job; this
    /// never raises events on its own.
    pub fn update_load(&mut self, id: &NodeId, load: f64) -> Result<f64> {
        if load < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "load must be non-negative, got {}",
                load
            )));
        }
        let state = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
        state.current_load = load;
        self.generation += 1;
        Ok(state.current_load / state.capacity)
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeState> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Neighbours of a node with a snapshot of each line's attributes
    pub fn neighbours(&self, id: &NodeId) -> Result<Vec<(NodeId, EdgeAttr)>> {
        let rows = self
            .adjacency
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
        Ok(rows
            .iter()
            .map(|(nbr, slot)| (nbr.clone(), self.edges[*slot].clone()))
            .collect())
    }

    /// Adjacency row without cloning attributes, for search hot paths
    pub(crate) fn adjacency_row(&self, id: &NodeId) -> Option<&[(NodeId, usize)]> {
        self.adjacency.get(id).map(|rows| rows.as_slice())
    }

    pub(crate) fn edge_slot_attr(&self, slot: usize) -> &EdgeAttr {
        &self.edges[slot]
    }

    pub fn edge_between(&self, u: &NodeId, v: &NodeId) -> Option<&EdgeAttr> {
        self.edge_slots.get(&edge_key(u, v)).map(|slot| &self.edges[*slot])
    }

    pub fn has_active_edge(&self, u: &NodeId, v: &NodeId) -> bool {
        self.edge_between(u, v).is_some_and(|attr| attr.is_active())
    }

    /// Mutates the line's status; symmetric because both directions share
    /// the same attribute slot.
    pub fn set_edge_status(&mut self, u: &NodeId, v: &NodeId, status: EdgeStatus) -> Result<()> {
        let slot = self
            .edge_slots
            .get(&edge_key(u, v))
            .copied()
            .ok_or_else(|| Error::NotFound(format!("edge {}-{}", u, v)))?;
        self.edges[slot].status = status;
        self.generation += 1;
        Ok(())
    }

    pub fn degree(&self, id: &NodeId) -> usize {
        self.adjacency.get(id).map_or(0, |rows| rows.len())
    }

    fn active_degree(&self, id: &NodeId) -> usize {
        self.adjacency.get(id).map_or(0, |rows| {
            rows.iter()
                .filter(|(_, slot)| self.edges[*slot].is_active())
                .count()
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_slots.len()
    }

    pub fn stats(&self) -> TopologyStats {
        let total_capacity: f64 = self.nodes.values().map(|n| n.capacity).sum();
        let total_load: f64 = self.nodes.values().map(|n| n.current_load).sum();
        let overloaded_count = self
            .nodes
            .values()
            .filter(|n| n.utilization() > 0.9)
            .count();
        let isolated_count = self
            .nodes
            .keys()
            .filter(|id| self.active_degree(id) == 0)
            .count();

        TopologyStats {
            node_count: self.nodes.len(),
            edge_count: self.edge_slots.len(),
            total_capacity,
            total_load,
            utilization: if total_capacity > 0.0 {
                total_load / total_capacity
            } else {
                0.0
            },
            overloaded_count,
            isolated_count,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.adjacency.clear();
        self.edges.clear();
        self.edge_slots.clear();
        self.generation += 1;
    }
}
