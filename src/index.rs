//! Balanced ordered index of node state
//!
//! An AVL tree keyed by `NodeId` giving logarithmic upsert and lookup plus
//! ordered scans. The overload scan the balancer runs every cycle walks the
//! tree in order so results come back ascending by identifier.

use serde::Serialize;

use crate::grid::types::{NodeId, NodeState};

struct AvlNode {
    key: NodeId,
    state: NodeState,
    height: i32,
    left: Option<Box<AvlNode>>,
    right: Option<Box<AvlNode>>,
}

impl AvlNode {
    fn new(key: NodeId, state: NodeState) -> Box<Self> {
        Box::new(Self {
            key,
            state,
            height: 1,
            left: None,
            right: None,
        })
    }
}

/// Index statistics for monitoring tree health
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub size: usize,
    pub height: i32,
    pub rotations: u64,
    pub balanced: bool,
}

/// An entry returned by the overload scan
#[derive(Debug, Clone, Serialize)]
pub struct OverloadedEntry {
    pub id: NodeId,
    pub state: NodeState,
    pub utilization: f64,
}

/// Self-balancing ordered index of `NodeId → NodeState`
#[derive(Default)]
pub struct OrderedIndex {
    root: Option<Box<AvlNode>>,
    size: usize,
    rotations: u64,
}

fn height(node: &Option<Box<AvlNode>>) -> i32 {
    node.as_ref().map_or(0, |n| n.height)
}

fn update_height(node: &mut AvlNode) {
    node.height = 1 + height(&node.left).max(height(&node.right));
}

fn balance_factor(node: &AvlNode) -> i32 {
    height(&node.left) - height(&node.right)
}

impl OrderedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Inserts or replaces. A replace leaves `size` unchanged.
    pub fn upsert(&mut self, key: NodeId, state: NodeState) {
        let root = self.root.take();
        let mut inserted = false;
        self.root = Some(Self::insert_node(
            root,
            key,
            state,
            &mut self.rotations,
            &mut inserted,
        ));
        if inserted {
            self.size += 1;
        }
    }

    fn insert_node(
        node: Option<Box<AvlNode>>,
        key: NodeId,
        state: NodeState,
        rotations: &mut u64,
        inserted: &mut bool,
    ) -> Box<AvlNode> {
        let mut node = match node {
            None => {
                *inserted = true;
                return AvlNode::new(key, state);
            }
            Some(node) => node,
        };

        match key.cmp(&node.key) {
            std::cmp::Ordering::Less => {
                node.left = Some(Self::insert_node(node.left.take(), key, state, rotations, inserted));
            }
            std::cmp::Ordering::Greater => {
                node.right = Some(Self::insert_node(node.right.take(), key, state, rotations, inserted));
            }
            std::cmp::Ordering::Equal => {
                node.state = state;
                return node;
            }
        }

        update_height(&mut node);
        Self::rebalance(node, rotations)
    }

    fn rotate_right(mut z: Box<AvlNode>, rotations: &mut u64) -> Box<AvlNode> {
        // A left-heavy node always has a left child; bail out untouched otherwise.
        let Some(mut y) = z.left.take() else { return z };
        *rotations += 1;
        z.left = y.right.take();
        update_height(&mut z);
        y.right = Some(z);
        update_height(&mut y);
        y
    }

    fn rotate_left(mut z: Box<AvlNode>, rotations: &mut u64) -> Box<AvlNode> {
        let Some(mut y) = z.right.take() else { return z };
        *rotations += 1;
        z.right = y.left.take();
        update_height(&mut z);
        y.left = Some(z);
        update_height(&mut y);
        y
    }

    fn rebalance(mut node: Box<AvlNode>, rotations: &mut u64) -> Box<AvlNode> {
        let balance = balance_factor(&node);

        if balance > 1 {
            if let Some(left) = node.left.take() {
                node.left = Some(if balance_factor(&left) < 0 {
                    Self::rotate_left(left, rotations)
                } else {
                    left
                });
            }
            return Self::rotate_right(node, rotations);
        }
        if balance < -1 {
            if let Some(right) = node.right.take() {
                node.right = Some(if balance_factor(&right) > 0 {
                    Self::rotate_right(right, rotations)
                } else {
                    right
                });
            }
            return Self::rotate_left(node, rotations);
        }
        node
    }

    pub fn get(&self, key: &NodeId) -> Option<&NodeState> {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            current = match key.cmp(&node.key) {
                std::cmp::Ordering::Less => node.left.as_deref(),
                std::cmp::Ordering::Greater => node.right.as_deref(),
                std::cmp::Ordering::Equal => return Some(&node.state),
            };
        }
        None
    }

    /// Ascending walk over all entries
    pub fn in_order(&self) -> Vec<(NodeId, NodeState)> {
        let mut out = Vec::with_capacity(self.size);
        Self::walk(&self.root, &mut |node| {
            out.push((node.key.clone(), node.state.clone()));
        });
        out
    }

    /// All entries whose utilization exceeds `threshold`, ascending by id
    pub fn overloaded(&self, threshold: f64) -> Vec<OverloadedEntry> {
        let mut out = Vec::new();
        Self::walk(&self.root, &mut |node| {
            let utilization = node.state.utilization();
            if utilization > threshold {
                out.push(OverloadedEntry {
                    id: node.key.clone(),
                    state: node.state.clone(),
                    utilization,
                });
            }
        });
        out
    }

    fn walk(node: &Option<Box<AvlNode>>, visit: &mut impl FnMut(&AvlNode)) {
        if let Some(node) = node {
            Self::walk(&node.left, visit);
            visit(node);
            Self::walk(&node.right, visit);
        }
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            size: self.size,
            height: height(&self.root),
            rotations: self.rotations,
            balanced: self
                .root
                .as_ref()
                .map_or(true, |root| balance_factor(root).abs() <= 1),
        }
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.size = 0;
        self.rotations = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::types::NodeKind;

    fn state(load: f64) -> NodeState {
        NodeState {
            kind: NodeKind::Consumer,
            capacity: 100.0,
            current_load: load,
            efficiency: 0.9,
        }
    }

    #[test]
    fn ascending_inserts_stay_balanced() {
        let mut index = OrderedIndex::new();
        for i in 0..128 {
            index.upsert(NodeId::from(format!("node-{:03}", i).as_str()), state(10.0));
        }
        let stats = index.stats();
        assert_eq!(stats.size, 128);
        assert!(stats.balanced);
        // 2 * ceil(log2(128)) = 14; AVL guarantees ~1.44 log2(n)
        assert!(stats.height <= 14, "height {} too tall", stats.height);
        assert!(stats.rotations > 0);
    }

    #[test]
    fn upsert_replaces_without_growing() {
        let mut index = OrderedIndex::new();
        index.upsert(NodeId::from("a"), state(10.0));
        index.upsert(NodeId::from("a"), state(50.0));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&NodeId::from("a")).unwrap().current_load, 50.0);
    }

    #[test]
    fn in_order_is_ascending() {
        let mut index = OrderedIndex::new();
        for id in ["m", "c", "x", "a", "t"] {
            index.upsert(NodeId::from(id), state(10.0));
        }
        let keys: Vec<String> = index.in_order().into_iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "c", "m", "t", "x"]);
    }

    #[test]
    fn overload_scan_filters_and_orders() {
        let mut index = OrderedIndex::new();
        index.upsert(NodeId::from("b"), state(95.0));
        index.upsert(NodeId::from("a"), state(50.0));
        index.upsert(NodeId::from("c"), state(91.0));
        let hot = index.overloaded(0.9);
        let ids: Vec<String> = hot.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(hot.iter().all(|e| e.utilization > 0.9));
    }

    #[test]
    fn missing_key_is_none() {
        let index = OrderedIndex::new();
        assert!(index.get(&NodeId::from("nope")).is_none());
        assert!(index.stats().balanced);
    }
}
