//! Grid domain model: node and line types plus the weighted topology

pub mod topology;
pub mod types;

pub use topology::{Topology, TopologyStats};
pub use types::{
    EdgeAttr, EdgeStatus, NodeId, NodeKind, NodeState, Reading, Transfer, DEFAULT_LINE_CAPACITY,
};

use crate::error::{Error, Result};
use crate::index::OrderedIndex;

/// Applies a redistribution decision to both the index and the topology.
///
/// Valid only when both endpoints exist, differ, and are joined by an active
/// line. The combined load of the two endpoints is conserved exactly; on any
/// validation failure neither structure changes.
pub fn apply_transfer(index: &mut OrderedIndex, topology: &mut Topology, transfer: &Transfer) -> Result<()> {
    if transfer.from == transfer.to {
        return Err(Error::InvalidArgument(format!(
            "transfer endpoints must differ, got {}",
            transfer.from
        )));
    }
    if transfer.amount <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "transfer amount must be positive, got {}",
            transfer.amount
        )));
    }
    let from_state = index
        .get(&transfer.from)
        .ok_or_else(|| Error::NotFound(format!("node {}", transfer.from)))?
        .clone();
    let to_state = index
        .get(&transfer.to)
        .ok_or_else(|| Error::NotFound(format!("node {}", transfer.to)))?
        .clone();
    if !topology.has_active_edge(&transfer.from, &transfer.to) {
        return Err(Error::InvalidArgument(format!(
            "no active line {}-{}",
            transfer.from, transfer.to
        )));
    }

    let mut from_state = from_state;
    let mut to_state = to_state;
    from_state.current_load -= transfer.amount;
    to_state.current_load += transfer.amount;

    topology.update_load(&transfer.from, from_state.current_load)?;
    topology.update_load(&transfer.to, to_state.current_load)?;
    index.upsert(transfer.from.clone(), from_state);
    index.upsert(transfer.to.clone(), to_state);
    Ok(())
}
