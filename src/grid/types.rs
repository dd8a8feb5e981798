//! Core grid domain types
//!
//! Nodes, transmission lines, sensor readings and in-flight transfers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque node identifier, ordered by natural string comparison
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a node in the distribution network. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Substation,
    Transformer,
    Consumer,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Substation => "substation",
            NodeKind::Transformer => "transformer",
            NodeKind::Consumer => "consumer",
        }
    }
}

/// Live state of a node
///
/// `current_load > capacity` is permitted and represents an observed
/// overload; the controller raises an event for it rather than rejecting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub kind: NodeKind,
    pub capacity: f64,
    pub current_load: f64,
    pub efficiency: f64,
}

impl NodeState {
    pub fn utilization(&self) -> f64 {
        self.current_load / self.capacity
    }

    /// Remaining capacity before the node is full. Negative when overloaded.
    pub fn headroom(&self) -> f64 {
        self.capacity - self.current_load
    }
}

/// Operational status of a transmission line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    Active,
    TempDisabled,
}

/// Default line capacity in abstract units
pub const DEFAULT_LINE_CAPACITY: f64 = 1000.0;

/// Attributes of an undirected transmission line
///
/// Both endpoints observe the same attribute record; status changes are
/// symmetric by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttr {
    pub distance: f64,
    pub resistance: f64,
    pub line_capacity: f64,
    pub status: EdgeStatus,
}

impl EdgeAttr {
    pub fn new(distance: f64, resistance: f64) -> Self {
        Self {
            distance,
            resistance,
            line_capacity: DEFAULT_LINE_CAPACITY,
            status: EdgeStatus::Active,
        }
    }

    /// Search weight of the line
    pub fn weight(&self) -> f64 {
        self.distance * (1.0 + self.resistance)
    }

    pub fn is_active(&self) -> bool {
        self.status == EdgeStatus::Active
    }
}

/// One synthetic sensor observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub node_id: NodeId,
    pub timestamp: DateTime<Utc>,
    pub load: f64,
    pub voltage: f64,
    pub current: f64,
    pub power_factor: f64,
    pub frequency: f64,
    pub temperature: f64,
    /// False when the sensor itself failed and reported a zero load
    pub sensor_ok: bool,
}

/// In-flight record of a redistribution decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: NodeId,
    pub to: NodeId,
    pub amount: f64,
}
