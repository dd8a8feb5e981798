//! Event plane: observed-event FIFO plus the actionable priority heap

pub mod event_log;
pub mod priority_queue;

pub use event_log::{EventLog, EventLogStats};
pub use priority_queue::PriorityQueue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grid::types::NodeId;

/// Severity of a detected condition; 1 is the most critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
    Info = 5,
}

impl Severity {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// What was detected, with the per-kind payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Overload { load: f64, capacity: f64 },
    Failure { duration_secs: u64 },
    Recovery,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Overload { .. } => "overload",
            EventKind::Failure { .. } => "failure",
            EventKind::Recovery => "recovery",
        }
    }
}

/// A detected condition. Events are immutable once created; they live in
/// both queues until popped or coalesced away by a corrective action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub node_id: NodeId,
    pub severity: Severity,
    pub arrival: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, node_id: NodeId, severity: Severity, arrival: DateTime<Utc>) -> Self {
        Self {
            kind,
            node_id,
            severity,
            arrival,
        }
    }

    pub fn is_kind(&self, label: &str) -> bool {
        self.kind.label() == label
    }
}
