//! Ports consumed by the control core
//!
//! Adapters provide these: the sensor stream, the best-effort persistence
//! side-channel, the clock, and the optional demand predictor. The core
//! never depends on a concrete adapter.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::Result;
use crate::events::Event;
use crate::grid::types::{EdgeAttr, NodeId, NodeState, Reading, Transfer};

/// Stream of sensor observations. Both pull-style and batch-style
/// consumption are supported; the core uses whichever the adapter provides.
pub trait SensorSource: Send {
    fn next_reading(&mut self) -> Option<Reading>;
    fn batch(&mut self) -> Vec<Reading>;
}

/// Best-effort persistence side-channel.
///
/// Every operation may fail partially; the core counts failures but never
/// lets them affect a control decision, and never reads anything back.
pub trait PersistenceSink: Send + Sync {
    fn record_node(&self, id: &NodeId, state: &NodeState) -> Result<()>;
    fn record_edge(&self, u: &NodeId, v: &NodeId, attr: &EdgeAttr) -> Result<()>;
    fn record_reading(&self, reading: &Reading) -> Result<()>;
    fn record_event(&self, event: &Event) -> Result<()>;
    fn record_balancing(&self, transfer: &Transfer, at: DateTime<Utc>) -> Result<()>;
    /// Flags every unresolved persisted event of the given kind as resolved.
    fn mark_resolved(&self, kind: &str, at: DateTime<Utc>) -> Result<()>;
    fn reset(&self) -> Result<()>;
}

/// Time source; swapped for a counter in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Read-only demand predictor, used only by auxiliary queries
pub trait Predictor: Send + Sync {
    fn predict(&self, history: &[f64], horizon: usize) -> Vec<f64>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock advancing one second per call
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_else(Utc::now)
            + Duration::seconds(tick)
    }
}

/// Sink that accepts and discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn record_node(&self, _id: &NodeId, _state: &NodeState) -> Result<()> {
        Ok(())
    }

    fn record_edge(&self, _u: &NodeId, _v: &NodeId, _attr: &EdgeAttr) -> Result<()> {
        Ok(())
    }

    fn record_reading(&self, _reading: &Reading) -> Result<()> {
        Ok(())
    }

    fn record_event(&self, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn record_balancing(&self, _transfer: &Transfer, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    fn mark_resolved(&self, _kind: &str, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_monotonic() {
        let clock = ManualClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
    }
}
