//! Persistence side-channel adapters
//!
//! The core treats persistence as write-only and best-effort. `SqliteSink`
//! stores the envelope tables; `ChannelSink` decouples the core from disk
//! I/O by handing every write to a dedicated writer thread over an
//! unbounded channel, so no sink operation ever runs under the core lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::{Error, Result};
use crate::events::Event;
use crate::grid::types::{EdgeAttr, NodeId, NodeState, Reading, Transfer};
use crate::ports::PersistenceSink;

/// SQLite-backed sink holding the persisted envelopes
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: &str) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                node_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                capacity REAL NOT NULL,
                current_load REAL NOT NULL,
                efficiency REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS edges (
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                distance REAL NOT NULL,
                resistance REAL NOT NULL,
                line_capacity REAL NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (from_node, to_node)
            );
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                load REAL NOT NULL,
                voltage REAL,
                current REAL,
                power_factor REAL,
                frequency REAL,
                temperature REAL,
                sensor_ok INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                node_id TEXT NOT NULL,
                severity INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                ts TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                resolved_at TEXT
            );
            CREATE TABLE IF NOT EXISTS balancing_ops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                amount REAL NOT NULL,
                ts TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl PersistenceSink for SqliteSink {
    fn record_node(&self, id: &NodeId, state: &NodeState) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO nodes (node_id, kind, capacity, current_load, efficiency)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(node_id) DO UPDATE SET
                 current_load = excluded.current_load,
                 efficiency = excluded.efficiency,
                 capacity = excluded.capacity",
            params![
                id.as_str(),
                state.kind.name(),
                state.capacity,
                state.current_load,
                state.efficiency
            ],
        )?;
        Ok(())
    }

    fn record_edge(&self, u: &NodeId, v: &NodeId, attr: &EdgeAttr) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO edges
             (from_node, to_node, distance, resistance, line_capacity, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                u.as_str(),
                v.as_str(),
                attr.distance,
                attr.resistance,
                attr.line_capacity,
                format!("{:?}", attr.status)
            ],
        )?;
        Ok(())
    }

    fn record_reading(&self, reading: &Reading) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO readings
             (node_id, ts, load, voltage, current, power_factor, frequency, temperature, sensor_ok)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                reading.node_id.as_str(),
                reading.timestamp.to_rfc3339(),
                reading.load,
                reading.voltage,
                reading.current,
                reading.power_factor,
                reading.frequency,
                reading.temperature,
                reading.sensor_ok
            ],
        )?;
        Ok(())
    }

    fn record_event(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(&event.kind)?;
        self.conn.lock().execute(
            "INSERT INTO events (kind, node_id, severity, payload_json, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.kind.label(),
                event.node_id.as_str(),
                event.severity.value(),
                payload,
                event.arrival.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn record_balancing(&self, transfer: &Transfer, at: DateTime<Utc>) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO balancing_ops (from_node, to_node, amount, ts)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                transfer.from.as_str(),
                transfer.to.as_str(),
                transfer.amount,
                at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn mark_resolved(&self, kind: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE events SET resolved = 1, resolved_at = ?1
             WHERE kind = ?2 AND resolved = 0",
            params![at.to_rfc3339(), kind],
        )?;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "DELETE FROM nodes;
             DELETE FROM edges;
             DELETE FROM readings;
             DELETE FROM events;
             DELETE FROM balancing_ops;",
        )?;
        Ok(())
    }
}

enum SinkOp {
    Node(NodeId, NodeState),
    Edge(NodeId, NodeId, EdgeAttr),
    Reading(Box<Reading>),
    Event(Box<Event>),
    Balancing(Transfer, DateTime<Utc>),
    Resolved(String, DateTime<Utc>),
    Reset,
}

/// Writer-thread wrapper around any sink.
///
/// Sends are non-blocking; the channel is unbounded and the inner sink runs
/// on its own thread. Failures are counted and logged, never surfaced to
/// the control path.
pub struct ChannelSink {
    tx: Option<Sender<SinkOp>>,
    failures: Arc<AtomicU64>,
    writer: Option<JoinHandle<()>>,
}

impl ChannelSink {
    pub fn spawn(inner: Box<dyn PersistenceSink>) -> Self {
        let (tx, rx) = unbounded::<SinkOp>();
        let failures = Arc::new(AtomicU64::new(0));
        let failure_counter = failures.clone();

        let writer = std::thread::Builder::new()
            .name("gridmesh-sink".into())
            .spawn(move || {
                for op in rx {
                    let outcome = match op {
                        SinkOp::Node(id, state) => inner.record_node(&id, &state),
                        SinkOp::Edge(u, v, attr) => inner.record_edge(&u, &v, &attr),
                        SinkOp::Reading(reading) => inner.record_reading(&reading),
                        SinkOp::Event(event) => inner.record_event(&event),
                        SinkOp::Balancing(transfer, at) => inner.record_balancing(&transfer, at),
                        SinkOp::Resolved(kind, at) => inner.mark_resolved(&kind, at),
                        SinkOp::Reset => inner.reset(),
                    };
                    if let Err(e) = outcome {
                        failure_counter.fetch_add(1, Ordering::Relaxed);
                        warn!("persistence write failed: {}", e);
                    }
                }
            })
            .ok();

        Self {
            tx: Some(tx),
            failures,
            writer,
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Drains pending writes and stops the writer thread.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }

    fn send(&self, op: SinkOp) -> Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(op)
                .map_err(|_| Error::Unavailable("sink writer stopped".into())),
            None => Err(Error::Unavailable("sink writer stopped".into())),
        }
    }
}

impl Drop for ChannelSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PersistenceSink for ChannelSink {
    fn record_node(&self, id: &NodeId, state: &NodeState) -> Result<()> {
        self.send(SinkOp::Node(id.clone(), state.clone()))
    }

    fn record_edge(&self, u: &NodeId, v: &NodeId, attr: &EdgeAttr) -> Result<()> {
        self.send(SinkOp::Edge(u.clone(), v.clone(), attr.clone()))
    }

    fn record_reading(&self, reading: &Reading) -> Result<()> {
        self.send(SinkOp::Reading(Box::new(reading.clone())))
    }

    fn record_event(&self, event: &Event) -> Result<()> {
        self.send(SinkOp::Event(Box::new(event.clone())))
    }

    fn record_balancing(&self, transfer: &Transfer, at: DateTime<Utc>) -> Result<()> {
        self.send(SinkOp::Balancing(transfer.clone(), at))
    }

    fn mark_resolved(&self, kind: &str, at: DateTime<Utc>) -> Result<()> {
        self.send(SinkOp::Resolved(kind.to_string(), at))
    }

    fn reset(&self) -> Result<()> {
        self.send(SinkOp::Reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Severity};
    use crate::grid::types::NodeKind;

    fn state() -> NodeState {
        NodeState {
            kind: NodeKind::Consumer,
            capacity: 100.0,
            current_load: 40.0,
            efficiency: 0.9,
        }
    }

    fn count(sink: &SqliteSink, table: &str) -> i64 {
        sink.conn
            .lock()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    #[test]
    fn node_upsert_overwrites() {
        let sink = SqliteSink::in_memory().unwrap();
        let id = NodeId::from("n1");
        sink.record_node(&id, &state()).unwrap();
        let mut updated = state();
        updated.current_load = 70.0;
        sink.record_node(&id, &updated).unwrap();
        assert_eq!(count(&sink, "nodes"), 1);
        let load: f64 = sink
            .conn
            .lock()
            .query_row("SELECT current_load FROM nodes WHERE node_id = 'n1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(load, 70.0);
    }

    #[test]
    fn events_resolve_by_kind() {
        let sink = SqliteSink::in_memory().unwrap();
        let event = Event::new(
            EventKind::Overload {
                load: 95.0,
                capacity: 100.0,
            },
            NodeId::from("n1"),
            Severity::High,
            Utc::now(),
        );
        sink.record_event(&event).unwrap();
        sink.record_event(&Event::new(
            EventKind::Failure { duration_secs: 60 },
            NodeId::from("n2"),
            Severity::Critical,
            Utc::now(),
        ))
        .unwrap();

        sink.mark_resolved("overload", Utc::now()).unwrap();
        let resolved: i64 = sink
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM events WHERE resolved = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(resolved, 1);
    }

    #[test]
    fn reset_empties_every_table() {
        let sink = SqliteSink::in_memory().unwrap();
        sink.record_node(&NodeId::from("n1"), &state()).unwrap();
        sink.record_balancing(
            &Transfer {
                from: NodeId::from("n1"),
                to: NodeId::from("n2"),
                amount: 5.0,
            },
            Utc::now(),
        )
        .unwrap();
        sink.reset().unwrap();
        assert_eq!(count(&sink, "nodes"), 0);
        assert_eq!(count(&sink, "balancing_ops"), 0);
    }

    #[test]
    fn channel_sink_applies_writes_on_its_own_thread() {
        let inner = SqliteSink::in_memory().unwrap();
        let mut channel = ChannelSink::spawn(Box::new(inner));
        channel.record_node(&NodeId::from("n1"), &state()).unwrap();
        channel
            .record_reading(&Reading {
                node_id: NodeId::from("n1"),
                timestamp: Utc::now(),
                load: 40.0,
                voltage: 220.0,
                current: 0.18,
                power_factor: 0.9,
                frequency: 60.0,
                temperature: 24.0,
                sensor_ok: true,
            })
            .unwrap();
        channel.shutdown();
        assert_eq!(channel.failures(), 0);
    }
}
