//! Bounded FIFO of observed events
//!
//! The audit-side queue: arrivals append in mutation order and overflow is
//! tail-drop — a full queue discards the new arrival and counts it, keeping
//! the oldest observations intact.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::DEFAULT_EVENT_LOG_CAPACITY;
use crate::events::Event;

/// FIFO occupancy and throughput counters
#[derive(Debug, Clone, Serialize)]
pub struct EventLogStats {
    pub size: usize,
    pub max_size: usize,
    pub processed: u64,
    pub dropped: u64,
    pub utilization: f64,
}

/// Bounded FIFO with drop counters
pub struct EventLog {
    queue: VecDeque<Event>,
    max_size: usize,
    processed: u64,
    dropped: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size: max_size.max(1),
            processed: 0,
            dropped: 0,
        }
    }

    /// O(1). A full queue drops the new arrival.
    pub fn enqueue(&mut self, event: Event) {
        if self.queue.len() >= self.max_size {
            self.dropped += 1;
            return;
        }
        self.queue.push_back(event);
    }

    /// O(1)
    pub fn dequeue(&mut self) -> Option<Event> {
        let event = self.queue.pop_front();
        if event.is_some() {
            self.processed += 1;
        }
        event
    }

    pub fn peek(&self) -> Option<&Event> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events of one kind, oldest first
    pub fn filter(&self, label: &str) -> Vec<Event> {
        self.queue.iter().filter(|e| e.is_kind(label)).cloned().collect()
    }

    /// Everything currently queued, oldest first
    pub fn snapshot(&self) -> Vec<Event> {
        self.queue.iter().cloned().collect()
    }

    /// Removes every event of one kind; returns how many went away.
    pub fn coalesce(&mut self, label: &str) -> usize {
        let before = self.queue.len();
        self.queue.retain(|e| !e.is_kind(label));
        before - self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.processed = 0;
        self.dropped = 0;
    }

    pub fn stats(&self) -> EventLogStats {
        EventLogStats {
            size: self.queue.len(),
            max_size: self.max_size,
            processed: self.processed,
            dropped: self.dropped,
            utilization: self.queue.len() as f64 / self.max_size as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Severity};
    use crate::grid::types::NodeId;
    use chrono::{TimeZone, Utc};

    fn overload(node: &str, seq: i64) -> Event {
        Event::new(
            EventKind::Overload {
                load: 95.0,
                capacity: 100.0,
            },
            NodeId::from(node),
            Severity::High,
            Utc.timestamp_opt(seq, 0).single().unwrap(),
        )
    }

    fn failure(node: &str, seq: i64) -> Event {
        Event::new(
            EventKind::Failure { duration_secs: 3600 },
            NodeId::from(node),
            Severity::Critical,
            Utc.timestamp_opt(seq, 0).single().unwrap(),
        )
    }

    #[test]
    fn fifo_order_preserved() {
        let mut log = EventLog::new(8);
        log.enqueue(overload("a", 0));
        log.enqueue(overload("b", 1));
        assert_eq!(log.dequeue().unwrap().node_id, NodeId::from("a"));
        assert_eq!(log.dequeue().unwrap().node_id, NodeId::from("b"));
        assert!(log.dequeue().is_none());
        assert_eq!(log.stats().processed, 2);
    }

    #[test]
    fn full_queue_drops_new_arrival_keeps_oldest() {
        let mut log = EventLog::new(2);
        log.enqueue(overload("a", 0));
        log.enqueue(overload("b", 1));
        log.enqueue(overload("c", 2));
        let stats = log.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(log.peek().unwrap().node_id, NodeId::from("a"));
        let kept: Vec<_> = log.snapshot().into_iter().map(|e| e.node_id).collect();
        assert_eq!(kept, vec![NodeId::from("a"), NodeId::from("b")]);
    }

    #[test]
    fn coalesce_removes_only_matching_kind() {
        let mut log = EventLog::new(8);
        log.enqueue(overload("a", 0));
        log.enqueue(failure("b", 1));
        log.enqueue(overload("c", 2));
        assert_eq!(log.coalesce("overload"), 2);
        assert_eq!(log.len(), 1);
        assert!(log.peek().unwrap().is_kind("failure"));
        assert_eq!(log.filter("overload").len(), 0);
    }

    #[test]
    fn utilization_reflects_occupancy() {
        let mut log = EventLog::new(4);
        log.enqueue(overload("a", 0));
        assert_eq!(log.stats().utilization, 0.25);
    }
}
