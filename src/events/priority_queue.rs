//! Stable min-heap of actionable events
//!
//! Keyed by `(severity, insertion counter)` so that among events of equal
//! severity the earliest push always pops first. Stability is part of the
//! contract, not an implementation detail.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::events::Event;

#[derive(Debug, Clone)]
struct HeapEntry {
    severity: u8,
    seq: u64,
    event: Event,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.severity == other.severity && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest (severity, seq) pops first
        (other.severity, other.seq).cmp(&(self.severity, self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap over `(severity, insertion order)`
#[derive(Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<HeapEntry>,
    counter: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(log n)
    pub fn push(&mut self, event: Event) {
        let entry = HeapEntry {
            severity: event.severity.value(),
            seq: self.counter,
            event,
        };
        self.counter += 1;
        self.heap.push(entry);
    }

    /// O(log n); highest severity first, FIFO among equals
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|entry| entry.event)
    }

    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek().map(|entry| &entry.event)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Current contents in pop order, without disturbing the heap
    pub fn snapshot(&self) -> Vec<Event> {
        let mut copy = self.heap.clone();
        let mut out = Vec::with_capacity(copy.len());
        while let Some(entry) = copy.pop() {
            out.push(entry.event);
        }
        out
    }

    /// Events at or above the given criticality (severity <= threshold),
    /// in pop order
    pub fn critical(&self, threshold: u8) -> Vec<Event> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.severity.value() <= threshold)
            .collect()
    }

    /// Removes every event of one kind; the survivors keep their original
    /// insertion order so stability is unaffected.
    pub fn coalesce(&mut self, label: &str) -> usize {
        let entries = std::mem::take(&mut self.heap).into_vec();
        let before = entries.len();
        self.heap = entries
            .into_iter()
            .filter(|entry| !entry.event.is_kind(label))
            .collect();
        before - self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.counter = 0;
    }
}
