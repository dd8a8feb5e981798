//! Reactive control loop over the grid
//!
//! `System` owns every in-memory component and is the single mutation
//! surface: readings come in, overloads are detected and queued, corrective
//! actions run, and resolved events are coalesced out of both queues. All
//! core work happens under one logical critical section; the persistence
//! sink only ever sees writes after the lock is released.

pub mod benchmark;

pub use benchmark::{BenchmarkHistory, BenchmarkSummary};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::balancing::{BalanceReport, Balancer, BalancerStats, EfficiencyReport};
use crate::config::GridConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventLog, EventLogStats, PriorityQueue, Severity};
use crate::forecast::SeasonalBaseline;
use crate::grid::types::{EdgeStatus, NodeId, NodeKind, Reading};
use crate::grid::{Topology, TopologyStats};
use crate::index::{IndexStats, OrderedIndex};
use crate::optimization::{CarbonReport, OptimizeReport, Optimizer, OptimizerStats, RenewableCandidate};
use crate::ports::{Clock, PersistenceSink, Predictor, SystemClock};
use crate::routing::{Algorithm, RedundantRoute, RouteResult, Router, RouterStats};
use crate::sensors::SensorSimulator;

/// Detection/action counters kept by the controller
#[derive(Debug, Default)]
struct Counters {
    overloads_detected: u64,
    overloads_resolved: u64,
    overload_actions: u64,
    response_ms_total: f64,
}

/// Controller counters as reported by `stats`
#[derive(Debug, Clone, Serialize)]
pub struct ControlStats {
    pub overloads_detected: u64,
    pub overloads_resolved: u64,
    pub overload_actions: u64,
    pub avg_response_ms: f64,
    pub sink_errors: u64,
}

/// Result of ingesting one load value
#[derive(Debug, Clone, Serialize)]
pub struct LoadUpdate {
    pub node_id: NodeId,
    pub utilization: f64,
    pub overload_raised: bool,
}

/// Result of a `balance` command
#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub report: BalanceReport,
    pub efficiency: EfficiencyReport,
    pub events_cleared: usize,
    pub exec_ms: f64,
}

/// Result of an `optimize` command
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeResponse {
    pub report: OptimizeReport,
    pub carbon: CarbonReport,
    pub renewables: Vec<RenewableCandidate>,
    pub exec_ms: f64,
}

/// Result of a `route` command, with the other strategy for comparison
#[derive(Debug, Clone, Serialize)]
pub struct RouteResponse {
    pub result: RouteResult,
    pub comparison: RouteResult,
    pub power_loss: f64,
}

/// FIFO snapshot plus its counters
#[derive(Debug, Clone, Serialize)]
pub struct EventsReport {
    pub events: Vec<Event>,
    pub stats: EventLogStats,
}

/// Aggregate of every component's statistics
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub topology: TopologyStats,
    pub index: IndexStats,
    pub event_log: EventLogStats,
    pub priority_queue_size: usize,
    pub router: RouterStats,
    pub balancer: BalancerStats,
    pub optimizer: OptimizerStats,
    pub control: ControlStats,
}

/// Result of `init`
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub topology: TopologyStats,
    pub index: IndexStats,
    pub sensors_registered: usize,
}

struct Core {
    index: OrderedIndex,
    topology: Topology,
    event_log: EventLog,
    priority_queue: PriorityQueue,
    router: Router,
    balancer: Balancer,
    optimizer: Optimizer,
    benchmark: BenchmarkHistory,
    counters: Counters,
    load_history: FxHashMap<NodeId, VecDeque<f64>>,
}

impl Core {
    fn new(config: &GridConfig) -> Self {
        Self {
            index: OrderedIndex::new(),
            topology: Topology::new(),
            event_log: EventLog::new(config.event_log_capacity),
            priority_queue: PriorityQueue::new(),
            router: Router::new(config),
            balancer: Balancer::new(config),
            optimizer: Optimizer::new(config),
            benchmark: BenchmarkHistory::default(),
            counters: Counters::default(),
            load_history: FxHashMap::default(),
        }
    }
}

/// The control-plane aggregate: every component, one critical section
pub struct System {
    core: RwLock<Core>,
    sink: Box<dyn PersistenceSink>,
    clock: Arc<dyn Clock>,
    predictor: Box<dyn Predictor>,
    config: GridConfig,
    sink_errors: AtomicU64,
}

impl Default for System {
    fn default() -> Self {
        Self::new(
            GridConfig::default(),
            Box::new(crate::ports::NullSink),
            Arc::new(SystemClock),
        )
    }
}

impl System {
    pub fn new(config: GridConfig, sink: Box<dyn PersistenceSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: RwLock::new(Core::new(&config)),
            sink,
            clock,
            predictor: Box::new(SeasonalBaseline::default()),
            config,
            sink_errors: AtomicU64::new(0),
        }
    }

    pub fn with_predictor(mut self, predictor: Box<dyn Predictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Counts a failed sink write; never fails the core operation.
    fn persist(&self, outcome: Result<()>) {
        if let Err(e) = outcome {
            self.sink_errors.fetch_add(1, Ordering::Relaxed);
            debug!("persistence write dropped: {}", e);
        }
    }

    /// Creates a node in both the topology and the index.
    pub fn add_node(
        &self,
        id: NodeId,
        kind: NodeKind,
        capacity: f64,
        efficiency: f64,
        initial_load: f64,
    ) -> Result<LoadUpdate> {
        let state = {
            let mut core = self.core.write();
            core.topology
                .add_node(id.clone(), kind, capacity, efficiency, initial_load)?;
            let state = match core.topology.node(&id) {
                Some(state) => state.clone(),
                None => return Err(Error::Internal(format!("node {} vanished after insert", id))),
            };
            core.index.upsert(id.clone(), state.clone());
            state
        };
        self.persist(self.sink.record_node(&id, &state));
        Ok(LoadUpdate {
            utilization: state.utilization(),
            node_id: id,
            overload_raised: false,
        })
    }

    /// Connects two existing nodes with a transmission line.
    pub fn add_edge(&self, u: &NodeId, v: &NodeId, distance: f64, resistance: f64) -> Result<()> {
        let attr = {
            let mut core = self.core.write();
            core.topology.add_edge(u, v, distance, resistance)?;
            core.topology.edge_between(u, v).cloned()
        };
        if let Some(attr) = attr {
            self.persist(self.sink.record_edge(u, v, &attr));
        }
        Ok(())
    }

    /// Changes the status of a line, symmetrically.
    pub fn set_edge_status(&self, u: &NodeId, v: &NodeId, status: EdgeStatus) -> Result<()> {
        self.core.write().topology.set_edge_status(u, v, status)
    }

    /// Ingests one sensor reading through the full detection path.
    pub fn on_reading(&self, reading: Reading) -> Result<LoadUpdate> {
        let (update, event) = {
            let mut core = self.core.write();
            self.ingest_load(&mut core, &reading.node_id, reading.load)?
        };
        self.persist(self.sink.record_reading(&reading));
        if let Some(event) = event {
            self.persist(self.sink.record_event(&event));
        }
        Ok(update)
    }

    /// Direct load update, same detection path as a reading.
    pub fn update_load(&self, id: &NodeId, load: f64) -> Result<LoadUpdate> {
        let (update, event) = {
            let mut core = self.core.write();
            self.ingest_load(&mut core, id, load)?
        };
        if let Some(event) = event {
            self.persist(self.sink.record_event(&event));
        }
        Ok(update)
    }

    /// Applies a load observation and raises an overload event when the
    /// node crosses the threshold. Caller holds the write lock.
    fn ingest_load(
        &self,
        core: &mut Core,
        id: &NodeId,
        load: f64,
    ) -> Result<(LoadUpdate, Option<Event>)> {
        let utilization = core.topology.update_load(id, load)?;
        let state = match core.topology.node(id) {
            Some(state) => state.clone(),
            None => return Err(Error::Internal(format!("node {} vanished after update", id))),
        };
        core.index.upsert(id.clone(), state.clone());

        let history = core.load_history.entry(id.clone()).or_default();
        history.push_back(load);
        while history.len() > self.config.load_history_limit {
            history.pop_front();
        }

        let mut event = None;
        if load > self.config.overload_threshold * state.capacity {
            let overload = Event::new(
                EventKind::Overload {
                    load,
                    capacity: state.capacity,
                },
                id.clone(),
                Severity::High,
                self.clock.now(),
            );
            core.event_log.enqueue(overload.clone());
            core.priority_queue.push(overload.clone());
            core.counters.overloads_detected += 1;
            debug!(node = %id, utilization, "overload detected");
            event = Some(overload);
        }

        Ok((
            LoadUpdate {
                node_id: id.clone(),
                utilization,
                overload_raised: event.is_some(),
            },
            event,
        ))
    }

    /// Records a node failure at the highest criticality in both queues.
    pub fn on_failure(&self, id: &NodeId, duration_secs: u64) -> Result<()> {
        let event = {
            let mut core = self.core.write();
            if !core.topology.contains(id) {
                return Err(Error::NotFound(format!("node {}", id)));
            }
            let event = Event::new(
                EventKind::Failure { duration_secs },
                id.clone(),
                Severity::Critical,
                self.clock.now(),
            );
            core.event_log.enqueue(event.clone());
            core.priority_queue.push(event.clone());
            event
        };
        info!(node = %id, duration_secs, "failure recorded");
        self.persist(self.sink.record_event(&event));
        Ok(())
    }

    /// Records a node's return to service in both queues.
    pub fn on_recovery(&self, id: &NodeId) -> Result<()> {
        let event = {
            let mut core = self.core.write();
            if !core.topology.contains(id) {
                return Err(Error::NotFound(format!("node {}", id)));
            }
            let event = Event::new(
                EventKind::Recovery,
                id.clone(),
                Severity::Info,
                self.clock.now(),
            );
            core.event_log.enqueue(event.clone());
            core.priority_queue.push(event.clone());
            event
        };
        self.persist(self.sink.record_event(&event));
        Ok(())
    }

    /// Runs a balancing cycle, then coalesces every pending overload event
    /// out of both queues: the corrective action supersedes them all.
    pub fn balance_now(&self) -> Result<BalanceResponse> {
        let started = Instant::now();
        let now = self.clock.now();

        let (response, transfers) = {
            let mut core = self.core.write();
            let core = &mut *core;
            let (report, transfers) =
                core.balancer
                    .balance(&mut core.index, &mut core.topology, now);

            core.event_log.coalesce("overload");
            let events_cleared = core.priority_queue.coalesce("overload");
            core.counters.overloads_resolved += events_cleared as u64;
            core.counters.overload_actions += 1;

            let exec_ms = started.elapsed().as_secs_f64() * 1000.0;
            core.counters.response_ms_total += exec_ms;
            core.benchmark.record_balance(exec_ms);

            let efficiency = Balancer::network_efficiency(&core.index);
            (
                BalanceResponse {
                    report,
                    efficiency,
                    events_cleared,
                    exec_ms,
                },
                transfers,
            )
        };

        for transfer in &transfers {
            self.persist(self.sink.record_balancing(transfer, now));
        }
        if response.events_cleared > 0 {
            self.persist(self.sink.mark_resolved("overload", now));
        }
        Ok(response)
    }

    /// Runs an efficiency optimization pass plus the adjacent reports.
    pub fn optimize_now(&self) -> Result<OptimizeResponse> {
        let started = Instant::now();
        let now = self.clock.now();

        let (response, transfers) = {
            let mut core = self.core.write();
            let core = &mut *core;
            let (report, transfers) =
                core.optimizer.optimize(&mut core.index, &mut core.topology);
            let carbon = Optimizer::carbon_footprint(&core.index);
            let renewables = Optimizer::suggest_renewables(&core.index, &core.topology);
            let exec_ms = started.elapsed().as_secs_f64() * 1000.0;
            core.benchmark.record_optimize(exec_ms);
            (
                OptimizeResponse {
                    report,
                    carbon,
                    renewables,
                    exec_ms,
                },
                transfers,
            )
        };

        for transfer in &transfers {
            self.persist(self.sink.record_balancing(transfer, now));
        }
        Ok(response)
    }

    /// Route query with the requested strategy plus the other one for
    /// comparison, and the loss estimate along the chosen path.
    pub fn route(&self, src: &NodeId, dst: &NodeId, algorithm: Algorithm) -> Result<RouteResponse> {
        let mut core = self.core.write();
        let core = &mut *core;
        let result = core.router.find_optimal(&core.topology, src, dst, algorithm)?;
        let comparison = core
            .router
            .find_optimal(&core.topology, src, dst, algorithm.other())?;
        core.benchmark.record_route(result.exec_ms);
        let power_loss = if result.found {
            core.router.power_loss(&core.topology, &result.path)?
        } else {
            0.0
        };
        Ok(RouteResponse {
            result,
            comparison,
            power_loss,
        })
    }

    /// Up to k edge-disjoint failover paths.
    pub fn route_redundant(&self, src: &NodeId, dst: &NodeId, k: usize) -> Result<Vec<RedundantRoute>> {
        let mut core = self.core.write();
        let core = &mut *core;
        core.router.find_redundant(&core.topology, src, dst, k)
    }

    /// Pushes synthetic overloads onto the first n nodes in index order.
    pub fn simulate_overload(&self, n: usize) -> Result<usize> {
        let targets: Vec<(NodeId, f64)> = {
            let core = self.core.read();
            core.index
                .in_order()
                .into_iter()
                .take(n)
                .map(|(id, state)| (id, state.capacity * 0.95))
                .collect()
        };
        let mut injected = 0;
        for (id, load) in targets {
            if self.update_load(&id, load)?.overload_raised {
                injected += 1;
            }
        }
        info!(injected, "synthetic overloads pushed");
        Ok(injected)
    }

    /// FIFO snapshot, optionally filtered by kind.
    pub fn events(&self, kind: Option<&str>) -> EventsReport {
        let core = self.core.read();
        let events = match kind {
            Some(label) => core.event_log.filter(label),
            None => core.event_log.snapshot(),
        };
        EventsReport {
            events,
            stats: core.event_log.stats(),
        }
    }

    /// Heap snapshot filtered to severity at or above the threshold.
    pub fn events_critical(&self, threshold: u8) -> Vec<Event> {
        self.core.read().priority_queue.critical(threshold)
    }

    /// Pops the most critical pending event.
    pub fn next_critical(&self) -> Option<Event> {
        self.core.write().priority_queue.pop()
    }

    pub fn stats(&self) -> SystemStats {
        let core = self.core.read();
        let counters = &core.counters;
        SystemStats {
            topology: core.topology.stats(),
            index: core.index.stats(),
            event_log: core.event_log.stats(),
            priority_queue_size: core.priority_queue.len(),
            router: core.router.stats(),
            balancer: core.balancer.stats(),
            optimizer: core.optimizer.stats(),
            control: ControlStats {
                overloads_detected: counters.overloads_detected,
                overloads_resolved: counters.overloads_resolved,
                overload_actions: counters.overload_actions,
                avg_response_ms: if counters.overload_actions > 0 {
                    counters.response_ms_total / counters.overload_actions as f64
                } else {
                    0.0
                },
                sink_errors: self.sink_errors.load(Ordering::Relaxed),
            },
        }
    }

    pub fn benchmark_summary(&self) -> BenchmarkSummary {
        self.core.read().benchmark.summary()
    }

    /// Demand forecast for one node from its observed load history.
    pub fn forecast(&self, id: &NodeId, horizon: usize) -> Result<Vec<f64>> {
        if horizon == 0 {
            return Err(Error::InvalidArgument("horizon must be positive".into()));
        }
        let core = self.core.read();
        if !core.topology.contains(id) {
            return Err(Error::NotFound(format!("node {}", id)));
        }
        let history: Vec<f64> = core
            .load_history
            .get(id)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default();
        Ok(self.predictor.predict(&history, horizon))
    }

    /// Builds a synthetic grid: a ring with periodic chords, a mixed node
    /// population, and a registered sensor per node.
    pub fn init(
        &self,
        num_nodes: usize,
        train_ml: bool,
        simulator: &mut SensorSimulator,
    ) -> Result<InitReport> {
        for i in 0..num_nodes {
            let id = NodeId::from(format!("node-{:03}", i).as_str());
            let kind = match i % 10 {
                0 => NodeKind::Substation,
                1 | 2 => NodeKind::Transformer,
                _ => NodeKind::Consumer,
            };
            let capacity = match kind {
                NodeKind::Substation => 2000.0,
                NodeKind::Transformer => 800.0,
                NodeKind::Consumer => 150.0 + (i % 5) as f64 * 50.0,
            };
            let efficiency = 0.75 + ((i * 7) % 21) as f64 / 100.0;
            let initial_load = capacity * (0.3 + ((i * 3) % 4) as f64 * 0.1);
            self.add_node(id.clone(), kind, capacity, efficiency, initial_load)?;
            simulator.register(id, capacity * 0.4);
        }

        let node_id = |i: usize| NodeId::from(format!("node-{:03}", i).as_str());
        for i in 0..num_nodes {
            let j = (i + 1) % num_nodes;
            if i < j {
                self.add_edge(&node_id(i), &node_id(j), 1.0 + (i % 5) as f64, 0.05 + (i % 3) as f64 * 0.05)?;
            }
        }
        if num_nodes > 2 {
            self.add_edge(&node_id(num_nodes - 1), &node_id(0), 2.0, 0.1)?;
        }
        for i in 0..num_nodes.saturating_sub(5) {
            if i % 5 != 0 {
                continue;
            }
            // a chord can coincide with the ring wrap on small grids
            match self.add_edge(&node_id(i), &node_id(i + 5), 3.0, 0.15) {
                Ok(()) | Err(Error::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if train_ml {
            let mut core = self.core.write();
            for i in 0..num_nodes {
                let id = node_id(i);
                let loads: VecDeque<f64> = simulator
                    .history(&id, 72)
                    .into_iter()
                    .map(|r| r.load)
                    .collect();
                core.load_history.insert(id, loads);
            }
        }

        let report = {
            let core = self.core.read();
            InitReport {
                topology: core.topology.stats(),
                index: core.index.stats(),
                sensors_registered: simulator.len(),
            }
        };
        info!(
            nodes = report.topology.node_count,
            edges = report.topology.edge_count,
            "grid initialized"
        );
        Ok(report)
    }

    /// Clears every in-memory component and the persistence sink.
    pub fn reset(&self) -> Result<()> {
        {
            let mut core = self.core.write();
            core.index.clear();
            core.topology.clear();
            core.event_log.clear();
            core.priority_queue.clear();
            core.router.clear();
            core.balancer.clear();
            core.optimizer.clear();
            core.benchmark.clear();
            core.counters = Counters::default();
            core.load_history.clear();
        }
        self.sink_errors.store(0, Ordering::Relaxed);
        self.persist(self.sink.reset());
        info!("system reset");
        Ok(())
    }

    /// Current state of one node, if present.
    pub fn node_state(&self, id: &NodeId) -> Option<crate::grid::types::NodeState> {
        self.core.read().index.get(id).cloned()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
