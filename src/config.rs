//! Operating envelope configuration
//!
//! Every threshold the control loop reacts to lives here so that tests and
//! deployments can tune the envelope without touching the algorithms.

use serde::{Deserialize, Serialize};

/// Default bound for the observed-event FIFO (10,000 events)
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 10_000;

/// Nominal line voltage used for power-loss estimates
pub const NOMINAL_VOLTAGE: f64 = 220.0;

/// Grid control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Utilization above which a node counts as overloaded
    pub overload_threshold: f64,
    /// Utilization above which a node counts as in warning
    pub warning_threshold: f64,
    /// Fraction of capacity the balancer drains overloaded nodes down to
    pub rebalance_target: f64,
    /// Maximum size of the observed-event FIFO
    pub event_log_capacity: usize,
    /// Bound on the routing result cache
    pub route_cache_capacity: usize,
    /// Nominal voltage for power-loss estimates
    pub nominal_voltage: f64,
    /// How many applied transfer batches the balancer keeps for audit
    pub balancing_history_limit: usize,
    /// How many load samples per node are retained for forecasting
    pub load_history_limit: usize,
    /// Utilization below which an efficient node attracts load
    pub optimizer_underload: f64,
    /// Minimum efficiency for a node to attract load
    pub optimizer_min_efficiency: f64,
    /// Fraction of a neighbour's load the optimizer may migrate at once
    pub optimizer_migration_fraction: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            overload_threshold: 0.9,
            warning_threshold: 0.8,
            rebalance_target: 0.8,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            route_cache_capacity: 256,
            nominal_voltage: NOMINAL_VOLTAGE,
            balancing_history_limit: 64,
            load_history_limit: 672,
            optimizer_underload: 0.6,
            optimizer_min_efficiency: 0.85,
            optimizer_migration_fraction: 0.2,
        }
    }
}
