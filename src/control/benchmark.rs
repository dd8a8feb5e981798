//! Rolling execution-time averages per operation kind

use serde::Serialize;

/// Averages reported by `benchmark_summary`
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub balance_avg_ms: f64,
    pub route_avg_ms: f64,
    pub optimize_avg_ms: f64,
}

/// Elapsed-time samples for the three corrective/query operations
#[derive(Debug, Default)]
pub struct BenchmarkHistory {
    balance_ms: Vec<f64>,
    route_ms: Vec<f64>,
    optimize_ms: Vec<f64>,
}

fn avg(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

impl BenchmarkHistory {
    pub fn record_balance(&mut self, elapsed_ms: f64) {
        self.balance_ms.push(elapsed_ms);
    }

    pub fn record_route(&mut self, elapsed_ms: f64) {
        self.route_ms.push(elapsed_ms);
    }

    pub fn record_optimize(&mut self, elapsed_ms: f64) {
        self.optimize_ms.push(elapsed_ms);
    }

    pub fn summary(&self) -> BenchmarkSummary {
        BenchmarkSummary {
            balance_avg_ms: avg(&self.balance_ms),
            route_avg_ms: avg(&self.route_ms),
            optimize_avg_ms: avg(&self.optimize_ms),
        }
    }

    pub fn clear(&mut self) {
        self.balance_ms.clear();
        self.route_ms.clear();
        self.optimize_ms.clear();
    }
}
