//! Seasonal demand forecasting baseline
//!
//! A deterministic stand-in for a learned model: each forecast step is the
//! mean of the history samples that fall on the same phase of the seasonal
//! period. Read-only; the control loop never consults it.

use crate::ports::Predictor;

/// Hours in the default daily cycle
const DEFAULT_PERIOD: usize = 24;

/// Seasonal moving-average predictor
#[derive(Debug, Clone)]
pub struct SeasonalBaseline {
    period: usize,
}

impl Default for SeasonalBaseline {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
        }
    }
}

impl SeasonalBaseline {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }
}

impl Predictor for SeasonalBaseline {
    fn predict(&self, history: &[f64], horizon: usize) -> Vec<f64> {
        if history.is_empty() {
            return vec![0.0; horizon];
        }
        let overall_mean = history.iter().sum::<f64>() / history.len() as f64;

        (0..horizon)
            .map(|step| {
                let phase = (history.len() + step) % self.period;
                let mut sum = 0.0;
                let mut count = 0usize;
                for (i, value) in history.iter().enumerate() {
                    if i % self.period == phase {
                        sum += value;
                        count += 1;
                    }
                }
                if count > 0 {
                    sum / count as f64
                } else {
                    overall_mean
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_a_perfect_cycle() {
        let baseline = SeasonalBaseline::new(4);
        let history = vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0];
        let forecast = baseline.predict(&history, 4);
        assert_eq!(forecast, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn averages_noisy_cycles() {
        let baseline = SeasonalBaseline::new(2);
        let history = vec![10.0, 0.0, 20.0, 0.0];
        let forecast = baseline.predict(&history, 2);
        assert_eq!(forecast, vec![15.0, 0.0]);
    }

    #[test]
    fn empty_history_forecasts_zero() {
        let baseline = SeasonalBaseline::default();
        assert_eq!(baseline.predict(&[], 3), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn short_history_falls_back_to_mean() {
        let baseline = SeasonalBaseline::new(24);
        let history = vec![10.0, 20.0];
        let forecast = baseline.predict(&history, 30);
        assert_eq!(forecast.len(), 30);
        // phase 2 has no samples and uses the overall mean
        assert_eq!(forecast[0], 15.0);
        // 22 steps later the phase wraps back onto the first sample
        assert_eq!(forecast[22], 10.0);
        assert_eq!(forecast[23], 20.0);
    }
}
