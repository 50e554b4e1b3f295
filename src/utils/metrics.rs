use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time breakdown of a partitioned training run, as seen by one worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub iterations: usize,
    pub sync_interval: usize,
    pub sync_count: usize,
    pub compute_secs: f64,
    pub comm_secs: f64,
}

impl TrainingReport {
    pub fn new(iterations: usize, sync_interval: usize) -> Self {
        Self {
            iterations,
            sync_interval,
            ..Self::default()
        }
    }

    pub fn record_compute(&mut self, elapsed: Duration) {
        self.compute_secs += elapsed.as_secs_f64();
    }

    pub fn record_sync(&mut self, elapsed: Duration) {
        self.comm_secs += elapsed.as_secs_f64();
        self.sync_count += 1;
    }

    pub fn total_secs(&self) -> f64 {
        self.compute_secs + self.comm_secs
    }

    pub fn compute_share(&self) -> f64 {
        share(self.compute_secs, self.total_secs())
    }

    pub fn comm_share(&self) -> f64 {
        share(self.comm_secs, self.total_secs())
    }

    /// Percentage of averaging rounds saved versus syncing every iteration.
    pub fn comm_reduction_pct(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        (1.0 - self.sync_count as f64 / self.iterations as f64) * 100.0
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Computation time: {:.2}s ({:.1}%)",
            self.compute_secs,
            self.compute_share()
        );
        tracing::info!(
            "Communication time: {:.2}s ({:.1}%)",
            self.comm_secs,
            self.comm_share()
        );
        tracing::info!("Total synchronizations: {}", self.sync_count);
        tracing::info!("Communication reduction: {:.1}%", self.comm_reduction_pct());
    }
}

fn share(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// Running sum of squared prediction errors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SquaredError {
    pub sum: f64,
    pub count: usize,
}

impl SquaredError {
    pub fn add(&mut self, actual: f32, predicted: f32) {
        let error = (actual - predicted) as f64;
        self.sum += error * error;
        self.count += 1;
    }

    pub fn rmse(&self) -> Option<f64> {
        rmse_from_sum(self.sum, self.count)
    }
}

pub fn rmse_from_sum(sum: f64, count: usize) -> Option<f64> {
    if count == 0 {
        None
    } else {
        Some((sum / count as f64).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_reduction() {
        let mut report = TrainingReport::new(20, 3);
        for _ in 0..7 {
            report.record_sync(Duration::from_millis(10));
        }
        report.record_compute(Duration::from_millis(930));

        assert_eq!(report.sync_count, 7);
        assert!((report.comm_reduction_pct() - 65.0).abs() < 1e-9);
        assert!((report.compute_share() - 93.0).abs() < 1e-6);
        assert!((report.comm_share() - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_report_has_no_shares() {
        let report = TrainingReport::new(0, 3);
        assert_eq!(report.compute_share(), 0.0);
        assert_eq!(report.comm_reduction_pct(), 0.0);
    }

    #[test]
    fn test_squared_error() {
        let mut acc = SquaredError::default();
        acc.add(4.0, 3.0);
        acc.add(2.0, 5.0);
        assert_eq!(acc.count, 2);
        assert!((acc.rmse().unwrap() - 5.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(SquaredError::default().rmse(), None);
    }
}
