//! Estimated versus measured run times for one runner invocation.

use crate::task::TaskKey;

/// Estimate and measurement of one executed file, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeRecord {
    pub key: TaskKey,
    pub estimated: f64,
    pub actual: f64,
}

impl RuntimeRecord {
    /// Positive when the file ran longer than estimated.
    pub fn deviation(&self) -> f64 {
        self.actual - self.estimated
    }
}

/// Accumulates [`RuntimeRecord`]s across the tasks of a run.
#[derive(Debug, Clone, Default)]
pub struct RuntimeAnalysis {
    records: Vec<RuntimeRecord>,
}

impl RuntimeAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: TaskKey, estimated: f64, actual: f64) {
        self.records.push(RuntimeRecord {
            key,
            estimated,
            actual,
        });
    }

    pub fn records(&self) -> &[RuntimeRecord] {
        &self.records
    }

    pub fn estimated_total(&self) -> f64 {
        self.records.iter().map(|r| r.estimated).sum()
    }

    pub fn actual_total(&self) -> f64 {
        self.records.iter().map(|r| r.actual).sum()
    }

    pub fn total_deviation(&self) -> f64 {
        self.actual_total() - self.estimated_total()
    }

    /// Records whose absolute deviation exceeds `threshold` seconds, in run order.
    pub fn deviations(&self, threshold: f64) -> Vec<&RuntimeRecord> {
        self.records
            .iter()
            .filter(|r| r.deviation().abs() > threshold)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_and_deviations() {
        let mut analysis = RuntimeAnalysis::new();
        analysis.record(TaskKey::new("unit", "a"), 10.0, 12.0);
        analysis.record(TaskKey::new("unit", "b"), 0.0, 30.0);
        analysis.record(TaskKey::new("unit", "c"), 40.0, 25.0);

        assert_eq!(analysis.estimated_total(), 50.0);
        assert_eq!(analysis.actual_total(), 67.0);
        assert_eq!(analysis.total_deviation(), 17.0);

        let deviating: Vec<&str> = analysis
            .deviations(10.0)
            .iter()
            .map(|r| r.key.filename.as_str())
            .collect();
        assert_eq!(deviating, vec!["b", "c"]);
    }

    #[test]
    fn test_deviation_at_threshold_is_not_reported() {
        let mut analysis = RuntimeAnalysis::new();
        analysis.record(TaskKey::new("unit", "a"), 5.0, 15.0);
        assert!(analysis.deviations(10.0).is_empty());
    }
}
