use serde::{Deserialize, Serialize};

/// One timestamped row of a module's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub module_id: String,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    /// Metric values in request order. The service reports `null` for
    /// readings it doesn't have.
    pub values: Vec<(String, Option<f64>)>,
}

impl Measurement {
    /// Value of a metric by name.
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(name, _)| name == metric)
            .and_then(|(_, value)| *value)
    }

    /// Whether the metric names of this row match `metrics`, in order.
    pub fn has_metrics(&self, metrics: &[String]) -> bool {
        self.values.len() == metrics.len()
            && self
                .values
                .iter()
                .zip(metrics)
                .all(|((name, _), expected)| name == expected)
    }
}

/// Outdoor readings of a station at the time of one "get stations data"
/// call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub station_id: String,
    /// Unix timestamp of the readings (the module's `time_utc`).
    pub timestamp: i64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
}
