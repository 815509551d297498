use crate::export::error::SinkError;
use crate::types::measurement::{Measurement, StationSnapshot};

/// Append-only tabular storage for exported rows.
///
/// The sink is the only record of what has been exported: the export cursor
/// of a module is whatever [`last_timestamp`](TabularSink::last_timestamp)
/// returns, so implementations must never reorder or rewrite rows.
pub trait TabularSink {
    /// Newest timestamp stored for `module_id`, `None` if nothing was stored
    /// yet.
    fn last_timestamp(&self, module_id: &str) -> Result<Option<i64>, SinkError>;

    /// Appends `rows` (ascending by timestamp) for `module_id`, with one
    /// column per name in `metrics`.
    fn append(
        &mut self,
        module_id: &str,
        metrics: &[String],
        rows: &[Measurement],
    ) -> Result<(), SinkError>;

    /// Newest snapshot timestamp stored for `station_id`.
    fn last_snapshot_timestamp(&self, station_id: &str) -> Result<Option<i64>, SinkError>;

    fn append_snapshot(&mut self, snapshot: &StationSnapshot) -> Result<(), SinkError>;
}
