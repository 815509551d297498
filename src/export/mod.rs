pub mod csv_sink;
pub mod error;
pub mod exporter;
pub mod sink;
