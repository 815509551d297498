mod api;
mod clock;
mod config;
mod error;
mod export;
mod types;
mod utils;

#[cfg(test)]
mod testing;

pub use error::NetatmoError;

pub use api::error::{ApiError, TransportError};
pub use api::session::{ApiSession, BASE_URL, MEASURE_PAGE_LIMIT};
pub use api::token_manager::{TokenManager, EXPIRY_MARGIN, TOKEN_URL};
pub use api::transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, DEFAULT_TIMEOUT,
};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AccountSection, Config, ConfigError, ExportSection};

pub use export::csv_sink::CsvSink;
pub use export::error::{ExportError, SinkError};
pub use export::exporter::{snapshot_of, ExportReport, Exporter, ModuleOutcome, ModuleReport};
pub use export::sink::TabularSink;

pub use types::credentials::Credentials;
pub use types::measurement::{Measurement, StationSnapshot};
pub use types::station::*;
pub use types::token::TokenState;

pub use utils::{format_local, format_timestamp};
