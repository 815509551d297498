//! Incremental export of station measurements into a [`TabularSink`].

use crate::api::session::ApiSession;
use crate::export::error::ExportError;
use crate::export::sink::TabularSink;
use crate::types::measurement::StationSnapshot;
use crate::types::station::{Module, Station};
use bon::bon;
use log::{error, info, warn};
use std::fmt;

/// What happened to one module during an export run.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleOutcome {
    /// New rows were appended; `cursor` is the module's newest timestamp.
    Exported { rows: usize, cursor: i64 },
    /// The service had nothing newer than what the sink holds.
    UpToDate { cursor: Option<i64> },
    /// The module can't be exported (unsupported type, no metrics).
    Skipped { reason: String },
    /// Fetching or writing failed for this module only.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleReport {
    pub station_id: String,
    pub module_id: String,
    pub module_name: String,
    pub outcome: ModuleOutcome,
}

/// Summary of an export run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    pub modules: Vec<ModuleReport>,
    pub snapshots_written: usize,
}

impl ExportReport {
    /// Total number of measurement rows appended.
    pub fn rows_written(&self) -> usize {
        self.modules
            .iter()
            .map(|m| match m.outcome {
                ModuleOutcome::Exported { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.modules
            .iter()
            .filter(|m| matches!(m.outcome, ModuleOutcome::Failed { .. }))
            .count()
    }
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for module in &self.modules {
            let status = match &module.outcome {
                ModuleOutcome::Exported { rows, cursor } => {
                    format!("{rows} new row(s), last at {cursor}")
                }
                ModuleOutcome::UpToDate { cursor: Some(cursor) } => {
                    format!("up to date (last at {cursor})")
                }
                ModuleOutcome::UpToDate { cursor: None } => "no data".to_string(),
                ModuleOutcome::Skipped { reason } => format!("skipped: {reason}"),
                ModuleOutcome::Failed { reason } => format!("FAILED: {reason}"),
            };
            writeln!(
                f,
                "{:<20} {:<18} {}",
                module.module_name, module.module_id, status
            )?;
        }
        write!(
            f,
            "{} row(s) written, {} snapshot(s), {} failure(s)",
            self.rows_written(),
            self.snapshots_written,
            self.failures()
        )
    }
}

/// Appends, for every module of every station, the measurements newer than
/// what the sink already holds.
///
/// The cursor of a module is read back from the sink at each run, so
/// re-running an export never writes a row twice, and a run interrupted
/// half way resumes from what actually reached the sink.
pub struct Exporter<S: TabularSink> {
    sink: S,
    default_start: Option<i64>,
    snapshots: bool,
}

#[bon]
impl<S: TabularSink> Exporter<S> {
    /// * `default_start` - first timestamp to export for modules the sink
    ///   knows nothing about; `None` exports all available history.
    /// * `snapshots` - also append one outdoor snapshot row per station.
    #[builder]
    pub fn new(sink: S, default_start: Option<i64>, #[builder(default)] snapshots: bool) -> Self {
        Self {
            sink,
            default_start,
            snapshots,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Runs one export.
    ///
    /// # Errors
    ///
    /// Only errors that make every further call pointless are returned
    /// (authentication and transport failures). Anything else is recorded in
    /// the report for the module concerned and the run goes on.
    pub fn run(&mut self, session: &mut ApiSession) -> Result<ExportReport, ExportError> {
        let stations = session.get_stations_data()?;
        let until = session.now().timestamp();
        let mut report = ExportReport::default();

        for station in &stations {
            info!("Exporting station {} ({})", station.name, station.id);
            if self.snapshots && self.export_snapshot(station) {
                report.snapshots_written += 1;
            }

            for module in &station.modules {
                let outcome = match self.export_module(session, module, until) {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_fatal() => {
                        error!("Export aborted at module {}: {}", module.id, e);
                        return Err(e);
                    }
                    Err(e @ (ExportError::UnsupportedModule { .. } | ExportError::NoMetrics(_))) => {
                        info!("Skipping module {}: {}", module.id, e);
                        ModuleOutcome::Skipped {
                            reason: e.to_string(),
                        }
                    }
                    Err(e) => {
                        warn!("Export of module {} failed: {}", module.id, e);
                        ModuleOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
                report.modules.push(ModuleReport {
                    station_id: station.id.clone(),
                    module_id: module.id.clone(),
                    module_name: module.name.clone(),
                    outcome,
                });
            }
        }

        Ok(report)
    }

    fn export_module(
        &mut self,
        session: &mut ApiSession,
        module: &Module,
        until: i64,
    ) -> Result<ModuleOutcome, ExportError> {
        if !module.kind.is_exportable() {
            return Err(ExportError::UnsupportedModule {
                module: module.id.clone(),
                kind: module.kind.to_string(),
            });
        }
        let metrics = module.metrics();
        if metrics.is_empty() {
            return Err(ExportError::NoMetrics(module.id.clone()));
        }

        let cursor = self.sink.last_timestamp(&module.id)?;
        let since = cursor.map(|last| last + 1).or(self.default_start);
        info!(
            "Module {} ({}): exporting {} since {:?}",
            module.name,
            module.id,
            metrics.join(","),
            since
        );

        let mut rows = session.get_measurements(module, metrics, since, until)?;
        rows.retain(|m| cursor.map_or(true, |last| m.timestamp > last));

        let Some(newest) = rows.last().map(|m| m.timestamp) else {
            return Ok(ModuleOutcome::UpToDate { cursor });
        };
        self.sink.append(&module.id, metrics, &rows)?;
        Ok(ModuleOutcome::Exported {
            rows: rows.len(),
            cursor: newest,
        })
    }

    /// Appends the outdoor readings of `station` if they are newer than the
    /// last snapshot recorded for it. Failures are logged, never fatal.
    fn export_snapshot(&mut self, station: &Station) -> bool {
        let Some(snapshot) = snapshot_of(station) else {
            info!("Station {} has no outdoor readings to snapshot", station.id);
            return false;
        };

        let result = self
            .sink
            .last_snapshot_timestamp(&station.id)
            .and_then(|last| match last {
                Some(last) if snapshot.timestamp <= last => Ok(false),
                _ => self.sink.append_snapshot(&snapshot).map(|()| true),
            });
        match result {
            Ok(written) => written,
            Err(e) => {
                warn!("Snapshot of station {} failed: {}", station.id, e);
                false
            }
        }
    }
}

/// Outdoor readings of a station from its latest dashboard.
pub fn snapshot_of(station: &Station) -> Option<StationSnapshot> {
    let dashboard = station.outdoor_module()?.dashboard.as_ref()?;
    Some(StationSnapshot {
        station_id: station.id.clone(),
        timestamp: dashboard.time_utc?,
        temperature: dashboard.number("Temperature"),
        humidity: dashboard.number("Humidity"),
        min_temp: dashboard.number("min_temp"),
        max_temp: dashboard.number("max_temp"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::clock::{Clock, ManualClock};
    use crate::export::csv_sink::CsvSink;
    use crate::export::error::SinkError;
    use crate::testing::{
        json_response, measure_source, stations_document, token_response, MockTransport,
        OUTDOOR_ID, RAIN_ID, STATION_ID,
    };
    use crate::types::credentials::Credentials;
    use crate::types::measurement::Measurement;
    use crate::types::token::TokenState;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    const TOKEN_URL: &str = "https://api.netatmo.com/oauth2/token";
    const STATIONS_URL: &str = "https://api.netatmo.com/api/getstationsdata";
    const MEASURE_URL: &str = "https://api.netatmo.com/api/getmeasure";

    fn session(transport: &Arc<MockTransport>) -> ApiSession {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let tokens = TokenState {
            access_token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: clock.now() + Duration::hours(3),
        };
        ApiSession::builder()
            .credentials(Credentials::new("a", "b", "u", "p"))
            .transport(transport.clone())
            .clock(clock)
            .tokens(tokens)
            .build()
    }

    /// Stations data on every call; base unit and outdoor module share the
    /// same history.
    fn remote(timestamps: Vec<i64>) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.route(STATIONS_URL, |_| json_response(200, stations_document()));
        transport.route(MEASURE_URL, measure_source(timestamps));
        transport
    }

    fn outcome_of<'a>(report: &'a ExportReport, module_id: &str) -> &'a ModuleOutcome {
        &report
            .modules
            .iter()
            .find(|m| m.module_id == module_id)
            .unwrap()
            .outcome
    }

    fn exported_timestamps(sink: &CsvSink, module_id: &str) -> Vec<i64> {
        let content = fs::read_to_string(sink.module_path(module_id)).unwrap_or_default();
        content
            .lines()
            .skip(1)
            .map(|line| line.split(';').next().unwrap().parse().unwrap())
            .collect()
    }

    #[test]
    fn test_only_rows_after_cursor_are_appended() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut sink = CsvSink::new(dir.path())?;
        let metrics = vec!["Temperature".to_string(), "Humidity".to_string()];
        sink.append(
            OUTDOOR_ID,
            &metrics,
            &[Measurement {
                module_id: OUTDOOR_ID.to_string(),
                timestamp: 1000,
                values: vec![
                    ("Temperature".to_string(), Some(5.0)),
                    ("Humidity".to_string(), Some(70.0)),
                ],
            }],
        )?;

        let transport = remote(vec![1000, 1500, 2000]);
        let mut exporter = Exporter::builder().sink(sink).build();
        let report = exporter.run(&mut session(&transport))?;

        assert_eq!(
            outcome_of(&report, OUTDOOR_ID),
            &ModuleOutcome::Exported {
                rows: 2,
                cursor: 2000
            }
        );
        assert_eq!(
            exported_timestamps(exporter.sink(), OUTDOOR_ID),
            vec![1000, 1500, 2000]
        );
        let outdoor_call = transport
            .requests_to(MEASURE_URL)
            .into_iter()
            .find(|r| r.get("module_id") == Some(OUTDOOR_ID))
            .unwrap();
        assert_eq!(outdoor_call.get("date_begin"), Some("1001"));
        Ok(())
    }

    #[test]
    fn test_rerun_appends_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let transport = remote((1..=50).map(|i| i * 300).collect());
        let mut exporter = Exporter::builder()
            .sink(CsvSink::new(dir.path())?)
            .snapshots(true)
            .build();

        let first = exporter.run(&mut session(&transport))?;
        assert_eq!(first.rows_written(), 100);
        assert_eq!(first.snapshots_written, 1);

        let second = exporter.run(&mut session(&transport))?;
        assert_eq!(second.rows_written(), 0);
        assert_eq!(second.snapshots_written, 0);
        assert_eq!(
            outcome_of(&second, STATION_ID),
            &ModuleOutcome::UpToDate {
                cursor: Some(15_000)
            }
        );

        for module in [STATION_ID, OUTDOOR_ID] {
            let timestamps = exported_timestamps(exporter.sink(), module);
            assert_eq!(timestamps.len(), 50);
            assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        }
        Ok(())
    }

    #[test]
    fn test_rerun_after_interrupted_write_appends_missing_rows(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let transport = remote(vec![100, 200, 300, 400]);
        let mut exporter = Exporter::builder().sink(CsvSink::new(dir.path())?).build();
        exporter.run(&mut session(&transport))?;

        // cut the outdoor file a few bytes into its last row
        let path = exporter.sink().module_path(OUTDOOR_ID);
        let content = fs::read_to_string(&path)?;
        let last_row = content.trim_end_matches('\n').rfind('\n').unwrap() + 1;
        fs::write(&path, &content[..last_row + "400;".len()])?;

        let report = exporter.run(&mut session(&transport))?;

        assert_eq!(
            outcome_of(&report, OUTDOOR_ID),
            &ModuleOutcome::Exported {
                rows: 1,
                cursor: 400
            }
        );
        assert_eq!(
            outcome_of(&report, STATION_ID),
            &ModuleOutcome::UpToDate { cursor: Some(400) }
        );
        let timestamps = exported_timestamps(exporter.sink(), OUTDOOR_ID);
        assert_eq!(timestamps, vec![100, 200, 300, 400]);
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(fs::read_to_string(&path)?.lines().count(), content.lines().count());
        Ok(())
    }

    #[test]
    fn test_new_remote_rows_extend_the_history() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut exporter = Exporter::builder()
            .sink(CsvSink::new(dir.path())?)
            .build();

        exporter.run(&mut session(&remote(vec![100, 200])))?;
        let report = exporter.run(&mut session(&remote(vec![100, 200, 300, 400])))?;

        assert_eq!(report.rows_written(), 4);
        assert_eq!(
            exported_timestamps(exporter.sink(), OUTDOOR_ID),
            vec![100, 200, 300, 400]
        );
        Ok(())
    }

    #[test]
    fn test_default_start_applies_to_new_modules() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let transport = remote(vec![100, 200, 300]);
        let mut exporter = Exporter::builder()
            .sink(CsvSink::new(dir.path())?)
            .default_start(200)
            .build();

        exporter.run(&mut session(&transport))?;

        assert_eq!(exported_timestamps(exporter.sink(), OUTDOOR_ID), vec![200, 300]);
        Ok(())
    }

    #[test]
    fn test_unsupported_module_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let transport = remote(vec![100]);
        let mut exporter = Exporter::builder()
            .sink(CsvSink::new(dir.path())?)
            .build();

        let report = exporter.run(&mut session(&transport))?;

        assert!(matches!(
            outcome_of(&report, RAIN_ID),
            ModuleOutcome::Skipped { .. }
        ));
        assert_eq!(report.modules.len(), 3);
        assert_eq!(report.failures(), 0);
        assert!(transport
            .requests_to(MEASURE_URL)
            .iter()
            .all(|r| r.get("module_id") != Some(RAIN_ID)));
        Ok(())
    }

    #[test]
    fn test_module_failure_does_not_stop_the_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let transport = Arc::new(MockTransport::new());
        transport.route(STATIONS_URL, |_| json_response(200, stations_document()));
        let mut source = measure_source(vec![100, 200]);
        transport.route(MEASURE_URL, move |request| {
            if request.get("module_id").is_none() {
                json_response(400, json!({"error": {"code": 9, "message": "Device not found"}}))
            } else {
                source(request)
            }
        });
        let mut exporter = Exporter::builder()
            .sink(CsvSink::new(dir.path())?)
            .build();

        let report = exporter.run(&mut session(&transport))?;

        assert!(matches!(
            outcome_of(&report, STATION_ID),
            ModuleOutcome::Failed { .. }
        ));
        assert_eq!(
            outcome_of(&report, OUTDOOR_ID),
            &ModuleOutcome::Exported {
                rows: 2,
                cursor: 200
            }
        );
        Ok(())
    }

    #[test]
    fn test_auth_failure_aborts_the_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let transport = Arc::new(MockTransport::new());
        transport.route(STATIONS_URL, |_| json_response(200, stations_document()));
        transport.route(MEASURE_URL, |_| {
            json_response(403, json!({"error": {"code": 3, "message": "Access token expired"}}))
        });
        transport.route(TOKEN_URL, |_| token_response("T2", "R2", 10800));
        let mut exporter = Exporter::builder()
            .sink(CsvSink::new(dir.path())?)
            .build();

        let result = exporter.run(&mut session(&transport));

        assert!(matches!(
            result,
            Err(ExportError::Api(ApiError::Auth { .. }))
        ));
        // the base unit was tried (and retried once), nothing after it
        assert_eq!(transport.requests_to(MEASURE_URL).len(), 2);
        Ok(())
    }

    /// A sink whose appends always fail.
    struct BrokenSink;

    impl TabularSink for BrokenSink {
        fn last_timestamp(&self, _: &str) -> Result<Option<i64>, SinkError> {
            Ok(None)
        }
        fn append(&mut self, _: &str, _: &[String], _: &[Measurement]) -> Result<(), SinkError> {
            Err(SinkError::Io(
                "broken".into(),
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        }
        fn last_snapshot_timestamp(&self, _: &str) -> Result<Option<i64>, SinkError> {
            Ok(None)
        }
        fn append_snapshot(&mut self, _: &StationSnapshot) -> Result<(), SinkError> {
            Err(SinkError::Io(
                "broken".into(),
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        }
    }

    #[test]
    fn test_sink_failure_fails_each_module_but_not_the_run() {
        let transport = remote(vec![100, 200]);
        let mut exporter = Exporter::builder().sink(BrokenSink).snapshots(true).build();

        let report = exporter.run(&mut session(&transport)).unwrap();

        assert_eq!(report.failures(), 2);
        assert_eq!(report.snapshots_written, 0);
        assert_eq!(transport.requests_to(MEASURE_URL).len(), 2);
    }

    #[test]
    fn test_snapshot_of_station() {
        let document = stations_document();
        let stations =
            crate::api::response::parse_stations(STATIONS_URL, document).unwrap();
        let snapshot = snapshot_of(&stations[0]).unwrap();
        assert_eq!(snapshot.station_id, STATION_ID);
        assert_eq!(snapshot.timestamp, 1_700_000_000);
        assert_eq!(snapshot.temperature, Some(8.5));
        assert_eq!(snapshot.humidity, Some(81.0));
        assert_eq!(snapshot.max_temp, Some(11.2));
    }
}
