//! Subcommand handlers.

use crate::cli::{ConfigArgs, DumpArgs, FetchArgs};
use anyhow::{bail, Context};
use chrono::Duration;
use log::{debug, info, warn};
use netatmo::{
    format_local, is_mac_address, station_by_name, ApiSession, Config, Credentials, CsvSink,
    Exporter, Module, ReqwestTransport, Station,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// How far back `dump` looks for measurements.
const DUMP_WINDOW_MINUTES: i64 = 30;

/// The configuration file and its contents for the duration of a command.
pub struct Workspace {
    path: PathBuf,
    config: Config,
}

impl Workspace {
    pub fn open(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Config::default_path()?,
        };
        let config = Config::load(&path)?;
        debug!("Using configuration {}", path.display());
        Ok(Self { path, config })
    }

    fn session(&self) -> anyhow::Result<ApiSession> {
        let credentials = self.config.credentials()?;
        let transport = Arc::new(
            ReqwestTransport::new(self.config.timeout())
                .context("Failed to initialize the HTTP client")?,
        );
        Ok(ApiSession::builder()
            .credentials(credentials)
            .transport(transport)
            .maybe_tokens(self.config.tokens.clone())
            .build())
    }

    /// Writes the session's tokens back to the configuration file when they
    /// changed, so the next run can reuse them.
    fn keep_tokens(&mut self, session: &ApiSession) -> anyhow::Result<()> {
        let current = session.current_token();
        if current == self.config.tokens.as_ref() {
            return Ok(());
        }
        self.config.tokens = current.cloned();
        self.config.save(&self.path)?;
        debug!("Stored new tokens in {}", self.path.display());
        Ok(())
    }

    /// Runs `f` with a session and stores its tokens afterwards, whether `f`
    /// succeeded or not.
    fn with_session<T>(
        &mut self,
        session: &mut ApiSession,
        f: impl FnOnce(&mut ApiSession) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let result = f(session);
        if let Err(e) = self.keep_tokens(session) {
            warn!("Could not store tokens: {e:#}");
        }
        result
    }
}

pub fn config(mut workspace: Workspace, args: ConfigArgs) -> anyhow::Result<ExitCode> {
    if let (Some(username), Some(password), Some(client_id), Some(client_secret)) =
        (args.username, args.password, args.client_id, args.client_secret)
    {
        let credentials = Credentials::new(client_id, client_secret, username, password);
        workspace.config.set_credentials(&credentials);
        info!("Credentials updated");
    }

    if let Some(device) = args.device {
        let station = if device.is_empty() || is_mac_address(&device) {
            device
        } else {
            let mut session = workspace.session()?;
            let stations =
                workspace.with_session(&mut session, |s| Ok(s.get_stations_data_for(None)?))?;
            match station_by_name(&stations, Some(&device)) {
                Some(station) => station.id.clone(),
                None => bail!("No station named '{device}' on this account"),
            }
        };
        workspace.config.set_default_station(Some(&station));
    }

    workspace.config.save(&workspace.path)?;
    println!("# {}", workspace.path.display());
    println!("{}", workspace.config);
    Ok(ExitCode::SUCCESS)
}

pub fn fetch(mut workspace: Workspace, args: FetchArgs) -> anyhow::Result<ExitCode> {
    let directory = args
        .output
        .or_else(|| workspace.config.export.directory.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let sink = CsvSink::new(&directory)?;
    let mut exporter = Exporter::builder()
        .sink(sink)
        .maybe_default_start(workspace.config.export_start())
        .snapshots(workspace.config.export.snapshots)
        .build();

    let mut session = workspace.session()?;
    let report = workspace.with_session(&mut session, |s| Ok(exporter.run(s)?))?;

    println!("{report}");
    info!("Export to {} done", display(exporter.sink().directory()));
    Ok(if report.failures() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn list(mut workspace: Workspace) -> anyhow::Result<ExitCode> {
    let mut session = workspace.session()?;
    let stations = workspace.with_session(&mut session, |s| Ok(s.get_stations_data_for(None)?))?;

    for station in &stations {
        println!("{} [{}]", station.name, station.id);
        for module in &station.modules {
            println!(
                "  {:<20} {:<18} {:<12} {}",
                module.name,
                module.id,
                module.kind.label(),
                module.metrics().join(", ")
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn test(mut workspace: Workspace) -> anyhow::Result<ExitCode> {
    let mut session = workspace.session()?;
    match workspace.with_session(&mut session, |s| Ok(s.get_stations_data()?)) {
        Ok(stations) => {
            println!("OK: access granted to {} station(s)", stations.len());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("FAILED: {e:#}");
            Ok(ExitCode::FAILURE)
        }
    }
}

pub fn dump(mut workspace: Workspace, args: DumpArgs) -> anyhow::Result<ExitCode> {
    let mut session = workspace.session()?;
    workspace.with_session(&mut session, |session| {
        let stations = match args.device.as_deref() {
            Some(device) if is_mac_address(device) => session.get_stations_data_for(Some(device))?,
            Some(name) => {
                let all = session.get_stations_data_for(None)?;
                match station_by_name(&all, Some(name)) {
                    Some(station) => vec![station.clone()],
                    None => bail!("No station named '{name}' on this account"),
                }
            }
            None => session.get_stations_data()?,
        };

        let until = session.now().timestamp();
        let since = until - Duration::minutes(DUMP_WINDOW_MINUTES).num_seconds();
        for station in &stations {
            print_station(station);
            for module in &station.modules {
                print_module(module);
                if let Some(reason) = no_measurements_reason(module) {
                    println!("    measurements: {reason}");
                    continue;
                }
                match session.get_measurements(module, module.metrics(), Some(since), until) {
                    Ok(rows) => {
                        println!("    last {DUMP_WINDOW_MINUTES} minutes:");
                        for row in rows {
                            let values: Vec<String> = row
                                .values
                                .iter()
                                .map(|(name, value)| match value {
                                    Some(v) => format!("{name}={v}"),
                                    None => format!("{name}=-"),
                                })
                                .collect();
                            println!("      {}  {}", format_local(row.timestamp), values.join(" "));
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => println!("    measurements unavailable: {e}"),
                }
            }
        }
        Ok(ExitCode::SUCCESS)
    })
}

fn print_station(station: &Station) {
    println!("Station {} [{}]", station.name, station.id);
    if let Some(place) = &station.place {
        let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        println!(
            "  place: {}, {} (altitude {} m, {})",
            or_dash(&place.city),
            or_dash(&place.country),
            place.altitude.map_or_else(|| "-".to_string(), |a| a.to_string()),
            or_dash(&place.timezone)
        );
    }
    print_optional("  wifi status", station.wifi_status.map(|w| w.to_string()));
    print_optional("  set up", station.date_setup.map(format_local));
    print_optional("  last upgrade", station.last_upgrade.map(format_local));
}

fn print_module(module: &Module) {
    println!("  Module {} [{}] {}", module.name, module.id, module.kind);
    print_optional("    firmware", module.firmware.map(|f| f.to_string()));
    print_optional("    battery", module.battery_percent.map(|b| format!("{b}%")));
    print_optional("    radio", module.rf_status.map(|r| r.to_string()));
    print_optional("    last seen", module.last_seen.map(format_local));
    if let Some(dashboard) = &module.dashboard {
        print_optional("    readings at", dashboard.time_utc.map(format_local));
        for (key, value) in &dashboard.readings {
            println!("      {key}: {value}");
        }
    }
}

/// Why `dump` shows no measurement history for `module`, if it doesn't.
fn no_measurements_reason(module: &Module) -> Option<String> {
    if !module.kind.is_exportable() {
        Some(format!("not recorded for {} modules", module.kind))
    } else if module.metrics().is_empty() {
        Some("module reports no metrics".to_string())
    } else {
        None
    }
}

fn print_optional(label: &str, value: Option<String>) {
    if let Some(value) = value {
        println!("{label}: {value}");
    }
}

fn display(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use netatmo::ModuleType;

    fn module(kind: ModuleType, data_type: &[&str]) -> Module {
        Module {
            id: "05:00:00:00:00:01".to_string(),
            station_id: "70:ee:50:00:00:01".to_string(),
            name: "Garden".to_string(),
            kind,
            data_type: data_type.iter().map(|m| m.to_string()).collect(),
            dashboard: None,
            firmware: None,
            battery_percent: None,
            rf_status: None,
            last_setup: None,
            last_message: None,
            last_seen: None,
        }
    }

    #[test]
    fn test_rain_and_wind_modules_explain_missing_history() {
        assert_eq!(
            no_measurements_reason(&module(ModuleType::Rain, &["Rain"])).as_deref(),
            Some("not recorded for Rain Gauge modules")
        );
        assert_eq!(
            no_measurements_reason(&module(ModuleType::Wind, &["WindStrength"])).as_deref(),
            Some("not recorded for Wind Sensor modules")
        );
    }

    #[test]
    fn test_module_without_metrics_is_explained() {
        assert_eq!(
            no_measurements_reason(&module(ModuleType::Outdoor, &[])).as_deref(),
            Some("module reports no metrics")
        );
    }

    #[test]
    fn test_exportable_module_has_measurements() {
        assert_eq!(
            no_measurements_reason(&module(ModuleType::Outdoor, &["Temperature", "Humidity"])),
            None
        );
    }
}
