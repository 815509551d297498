//! Stations and the sensor modules attached to them, as reported by the
//! "get stations data" call.
//!
//! A [`Station`] is a read-only snapshot: nothing here is persisted as an
//! entity, only the measurements of its modules are.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A weather station owned by the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// MAC address of the base unit (e.g. "70:ee:50:00:00:01").
    pub id: String,
    /// User-given station name.
    pub name: String,
    /// Where the station is installed, when reported.
    pub place: Option<Place>,
    /// Wifi signal quality of the base unit (lower is better).
    pub wifi_status: Option<i64>,
    /// Unix timestamp of the first setup.
    pub date_setup: Option<i64>,
    /// Unix timestamp of the last firmware upgrade.
    pub last_upgrade: Option<i64>,
    /// All modules of the station. The base unit itself comes first and
    /// carries the station id.
    pub modules: Vec<Module>,
}

impl Station {
    /// The first exterior module, used for station snapshots.
    pub fn outdoor_module(&self) -> Option<&Module> {
        self.modules.iter().find(|m| m.kind == ModuleType::Outdoor)
    }
}

/// Installation place of a station.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Place {
    pub city: Option<String>,
    pub country: Option<String>,
    pub altitude: Option<f64>,
    pub timezone: Option<String>,
}

/// One sensor unit: the base unit or a satellite module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// MAC-like module identifier.
    pub id: String,
    /// Id of the station this module belongs to.
    pub station_id: String,
    /// User-given module name.
    pub name: String,
    pub kind: ModuleType,
    /// Names of the metrics this module measures, in the order the service
    /// reports them (e.g. `["Temperature", "Humidity"]`).
    pub data_type: Vec<String>,
    /// Latest readings, when the module is reachable.
    pub dashboard: Option<Dashboard>,
    pub firmware: Option<i64>,
    /// Battery level in percent (satellite modules only).
    pub battery_percent: Option<i64>,
    /// Radio signal quality (90 = low, 60 = highest).
    pub rf_status: Option<i64>,
    pub last_setup: Option<i64>,
    pub last_message: Option<i64>,
    pub last_seen: Option<i64>,
}

impl Module {
    /// Whether this module is the station's base unit rather than a
    /// satellite.
    pub fn is_base_unit(&self) -> bool {
        self.id == self.station_id
    }

    /// Metric names to request when exporting this module's history.
    pub fn metrics(&self) -> &[String] {
        &self.data_type
    }
}

/// Hardware type of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    /// Interior base unit (`NAMain`).
    Main,
    /// Additional interior module (`NAModule4`).
    Indoor,
    /// Exterior module (`NAModule1`).
    Outdoor,
    /// Rain gauge (`NAModule3`).
    Rain,
    /// Anemometer (`NAModule2`).
    Wind,
    /// Anything else the service may report.
    Other(String),
}

impl ModuleType {
    /// Maps the service's type code to a module type.
    pub fn from_code(code: &str) -> Self {
        match code {
            "NAMain" => ModuleType::Main,
            "NAModule1" => ModuleType::Outdoor,
            "NAModule2" => ModuleType::Wind,
            "NAModule3" => ModuleType::Rain,
            "NAModule4" => ModuleType::Indoor,
            other => ModuleType::Other(other.to_string()),
        }
    }

    /// Only interior and exterior modules have their history exported.
    pub fn is_exportable(&self) -> bool {
        matches!(
            self,
            ModuleType::Main | ModuleType::Indoor | ModuleType::Outdoor
        )
    }

    pub fn label(&self) -> &str {
        match self {
            ModuleType::Main => "Main device",
            ModuleType::Indoor => "Indoor",
            ModuleType::Outdoor => "Outdoor",
            ModuleType::Rain => "Rain Gauge",
            ModuleType::Wind => "Wind Sensor",
            ModuleType::Other(code) => code,
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The latest readings of a module.
///
/// Readings are kept as raw JSON values since the set of keys depends on the
/// module type (`Temperature`, `CO2`, `min_temp`, `date_max_temp`, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dashboard {
    /// Unix timestamp of the readings.
    pub time_utc: Option<i64>,
    pub readings: BTreeMap<String, serde_json::Value>,
}

impl Dashboard {
    /// A reading as a number, if present and numeric.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.readings.get(key).and_then(serde_json::Value::as_f64)
    }
}

/// Returns whether `candidate` looks like a MAC address (six hex pairs
/// separated throughout by either `:` or `-`), i.e. can be used as a station
/// id without a lookup by name.
pub fn is_mac_address(candidate: &str) -> bool {
    [':', '-'].iter().any(|&separator| {
        let parts: Vec<&str> = candidate.split(separator).collect();
        parts.len() == 6
            && parts
                .iter()
                .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
    })
}

/// Finds a station by its name or MAC address. With `None` (or an empty
/// string) the first station is returned.
pub fn station_by_name<'a>(stations: &'a [Station], name_or_id: Option<&str>) -> Option<&'a Station> {
    match name_or_id {
        None | Some("") => stations.first(),
        Some(wanted) => stations
            .iter()
            .find(|s| s.name == wanted || s.id.eq_ignore_ascii_case(wanted)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, name: &str) -> Station {
        Station {
            id: id.to_string(),
            name: name.to_string(),
            place: None,
            wifi_status: None,
            date_setup: None,
            last_upgrade: None,
            modules: vec![],
        }
    }

    #[test]
    fn test_module_type_codes() {
        assert_eq!(ModuleType::from_code("NAMain"), ModuleType::Main);
        assert_eq!(ModuleType::from_code("NAModule1"), ModuleType::Outdoor);
        assert_eq!(ModuleType::from_code("NAModule4"), ModuleType::Indoor);
        assert!(!ModuleType::from_code("NAModule3").is_exportable());
        assert!(!ModuleType::from_code("NAModule2").is_exportable());
        assert_eq!(
            ModuleType::from_code("NHC"),
            ModuleType::Other("NHC".to_string())
        );
    }

    #[test]
    fn test_is_mac_address() {
        assert!(is_mac_address("70:ee:50:00:00:01"));
        assert!(is_mac_address("70-EE-50-00-00-01"));
        assert!(!is_mac_address("Home"));
        assert!(!is_mac_address("70:ee:50:00:00"));
        assert!(!is_mac_address("70:ee:50:00:00:zz"));
        assert!(!is_mac_address("70:ee-50:00-00:01"));
        assert!(!is_mac_address("70-ee-50-00-00:01"));
    }

    #[test]
    fn test_station_by_name() {
        let stations = vec![
            station("70:ee:50:00:00:01", "Home"),
            station("70:ee:50:00:00:02", "Cabin"),
        ];
        assert_eq!(station_by_name(&stations, None).map(|s| s.name.as_str()), Some("Home"));
        assert_eq!(
            station_by_name(&stations, Some("Cabin")).map(|s| s.id.as_str()),
            Some("70:ee:50:00:00:02")
        );
        assert_eq!(
            station_by_name(&stations, Some("70:EE:50:00:00:02")).map(|s| s.name.as_str()),
            Some("Cabin")
        );
        assert!(station_by_name(&stations, Some("Office")).is_none());
    }
}
