//! JSON payloads of the Netatmo API and their conversion into the crate's
//! types.

use crate::api::error::ApiError;
use crate::api::transport::HttpResponse;
use crate::types::measurement::Measurement;
use crate::types::station::{Dashboard, Module, ModuleType, Place, Station};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// API error codes meaning "the access token is not (or no longer) valid".
const INVALID_TOKEN_CODE: i64 = 2;
const EXPIRED_TOKEN_CODE: i64 = 3;

/// The `error` member: a bare string for OAuth errors, an object for API
/// errors.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    OAuth(String),
    Api {
        code: Option<i64>,
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
    error_description: Option<String>,
}

impl ErrorEnvelope {
    fn code(&self) -> Option<i64> {
        match &self.error {
            ErrorPayload::Api { code, .. } => *code,
            ErrorPayload::OAuth(_) => None,
        }
    }

    fn message(&self) -> String {
        let base = match &self.error {
            ErrorPayload::OAuth(error) => error.clone(),
            ErrorPayload::Api { message, .. } => {
                message.clone().unwrap_or_else(|| "unknown error".to_string())
            }
        };
        match &self.error_description {
            Some(description) => format!("{base} ({description})"),
            None => base,
        }
    }
}

/// Body of a successful password or refresh grant.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    /// Servers may rotate the refresh token on every grant, or omit it.
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Checks a token-endpoint response. Any failure status or error payload
/// means the grant was refused.
pub(crate) fn parse_token_response(
    url: &str,
    response: &HttpResponse,
) -> Result<TokenResponse, ApiError> {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&response.body) {
        return Err(ApiError::Auth {
            url: url.to_string(),
            message: envelope.message(),
        });
    }
    if !response.is_success() {
        return Err(ApiError::Auth {
            url: url.to_string(),
            message: format!("status {}", response.status),
        });
    }
    serde_json::from_str(&response.body)
        .map_err(|e| ApiError::data(url, format!("malformed token response: {e}")))
}

/// Turns an API response into its JSON document, classifying failures.
///
/// A 401 status, or the service's invalid/expired token codes, is an
/// authentication rejection; every other error is a service error.
pub(crate) fn check_response(url: &str, response: &HttpResponse) -> Result<Value, ApiError> {
    let envelope = serde_json::from_str::<ErrorEnvelope>(&response.body).ok();
    let auth_rejected = response.status == 401
        || matches!(
            envelope.as_ref().and_then(ErrorEnvelope::code),
            Some(INVALID_TOKEN_CODE | EXPIRED_TOKEN_CODE)
        );

    if auth_rejected {
        return Err(ApiError::Auth {
            url: url.to_string(),
            message: envelope
                .map(|e| e.message())
                .unwrap_or_else(|| format!("status {}", response.status)),
        });
    }
    if let Some(envelope) = envelope {
        return Err(ApiError::Service {
            url: url.to_string(),
            status: response.status,
            code: envelope.code(),
            message: envelope.message(),
        });
    }
    if !response.is_success() {
        return Err(ApiError::Service {
            url: url.to_string(),
            status: response.status,
            code: None,
            message: truncate(&response.body, 200),
        });
    }

    let value: Value = serde_json::from_str(&response.body)
        .map_err(|e| ApiError::data(url, format!("invalid JSON: {e}")))?;
    match value.get("status").and_then(Value::as_str) {
        Some("ok") | None => Ok(value),
        Some(other) => Err(ApiError::data(url, format!("status '{other}'"))),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Deserialize)]
struct StationsBody {
    #[serde(default)]
    devices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct StationsEnvelope {
    body: StationsBody,
}

#[derive(Debug, Deserialize)]
struct RawDashboard {
    time_utc: Option<i64>,
    #[serde(flatten)]
    readings: BTreeMap<String, Value>,
}

impl From<RawDashboard> for Dashboard {
    fn from(raw: RawDashboard) -> Self {
        Dashboard {
            time_utc: raw.time_utc,
            readings: raw.readings,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlace {
    city: Option<String>,
    country: Option<String>,
    altitude: Option<f64>,
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    module_name: Option<String>,
    #[serde(default)]
    data_type: Vec<String>,
    dashboard_data: Option<RawDashboard>,
    firmware: Option<i64>,
    battery_percent: Option<i64>,
    rf_status: Option<i64>,
    last_setup: Option<i64>,
    last_message: Option<i64>,
    last_seen: Option<i64>,
}

impl RawModule {
    fn into_module(self, station_id: &str) -> Module {
        Module {
            name: self.module_name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            station_id: station_id.to_string(),
            kind: ModuleType::from_code(&self.kind),
            data_type: self.data_type,
            dashboard: self.dashboard_data.map(Dashboard::from),
            firmware: self.firmware,
            battery_percent: self.battery_percent,
            rf_status: self.rf_status,
            last_setup: self.last_setup,
            last_message: self.last_message,
            last_seen: self.last_seen,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(flatten)]
    base: RawModule,
    station_name: Option<String>,
    place: Option<RawPlace>,
    wifi_status: Option<i64>,
    date_setup: Option<i64>,
    last_upgrade: Option<i64>,
    #[serde(default)]
    modules: Vec<RawModule>,
}

impl From<RawDevice> for Station {
    fn from(raw: RawDevice) -> Self {
        let id = raw.base.id.clone();
        let name = raw
            .station_name
            .clone()
            .or_else(|| raw.base.module_name.clone())
            .unwrap_or_else(|| id.clone());

        let mut modules = Vec::with_capacity(raw.modules.len() + 1);
        modules.push(raw.base.into_module(&id));
        modules.extend(raw.modules.into_iter().map(|m| m.into_module(&id)));

        Station {
            id,
            name,
            place: raw.place.map(|p| Place {
                city: p.city,
                country: p.country,
                altitude: p.altitude,
                timezone: p.timezone,
            }),
            wifi_status: raw.wifi_status,
            date_setup: raw.date_setup,
            last_upgrade: raw.last_upgrade,
            modules,
        }
    }
}

pub(crate) fn parse_stations(url: &str, document: Value) -> Result<Vec<Station>, ApiError> {
    let envelope: StationsEnvelope = serde_json::from_value(document)
        .map_err(|e| ApiError::data(url, format!("malformed stations data: {e}")))?;
    Ok(envelope.body.devices.into_iter().map(Station::from).collect())
}

/// Parses a "get measure" page (`optimize=false` layout):
/// `{"body": {"<timestamp>": [v1, v2, ...], ...}}`.
///
/// An empty page may come back as `[]` instead of `{}`. Rows are returned in
/// ascending timestamp order.
pub(crate) fn parse_measure_page(
    url: &str,
    module_id: &str,
    metrics: &[String],
    document: &Value,
) -> Result<Vec<Measurement>, ApiError> {
    let rows = match document.get("body") {
        Some(Value::Object(rows)) => rows,
        Some(Value::Array(items)) if items.is_empty() => return Ok(Vec::new()),
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(other) => {
            return Err(ApiError::data(
                url,
                format!("unexpected measure body: {}", truncate(&other.to_string(), 80)),
            ))
        }
    };

    let mut page = Vec::with_capacity(rows.len());
    for (key, values) in rows {
        let timestamp: i64 = key
            .parse()
            .map_err(|_| ApiError::data(url, format!("invalid timestamp '{key}'")))?;
        let values = values
            .as_array()
            .ok_or_else(|| ApiError::data(url, format!("row {timestamp} is not an array")))?;
        if values.len() != metrics.len() {
            return Err(ApiError::data(
                url,
                format!(
                    "row {timestamp} has {} values for {} metrics",
                    values.len(),
                    metrics.len()
                ),
            ));
        }
        page.push(Measurement {
            module_id: module_id.to_string(),
            timestamp,
            values: metrics
                .iter()
                .cloned()
                .zip(values.iter().map(Value::as_f64))
                .collect(),
        });
    }
    page.sort_by_key(|m| m.timestamp);
    Ok(page)
}
