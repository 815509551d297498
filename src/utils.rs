use chrono::{DateTime, Local};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `ts` as a UTC `YYYY-MM-DD HH:MM:SS` string, empty when out of range.
pub fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
        .unwrap_or_default()
}

/// `ts` in the local timezone, for terminal output.
pub fn format_local(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&Local).format(DATETIME_FORMAT).to_string())
        .unwrap_or_else(|| ts.to_string())
}
