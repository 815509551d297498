//! Scripted transport and fixtures shared by the unit tests.

use crate::api::error::TransportError;
use crate::api::transport::{HttpRequest, HttpResponse, HttpTransport};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

pub(crate) const STATION_ID: &str = "70:ee:50:00:00:01";
pub(crate) const OUTDOOR_ID: &str = "02:00:00:00:00:01";
pub(crate) const RAIN_ID: &str = "05:00:00:00:00:01";

type Handler = Box<dyn FnMut(&HttpRequest) -> HttpResponse>;

/// An [`HttpTransport`] answering from per-URL queues, falling back to a
/// per-URL handler. Every request is recorded.
#[derive(Default)]
pub(crate) struct MockTransport {
    queued: RefCell<HashMap<String, VecDeque<Result<HttpResponse, TransportError>>>>,
    handlers: RefCell<HashMap<String, Handler>>,
    requests: RefCell<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, url: &str, response: HttpResponse) {
        self.queued
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// The next request to `url` fails at the transport level.
    pub fn fail(&self, url: &str) {
        self.queued
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push_back(Err(TransportError::Connection {
                url: url.to_string(),
                message: "connection reset".to_string(),
            }));
    }

    pub fn route(&self, url: &str, handler: impl FnMut(&HttpRequest) -> HttpResponse + 'static) {
        self.handlers
            .borrow_mut()
            .insert(url.to_string(), Box::new(handler));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }
}

impl HttpTransport for MockTransport {
    fn post_form(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.borrow_mut().push(request.clone());

        let queued = self
            .queued
            .borrow_mut()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front);
        if let Some(result) = queued {
            return result;
        }
        match self.handlers.borrow_mut().get_mut(&request.url) {
            Some(handler) => Ok(handler(request)),
            None => panic!("unexpected request to {}", request.url),
        }
    }
}

pub(crate) fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string())
}

pub(crate) fn token_response(access: &str, refresh: &str, expires_in: i64) -> HttpResponse {
    json_response(
        200,
        json!({"access_token": access, "refresh_token": refresh, "expires_in": expires_in}),
    )
}

/// A station with an interior base unit, an outdoor module and a rain gauge.
pub(crate) fn stations_document() -> Value {
    json!({
        "status": "ok",
        "body": {
            "devices": [{
                "_id": STATION_ID,
                "type": "NAMain",
                "station_name": "Home",
                "module_name": "Living room",
                "data_type": ["Temperature", "CO2", "Humidity", "Noise", "Pressure"],
                "dashboard_data": {"time_utc": 1_700_000_000, "Temperature": 21.5, "CO2": 600},
                "place": {"city": "Lyon", "country": "FR", "altitude": 170},
                "modules": [
                    {
                        "_id": OUTDOOR_ID,
                        "type": "NAModule1",
                        "module_name": "Garden",
                        "data_type": ["Temperature", "Humidity"],
                        "dashboard_data": {
                            "time_utc": 1_700_000_000,
                            "Temperature": 8.5,
                            "Humidity": 81,
                            "min_temp": 4.0,
                            "max_temp": 11.2
                        },
                        "battery_percent": 64,
                        "rf_status": 70
                    },
                    {
                        "_id": RAIN_ID,
                        "type": "NAModule3",
                        "module_name": "Rain",
                        "data_type": ["Rain"]
                    }
                ]
            }],
            "user": {"mail": "me@example.com"}
        }
    })
}

/// Answers "get measure" requests from a fixed list of timestamps,
/// honouring `date_begin`, `date_end` and `limit` like the service does.
/// Each row carries one value per requested metric.
pub(crate) fn measure_source(timestamps: Vec<i64>) -> impl FnMut(&HttpRequest) -> HttpResponse {
    move |request| {
        let begin: i64 = request
            .get("date_begin")
            .and_then(|v| v.parse().ok())
            .unwrap_or(i64::MIN);
        let end: i64 = request
            .get("date_end")
            .and_then(|v| v.parse().ok())
            .unwrap_or(i64::MAX);
        let limit: usize = request
            .get("limit")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1024);
        let metrics = request.get("type").map_or(1, |t| t.split(',').count());

        let mut body = serde_json::Map::new();
        for ts in timestamps
            .iter()
            .copied()
            .filter(|ts| *ts >= begin && *ts <= end)
            .take(limit)
        {
            let row: Vec<Value> = (0..metrics).map(|i| json!(ts as f64 + i as f64)).collect();
            body.insert(ts.to_string(), Value::Array(row));
        }
        if body.is_empty() {
            json_response(200, json!({"status": "ok", "body": []}))
        } else {
            json_response(200, json!({"status": "ok", "body": body}))
        }
    }
}
