//! Authenticated access to the weather station API.

use crate::api::error::ApiError;
use crate::api::response::{check_response, parse_measure_page, parse_stations};
use crate::api::token_manager::TokenManager;
use crate::api::transport::{HttpRequest, HttpTransport};
use crate::clock::{Clock, SystemClock};
use crate::types::credentials::Credentials;
use crate::types::measurement::Measurement;
use crate::types::station::{Module, Station};
use crate::types::token::TokenState;
use bon::bon;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

pub const BASE_URL: &str = "https://api.netatmo.com";

/// Maximum number of rows the service returns per "get measure" call.
pub const MEASURE_PAGE_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retried,
}

/// A logged-in API client for one account.
///
/// The session holds the current [`TokenState`] (or none, before the first
/// call). Tokens are obtained and renewed lazily, right before a request
/// needs them; there is no background refresh.
///
/// # Examples
///
/// ```no_run
/// use netatmo::{ApiSession, Credentials, ReqwestTransport};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(30))?);
/// let mut session = ApiSession::builder()
///     .credentials(Credentials::new("client-id", "client-secret", "me@example.com", "secret"))
///     .transport(transport)
///     .build();
///
/// for station in session.get_stations_data()? {
///     println!("{} ({} modules)", station.name, station.modules.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ApiSession {
    manager: TokenManager,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    tokens: Option<TokenState>,
    base_url: String,
}

#[bon]
impl ApiSession {
    /// Creates a session.
    ///
    /// * `clock` - defaults to the system clock.
    /// * `tokens` - a previously saved token pair, reused until it expires.
    /// * `base_url` - defaults to [`BASE_URL`].
    #[builder]
    pub fn new(
        credentials: Credentials,
        transport: Arc<dyn HttpTransport>,
        clock: Option<Arc<dyn Clock>>,
        tokens: Option<TokenState>,
        #[builder(default = BASE_URL.to_string(), into)] base_url: String,
    ) -> Self {
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let manager = TokenManager::new(credentials, transport.clone(), clock.clone())
            .with_token_url(format!("{base_url}/oauth2/token"));
        Self {
            manager,
            transport,
            clock,
            tokens,
            base_url,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        self.manager.credentials()
    }

    /// The token pair currently held, e.g. to persist it after a run.
    pub fn current_token(&self) -> Option<&TokenState> {
        self.tokens.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stations of the account, restricted to the credentials' default
    /// station when one is configured.
    pub fn get_stations_data(&mut self) -> Result<Vec<Station>, ApiError> {
        let device = self.credentials().default_device.clone();
        self.get_stations_data_for(device.as_deref())
    }

    /// Stations of the account; `None` returns all of them.
    ///
    /// # Errors
    ///
    /// [`ApiError::Auth`] when the token is rejected again after one refresh.
    pub fn get_stations_data_for(
        &mut self,
        device_id: Option<&str>,
    ) -> Result<Vec<Station>, ApiError> {
        let url = format!("{}/api/getstationsdata", self.base_url);
        let mut request = HttpRequest::new(&url).param("get_favorites", "false");
        if let Some(device_id) = device_id {
            request = request.param("device_id", device_id);
        }

        let document = self.call(request)?;
        let stations = parse_stations(&url, document)?;
        info!("Found {} station(s)", stations.len());
        Ok(stations)
    }

    /// Full history of `metrics` for `module` between `since` (inclusive,
    /// `None` for the beginning of available history) and `until`.
    ///
    /// The service returns at most [`MEASURE_PAGE_LIMIT`] rows per call, so
    /// this keeps asking for the rows after the last one received until a
    /// short or empty page comes back. The result is strictly ascending by
    /// timestamp; rows repeated at a page boundary appear once.
    pub fn get_measurements(
        &mut self,
        module: &Module,
        metrics: &[String],
        since: Option<i64>,
        until: i64,
    ) -> Result<Vec<Measurement>, ApiError> {
        let url = format!("{}/api/getmeasure", self.base_url);
        if metrics.is_empty() {
            return Err(ApiError::data(&url, format!("no metrics requested for {}", module.id)));
        }

        let mut measurements: Vec<Measurement> = Vec::new();
        let mut since = since;
        let mut pages = 0usize;

        while since.map_or(true, |begin| begin <= until) {
            let mut request = HttpRequest::new(&url).param("device_id", &module.station_id);
            if !module.is_base_unit() {
                request = request.param("module_id", &module.id);
            }
            request = request
                .param("scale", "max")
                .param("type", metrics.join(","))
                .param("date_end", until.to_string())
                .param("limit", MEASURE_PAGE_LIMIT.to_string())
                .param("optimize", "false")
                .param("real_time", "false");
            if let Some(begin) = since {
                request = request.param("date_begin", begin.to_string());
            }

            let document = self.call(request)?;
            let page = parse_measure_page(&url, &module.id, metrics, &document)?;
            pages += 1;
            debug!(
                "Page {} for module {} since {:?}: {} row(s)",
                pages,
                module.id,
                since,
                page.len()
            );

            let received = page.len();
            let Some(page_last) = page.last().map(|m| m.timestamp) else {
                break;
            };
            for measurement in page {
                let after_since = since.map_or(true, |begin| measurement.timestamp >= begin);
                let after_last = measurements
                    .last()
                    .map_or(true, |last| measurement.timestamp > last.timestamp);
                if after_since && after_last {
                    measurements.push(measurement);
                }
            }

            if received < MEASURE_PAGE_LIMIT {
                break;
            }
            let next = page_last + 1;
            if since.is_some_and(|begin| next <= begin) {
                warn!(
                    "Pagination for module {} is not advancing past {}, stopping",
                    module.id, next
                );
                break;
            }
            since = Some(next);
        }

        info!(
            "Fetched {} measurement(s) for module {} in {} call(s)",
            measurements.len(),
            module.id,
            pages
        );
        Ok(measurements)
    }

    /// Sends an API request with the current access token. An
    /// authentication rejection triggers one forced refresh and one retry;
    /// a second rejection is returned as is.
    fn call(&mut self, request: HttpRequest) -> Result<Value, ApiError> {
        let mut attempt = Attempt::First;
        loop {
            let token = self.access_token()?;
            let authorized = request.clone().bearer(token);
            info!(">>>> {}", authorized.url);
            let response = self.transport.post_form(&authorized)?;

            match (check_response(&authorized.url, &response), attempt) {
                (Err(ApiError::Auth { message, .. }), Attempt::First) => {
                    warn!(
                        "{} rejected the access token ({}), refreshing and retrying once",
                        authorized.url, message
                    );
                    self.force_refresh()?;
                    attempt = Attempt::Retried;
                }
                (result, _) => return result,
            }
        }
    }

    /// A valid access token, authenticating or refreshing first if needed.
    fn access_token(&mut self) -> Result<String, ApiError> {
        let renewed = match self.tokens.as_ref() {
            None => None,
            Some(state) => match self.manager.ensure_valid(state) {
                Ok(state) => Some(state),
                Err(ApiError::Auth { message, .. }) => {
                    warn!("Refresh token rejected ({message}), authenticating again");
                    None
                }
                Err(e) => return Err(e),
            },
        };
        let state = match renewed {
            Some(state) => state,
            None => {
                self.tokens = None;
                self.manager.authenticate()?
            }
        };

        let token = state.access_token.clone();
        self.tokens = Some(state);
        Ok(token)
    }

    /// Refreshes regardless of `expires_at`, after the server refused a
    /// token it should have accepted.
    fn force_refresh(&mut self) -> Result<(), ApiError> {
        let refreshed = match self.tokens.as_ref() {
            None => None,
            Some(state) => match self.manager.refresh(state) {
                Ok(state) => Some(state),
                Err(ApiError::Auth { message, .. }) => {
                    warn!("Refresh token rejected ({message}), authenticating again");
                    None
                }
                Err(e) => return Err(e),
            },
        };
        let state = match refreshed {
            Some(state) => state,
            None => {
                self.tokens = None;
                self.manager.authenticate()?
            }
        };
        self.tokens = Some(state);
        Ok(())
    }
}
