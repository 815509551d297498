//! Access token lifecycle: password grant, refresh grant and lazy renewal.

use crate::api::error::ApiError;
use crate::api::response::parse_token_response;
use crate::api::transport::{HttpRequest, HttpTransport};
use crate::clock::Clock;
use crate::types::credentials::Credentials;
use crate::types::token::TokenState;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::sync::Arc;

pub const TOKEN_URL: &str = "https://api.netatmo.com/oauth2/token";
const SCOPE: &str = "read_station";

/// A token is renewed this long before it actually expires.
pub const EXPIRY_MARGIN: Duration = Duration::seconds(30);

/// Obtains and renews tokens for one set of credentials.
///
/// The manager itself is stateless: it turns credentials or an old
/// [`TokenState`] into a new one. Holding the current state is the job of the
/// [`ApiSession`](crate::ApiSession).
pub struct TokenManager {
    credentials: Credentials,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    token_url: String,
}

impl TokenManager {
    pub fn new(
        credentials: Credentials,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            transport,
            clock,
            token_url: TOKEN_URL.to_string(),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Password grant.
    ///
    /// # Errors
    ///
    /// [`ApiError::Auth`] when the service refuses the credentials,
    /// [`ApiError::Network`] on transport failure.
    pub fn authenticate(&self) -> Result<TokenState, ApiError> {
        info!("Authenticating as {}", self.credentials.username);
        let request = HttpRequest::new(&self.token_url)
            .param("grant_type", "password")
            .param("client_id", &self.credentials.client_id)
            .param("client_secret", &self.credentials.client_secret)
            .param("username", &self.credentials.username)
            .param("password", &self.credentials.password)
            .param("scope", SCOPE);

        let response = self.transport.post_form(&request)?;
        let grant = parse_token_response(&self.token_url, &response)?;
        let refresh_token = grant.refresh_token.ok_or_else(|| {
            ApiError::data(&self.token_url, "password grant returned no refresh token")
        })?;

        Ok(TokenState {
            access_token: grant.access_token,
            refresh_token,
            expires_at: self.expiry(grant.expires_in)?,
        })
    }

    /// Refresh grant. The refresh token the server returns replaces the old
    /// one; it is only kept when the server doesn't send a new one.
    ///
    /// # Errors
    ///
    /// [`ApiError::Auth`] when the refresh token itself is rejected, in which
    /// case only [`authenticate`](Self::authenticate) can recover.
    pub fn refresh(&self, state: &TokenState) -> Result<TokenState, ApiError> {
        info!("Refreshing access token");
        let request = HttpRequest::new(&self.token_url)
            .param("grant_type", "refresh_token")
            .param("refresh_token", &state.refresh_token)
            .param("client_id", &self.credentials.client_id)
            .param("client_secret", &self.credentials.client_secret);

        let response = self.transport.post_form(&request)?;
        let grant = parse_token_response(&self.token_url, &response)?;

        Ok(TokenState {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .unwrap_or_else(|| state.refresh_token.clone()),
            expires_at: self.expiry(grant.expires_in)?,
        })
    }

    /// Absolute expiry for a grant valid `expires_in` seconds from now.
    fn expiry(&self, expires_in: i64) -> Result<DateTime<Utc>, ApiError> {
        Duration::try_seconds(expires_in)
            .filter(|_| expires_in >= 0)
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                ApiError::data(
                    &self.token_url,
                    format!("expires_in out of range: {expires_in}"),
                )
            })
    }

    /// Whether `state` must be refreshed before use.
    pub fn is_expired(&self, state: &TokenState) -> bool {
        self.clock.now() + EXPIRY_MARGIN >= state.expires_at
    }

    /// Returns `state` unchanged while it is valid, a refreshed state
    /// otherwise.
    pub fn ensure_valid(&self, state: &TokenState) -> Result<TokenState, ApiError> {
        if self.is_expired(state) {
            self.refresh(state)
        } else {
            debug!("Access token still valid until {}", state.expires_at);
            Ok(state.clone())
        }
    }
}
