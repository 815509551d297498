use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An access/refresh token pair and the instant the access token stops
/// being accepted.
///
/// A `TokenState` is only ever replaced as a whole: a refresh produces a new
/// value rather than patching fields of the old one, so the access token and
/// the refresh token always come from the same grant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
