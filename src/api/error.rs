use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Could not reach {url}: {message}")]
    Connection { url: String, message: String },

    #[error("Network request failed for {0}")]
    Request(String, #[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials or tokens were rejected. Fatal for the current run.
    #[error("Authentication rejected by {url}: {message}")]
    Auth { url: String, message: String },

    #[error(transparent)]
    Network(#[from] TransportError),

    /// A successful call whose payload doesn't have the expected shape.
    #[error("Unexpected response from {url}: {message}")]
    Data { url: String, message: String },

    /// The service answered with an error that isn't an authentication
    /// rejection.
    #[error("{url} returned status {status} (code {code:?}): {message}")]
    Service {
        url: String,
        status: u16,
        code: Option<i64>,
        message: String,
    },
}

impl ApiError {
    /// Errors after which no further call of the run can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Auth { .. } | ApiError::Network(_))
    }

    pub(crate) fn data(url: &str, message: impl Into<String>) -> Self {
        ApiError::Data {
            url: url.to_string(),
            message: message.into(),
        }
    }
}
