use std::fmt;

/// The account and application secrets used for the password grant.
///
/// Loaded once per run (see [`crate::Config::credentials`]) and never
/// modified afterwards. The `Debug` output masks every secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Application client id, from the Netatmo developer console.
    pub client_id: String,
    /// Application client secret.
    pub client_secret: String,
    /// Account e-mail address.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Station (MAC address) used when a request doesn't name one.
    pub default_device: Option<String>,
}

impl Credentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            username: username.into(),
            password: password.into(),
            default_device: None,
        }
    }

    pub fn with_default_device(mut self, device: impl Into<String>) -> Self {
        self.default_device = Some(device.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("username", &self.username)
            .field("password", &"***")
            .field("default_device", &self.default_device)
            .finish()
    }
}
