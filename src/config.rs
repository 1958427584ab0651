use serde::{Deserialize, Serialize};

/// Lead time before token expiry at which a refresh becomes due
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 60;

/// Configuration for the authentication core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the identity provider (login/refresh endpoints)
    pub auth_api_url: String,
    /// Base URL of the application API (permissions endpoint)
    pub api_url: String,
    /// Seconds before expiry at which the access token is considered due
    pub refresh_buffer_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_api_url: "http://localhost:8080/api".to_string(),
            api_url: "http://localhost:8080/api".to_string(),
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
        }
    }
}

impl AuthConfig {
    /// URL of the login endpoint
    pub fn login_url(&self) -> String {
        format!("{}/v1/auth/login", self.auth_api_url)
    }

    /// URL of the refresh endpoint
    pub fn refresh_url(&self) -> String {
        format!("{}/v1/auth/refresh", self.auth_api_url)
    }

    /// URL of the current-user permissions endpoint
    pub fn permissions_url(&self) -> String {
        format!("{}/v1/permissions/user/me", self.api_url)
    }

    /// The refresh lead time as a chrono duration
    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs)
    }
}
