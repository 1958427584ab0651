//! Identity-provider HTTP client.
//!
//! Talks to the login and refresh endpoints and normalizes every failure
//! into the crate's error taxonomy before it reaches the rest of the core.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::{auth_rejected, network_error, AuthResult, GENERIC_ERROR_MESSAGE};
use crate::http::{HttpClient, SimpleHttpResponse};

/// Login credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token payload returned by both the login and refresh endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Server-reported access-token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Error payload shape used by the identity provider
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Client for the identity provider's own endpoints. These requests are
/// never routed through the request authorizer, so a failing token cannot
/// recurse into another refresh.
pub struct AuthClient {
    http: Arc<dyn HttpClient>,
    config: AuthConfig,
}

impl AuthClient {
    pub fn new(http: Arc<dyn HttpClient>, config: AuthConfig) -> Self {
        Self { http, config }
    }

    /// Exchange credentials for a token pair
    pub async fn login(&self, credentials: &LoginRequest) -> AuthResult<TokenResponse> {
        debug!(email = %credentials.email, "logging in");
        let body = serde_json::to_string(credentials)
            .map_err(|e| network_error(format!("failed to encode login request: {}", e), None))?;
        self.token_request(&self.config.login_url(), body).await
    }

    /// Exchange a refresh token for a new token pair
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenResponse> {
        debug!("refreshing access token");
        let body = serde_json::to_string(&RefreshRequest { refresh_token })
            .map_err(|e| network_error(format!("failed to encode refresh request: {}", e), None))?;
        self.token_request(&self.config.refresh_url(), body).await
    }

    async fn token_request(&self, url: &str, body: String) -> AuthResult<TokenResponse> {
        let headers = HashMap::from([(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )]);
        let response = self
            .http
            .post(url, Some(headers), Some(body))
            .await
            .map_err(|e| network_error(e.to_string(), None))?;

        if response.is_success() {
            return response
                .json::<TokenResponse>()
                .map_err(|e| network_error(format!("invalid token response: {}", e), None));
        }

        let status = response.status.as_u16();
        let message = server_message(&response);
        if response.is_client_error() {
            warn!(status, "identity provider rejected the request");
            Err(auth_rejected(message))
        } else {
            warn!(status, "identity provider returned a server error");
            Err(network_error(message, Some(status)))
        }
    }
}

/// Extract the server's human-readable message, falling back to a generic one
fn server_message(response: &SimpleHttpResponse) -> String {
    response
        .json::<ErrorBody>()
        .ok()
        .and_then(|body| body.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
}
