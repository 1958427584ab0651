//! Request authorization.
//!
//! Wraps outbound API traffic: attaches the bearer credential, and reacts to
//! an authorization-rejected response by refreshing once and retrying the
//! original request exactly once. Requests to the identity provider's own
//! endpoints are never intercepted, so a failing refresh cannot recurse.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{network_error, AuthResult};
use crate::http::{HttpClient, SimpleHttpResponse};
use crate::refresh::RefreshCoordinator;
use crate::session::SessionState;

/// Paths that bypass interception
const AUTH_ROUTES: [&str; 3] = ["/auth/login", "/auth/register", "/auth/refresh"];

fn is_auth_route(url: &str) -> bool {
    AUTH_ROUTES.iter().any(|route| url.contains(route))
}

/// Authorizing wrapper over the [`HttpClient`] trait
pub struct RequestAuthorizer {
    http: Arc<dyn HttpClient>,
    session: Arc<SessionState>,
    coordinator: Arc<RefreshCoordinator>,
}

impl RequestAuthorizer {
    pub fn new(
        http: Arc<dyn HttpClient>,
        session: Arc<SessionState>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            session,
            coordinator,
        }
    }

    /// Send a request with the current access token attached.
    ///
    /// On a 401 while the session believes itself authenticated: one refresh
    /// (joining any refresh already in flight), one retry with the new token.
    /// If the refresh fails, the original rejection is returned. A 401 on an
    /// unauthenticated session passes through untouched.
    pub async fn send(
        &self,
        method: &str,
        url: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<String>,
    ) -> AuthResult<SimpleHttpResponse> {
        if is_auth_route(url) {
            return self
                .http
                .request(method, url, headers, body)
                .await
                .map_err(|e| network_error(e.to_string(), None));
        }

        let token = self.session.access_token().await;
        let response = self
            .dispatch(method, url, headers.clone(), body.clone(), token.as_deref())
            .await?;

        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if !self.session.is_authenticated().await {
            return Ok(response);
        }

        debug!(url, "request rejected, attempting token refresh");
        match self.coordinator.refresh().await {
            Ok(pair) => {
                self.dispatch(method, url, headers, body, Some(&pair.access_token))
                    .await
            }
            Err(e) => {
                warn!(url, error = %e, "refresh failed, propagating original rejection");
                Ok(response)
            }
        }
    }

    /// Convenience GET through the authorizer
    pub async fn get(&self, url: &str) -> AuthResult<SimpleHttpResponse> {
        self.send("GET", url, None, None).await
    }

    /// Convenience POST through the authorizer
    pub async fn post(&self, url: &str, body: Option<String>) -> AuthResult<SimpleHttpResponse> {
        self.send("POST", url, None, body).await
    }

    async fn dispatch(
        &self,
        method: &str,
        url: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<String>,
        token: Option<&str>,
    ) -> AuthResult<SimpleHttpResponse> {
        let mut headers = headers.unwrap_or_default();
        if let Some(token) = token {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        self.http
            .request(method, url, Some(headers), body)
            .await
            .map_err(|e| network_error(e.to_string(), None))
    }
}
