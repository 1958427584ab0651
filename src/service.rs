//! Composition root of the authentication core.
//!
//! `AuthService` owns the session state, the token store, and the refresh
//! coordinator, and exposes the surface the rest of the application calls:
//! login, logout, startup restoration, and the read-only session accessors.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{AuthClient, LoginRequest};
use crate::claims::{decode_token, Identity};
use crate::config::AuthConfig;
use crate::error::AuthResult;
use crate::http::HttpClient;
use crate::refresh::RefreshCoordinator;
use crate::session::{AuthState, SessionState};
use crate::store::{BlobStore, TokenStore};

/// Unified authentication service for one session
pub struct AuthService {
    session: Arc<SessionState>,
    tokens: TokenStore,
    client: Arc<AuthClient>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthService {
    /// Assemble the core from an HTTP client, a blob store, and configuration
    pub fn new(http: Arc<dyn HttpClient>, store: Arc<dyn BlobStore>, config: AuthConfig) -> Self {
        let session = Arc::new(SessionState::new());
        let tokens = TokenStore::new(store);
        let client = Arc::new(AuthClient::new(http, config.clone()));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&client),
            Arc::clone(&session),
            tokens.clone(),
            config.refresh_buffer(),
        );
        Self {
            session,
            tokens,
            client,
            coordinator,
        }
    }

    /// Restore the session from the stored token triple, if any.
    ///
    /// A restored triple re-arms the proactive refresh timer; one that is
    /// already due triggers an immediate refresh. An undecodable stored
    /// token is discarded rather than restored.
    pub async fn initialize(&self) -> AuthResult<()> {
        info!("initializing session from storage");
        let Some(stored) = self.tokens.load().await? else {
            debug!("no stored session");
            return Ok(());
        };

        match decode_token(&stored.access_token) {
            Ok(user) => {
                self.session
                    .replace(AuthState::authenticated(
                        user,
                        stored.access_token,
                        stored.refresh_token,
                        stored.expires_at,
                    ))
                    .await;
                self.coordinator.arm_timer().await;
                info!("session restored from storage");
            }
            Err(e) => {
                warn!(error = %e, "stored access token is undecodable, discarding");
                self.tokens.clear().await?;
            }
        }
        Ok(())
    }

    /// Authenticate with the identity provider.
    ///
    /// On success the whole session record is replaced, the triple is
    /// persisted, and the proactive refresh timer is armed. On failure the
    /// record keeps its previous tokens but carries a human-readable error.
    pub async fn login(&self, credentials: LoginRequest) -> AuthResult<Identity> {
        let loading = AuthState {
            is_loading: true,
            error: None,
            ..self.session.snapshot().await
        };
        self.session.replace(loading).await;

        let epoch = self.coordinator.epoch();
        let result = match self.client.login(&credentials).await {
            Ok(response) => self.coordinator.install_tokens(&response, epoch).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                info!("login succeeded");
                self.session
                    .current_user()
                    .await
                    .ok_or(crate::error::AuthError::NotAuthenticated)
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                let failed = AuthState {
                    is_loading: false,
                    error: Some(e.user_message()),
                    ..self.session.snapshot().await
                };
                self.session.replace(failed).await;
                Err(e)
            }
        }
    }

    /// Clear the session: cancel the pending refresh timer, remove the
    /// stored triple, drop any registered permission set, and reset the
    /// state record
    pub async fn logout(&self) {
        self.coordinator.force_logout().await;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.is_authenticated().await
    }

    pub async fn current_user(&self) -> Option<Identity> {
        self.session.current_user().await
    }

    pub async fn access_token(&self) -> Option<String> {
        self.session.access_token().await
    }

    /// Current snapshot of the full state record
    pub async fn auth_state(&self) -> AuthState {
        self.session.snapshot().await
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<AuthState> {
        self.session.subscribe()
    }

    /// Whether the current identity holds the given role
    pub async fn has_role(&self, role: &str) -> bool {
        self.session
            .current_user()
            .await
            .map(|user| user.has_role(role))
            .unwrap_or(false)
    }

    /// Whether the current identity holds at least one of the given roles
    pub async fn has_any_role(&self, roles: &[&str]) -> bool {
        self.session
            .current_user()
            .await
            .map(|user| user.has_any_role(roles))
            .unwrap_or(false)
    }

    /// Whether the access token is due for renewal
    pub async fn should_refresh(&self) -> bool {
        self.coordinator.should_refresh().await
    }

    /// The shared session state, for wiring collaborators
    pub fn session(&self) -> Arc<SessionState> {
        Arc::clone(&self.session)
    }

    /// The shared refresh coordinator, for wiring collaborators
    pub fn coordinator(&self) -> Arc<RefreshCoordinator> {
        Arc::clone(&self.coordinator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::test_support::make_token;
    use crate::error::AuthError;
    use crate::http::MockHttpClient;
    use crate::store::{MemoryBlobStore, StoredTokens};
    use chrono::{Duration, Utc};
    use reqwest::StatusCode;
    use serde_json::json;

    struct Harness {
        http: MockHttpClient,
        service: AuthService,
        config: AuthConfig,
        store: Arc<MemoryBlobStore>,
    }

    fn harness() -> Harness {
        harness_with_buffer(60)
    }

    fn harness_with_buffer(buffer_secs: i64) -> Harness {
        let config = AuthConfig {
            auth_api_url: "http://id.test/api".to_string(),
            api_url: "http://app.test/api".to_string(),
            refresh_buffer_secs: buffer_secs,
        };
        let http = MockHttpClient::new();
        let store = Arc::new(MemoryBlobStore::new());
        let service = AuthService::new(
            Arc::new(http.clone()),
            Arc::clone(&store) as Arc<dyn crate::store::BlobStore>,
            config.clone(),
        );
        Harness {
            http,
            service,
            config,
            store,
        }
    }

    fn token_response(access_token: &str, expires_in: i64) -> serde_json::Value {
        json!({
            "access_token": access_token,
            "refresh_token": "R1",
            "token_type": "Bearer",
            "expires_in": expires_in,
        })
    }

    #[tokio::test]
    async fn login_installs_the_session() {
        let h = harness();
        let t1 = make_token(7, json!("admin"));
        h.http
            .add_json_response(
                &h.config.login_url(),
                StatusCode::OK,
                &token_response(&t1, 3600),
            )
            .await
            .unwrap();

        let before = Utc::now();
        let user = h
            .service
            .login(LoginRequest {
                email: "u1@example.com".into(),
                password: "p1".into(),
            })
            .await
            .unwrap();
        let after = Utc::now();

        assert_eq!(user.id, 7);
        assert!(h.service.is_authenticated().await);
        assert_eq!(h.service.access_token().await, Some(t1));
        assert!(h.service.has_role("admin").await);

        // Expiry is the login time plus the server-reported lifetime
        let expires_at = h.service.auth_state().await.token_expires_at.unwrap();
        assert!(expires_at >= before + Duration::seconds(3600));
        assert!(expires_at <= after + Duration::seconds(3600));

        // The triple is persisted and the proactive timer armed
        assert!(h.service.coordinator().has_scheduled_refresh().await);
        let stored = TokenStore::new(h.store.clone() as Arc<dyn crate::store::BlobStore>)
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.refresh_token, "R1");
    }

    #[tokio::test]
    async fn failed_login_surfaces_the_server_message() {
        let h = harness();
        h.http
            .add_json_response(
                &h.config.login_url(),
                StatusCode::UNAUTHORIZED,
                &json!({"message": "Invalid credentials"}),
            )
            .await
            .unwrap();

        let err = h
            .service
            .login(LoginRequest {
                email: "u1@example.com".into(),
                password: "wrong".into(),
            })
            .await
            .unwrap_err();

        assert!(err.is_auth_rejection());
        let state = h.service.auth_state().await;
        assert!(!state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(state.error.as_deref(), Some("Invalid credentials"));
    }

    #[tokio::test]
    async fn login_with_undecodable_token_is_a_malformed_token_error() {
        let h = harness();
        h.http
            .add_json_response(
                &h.config.login_url(),
                StatusCode::OK,
                &token_response("garbage", 3600),
            )
            .await
            .unwrap();

        let err = h
            .service
            .login(LoginRequest {
                email: "u1@example.com".into(),
                password: "p1".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::MalformedToken { .. }));
        assert!(!h.service.is_authenticated().await);
    }

    #[tokio::test]
    async fn logout_resets_state_and_storage() {
        let h = harness();
        let t1 = make_token(1, json!("admin"));
        h.http
            .add_json_response(
                &h.config.login_url(),
                StatusCode::OK,
                &token_response(&t1, 3600),
            )
            .await
            .unwrap();
        h.service
            .login(LoginRequest {
                email: "u1@example.com".into(),
                password: "p1".into(),
            })
            .await
            .unwrap();

        h.service.logout().await;

        assert_eq!(h.service.auth_state().await, AuthState::signed_out());
        assert!(!h.service.coordinator().has_scheduled_refresh().await);
        for key in [
            crate::store::ACCESS_TOKEN_KEY,
            crate::store::REFRESH_TOKEN_KEY,
            crate::store::TOKEN_EXPIRES_KEY,
        ] {
            assert!(h.store.get(key).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn initialize_restores_a_stored_session() {
        let h = harness();
        let t1 = make_token(3, json!("editor"));
        TokenStore::new(h.store.clone() as Arc<dyn crate::store::BlobStore>)
            .save(&StoredTokens {
                access_token: t1.clone(),
                refresh_token: "R1".to_string(),
                expires_at: Utc::now() + Duration::seconds(3600),
            })
            .await
            .unwrap();

        h.service.initialize().await.unwrap();

        assert!(h.service.is_authenticated().await);
        assert_eq!(h.service.access_token().await, Some(t1));
        assert_eq!(h.service.current_user().await.unwrap().id, 3);
        assert!(h.service.coordinator().has_scheduled_refresh().await);
    }

    #[tokio::test]
    async fn initialize_discards_an_undecodable_stored_token() {
        let h = harness();
        TokenStore::new(h.store.clone() as Arc<dyn crate::store::BlobStore>)
            .save(&StoredTokens {
                access_token: "garbage".to_string(),
                refresh_token: "R1".to_string(),
                expires_at: Utc::now() + Duration::seconds(3600),
            })
            .await
            .unwrap();

        h.service.initialize().await.unwrap();

        assert!(!h.service.is_authenticated().await);
        assert!(h.store.get(crate::store::ACCESS_TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn initialize_with_empty_storage_is_a_no_op() {
        let h = harness();
        h.service.initialize().await.unwrap();
        assert_eq!(h.service.auth_state().await, AuthState::signed_out());
    }

    #[tokio::test]
    async fn has_any_role_against_an_empty_identity_is_false() {
        let h = harness();
        assert!(!h.service.has_any_role(&["A", "B"]).await);
    }

    // Scenario from the login lifecycle: a 60-second token with a 60-second
    // buffer is due for renewal from the moment it is issued.
    #[tokio::test]
    async fn short_lived_token_is_immediately_due() {
        let h = harness();
        let t1 = make_token(1, json!("admin"));
        h.http
            .add_json_response(
                &h.config.login_url(),
                StatusCode::OK,
                &token_response(&t1, 60),
            )
            .await
            .unwrap();

        h.service
            .login(LoginRequest {
                email: "u1".into(),
                password: "p1".into(),
            })
            .await
            .unwrap();

        assert!(h.service.is_authenticated().await);
        assert_eq!(h.service.access_token().await, Some(t1.clone()));
        assert!(h.service.should_refresh().await);

        // The immediate renewal attempt fails transiently (nothing queued on
        // the refresh endpoint), which must leave the session untouched.
        tokio::task::yield_now().await;
        assert!(h.service.is_authenticated().await);
        assert_eq!(h.service.access_token().await, Some(t1));
    }

    #[tokio::test]
    async fn state_transitions_reach_subscribers() {
        let h = harness();
        let mut rx = h.service.subscribe();
        let t1 = make_token(1, json!("admin"));
        h.http
            .add_json_response(
                &h.config.login_url(),
                StatusCode::OK,
                &token_response(&t1, 3600),
            )
            .await
            .unwrap();

        h.service
            .login(LoginRequest {
                email: "u1".into(),
                password: "p1".into(),
            })
            .await
            .unwrap();

        // Loading transition, then the authenticated one
        let loading = rx.recv().await.unwrap();
        assert!(loading.is_loading);
        let authenticated = rx.recv().await.unwrap();
        assert!(authenticated.is_authenticated);
    }
}
