//! Observable session state.
//!
//! Single source of truth for the rest of the application. The record is
//! only ever replaced wholesale, so no observer can see a half-updated
//! state, and every transition is broadcast to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

use crate::claims::Identity;

/// Capacity of the state-transition broadcast channel
const STATE_CHANNEL_CAPACITY: usize = 32;

/// The full authentication state record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub user: Option<Identity>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl AuthState {
    /// The initial, unauthenticated shape
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// State after a successful authentication event.
    ///
    /// `is_authenticated` is derived at construction: true only while the
    /// expiry lies in the future, which keeps the record's invariant intact
    /// even when restoring an already-expired triple from storage.
    pub fn authenticated(
        user: Identity,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            is_authenticated: expires_at > Utc::now(),
            user: Some(user),
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            is_loading: false,
            error: None,
            token_expires_at: Some(expires_at),
        }
    }
}

/// Holder of the mutable [`AuthState`] plus a broadcast stream of its
/// transitions. Mutated only by the refresh coordinator and by explicit
/// login/logout operations.
pub struct SessionState {
    state: RwLock<AuthState>,
    events: broadcast::Sender<AuthState>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(AuthState::signed_out()),
            events,
        }
    }

    /// Atomically replace the whole record and publish the transition.
    /// Absent or lagging subscribers never block or fail the replacement.
    pub async fn replace(&self, next: AuthState) {
        {
            let mut state = self.state.write().await;
            *state = next.clone();
        }
        trace!(
            authenticated = next.is_authenticated,
            loading = next.is_loading,
            "session state replaced"
        );
        let _ = self.events.send(next);
    }

    /// Current snapshot of the record
    pub async fn snapshot(&self) -> AuthState {
        self.state.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_authenticated
    }

    pub async fn current_user(&self) -> Option<Identity> {
        self.state.read().await.user.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state.read().await.refresh_token.clone()
    }

    pub async fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.token_expires_at
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<AuthState> {
        self.events.subscribe()
    }
}
