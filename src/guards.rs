//! Access guards.
//!
//! Predicates evaluated before entering a protected view. Guards never
//! navigate themselves; they return a [`GuardDecision`] and the embedding
//! application performs the redirect, which keeps them pure and composable.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::permissions::PermissionCache;
use crate::refresh::RefreshCoordinator;
use crate::session::SessionState;

/// Path of the login view
pub const LOGIN_PATH: &str = "/auth/login";
/// Path of the authenticated landing page
pub const HOME_PATH: &str = "/";

/// A redirect instruction for the navigation collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Redirect {
    pub fn to(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Outcome of a guard evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(Redirect),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }

    /// Denial for an unauthenticated visitor, preserving the destination
    fn to_login(attempted: &str) -> Self {
        GuardDecision::Redirect(Redirect::to(LOGIN_PATH).with_query("returnUrl", attempted))
    }

    /// Denial for an authenticated but unauthorized visitor
    fn access_denied() -> Self {
        GuardDecision::Redirect(Redirect::to(HOME_PATH).with_query("error", "access-denied"))
    }

    /// Denial for a guest-only view visited while authenticated
    fn to_home() -> Self {
        GuardDecision::Redirect(Redirect::to(HOME_PATH))
    }
}

/// Guard factory composing session state, the refresh coordinator, and the
/// permission cache
pub struct Guards {
    session: Arc<SessionState>,
    coordinator: Arc<RefreshCoordinator>,
    permissions: Arc<PermissionCache>,
}

impl Guards {
    pub fn new(
        session: Arc<SessionState>,
        coordinator: Arc<RefreshCoordinator>,
        permissions: Arc<PermissionCache>,
    ) -> Self {
        Self {
            session,
            coordinator,
            permissions,
        }
    }

    /// Allow only authenticated sessions; a token inside the refresh buffer
    /// is renewed first and entry is denied if that renewal fails.
    pub async fn require_authenticated(&self, attempted: &str) -> GuardDecision {
        if !self.session.is_authenticated().await {
            debug!(attempted, "guard denied: not authenticated");
            return GuardDecision::to_login(attempted);
        }

        if self.coordinator.should_refresh().await {
            if let Err(e) = self.coordinator.refresh().await {
                warn!(attempted, error = %e, "guard denied: refresh failed");
                return GuardDecision::to_login(attempted);
            }
        }

        GuardDecision::Allow
    }

    /// As [`require_authenticated`](Self::require_authenticated), then deny
    /// unless the identity holds at least one of the given roles
    pub async fn require_any_role(&self, roles: &[&str], attempted: &str) -> GuardDecision {
        match self.require_authenticated(attempted).await {
            GuardDecision::Allow => {}
            denied => return denied,
        }

        let holds_role = self
            .session
            .current_user()
            .await
            .map(|user| user.has_any_role(roles))
            .unwrap_or(false);
        if holds_role {
            GuardDecision::Allow
        } else {
            debug!(attempted, ?roles, "guard denied: role missing");
            GuardDecision::access_denied()
        }
    }

    /// As [`require_authenticated`](Self::require_authenticated), then load
    /// the permission cache on demand and deny unless at least one of the
    /// given permissions is held. A failed load denies entry instead of
    /// erroring out of the guard.
    pub async fn require_any_permission(
        &self,
        permissions: &[&str],
        attempted: &str,
    ) -> GuardDecision {
        match self.require_authenticated(attempted).await {
            GuardDecision::Allow => {}
            denied => return denied,
        }

        if let Err(e) = self.permissions.load_if_needed().await {
            warn!(attempted, error = %e, "guard denied: permissions unavailable");
            return GuardDecision::access_denied();
        }

        if self.permissions.has_any(permissions).await {
            GuardDecision::Allow
        } else {
            debug!(attempted, ?permissions, "guard denied: permission missing");
            GuardDecision::access_denied()
        }
    }

    /// Allow only unauthenticated visitors; authenticated ones are sent to
    /// the landing page
    pub async fn guest_only(&self) -> GuardDecision {
        if self.session.is_authenticated().await {
            GuardDecision::to_home()
        } else {
            GuardDecision::Allow
        }
    }
}
