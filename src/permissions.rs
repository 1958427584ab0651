//! Permission/role cache.
//!
//! Holds the fine-grained authorization set for the current session, loaded
//! lazily from the authorization provider through the request authorizer so
//! the fetch carries the bearer credential. One cache serves both the
//! role and permission projections; callers never see which deployment
//! variant is active.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::authorizer::RequestAuthorizer;
use crate::error::{permission_load_failed, AuthResult};

/// Response envelope of the permissions endpoint
#[derive(Debug, Deserialize)]
struct PermissionEnvelope {
    status: String,
    message: String,
    data: Vec<String>,
}

/// Session-scoped set of permission identifiers
pub struct PermissionCache {
    authorizer: Arc<RequestAuthorizer>,
    url: String,
    permissions: tokio::sync::RwLock<HashSet<String>>,
    loaded: AtomicBool,
}

impl PermissionCache {
    pub fn new(authorizer: Arc<RequestAuthorizer>, url: String) -> Self {
        Self {
            authorizer,
            url,
            permissions: tokio::sync::RwLock::new(HashSet::new()),
            loaded: AtomicBool::new(false),
        }
    }

    /// Whether the set has been fetched for this session
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Fetch the permission set, replacing the cached one.
    ///
    /// A failed load clears the cache and surfaces
    /// [`AuthError::PermissionLoad`](crate::AuthError::PermissionLoad);
    /// the caller decides whether to block or proceed with an empty set.
    pub async fn load(&self) -> AuthResult<HashSet<String>> {
        let response = match self.authorizer.get(&self.url).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "permission fetch failed");
                self.clear().await;
                return Err(permission_load_failed(e.to_string()));
            }
        };

        if !response.is_success() {
            warn!(status = response.status.as_u16(), "permission fetch rejected");
            self.clear().await;
            return Err(permission_load_failed(format!(
                "permissions endpoint answered {}",
                response.status
            )));
        }

        let envelope: PermissionEnvelope = match response.json() {
            Ok(envelope) => envelope,
            Err(e) => {
                self.clear().await;
                return Err(permission_load_failed(format!(
                    "invalid permissions payload: {}",
                    e
                )));
            }
        };

        if envelope.status != "success" {
            self.clear().await;
            return Err(permission_load_failed(envelope.message));
        }

        let set: HashSet<String> = envelope.data.into_iter().collect();
        {
            let mut permissions = self.permissions.write().await;
            *permissions = set.clone();
        }
        self.loaded.store(true, Ordering::SeqCst);
        info!(count = set.len(), "permissions loaded");
        Ok(set)
    }

    /// Fetch only if the set has not been loaded this session
    pub async fn load_if_needed(&self) -> AuthResult<HashSet<String>> {
        if self.is_loaded() {
            return Ok(self.permissions.read().await.clone());
        }
        self.load().await
    }

    /// Whether the session holds the given permission
    pub async fn has(&self, permission: &str) -> bool {
        self.permissions.read().await.contains(permission)
    }

    /// Whether the session holds at least one of the given permissions
    pub async fn has_any(&self, permissions: &[&str]) -> bool {
        let held = self.permissions.read().await;
        permissions.iter().any(|p| held.contains(*p))
    }

    /// Whether the session holds all of the given permissions
    pub async fn has_all(&self, permissions: &[&str]) -> bool {
        let held = self.permissions.read().await;
        permissions.iter().all(|p| held.contains(*p))
    }

    /// All currently held permissions
    pub async fn all(&self) -> HashSet<String> {
        self.permissions.read().await.clone()
    }

    /// Drop the cached set, e.g. on logout
    pub async fn clear(&self) {
        self.permissions.write().await.clear();
        self.loaded.store(false, Ordering::SeqCst);
        debug!("permission cache cleared");
    }
}
