//! Refresh coordination.
//!
//! The central state machine of the crate: decides when the access token is
//! due, collapses any number of concurrent refresh callers into a single
//! network call whose result fans out to all of them, and keeps at most one
//! proactive background refresh timer armed.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{AuthClient, TokenResponse};
use crate::claims::decode_token;
use crate::error::{network_error, AuthError, AuthResult};
use crate::permissions::PermissionCache;
use crate::session::{AuthState, SessionState};
use crate::store::{StoredTokens, TokenStore};

/// The token pair produced by a successful refresh or login
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

type RefreshOutcome = AuthResult<TokenPair>;

/// Coordinates token renewal for one session.
///
/// Owned by the composition root; all shared state lives inside, so clones of
/// the surrounding `Arc` observe one in-flight flag, one timer, and one
/// logout epoch.
pub struct RefreshCoordinator {
    client: Arc<AuthClient>,
    session: Arc<SessionState>,
    tokens: TokenStore,
    buffer: Duration,
    /// Set while a refresh is outstanding; joiners subscribe and receive the
    /// same outcome as the caller that issued the network call.
    in_flight: Mutex<Option<broadcast::Sender<RefreshOutcome>>>,
    /// At most one pending proactive-refresh timer
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on logout; a refresh completing against a stale epoch discards
    /// its result instead of resurrecting the cleared session.
    epoch: AtomicU64,
    /// Permission cache to wipe together with the session
    permissions: Mutex<Option<Weak<PermissionCache>>>,
    /// Self-handle for the background tasks the coordinator spawns
    weak: Weak<Self>,
}

impl RefreshCoordinator {
    pub fn new(
        client: Arc<AuthClient>,
        session: Arc<SessionState>,
        tokens: TokenStore,
        buffer: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            client,
            session,
            tokens,
            buffer,
            in_flight: Mutex::new(None),
            timer: Mutex::new(None),
            epoch: AtomicU64::new(0),
            permissions: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    /// Register the permission cache to be wiped alongside the session on
    /// logout. Held weakly; an embedding without a cache never registers one.
    pub async fn clear_on_logout(&self, permissions: &Arc<PermissionCache>) {
        *self.permissions.lock().await = Some(Arc::downgrade(permissions));
    }

    /// Epoch marker captured before a token-issuing call; [`install_tokens`]
    /// refuses to write state when the marker has gone stale.
    ///
    /// [`install_tokens`]: Self::install_tokens
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// True iff an expiry is known and it falls within the refresh buffer,
    /// independent of whether a refresh is already running.
    pub async fn should_refresh(&self) -> bool {
        match self.session.token_expires_at().await {
            Some(expires_at) => expires_at - Utc::now() <= self.buffer,
            None => false,
        }
    }

    /// Renew the access token, serializing concurrent callers.
    ///
    /// If no refresh is in flight this issues exactly one network call and
    /// broadcasts its outcome; callers arriving while it runs wait on that
    /// outcome instead of issuing their own. A 401-class rejection of the
    /// refresh token forces a full logout; transient failures leave the
    /// session untouched for a natural retry on the next trigger.
    pub async fn refresh(&self) -> RefreshOutcome {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(tx) = in_flight.as_ref() {
            debug!("refresh already in flight, joining");
            let mut rx = tx.subscribe();
            drop(in_flight);
            return match rx.recv().await {
                Ok(result) => result,
                Err(_) => Err(network_error("in-flight refresh was abandoned", None)),
            };
        }

        let (tx, _) = broadcast::channel(1);
        *in_flight = Some(tx);
        drop(in_flight);

        let result = self.perform_refresh().await;
        if let Some(tx) = self.in_flight.lock().await.take() {
            let _ = tx.send(result.clone());
        }
        result
    }

    /// The single network call plus the state writes that follow it
    async fn perform_refresh(&self) -> RefreshOutcome {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let refresh_token = self
            .session
            .refresh_token()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        match self.client.refresh(&refresh_token).await {
            Ok(response) => {
                let pair = self.install_tokens(&response, epoch).await?;
                info!("access token refreshed");
                Ok(pair)
            }
            Err(e) if e.is_auth_rejection() => {
                warn!(error = %e, "refresh token rejected, forcing logout");
                self.force_logout().await;
                Err(e)
            }
            Err(e) => {
                // Transient; the next guarded navigation or failed request
                // retries naturally.
                warn!(error = %e, "token refresh failed");
                Err(e)
            }
        }
    }

    /// Install a freshly issued token pair: decode the identity, persist the
    /// triple, replace the session record wholesale, and re-arm the timer.
    ///
    /// `epoch` is the marker captured before the network call that produced
    /// the pair. It is re-checked before the persist and again before the
    /// state write; a logout landing anywhere in between discards the pair
    /// instead of resurrecting the cleared session.
    pub(crate) async fn install_tokens(
        &self,
        response: &TokenResponse,
        epoch: u64,
    ) -> AuthResult<TokenPair> {
        let user = decode_token(&response.access_token)?;
        let expires_at = Utc::now() + Duration::seconds(response.expires_in);

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("session was cleared while tokens were being issued, discarding them");
            return Err(AuthError::NotAuthenticated);
        }

        let stored = StoredTokens {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at,
        };
        if let Err(e) = self.tokens.save(&stored).await {
            // Session continues in memory; persistence catches up on the
            // next successful auth event.
            warn!(error = %e, "failed to persist tokens");
        }

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("session was cleared while tokens were being persisted, discarding them");
            if let Err(e) = self.tokens.clear().await {
                warn!(error = %e, "failed to clear stored tokens");
            }
            return Err(AuthError::NotAuthenticated);
        }

        self.session
            .replace(AuthState::authenticated(
                user,
                response.access_token.clone(),
                response.refresh_token.clone(),
                expires_at,
            ))
            .await;

        self.arm_timer().await;

        Ok(TokenPair {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at,
        })
    }

    /// [`refresh`](Self::refresh) behind a boxed future, so the timer tasks
    /// that spawn it do not tie their own `Send` proof to the body they are
    /// spawned from.
    fn refresh_boxed(self: Arc<Self>) -> Pin<Box<dyn Future<Output = RefreshOutcome> + Send>> {
        Box::pin(async move { self.refresh().await })
    }

    /// Arm the proactive-refresh timer for `expiry - now - buffer`, replacing
    /// any previously armed timer. If the token is already due the refresh
    /// starts immediately instead of being scheduled.
    pub(crate) async fn arm_timer(&self) {
        let mut timer = self.timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let Some(expires_at) = self.session.token_expires_at().await else {
            return;
        };
        let Some(this) = self.weak.upgrade() else {
            return;
        };

        let delay = expires_at - Utc::now() - self.buffer;
        if delay <= Duration::zero() {
            debug!("token already due, refreshing now");
            tokio::spawn(async move {
                if let Err(e) = this.refresh_boxed().await {
                    warn!(error = %e, "immediate token refresh failed");
                }
            });
            return;
        }

        debug!(in_secs = delay.num_seconds(), "proactive refresh scheduled");
        let sleep_for = delay.to_std().unwrap_or_default();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(sleep_for).await;
            if this.session.is_authenticated().await {
                // Detach so install_tokens can replace the timer slot without
                // aborting the task it runs in
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    if let Err(e) = this.refresh_boxed().await {
                        warn!(error = %e, "scheduled token refresh failed");
                    }
                });
            }
        }));
    }

    /// Whether a proactive refresh timer is currently armed
    pub async fn has_scheduled_refresh(&self) -> bool {
        self.timer.lock().await.is_some()
    }

    /// Wipe the session: cancel the pending timer, advance the logout epoch,
    /// remove the stored triple, drop the permission set, and reset the state
    /// record. An in-flight refresh is allowed to complete; its result is
    /// discarded.
    pub async fn force_logout(&self) {
        if let Some(timer) = self.timer.lock().await.take() {
            timer.abort();
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.tokens.clear().await {
            warn!(error = %e, "failed to clear stored tokens");
        }
        let permissions = self.permissions.lock().await.as_ref().and_then(Weak::upgrade);
        if let Some(permissions) = permissions {
            permissions.clear().await;
        }
        self.session.replace(AuthState::signed_out()).await;
        info!("session cleared");
    }
}
