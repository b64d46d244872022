use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::projection::{resolve_user, Role, UserProjection};
use super::state::{PersistedFragment, SessionSnapshot, SessionState};
use crate::cache::PersistedCache;
use crate::error::{SessionError, SessionResult};
use crate::providers::{AccountMetadata, IdentityProvider, ProfileStore, ProviderSession};

/// Single well-known key under which the session fragment is persisted.
pub const SESSION_CACHE_KEY: &str = "auth-session";

/// What to do with the persisted fragment after a successful
/// `refresh_user_data`. Invalidation trades the instant-rehydration of the
/// next start for a guaranteed network-fresh projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshPolicy {
    #[default]
    InvalidateCache,
    KeepCache,
}

/// Single authority for "who is the current user, and is a session-affecting
/// operation in progress". Readers subscribe; only the operations below write.
pub struct SessionStore {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    cache: Arc<dyn PersistedCache>,
    refresh_policy: RefreshPolicy,
    tx: watch::Sender<SessionSnapshot>,
    op_gate: Mutex<()>,
}

impl SessionStore {
    /// Build a store and hydrate it synchronously from the persisted cache,
    /// so the first render does not flash logged-out before `check_session`
    /// resolves.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        cache: Arc<dyn PersistedCache>,
        refresh_policy: RefreshPolicy,
    ) -> Self {
        let state = Self::hydrate(cache.as_ref());
        let (tx, _rx) = watch::channel(SessionSnapshot { state, is_loading: false, last_error: None });
        Self { identity, profiles, cache, refresh_policy, tx, op_gate: Mutex::new(()) }
    }

    fn hydrate(cache: &dyn PersistedCache) -> SessionState {
        let Some(raw) = cache.get(SESSION_CACHE_KEY) else {
            return SessionState::LoggedOut;
        };
        match serde_json::from_str::<PersistedFragment>(&raw) {
            Ok(frag) => frag.into_state(),
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted session fragment");
                SessionState::LoggedOut
            }
        }
    }

    /// Update-notification contract for reactive readers.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn current_user(&self) -> Option<UserProjection> {
        self.tx.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.tx.borrow().is_loading
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.tx.borrow().last_error.clone()
    }

    /// Create an account, attaching name/role as provider-side metadata.
    /// Providers that defer activation (email confirmation) leave the store
    /// logged out and the confirmation instruction in `last_error`.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: Role,
    ) -> SessionResult<()> {
        let _gate = self.begin(true)?;
        if email.is_empty() {
            return self.fail(SessionError::validation("missing_email", "email is required"));
        }
        if password.is_empty() {
            return self.fail(SessionError::validation("missing_password", "password is required"));
        }
        let metadata = AccountMetadata { name: Some(name.to_string()), role: Some(role) };
        match self.identity.sign_up(email, password, metadata).await {
            Ok(outcome) => match outcome.session {
                Some(sess) => {
                    let user = resolve_user(&sess.account, None);
                    debug!(user_id = %user.id, "registration returned an immediate session");
                    self.apply(|s| {
                        s.state = SessionState::LoggedIn(user);
                        s.is_loading = false;
                    });
                    Ok(())
                }
                None => self.fail(SessionError::informational(
                    "confirm_email",
                    "Please check your email to confirm your registration",
                )),
            },
            Err(e) => self.fail(e.into()),
        }
    }

    /// Verify credentials and enter the logged-in state. On failure the prior
    /// state is left untouched; only `last_error` records the outcome.
    pub async fn login(&self, email: &str, password: &str) -> SessionResult<()> {
        let _gate = self.begin(true)?;
        if email.is_empty() || password.is_empty() {
            return self.fail(SessionError::validation(
                "missing_credentials",
                "email and password are required",
            ));
        }
        match self.identity.sign_in_with_password(email, password).await {
            Ok(sess) => {
                let user = resolve_user(&sess.account, None);
                debug!(user_id = %user.id, "login succeeded");
                self.apply(|s| {
                    s.state = SessionState::LoggedIn(user);
                    s.is_loading = false;
                });
                Ok(())
            }
            Err(e) => self.fail(e.into()),
        }
    }

    /// Sign out. Fails closed: local state is cleared whatever the remote
    /// outcome; the remote sign-out is best-effort token cleanup.
    pub async fn logout(&self) -> SessionResult<()> {
        let _gate = self.begin(false)?;
        match self.identity.sign_out().await {
            Ok(()) => {
                self.apply(|s| {
                    s.state = SessionState::LoggedOut;
                    s.is_loading = false;
                    s.last_error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "remote sign-out failed; clearing local session anyway");
                let err: SessionError = e.into();
                let recorded = err.clone();
                self.apply(move |s| {
                    s.state = SessionState::LoggedOut;
                    s.is_loading = false;
                    s.last_error = Some(recorded);
                });
                Err(err)
            }
        }
    }

    /// Probe for an existing remote session; intended once at startup.
    /// When one exists, reconcile the profile row against account metadata.
    pub async fn check_session(&self) -> SessionResult<()> {
        let _gate = self.begin(false)?;
        match self.identity.get_session().await {
            Ok(Some(sess)) => {
                let user = self.reconcile(&sess).await;
                debug!(user_id = %user.id, "session check found an active session");
                self.apply(|s| {
                    s.state = SessionState::LoggedIn(user);
                    s.is_loading = false;
                });
                Ok(())
            }
            Ok(None) => {
                self.apply(|s| {
                    s.state = SessionState::LoggedOut;
                    s.is_loading = false;
                });
                Ok(())
            }
            Err(e) => {
                let err: SessionError = e.into();
                let recorded = err.clone();
                self.apply(move |s| {
                    s.state = SessionState::LoggedOut;
                    s.is_loading = false;
                    s.last_error = Some(recorded);
                });
                Err(err)
            }
        }
    }

    /// Force a token refresh so updated provider-side metadata becomes
    /// visible, then reconcile as in `check_session`. Under
    /// `RefreshPolicy::InvalidateCache` the persisted fragment is removed
    /// afterwards so the next start re-derives state from the network.
    pub async fn refresh_user_data(&self) -> SessionResult<()> {
        let _gate = self.begin(true)?;
        match self.identity.get_session().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return self.fail(SessionError::no_session(
                    "no_active_session",
                    "no active session to refresh",
                ))
            }
            Err(e) => return self.fail(e.into()),
        }
        match self.identity.refresh_session().await {
            Ok(Some(sess)) => {
                let user = self.reconcile(&sess).await;
                debug!(user_id = %user.id, "user data refreshed");
                self.apply(|s| {
                    s.state = SessionState::LoggedIn(user);
                    s.is_loading = false;
                });
                if self.refresh_policy == RefreshPolicy::InvalidateCache {
                    if let Err(e) = self.cache.remove(SESSION_CACHE_KEY) {
                        warn!(error = %e, "failed to invalidate persisted session fragment");
                    }
                }
                Ok(())
            }
            Ok(None) => {
                self.apply(|s| {
                    s.state = SessionState::LoggedOut;
                    s.is_loading = false;
                });
                Ok(())
            }
            Err(e) => self.fail(e.into()),
        }
    }

    /// Two-source reconciliation. A profile read failure degrades to a
    /// metadata-only projection rather than blocking login.
    async fn reconcile(&self, sess: &ProviderSession) -> UserProjection {
        let profile = match self.profiles.fetch(&sess.account.id).await {
            Ok(row) => row,
            Err(e) => {
                warn!(account_id = %sess.account.id, error = %e, "profile fetch failed during reconciliation");
                None
            }
        };
        resolve_user(&sess.account, profile.as_ref())
    }

    /// Acquire the single-flight gate and mark the operation in progress.
    /// An overlapping call is rejected with `Busy` without touching state.
    fn begin(&self, clear_error: bool) -> SessionResult<MutexGuard<'_, ()>> {
        let gate = self.op_gate.try_lock().map_err(|_| {
            SessionError::busy(
                "operation_in_flight",
                "another session operation is already in progress",
            )
        })?;
        self.apply(|s| {
            s.is_loading = true;
            if clear_error {
                s.last_error = None;
            }
        });
        Ok(gate)
    }

    fn fail(&self, err: SessionError) -> SessionResult<()> {
        let recorded = err.clone();
        self.apply(move |s| {
            s.is_loading = false;
            s.last_error = Some(recorded);
        });
        Err(err)
    }

    /// Every mutation goes through here: notify subscribers, then write the
    /// persisted fragment. The cache write is fire-and-forget.
    fn apply<F: FnOnce(&mut SessionSnapshot)>(&self, f: F) {
        self.tx.send_modify(f);
        self.persist();
    }

    fn persist(&self) {
        let frag = PersistedFragment::from_snapshot(&self.tx.borrow());
        match serde_json::to_string(&frag) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(SESSION_CACHE_KEY, &raw) {
                    warn!(error = %e, "failed to persist session fragment");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode session fragment"),
        }
    }
}
