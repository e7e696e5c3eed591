//! services/portal/src/session.rs
//!
//! The session manager: the only owner of the signed-in user. Enforces the
//! `Anonymous → Authenticating → Authenticated → Expiring → Anonymous` lifecycle,
//! persists the session for restarts and refreshes it before it runs out.

use crate::error::{ApiError, AuthError};
use crate::notify::NotificationBus;
use crate::store::LocalStore;
use crate::validation::validate_email;
use clinic_portal_core::domain::{Credentials, Role, Session};
use clinic_portal_core::ports::{AuthProvider, Clock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const SESSION_KEY: &str = "current";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Authenticating,
    Authenticated,
    Expiring,
}

struct SessionState {
    status: SessionStatus,
    session: Option<Session>,
}

/// Clears the in-progress flag however the refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SessionManager {
    state: Mutex<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
    refreshing: AtomicBool,
    /// Serializes writes to the store so the last one reflects the latest state.
    persisting: tokio::sync::Mutex<()>,
    provider: Arc<dyn AuthProvider>,
    store: LocalStore,
    bus: NotificationBus,
    clock: Arc<dyn Clock>,
    refresh_low_water: Duration,
}

impl SessionManager {
    /// `store` should be dedicated to session keys; it is cleared whenever no
    /// session is held.
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        store: LocalStore,
        bus: NotificationBus,
        clock: Arc<dyn Clock>,
        refresh_low_water: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Anonymous);
        Self {
            state: Mutex::new(SessionState {
                status: SessionStatus::Anonymous,
                session: None,
            }),
            status_tx,
            refreshing: AtomicBool::new(false),
            persisting: tokio::sync::Mutex::new(()),
            provider,
            store,
            bus,
            clock,
            refresh_low_water,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the in-memory session to the store, or clears the namespace when
    /// there is none. Every state change is followed by one of these.
    async fn persist(&self) -> bool {
        let _writing = self.persisting.lock().await;
        let session = self.lock().session.clone();
        match session {
            Some(session) => self.store.set(SESSION_KEY, &session).await,
            None => self.store.clear().await,
        }
    }

    fn transition(&self, state: &mut SessionState, to: SessionStatus) {
        if state.status != to {
            debug!(from = ?state.status, to = ?to, "Session transition");
            state.status = to;
            self.status_tx.send_replace(to);
        }
    }

    //=====================================================================================
    // Queries
    //=====================================================================================

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn current(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    /// Lets the UI layer react to transitions, e.g. redirect to the login page
    /// when the status drops to `Anonymous`.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// True when a session exists and its role is one of `required`. An empty
    /// requirement only asks for a session.
    pub fn authorize(&self, required: &[Role]) -> bool {
        match &self.lock().session {
            Some(session) => required.is_empty() || required.contains(&session.role),
            None => false,
        }
    }

    pub fn landing_path(&self) -> Option<&'static str> {
        self.lock().session.as_ref().map(|s| s.role.landing_path())
    }

    //=====================================================================================
    // Lifecycle
    //=====================================================================================

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if let Err(e) = validate_email(&credentials.email) {
            return self.fail_sign_in(e.into());
        }

        {
            let mut state = self.lock();
            state.session = None;
            self.transition(&mut state, SessionStatus::Authenticating);
        }
        info!(email = %credentials.email, "Signing in");

        let session = match self.provider.sign_in(credentials).await {
            Ok(session) if session.is_well_formed() => session,
            Ok(_) => return self.fail_sign_in(AuthError::Provider("unusable session issued".to_string())),
            Err(e) => return self.fail_sign_in(e.into()),
        };

        {
            let mut state = self.lock();
            // A sign-out while the provider was answering wins.
            if state.status != SessionStatus::Authenticating {
                warn!("Sign-in superseded while in flight; discarding session");
                return Err(AuthError::Provider("sign-in was cancelled".to_string()));
            }
            state.session = Some(session.clone());
            self.transition(&mut state, SessionStatus::Authenticated);
        }

        if !self.persist().await {
            warn!("Session could not be persisted; it will not survive a restart");
        }
        info!(user_id = %session.user_id, role = %session.role, "Signed in");
        self.bus.success("Login realizado com sucesso!");
        Ok(session)
    }

    fn fail_sign_in(&self, err: AuthError) -> Result<Session, AuthError> {
        {
            let mut state = self.lock();
            state.session = None;
            self.transition(&mut state, SessionStatus::Anonymous);
        }
        warn!(error = %err, "Sign-in failed");
        self.bus.error(err.user_message());
        Err(err)
    }

    /// Always ends Anonymous. Safe to call without a session.
    pub async fn sign_out(&self) {
        let previous = {
            let mut state = self.lock();
            let previous = state.session.take();
            self.transition(&mut state, SessionStatus::Anonymous);
            previous
        };

        self.persist().await;
        if let Some(session) = &previous {
            if let Err(e) = self.provider.sign_out(&session.access_token).await {
                warn!(error = %e, "Remote sign-out failed; local session cleared anyway");
            }
            info!(user_id = %session.user_id, "Signed out");
        }
    }

    /// Drops the session after the server rejected its token. The caller is
    /// responsible for telling the user.
    pub async fn invalidate(&self) {
        let dropped = {
            let mut state = self.lock();
            let dropped = state.session.take();
            self.transition(&mut state, SessionStatus::Anonymous);
            dropped
        };
        if let Some(session) = dropped {
            info!(user_id = %session.user_id, "Session invalidated by server");
        }
        self.persist().await;
    }

    /// Brings back a session persisted by an earlier run, unless it has expired.
    pub async fn restore(&self) -> Option<Session> {
        let session = self.store.get_opt::<Session>(SESSION_KEY).await?;
        if !session.is_well_formed() || session.is_expired_at(self.clock.now()) {
            info!("Discarding expired persisted session");
            self.persist().await;
            return None;
        }

        let mut state = self.lock();
        if state.session.is_some() {
            return state.session.clone();
        }
        state.session = Some(session.clone());
        self.transition(&mut state, SessionStatus::Authenticated);
        info!(user_id = %session.user_id, "Session restored");
        Some(session)
    }

    /// Runs before every remote call. Returns the bearer token to use, `None`
    /// when anonymous, or `Unauthorized` when the session just expired.
    pub async fn check_expiry(&self) -> Result<Option<String>, ApiError> {
        let now = self.clock.now();
        let checked = {
            let mut state = self.lock();
            let Some(session) = state.session.clone() else {
                return Ok(None);
            };
            if session.is_expired_at(now) {
                self.transition(&mut state, SessionStatus::Expiring);
                state.session = None;
                self.transition(&mut state, SessionStatus::Anonymous);
                Err(session)
            } else {
                Ok(session)
            }
        };

        let current = match checked {
            Ok(session) => session,
            Err(expired) => {
                info!(user_id = %expired.user_id, "Session expired");
                self.bus.warning("Sessão expirada. Faça login novamente.");
                self.persist().await;
                return Err(ApiError::Unauthorized);
            }
        };

        if current.refresh_token.is_some() && current.remaining_at(now) < self.refresh_low_water {
            return Ok(Some(self.refresh(current).await));
        }
        Ok(Some(current.access_token))
    }

    /// Swaps in a fresh session; on any failure the still-valid one is kept.
    async fn refresh(&self, current: Session) -> String {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return current.access_token;
        }
        let _guard = RefreshGuard(&self.refreshing);

        let renewed = match self.provider.refresh(&current).await {
            Ok(renewed) if renewed.is_well_formed() => renewed,
            Ok(_) => {
                warn!("Refresh returned an unusable session");
                return current.access_token;
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                return current.access_token;
            }
        };

        {
            let mut state = self.lock();
            let still_current = state
                .session
                .as_ref()
                .is_some_and(|s| s.access_token == current.access_token);
            if !still_current {
                return current.access_token;
            }
            state.session = Some(renewed.clone());
        }

        if !self.persist().await {
            warn!("Refreshed session could not be persisted");
        }
        debug!(expires_at = %renewed.expires_at, "Session refreshed");
        renewed.access_token
    }
}
