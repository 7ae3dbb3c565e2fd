pub mod http;

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{AuthState, LoginError, Result, token_store::TokenStore};

pub use http::HttpAuthBackend;

/// Body of `POST /auth/session`: either credentials or a login token, never both
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CreateSessionRequest {
    Password { username: String, password: String },
    LoginToken { login_token: String },
}

impl fmt::Debug for CreateSessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::LoginToken { .. } => f.debug_struct("LoginToken").finish_non_exhaustive(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct CreateSessionResponse {
    pub session_token: String,
    /// New rotating login token, when the backend issues one
    #[serde(default, alias = "refresh_token")]
    pub login_token: Option<String>,
}

impl fmt::Debug for CreateSessionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateSessionResponse")
            .field("has_login_token", &self.login_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Session endpoints of the backend
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange credentials or a login token for a session token
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> std::result::Result<CreateSessionResponse, LoginError>;

    /// Revoke a session token on the server
    async fn end_session(&self, session_token: &str) -> Result<()>;
}

/// Authentication state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    AnonymousNoCredential,
    Renewing,
    Authenticating,
    Authenticated,
    LoggedOut,
}

impl SessionPhase {
    pub const fn is_loading(self) -> bool {
        matches!(self, Self::Renewing | Self::Authenticating)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AnonymousNoCredential => "anonymous",
            Self::Renewing => "renewing",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::LoggedOut => "logged out",
        };
        f.write_str(name)
    }
}

type Outcome = Option<std::result::Result<(), LoginError>>;

struct PendingExchange {
    id: u64,
    request: CreateSessionRequest,
    outcome: watch::Receiver<Outcome>,
}

struct Inner {
    phase: SessionPhase,
    logged_out: bool,
    /// Bumped by every logout; results of older exchanges are discarded
    epoch: u64,
    next_exchange_id: u64,
    exchange: Option<PendingExchange>,
    startup_renewal_done: bool,
}

enum Begin<'a, B: AuthBackend> {
    Started(ExchangeGuard<'a, B>),
    Join(watch::Receiver<Outcome>),
    Busy,
}

/// Owns the single in-flight exchange; dropping it unfinished releases the slot.
struct ExchangeGuard<'a, B: AuthBackend> {
    manager: &'a SessionManager<B>,
    id: u64,
    epoch: u64,
    /// Phase to fall back to when the exchange fails or is abandoned
    fallback: SessionPhase,
    tx: watch::Sender<Outcome>,
    done: bool,
}

impl<B: AuthBackend> ExchangeGuard<'_, B> {
    fn finish(mut self, inner: &mut Inner, outcome: std::result::Result<(), LoginError>) {
        self.done = true;
        if inner.exchange.as_ref().is_some_and(|e| e.id == self.id) {
            inner.exchange = None;
        }
        self.tx.send_replace(Some(outcome));
    }
}

impl<B: AuthBackend> Drop for ExchangeGuard<'_, B> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = self.manager.lock();
        if inner.exchange.as_ref().is_some_and(|e| e.id == self.id) {
            inner.exchange = None;
            if inner.epoch == self.epoch {
                inner.phase = self.fallback;
            }
            self.manager.publish(&inner);
        }
        tracing::debug!("Session exchange abandoned");
        self.tx.send_replace(Some(Err(LoginError::Cancelled)));
    }
}

/// Turns the stored login token into a session token and keeps both in sync.
///
/// At most one exchange with the backend runs at a time. A second `login`
/// with identical credentials joins the running exchange; anything else is
/// refused with [`LoginError::Busy`]. Renewals join whatever is in flight.
pub struct SessionManager<B: AuthBackend> {
    backend: B,
    store: TokenStore,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<AuthState>,
}

impl<B: AuthBackend> SessionManager<B> {
    /// Build the manager; the initial phase is read synchronously from `store`.
    pub fn new(backend: B, store: TokenStore) -> Self {
        let has_session = store.session_token().is_some();
        let phase = if has_session {
            SessionPhase::Authenticated
        } else if store.login_token().is_some() {
            SessionPhase::Renewing
        } else {
            SessionPhase::AnonymousNoCredential
        };
        tracing::debug!(%phase, "Session manager initialised");

        let (state_tx, _) = watch::channel(AuthState {
            authenticated: has_session,
            loading: phase.is_loading(),
            logged_out: false,
        });

        Self {
            backend,
            store,
            inner: Mutex::new(Inner {
                phase,
                logged_out: false,
                epoch: 0,
                next_exchange_id: 0,
                exchange: None,
                startup_renewal_done: false,
            }),
            state_tx,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Current derived flags.
    pub fn state(&self) -> AuthState {
        *self.state_tx.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.session_token().is_some()
    }

    /// Bearer token for authorized calls.
    pub fn session_token(&self) -> Option<String> {
        self.store.session_token()
    }

    /// Run the one silent renewal of this process, if a login token was found
    /// at startup. Later calls do nothing.
    pub async fn start(&self) -> AuthState {
        let should_renew = {
            let mut inner = self.lock();
            let pending = !inner.startup_renewal_done && inner.phase == SessionPhase::Renewing;
            inner.startup_renewal_done = true;
            pending
        };

        if should_renew {
            self.renew().await;
        }
        self.state()
    }

    /// Log in with username and password.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> std::result::Result<(), LoginError> {
        let request = CreateSessionRequest::Password {
            username: username.to_string(),
            password: password.to_string(),
        };

        let begin = {
            let mut inner = self.lock();
            // a loading phase with nothing in flight is the unstarted startup renewal
            let fallback = if inner.phase.is_loading() {
                self.idle_phase()
            } else {
                inner.phase
            };
            let begin = self.begin(&mut inner, &request, false, fallback);
            if matches!(begin, Begin::Started(_)) {
                inner.phase = SessionPhase::Authenticating;
                self.publish(&inner);
            }
            begin
        };
        let guard = match begin {
            Begin::Started(guard) => guard,
            Begin::Join(rx) => {
                tracing::debug!(username, "Joining login already in flight");
                return Self::wait_for(rx).await;
            }
            Begin::Busy => return Err(LoginError::Busy),
        };

        tracing::info!(username, "Logging in");
        let result = self.backend.create_session(&request).await;

        let mut inner = self.lock();
        let outcome = if inner.epoch == guard.epoch {
            match result.and_then(|response| self.store_session(&response)) {
                Ok(()) => {
                    tracing::info!(username, "Logged in");
                    inner.phase = SessionPhase::Authenticated;
                    inner.logged_out = false;
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(username, "Login failed: {:?}", e);
                    inner.phase = guard.fallback;
                    Err(e)
                }
            }
        } else {
            tracing::info!("Discarding login result, logged out while it was in flight");
            Err(LoginError::Cancelled)
        };
        guard.finish(&mut inner, outcome.clone());
        self.publish(&inner);
        outcome
    }

    /// Exchange the stored login token for a fresh session token.
    ///
    /// Failures are not reported to the caller: the login token is cleared
    /// and the manager falls back to anonymous. Returns whether a session
    /// token is available afterwards.
    pub async fn renew(&self) -> bool {
        let Some(login_token) = self.store.login_token() else {
            let mut inner = self.lock();
            if inner.phase == SessionPhase::Renewing {
                inner.phase = SessionPhase::AnonymousNoCredential;
                self.publish(&inner);
            }
            return self.is_authenticated();
        };
        let request = CreateSessionRequest::LoginToken {
            login_token: login_token.clone(),
        };

        let begin = {
            let mut inner = self.lock();
            let fallback = self.idle_phase();
            let begin = self.begin(&mut inner, &request, true, fallback);
            if matches!(begin, Begin::Started(_)) {
                inner.phase = SessionPhase::Renewing;
                self.publish(&inner);
            }
            begin
        };
        let guard = match begin {
            Begin::Started(guard) => guard,
            Begin::Join(rx) => return Self::wait_for(rx).await.is_ok(),
            Begin::Busy => return false,
        };

        tracing::debug!("Renewing session from stored login token");
        let result = self.backend.create_session(&request).await;

        let mut inner = self.lock();
        let still_current = inner.epoch == guard.epoch
            && self.store.login_token().as_deref() == Some(login_token.as_str());
        let outcome = if still_current {
            match result.and_then(|response| self.store_session(&response)) {
                Ok(()) => {
                    tracing::info!("Session renewed");
                    inner.phase = SessionPhase::Authenticated;
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!("Session renewal failed, dropping login token: {:?}", e);
                    if let Err(e) = self.store.set_login_token(None) {
                        tracing::error!("Failed to clear login token: {}", e);
                    }
                    inner.phase = if self.is_authenticated() {
                        SessionPhase::Authenticated
                    } else {
                        SessionPhase::AnonymousNoCredential
                    };
                    Err(e)
                }
            }
        } else {
            tracing::debug!("Discarding stale renewal result");
            Err(LoginError::Cancelled)
        };
        guard.finish(&mut inner, outcome.clone());
        self.publish(&inner);
        outcome.is_ok()
    }

    /// Drop a session token the server rejected and try to renew once.
    ///
    /// Returns `true` if a usable session token exists afterwards. If the
    /// stored token already differs from `stale`, someone else renewed it.
    pub async fn invalidate_session(&self, stale: &str) -> bool {
        {
            let mut inner = self.lock();
            match self.store.session_token() {
                Some(current) if current != stale => return true,
                Some(_) => {
                    tracing::info!("Session token rejected, renewing");
                    if let Err(e) = self.store.set_session_token(None) {
                        tracing::error!("Failed to clear session token: {}", e);
                    }
                }
                None if inner.phase == SessionPhase::LoggedOut => return false,
                None => {}
            }
            if inner.exchange.is_none() {
                inner.phase = if self.store.login_token().is_some() {
                    SessionPhase::Renewing
                } else {
                    SessionPhase::AnonymousNoCredential
                };
            }
            self.publish(&inner);
        }

        self.renew().await
    }

    /// Clear both credentials and enter `LoggedOut`.
    ///
    /// Storage is cleared before this returns. Exchanges still in flight
    /// finish without touching storage.
    pub fn logout(&self) -> Result<()> {
        let mut inner = self.lock();
        let cleared = self.store.clear();
        inner.epoch += 1;
        inner.exchange = None;
        inner.phase = SessionPhase::LoggedOut;
        inner.logged_out = true;
        self.publish(&inner);
        tracing::info!("Logged out");
        cleared
    }

    /// [`logout`](Self::logout), then revoke the old session on the server.
    ///
    /// Revocation failures are logged, never returned.
    pub async fn logout_and_revoke(&self) -> Result<()> {
        let session_token = self.store.session_token();
        let cleared = self.logout();

        if let Some(token) = session_token {
            if let Err(e) = self.backend.end_session(&token).await {
                tracing::warn!("Failed to revoke session on the server: {}", e);
            }
        }
        cleared
    }

    fn begin(
        &self,
        inner: &mut Inner,
        request: &CreateSessionRequest,
        join_any: bool,
        fallback: SessionPhase,
    ) -> Begin<'_, B> {
        if let Some(pending) = &inner.exchange {
            return if join_any || pending.request == *request {
                Begin::Join(pending.outcome.clone())
            } else {
                Begin::Busy
            };
        }

        let (tx, rx) = watch::channel(None);
        inner.next_exchange_id += 1;
        let id = inner.next_exchange_id;
        inner.exchange = Some(PendingExchange {
            id,
            request: request.clone(),
            outcome: rx,
        });

        Begin::Started(ExchangeGuard {
            manager: self,
            id,
            epoch: inner.epoch,
            fallback,
            tx,
            done: false,
        })
    }

    async fn wait_for(mut rx: watch::Receiver<Outcome>) -> std::result::Result<(), LoginError> {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone().unwrap_or(Err(LoginError::Cancelled));
            }
        }
    }

    /// Persist a granted session, login token first.
    fn store_session(
        &self,
        response: &CreateSessionResponse,
    ) -> std::result::Result<(), LoginError> {
        if let Some(login_token) = response.login_token.as_deref() {
            self.store
                .set_login_token(Some(login_token))
                .map_err(|e| LoginError::Storage(e.to_string()))?;
        }
        self.store
            .set_session_token(Some(&response.session_token))
            .map_err(|e| LoginError::Storage(e.to_string()))
    }

    /// Phase matching storage when no exchange is running.
    fn idle_phase(&self) -> SessionPhase {
        if self.is_authenticated() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::AnonymousNoCredential
        }
    }

    fn publish(&self, inner: &Inner) {
        let state = AuthState {
            authenticated: self.store.session_token().is_some(),
            loading: inner.phase.is_loading(),
            logged_out: inner.logged_out,
        };
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests;
