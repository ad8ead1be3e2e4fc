//! Session lifecycle: restore a persisted token, sign in and out, and tear
//! the session down when the backend stops accepting the token.

pub mod token_store;

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use billing_client::domain::Identity;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

pub use token_store::{FileTokenStore, MemoryTokenStore, PersistedToken, TokenStore};

use crate::{
    backend::{AccessToken, IdentityProvider, SCOPES},
    clock::Clock,
    error::{classify, BackendFailure, BillingError},
};

pub const EXPIRED_NOTICE: &str = "Your session has expired. Please sign in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Restoring,
    Authenticated,
    Unauthenticated,
    Expired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Restoring => "restoring",
            Self::Authenticated => "authenticated",
            Self::Unauthenticated => "unauthenticated",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionChange {
    pub from: SessionState,
    pub to: SessionState,
}

/// Short-lived message shown after the session was torn down by a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionNotice {
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: AccessToken,
    pub obtained_at: OffsetDateTime,
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_token_age: Duration,
    pub notice_duration: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_token_age: Duration::minutes(55),
            notice_duration: Duration::seconds(5),
        }
    }
}

type Listener = Arc<dyn Fn(&SessionChange) + Send + Sync>;

#[derive(Debug)]
struct Inner {
    state: SessionState,
    session: Option<Session>,
    notice: Option<SessionNotice>,
}

/// Owns the one session of this process and the listeners watching it.
pub struct SessionManager {
    identity: Arc<dyn IdentityProvider>,
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Listener>>,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            identity,
            tokens,
            clock,
            settings,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                session: None,
                notice: None,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on_session_change<F>(&self, listener: F)
    where
        F: Fn(&SessionChange) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    fn notify(&self, change: SessionChange) {
        if change.from == change.to {
            return;
        }
        tracing::info!(from = %change.from, to = %change.to, "session state changed");
        // Listeners run unlocked so they may subscribe further listeners.
        let listeners: Vec<Listener> = self.listeners.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for listener in &listeners {
            listener(&change);
        }
    }

    fn transition(&self, to: SessionState) {
        let from = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.state, to)
        };
        self.notify(SessionChange { from, to });
    }

    fn is_aged(&self, obtained_at: OffsetDateTime) -> bool {
        self.clock.now() - obtained_at > self.settings.max_token_age
    }

    /// Effective state. An authenticated session whose token is older than
    /// the maximum age reports `Expired` even before anything tears it down.
    pub fn status(&self) -> SessionState {
        let inner = self.lock();
        match (&inner.state, &inner.session) {
            (SessionState::Authenticated, Some(s)) if self.is_aged(s.obtained_at) => SessionState::Expired,
            (state, _) => *state,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionState::Authenticated
    }

    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().session.as_ref().and_then(|s| s.identity.clone())
    }

    /// The teardown notice, while it is still showing.
    pub fn active_notice(&self) -> Option<SessionNotice> {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.notice.as_ref().is_some_and(|n| n.expires_at <= now) {
            inner.notice = None;
        }
        inner.notice.clone()
    }

    /// Pick up a persisted token on startup. Only acts once, from
    /// `Uninitialized`.
    pub async fn restore(&self) -> SessionState {
        if self.lock().state != SessionState::Uninitialized {
            return self.status();
        }

        let Some(persisted) = self.tokens.load() else {
            self.transition(SessionState::Unauthenticated);
            return SessionState::Unauthenticated;
        };

        self.transition(SessionState::Restoring);
        let obtained_at = persisted.obtained_at();
        if self.is_aged(obtained_at) {
            tracing::info!(obtained_at = %obtained_at, "persisted token too old, discarding");
            self.clear_persisted();
            self.transition(SessionState::Expired);
            self.transition(SessionState::Unauthenticated);
            return SessionState::Unauthenticated;
        }

        self.enter_authenticated(persisted.access_token.clone(), obtained_at);
        // A rejected identity lookup has already torn the session down.
        let _ = self.load_identity(&persisted.access_token).await;
        self.status()
    }

    /// Explicit sign-in: exchange a fresh token, then look up who we are.
    pub async fn sign_in(&self) -> Result<Session, BillingError> {
        let grant = match self.identity.exchange_token(SCOPES).await {
            Ok(grant) => grant,
            Err(failure) => {
                tracing::warn!(error = %failure, "token exchange failed");
                if self.lock().state != SessionState::Authenticated {
                    self.transition(SessionState::Unauthenticated);
                }
                return Err(classify(failure));
            }
        };

        let token = grant.access_token;
        self.enter_authenticated(token.clone(), self.clock.now());
        self.load_identity(&token).await?;
        self.session()
            .ok_or_else(|| BillingError::Authorization("session ended during sign-in".to_string()))
    }

    /// Explicit sign-out. Revokes the token; shows no notice.
    pub async fn sign_out(&self) {
        let session = {
            let mut inner = self.lock();
            inner.notice = None;
            inner.session.take()
        };
        if let Some(session) = session {
            if let Err(e) = self.identity.revoke(&session.token).await {
                tracing::warn!(error = %e, "token revocation failed");
            }
        }
        self.clear_persisted();
        self.transition(SessionState::Unauthenticated);
    }

    /// The current token, or an authorization error when there is no live
    /// session. An aged session is torn down here.
    pub fn current_token(&self) -> Result<AccessToken, BillingError> {
        let (state, session) = {
            let inner = self.lock();
            (inner.state, inner.session.clone())
        };
        match (state, session) {
            (SessionState::Authenticated, Some(s)) if self.is_aged(s.obtained_at) => {
                self.expire(&s.token);
                Err(BillingError::Authorization(EXPIRED_NOTICE.to_string()))
            }
            (SessionState::Authenticated, Some(s)) => Ok(s.token),
            _ => Err(BillingError::Authorization("not signed in".to_string())),
        }
    }

    /// Run `op` with the current token. A failure is classified; an
    /// authorization failure ends the session if `op` ran with the token
    /// that is still current.
    pub async fn authorized<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, BillingError>
    where
        F: FnOnce(AccessToken) -> Fut,
        Fut: Future<Output = Result<T, BackendFailure>>,
    {
        let token = self.current_token()?;
        match f(token.clone()).await {
            Ok(value) => Ok(value),
            Err(failure) => {
                let err = classify(failure);
                if err.is_authorization() {
                    tracing::warn!(error = %err, op, "backend rejected session token");
                    self.invalidate_token(&token);
                }
                Err(err)
            }
        }
    }

    fn invalidate_token(&self, token: &AccessToken) {
        self.tear_down(token, SessionState::Unauthenticated);
    }

    fn expire(&self, token: &AccessToken) {
        self.tear_down(token, SessionState::Expired);
    }

    /// End the session that `token` belongs to, if it is still the current
    /// one. Passing through `Expired` still ends in `Unauthenticated`.
    fn tear_down(&self, token: &AccessToken, via: SessionState) {
        let from = {
            let mut inner = self.lock();
            let current = inner.session.as_ref().is_some_and(|s| &s.token == token);
            if !current || inner.state != SessionState::Authenticated {
                return;
            }
            inner.session = None;
            inner.notice = Some(SessionNotice {
                message: EXPIRED_NOTICE.to_string(),
                expires_at: self.clock.now() + self.settings.notice_duration,
            });
            std::mem::replace(&mut inner.state, via)
        };
        metrics::counter!("session_invalidations_total").increment(1);
        self.clear_persisted();
        self.notify(SessionChange { from, to: via });
        if via != SessionState::Unauthenticated {
            self.transition(SessionState::Unauthenticated);
        }
    }

    fn enter_authenticated(&self, token: AccessToken, obtained_at: OffsetDateTime) {
        if let Err(e) = self.tokens.save(&PersistedToken::new(token.clone(), obtained_at)) {
            tracing::warn!(error = %e, "failed to persist session token");
        }
        {
            let mut inner = self.lock();
            inner.notice = None;
            inner.session = Some(Session {
                token,
                obtained_at,
                identity: None,
            });
        }
        self.transition(SessionState::Authenticated);
    }

    async fn load_identity(&self, token: &AccessToken) -> Result<(), BillingError> {
        match self.identity.fetch_identity(token).await {
            Ok(identity) => {
                tracing::info!(user = %identity.email, "signed in");
                let mut inner = self.lock();
                if let Some(session) = inner.session.as_mut().filter(|s| &s.token == token) {
                    session.identity = Some(identity);
                }
                Ok(())
            }
            Err(failure) => {
                let err = classify(failure);
                if err.is_authorization() {
                    tracing::warn!(error = %err, "identity lookup rejected token");
                    self.invalidate_token(token);
                    Err(err)
                } else {
                    // Keep the session; the identity can be fetched later.
                    tracing::warn!(error = %err, "identity lookup failed");
                    Ok(())
                }
            }
        }
    }

    fn clear_persisted(&self) {
        if let Err(e) = self.tokens.clear() {
            tracing::warn!(error = %e, "failed to clear persisted token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::ConfiguredIdentityProvider, clock::ManualClock};
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-05-01 09:00 UTC);

    fn identity() -> Identity {
        Identity {
            id: "u1".to_string(),
            display_name: "Owner".to_string(),
            email: "owner@example.com".to_string(),
        }
    }

    struct Fixture {
        manager: SessionManager,
        clock: Arc<ManualClock>,
        tokens: Arc<MemoryTokenStore>,
        provider: Arc<ConfiguredIdentityProvider>,
        changes: Arc<Mutex<Vec<SessionChange>>>,
    }

    fn fixture(persisted: Option<PersistedToken>) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let tokens = Arc::new(persisted.map(MemoryTokenStore::holding).unwrap_or_default());
        let provider = Arc::new(ConfiguredIdentityProvider::with_token(identity(), "tok-1"));
        let manager = SessionManager::new(provider.clone(), tokens.clone(), clock.clone(), SessionSettings::default());
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        manager.on_session_change(move |c| sink.lock().unwrap().push(c.clone()));
        Fixture {
            manager,
            clock,
            tokens,
            provider,
            changes,
        }
    }

    fn states(f: &Fixture) -> Vec<SessionState> {
        f.changes.lock().unwrap().iter().map(|c| c.to).collect()
    }

    #[tokio::test]
    async fn listener_can_subscribe_while_being_notified() {
        let clock = Arc::new(ManualClock::new(T0));
        let provider = Arc::new(ConfiguredIdentityProvider::with_token(identity(), "tok-1"));
        let manager = Arc::new(SessionManager::new(
            provider,
            Arc::new(MemoryTokenStore::default()),
            clock,
            SessionSettings::default(),
        ));
        let weak = Arc::downgrade(&manager);
        manager.on_session_change(move |_| {
            if let Some(manager) = weak.upgrade() {
                manager.on_session_change(|_| {});
            }
        });

        assert_eq!(manager.restore().await, SessionState::Unauthenticated);
        assert_eq!(manager.listeners.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn restore_without_token_is_unauthenticated() {
        let f = fixture(None);
        assert_eq!(f.manager.status(), SessionState::Uninitialized);
        assert_eq!(f.manager.restore().await, SessionState::Unauthenticated);
        assert_eq!(states(&f), vec![SessionState::Unauthenticated]);
    }

    #[tokio::test]
    async fn restore_within_age_authenticates_and_fetches_identity() {
        let f = fixture(Some(PersistedToken::new(AccessToken::new("tok-1"), T0)));
        f.clock.advance(Duration::minutes(30));
        assert_eq!(f.manager.restore().await, SessionState::Authenticated);
        assert_eq!(f.manager.identity(), Some(identity()));
        assert_eq!(states(&f), vec![SessionState::Restoring, SessionState::Authenticated]);
    }

    #[tokio::test]
    async fn restore_of_aged_token_expires_and_clears_it() {
        let f = fixture(Some(PersistedToken::new(AccessToken::new("tok-1"), T0)));
        f.clock.advance(Duration::minutes(56));
        assert_eq!(f.manager.restore().await, SessionState::Unauthenticated);
        assert!(f.tokens.load().is_none());
        assert_eq!(
            states(&f),
            vec![SessionState::Restoring, SessionState::Expired, SessionState::Unauthenticated]
        );
        assert!(f.manager.active_notice().is_none());
    }

    #[tokio::test]
    async fn token_age_boundary() {
        let f = fixture(None);
        f.manager.restore().await;
        f.manager.sign_in().await.unwrap();

        f.clock.advance(Duration::minutes(54));
        assert_eq!(f.manager.status(), SessionState::Authenticated);

        f.clock.advance(Duration::minutes(2));
        assert_eq!(f.manager.status(), SessionState::Expired);
        assert!(!f.manager.is_authenticated());
    }

    #[tokio::test]
    async fn sign_in_persists_token_and_sign_out_clears_without_notice() {
        let f = fixture(None);
        f.manager.restore().await;
        let session = f.manager.sign_in().await.unwrap();
        assert_eq!(session.identity, Some(identity()));
        assert_eq!(
            f.tokens.load().map(|t| t.access_token),
            Some(AccessToken::new("tok-1"))
        );

        f.manager.sign_out().await;
        assert_eq!(f.manager.status(), SessionState::Unauthenticated);
        assert!(f.tokens.load().is_none());
        assert!(f.manager.identity().is_none());
        assert!(f.manager.active_notice().is_none());
        // Revoked on sign-out.
        assert!(f.provider.fetch_identity(&session.token).await.is_err());
    }

    #[tokio::test]
    async fn auth_failure_tears_down_with_five_second_notice() {
        let f = fixture(None);
        f.manager.restore().await;
        f.manager.sign_in().await.unwrap();

        let err = f
            .manager
            .authorized("append", |_token| async { Err::<(), _>(BackendFailure::unauthenticated()) })
            .await
            .unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(f.manager.status(), SessionState::Unauthenticated);
        assert!(f.tokens.load().is_none());

        let notice = f.manager.active_notice().unwrap();
        assert_eq!(notice.message, EXPIRED_NOTICE);
        f.clock.advance(Duration::seconds(4));
        assert!(f.manager.active_notice().is_some());
        f.clock.advance(Duration::seconds(2));
        assert!(f.manager.active_notice().is_none());
    }

    #[tokio::test]
    async fn transient_failure_keeps_session() {
        let f = fixture(None);
        f.manager.restore().await;
        f.manager.sign_in().await.unwrap();

        let err = f
            .manager
            .authorized("read", |_token| async { Err::<(), _>(BackendFailure::transport("reset")) })
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Transient(_)));
        assert!(f.manager.is_authenticated());
    }

    #[tokio::test]
    async fn stale_auth_failure_does_not_end_newer_session() {
        let f = fixture(None);
        f.manager.restore().await;
        f.manager.sign_in().await.unwrap();
        let old = f.manager.current_token().unwrap();

        f.manager.sign_out().await;
        let fresh = Arc::new(ConfiguredIdentityProvider::with_token(identity(), "tok-2"));
        let manager = SessionManager::new(fresh, f.tokens.clone(), f.clock.clone(), SessionSettings::default());
        manager.sign_in().await.unwrap();

        manager.invalidate_token(&old);
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn aged_session_is_torn_down_on_next_use() {
        let f = fixture(None);
        f.manager.restore().await;
        f.manager.sign_in().await.unwrap();
        f.clock.advance(Duration::minutes(56));

        let err = f.manager.authorized("read", |_t| async { Ok::<_, BackendFailure>(()) }).await.unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(f.manager.status(), SessionState::Unauthenticated);
        assert!(f.manager.active_notice().is_some());
        assert_eq!(
            states(&f).last().copied(),
            Some(SessionState::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn failed_exchange_stays_unauthenticated() {
        let clock = Arc::new(ManualClock::new(T0));
        let provider = Arc::new(ConfiguredIdentityProvider::from_env(identity(), "BILLING_TEST_TOKEN_NEVER_SET"));
        let manager = SessionManager::new(provider, Arc::new(MemoryTokenStore::new()), clock, SessionSettings::default());
        manager.restore().await;
        assert!(manager.sign_in().await.is_err());
        assert_eq!(manager.status(), SessionState::Unauthenticated);
    }
}
