// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session facade: login, logout, lookups, and the reactive token rule.

use std::sync::{Arc, Weak};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{AuthApi, RefreshBackend, RegisterRequest};
use crate::claims::{self, Claims};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::events::{LogoutReason, SessionEvent};
use crate::expiry::ExpiryPolicy;
use crate::pipeline::AuthClient;
use crate::principal::Principal;
use crate::refresh::RefreshCoordinator;
use crate::scheduler::{ProactiveScheduler, Schedule};
use crate::storage::{MemoryStorage, TokenStorage};
use crate::store::TokenStore;

/// Coarse lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    storage: Option<Arc<dyn TokenStorage>>,
    clock: Arc<dyn Clock>,
    refresh_backend: Option<Arc<dyn RefreshBackend>>,
    http: Option<reqwest::Client>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            storage: None,
            clock: Arc::new(SystemClock),
            refresh_backend: None,
            http: None,
        }
    }

    /// Durable storage for the token pair. Defaults to in-memory.
    pub fn storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the refresh endpoint client.
    pub fn refresh_backend(mut self, backend: Arc<dyn RefreshBackend>) -> Self {
        self.refresh_backend = Some(backend);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Build the session and start watching its access token.
    ///
    /// Must be called inside a Tokio runtime. A token pair already held by
    /// the storage is restored and immediately checked.
    pub fn build(self) -> Result<Session, AuthError> {
        self.config.validate()?;
        let http = match self.http {
            Some(http) => http,
            None => {
                crate::ensure_crypto();
                reqwest::Client::builder()
                    .timeout(self.config.request_timeout())
                    .build()
                    .map_err(|e| AuthError::Config(format!("http client: {e}")))?
            }
        };

        let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let policy = ExpiryPolicy::new(self.config.expiry_buffer(), self.clock)?;
        let store = Arc::new(TokenStore::load(storage));
        let api = AuthApi::new(http, &self.config.api_url);
        let backend = self.refresh_backend.unwrap_or_else(|| Arc::new(api.clone()));
        let coordinator = RefreshCoordinator::new(Arc::clone(&store), backend);
        let shutdown = CancellationToken::new();
        let scheduler = ProactiveScheduler::new(
            Arc::clone(&coordinator),
            Arc::clone(&store),
            policy.clone(),
            self.config.early_refresh(),
            self.config.refresh_lead(),
            shutdown.clone(),
        );
        let client = AuthClient::new(
            api.clone(),
            Arc::clone(&store),
            Arc::clone(&coordinator),
            policy.clone(),
        );

        let inner = Arc::new(SessionInner {
            api,
            store,
            policy,
            coordinator,
            scheduler,
            client,
            shutdown,
        });
        spawn_token_watcher(&inner);
        Ok(Session { inner })
    }
}

struct SessionInner {
    api: AuthApi,
    store: Arc<TokenStore>,
    policy: ExpiryPolicy,
    coordinator: Arc<RefreshCoordinator>,
    scheduler: ProactiveScheduler,
    client: AuthClient,
    shutdown: CancellationToken,
}

impl SessionInner {
    /// Apply the reactive rule to the current access token. Returns true when
    /// the token is live and usable as is.
    fn on_access_change(&self, token: Option<&str>) -> bool {
        let generation = self.store.generation();
        let Some(token) = token else {
            self.scheduler.cancel();
            return false;
        };

        if claims::decode(token).is_none() {
            warn!("access token is undecodable, logging out");
            self.scheduler.cancel();
            self.store.clear_if_current(generation, LogoutReason::InvalidToken);
            return false;
        }

        if self.policy.is_expired(token) {
            self.scheduler.cancel();
            if self.store.refresh_token().is_none() {
                info!("access token expired without a refresh token, logging out");
                self.store.clear_if_current(generation, LogoutReason::Expired);
                return false;
            }
            debug!("access token expired, refreshing");
            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                if let Err(e) = coordinator.refresh().await {
                    warn!(err = %e, "refresh of expired token failed");
                }
            });
            return false;
        }

        if let Schedule::Armed(delay) = self.scheduler.arm(Some(token)) {
            debug!(delay_secs = delay.as_secs(), "next refresh scheduled");
        }
        true
    }

    /// Best-effort profile fetch. Never fails the session.
    async fn enrich_profile(&self, generation: u64) {
        let Some(token) = self.store.access_token() else {
            return;
        };
        match self.api.profile(&token).await {
            Ok(fields) => {
                if self.store.enrich(generation, &fields) {
                    debug!(fields = fields.len(), "profile merged into principal");
                }
            }
            Err(e) => warn!(err = %e, "profile fetch failed, keeping token claims"),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Follow the access token and apply the reactive rule to every new value,
/// starting with the one restored from storage.
///
/// A restored session is enriched with its profile once it holds a live
/// token, which for an expired restore means after the first refresh.
fn spawn_token_watcher(inner: &Arc<SessionInner>) {
    let weak: Weak<SessionInner> = Arc::downgrade(inner);
    let mut rx = inner.store.watch_access();
    let shutdown = inner.shutdown.clone();

    let restored = rx.borrow_and_update().clone();
    let mut restored_generation = None;
    if restored.is_some() {
        info!("restored session from storage");
        restored_generation = Some(inner.store.generation());
    }

    tokio::spawn(async move {
        let mut token = restored;
        loop {
            {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let live = inner.on_access_change(token.as_deref());
                let generation = inner.store.generation();
                if restored_generation.is_some_and(|g| g != generation) {
                    restored_generation = None;
                }
                if live && restored_generation.take().is_some() {
                    let weak = Arc::downgrade(&inner);
                    tokio::spawn(async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.enrich_profile(generation).await;
                        }
                    });
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            token = rx.borrow_and_update().clone();
        }
    });
}

/// An authenticated session against the backend. Cheap to clone; all clones
/// share one token pair, one refresh coordinator and one timer.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Log in and seed the principal from the issued token, then merge the
    /// profile if it can be fetched.
    pub async fn login(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let response = self.inner.api.login(email, password).await?;
        let principal = self.inner.store.begin(
            response.access_token,
            Some(response.refresh_token),
            response.user.as_ref(),
        )?;
        info!(subject = principal.id.as_deref().unwrap_or("-"), "logged in");

        self.inner.enrich_profile(self.inner.store.generation()).await;
        Ok(self.inner.store.principal().unwrap_or(principal))
    }

    /// Create an account. Does not log in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<Option<String>, AuthError> {
        let request = RegisterRequest {
            email: email.to_owned(),
            password: password.to_owned(),
            username: username.to_owned(),
        };
        let response = self.inner.api.register(&request).await?;
        info!(username, "account registered");
        Ok(response.message)
    }

    /// End the session. The server is told on a best-effort basis.
    ///
    /// Local state is always cleared; an error means the token pair could not
    /// be removed from storage.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.inner.scheduler.cancel();
        let token = self.inner.store.access_token();
        if token.is_some() {
            if let Err(e) = self.inner.api.logout(token.as_deref()).await {
                debug!(err = %e, "logout call failed, clearing locally");
            }
        }
        if self.inner.store.clear(LogoutReason::UserRequested)? {
            info!("logged out");
        }
        Ok(())
    }

    /// Force a refresh now, sharing any refresh already in flight.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        self.inner.coordinator.refresh().await
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.store.principal().is_some()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.inner.store.principal().is_some_and(|p| p.has_permission(permission))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.inner.store.principal().is_some_and(|p| p.has_role(role))
    }

    pub fn principal(&self) -> Option<Principal> {
        self.inner.store.principal()
    }

    /// Decoded claims of the current access token.
    pub fn claims(&self) -> Option<Claims> {
        self.inner.store.claims()
    }

    /// Profile fields merged into the principal that have no dedicated slot.
    pub fn profile(&self) -> Map<String, Value> {
        self.inner.store.principal().map(|p| p.profile).unwrap_or_default()
    }

    pub fn state(&self) -> SessionState {
        if self.inner.coordinator.is_refreshing() {
            SessionState::Refreshing
        } else if self.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Seconds until the access token expires, or zero.
    pub fn remaining_secs(&self) -> u64 {
        self.inner.store.access_token().map(|t| self.inner.policy.remaining_secs(&t)).unwrap_or(0)
    }

    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.scheduler.is_armed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.store.subscribe()
    }

    /// The authenticated request pipeline.
    pub fn client(&self) -> &AuthClient {
        &self.inner.client
    }
}
