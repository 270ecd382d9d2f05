// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The token pair and the principal derived from it.
//!
//! Single writer: only login, logout and the refresh coordinator mutate the
//! pair, through the crate-private methods below. Every write bumps or checks
//! a generation counter so a refresh that settles after logout (or after a
//! new login) cannot resurrect a destroyed session.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::claims::{self, Claims};
use crate::error::AuthError;
use crate::events::{LogoutReason, SessionEvent};
use crate::principal::Principal;
use crate::storage::{TokenStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

#[derive(Debug, Default)]
struct TokenState {
    access: Option<String>,
    refresh: Option<String>,
    principal: Option<Principal>,
    /// Profile fields fetched for this session, re-applied after each refresh.
    profile: Map<String, Value>,
    generation: u64,
}

pub struct TokenStore {
    storage: Arc<dyn TokenStorage>,
    state: RwLock<TokenState>,
    access_tx: watch::Sender<Option<String>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl TokenStore {
    /// Load whatever token pair the storage already holds.
    pub fn load(storage: Arc<dyn TokenStorage>) -> Self {
        let access = storage.get(ACCESS_TOKEN_KEY);
        let refresh = storage.get(REFRESH_TOKEN_KEY);
        let principal = access.as_deref().and_then(derive_principal);
        if access.is_some() {
            debug!(decodable = principal.is_some(), "restored access token from storage");
        }
        let (access_tx, _) = watch::channel(access.clone());
        let (event_tx, _) = broadcast::channel(64);
        Self {
            storage,
            state: RwLock::new(TokenState {
                access,
                refresh,
                principal,
                profile: Map::new(),
                generation: 0,
            }),
            access_tx,
            event_tx,
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.read().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.read().refresh.clone()
    }

    pub fn principal(&self) -> Option<Principal> {
        self.state.read().principal.clone()
    }

    pub fn claims(&self) -> Option<Claims> {
        self.state.read().access.as_deref().and_then(claims::decode)
    }

    /// Session generation; changes on every login and logout.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Watch the access token. Fires once per distinct value.
    pub fn watch_access(&self) -> watch::Receiver<Option<String>> {
        self.access_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Install a freshly issued pair (login). Fails without touching state
    /// when the access token does not decode or the pair cannot be stored.
    pub(crate) fn begin(
        &self,
        access: String,
        refresh: Option<String>,
        user: Option<&Map<String, Value>>,
    ) -> Result<Principal, AuthError> {
        let claims = claims::decode(&access)
            .ok_or_else(|| AuthError::Decode("login returned an undecodable access token".into()))?;
        let mut principal = Principal::from_claims(&claims);
        let profile = user.cloned().unwrap_or_default();
        principal.merge_profile(&profile);

        {
            let mut state = self.state.write();
            self.persist_pair(&access, refresh.as_deref(), &state)?;
            state.generation += 1;
            state.access = Some(access.clone());
            state.refresh = refresh;
            state.principal = Some(principal.clone());
            state.profile = profile;
            self.publish_access(Some(access));
        }

        self.emit(SessionEvent::LoggedIn { subject: principal.id.clone() });
        Ok(principal)
    }

    /// Replace the access token after a refresh issued for `generation`.
    /// The refresh token is only replaced when the server rotated it.
    ///
    /// Returns false (and changes nothing) if the session moved on meanwhile.
    /// The in-memory pair stays authoritative when storage fails; the failure
    /// is broadcast as [`SessionEvent::PersistFailed`].
    pub(crate) fn rotate(&self, generation: u64, access: String, refresh: Option<String>) -> bool {
        let rotated = refresh.is_some();
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            if state.generation != generation || state.access.is_none() {
                debug!(generation, current = state.generation, "discarding stale refresh result");
                return false;
            }
            self.persist_or_report(ACCESS_TOKEN_KEY, Some(&access));
            if let Some(refresh) = refresh {
                self.persist_or_report(REFRESH_TOKEN_KEY, Some(&refresh));
                state.refresh = Some(refresh);
            }
            let profile = &state.profile;
            state.principal = derive_principal(&access).map(|mut p| {
                p.merge_profile(profile);
                p
            });
            state.access = Some(access.clone());
            self.publish_access(Some(access));
        }

        self.emit(SessionEvent::TokenRefreshed { rotated });
        true
    }

    /// Merge a fetched profile into the current principal.
    pub(crate) fn enrich(&self, generation: u64, fields: &Map<String, Value>) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.generation != generation {
            return false;
        }
        let Some(principal) = state.principal.as_mut() else {
            return false;
        };
        principal.merge_profile(fields);
        for (k, v) in fields {
            state.profile.insert(k.clone(), v.clone());
        }
        true
    }

    /// Destroy the token pair and the principal.
    ///
    /// Returns false if there was nothing to clear. Memory is cleared even
    /// when storage fails, in which case the storage error is returned.
    pub(crate) fn clear(&self, reason: LogoutReason) -> Result<bool, AuthError> {
        self.clear_matching(None, reason)
    }

    /// Like [`clear`](Self::clear), but only if the session is still the one
    /// identified by `generation`. Storage failures are broadcast as
    /// [`SessionEvent::PersistFailed`].
    pub(crate) fn clear_if_current(&self, generation: u64, reason: LogoutReason) -> bool {
        match self.clear_matching(Some(generation), reason) {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!(err = %e, "session cleared but storage still holds tokens");
                self.emit(SessionEvent::PersistFailed { error: e.to_string() });
                true
            }
        }
    }

    fn clear_matching(
        &self,
        generation: Option<u64>,
        reason: LogoutReason,
    ) -> Result<bool, AuthError> {
        let persisted = {
            let mut state = self.state.write();
            if generation.is_some_and(|g| g != state.generation) {
                return Ok(false);
            }
            if state.access.is_none() && state.refresh.is_none() {
                return Ok(false);
            }
            state.generation += 1;
            let persisted = self
                .persist(ACCESS_TOKEN_KEY, None)
                .and(self.persist(REFRESH_TOKEN_KEY, None));
            state.access = None;
            state.refresh = None;
            state.principal = None;
            state.profile = Map::new();
            self.publish_access(None);
            persisted
        };

        self.emit(SessionEvent::LoggedOut { reason });
        persisted.map(|()| true)
    }

    fn publish_access(&self, access: Option<String>) {
        self.access_tx.send_if_modified(|current| {
            if *current == access {
                return false;
            }
            *current = access;
            true
        });
    }

    fn persist(&self, key: &str, value: Option<&str>) -> Result<(), AuthError> {
        let result = match value {
            Some(v) => self.storage.set(key, v),
            None => self.storage.remove(key),
        };
        result.map_err(|e| AuthError::Storage(format!("{key}: {e:#}")))
    }

    fn persist_or_report(&self, key: &str, value: Option<&str>) {
        if let Err(e) = self.persist(key, value) {
            warn!(key, err = %e, "failed to persist token");
            self.emit(SessionEvent::PersistFailed { error: e.to_string() });
        }
    }

    /// Write both halves of a new pair. If either write fails, put back the
    /// pair held in `previous` so storage never mixes two sessions.
    fn persist_pair(
        &self,
        access: &str,
        refresh: Option<&str>,
        previous: &TokenState,
    ) -> Result<(), AuthError> {
        let written = self
            .persist(ACCESS_TOKEN_KEY, Some(access))
            .and_then(|()| self.persist(REFRESH_TOKEN_KEY, refresh));
        if let Err(e) = written {
            let restored = self
                .persist(ACCESS_TOKEN_KEY, previous.access.as_deref())
                .and(self.persist(REFRESH_TOKEN_KEY, previous.refresh.as_deref()));
            if let Err(restore) = restored {
                warn!(err = %restore, "could not restore previous token pair");
            }
            return Err(e);
        }
        Ok(())
    }
}

fn derive_principal(access: &str) -> Option<Principal> {
    claims::decode(access).map(|c| Principal::from_claims(&c))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
