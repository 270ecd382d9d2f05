// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh.
//!
//! Any number of concurrent callers share one network exchange. The exchange
//! runs on its own task, so it completes and updates the store even if every
//! caller that asked for it has gone away.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::RefreshBackend;
use crate::claims;
use crate::error::AuthError;
use crate::events::{LogoutReason, SessionEvent};
use crate::store::TokenStore;

type Waiter = oneshot::Sender<Result<String, AuthError>>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<Waiter>,
}

pub struct RefreshCoordinator {
    store: Arc<TokenStore>,
    backend: Arc<dyn RefreshBackend>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<TokenStore>, backend: Arc<dyn RefreshBackend>) -> Arc<Self> {
        Arc::new(Self { store, backend, state: Mutex::new(RefreshState::default()) })
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().in_flight
    }

    /// Obtain a fresh access token, joining the in-flight exchange if any.
    ///
    /// On failure the session has already been cleared by the time the
    /// error is returned.
    pub async fn refresh(self: &Arc<Self>) -> Result<String, AuthError> {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut state = self.state.lock();
            state.waiters.push(tx);
            !std::mem::replace(&mut state.in_flight, true)
        };

        if start {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run().await });
        } else {
            debug!("joining in-flight token refresh");
        }

        rx.await.unwrap_or(Err(AuthError::RefreshAborted))
    }

    async fn run(&self) {
        let in_flight = InFlight { coordinator: self, settled: false };
        let outcome = self.exchange().await;
        in_flight.settle(outcome);
    }

    async fn exchange(&self) -> Result<String, AuthError> {
        let generation = self.store.generation();
        let result = self.call_backend(generation).await;
        if let Err(ref e) = result {
            if *e != AuthError::RefreshAborted {
                warn!(err = %e, "token refresh failed, ending session");
                self.store.emit(SessionEvent::RefreshFailed { error: e.to_string() });
                self.store.clear_if_current(generation, LogoutReason::RefreshFailed);
            }
        }
        result
    }

    async fn call_backend(&self, generation: u64) -> Result<String, AuthError> {
        let refresh_token = self.store.refresh_token().ok_or(AuthError::NoRefreshToken)?;
        let response = self.backend.refresh(&refresh_token).await?;
        if claims::decode(&response.access_token).is_none() {
            return Err(AuthError::Decode("refresh returned an undecodable access token".into()));
        }

        let access = response.access_token;
        if !self.store.rotate(generation, access.clone(), response.refresh_token) {
            // Logged out (or logged in again) while the exchange was running.
            return Err(AuthError::RefreshAborted);
        }
        info!("access token refreshed");
        Ok(access)
    }

    /// Clear the in-flight mark, then settle every waiter with `outcome`.
    fn settle(&self, outcome: Result<String, AuthError>) {
        let waiters = {
            let mut state = self.state.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "settling token refresh");
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Settles waiters with [`AuthError::RefreshAborted`] if the refresh task
/// is torn down before it produces an outcome.
struct InFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, outcome: Result<String, AuthError>) {
        self.settled = true;
        self.coordinator.settle(outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(Err(AuthError::RefreshAborted));
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
