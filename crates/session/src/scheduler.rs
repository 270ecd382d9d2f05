// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive refresh timer.
//!
//! At most one timer is alive: arming always cancels the previous one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::SessionEvent;
use crate::expiry::ExpiryPolicy;
use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;

/// Remaining lifetime at or below which a refresh starts immediately.
pub const DEFAULT_EARLY_REFRESH: Duration = Duration::from_secs(10);
/// How long before expiry an armed timer fires.
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(300);

/// What [`ProactiveScheduler::arm`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// No token; nothing armed.
    Idle,
    /// Too close to expiry to wait; a refresh was started.
    RefreshNow,
    /// A timer will start a refresh after this delay.
    Armed(Duration),
}

pub struct ProactiveScheduler {
    coordinator: Arc<RefreshCoordinator>,
    store: Arc<TokenStore>,
    policy: ExpiryPolicy,
    early_threshold: Duration,
    lead: Duration,
    shutdown: CancellationToken,
    armed: Mutex<Option<CancellationToken>>,
}

impl ProactiveScheduler {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        store: Arc<TokenStore>,
        policy: ExpiryPolicy,
        early_threshold: Duration,
        lead: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            store,
            policy,
            early_threshold,
            lead,
            shutdown,
            armed: Mutex::new(None),
        }
    }

    /// Replace any armed timer with one derived from `token`.
    pub fn arm(&self, token: Option<&str>) -> Schedule {
        let Some(token) = token else {
            self.cancel();
            return Schedule::Idle;
        };

        let remaining = self.policy.remaining_secs(token);
        if remaining <= self.early_threshold.as_secs() {
            self.cancel();
            debug!(remaining, "token about to expire, refreshing now");
            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                if let Err(e) = coordinator.refresh().await {
                    warn!(err = %e, "early token refresh failed");
                }
            });
            return Schedule::RefreshNow;
        }

        let delay = Duration::from_secs(remaining.saturating_sub(self.lead.as_secs()));
        let cancel = self.shutdown.child_token();
        if let Some(previous) = self.armed.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if cancel.is_cancelled() {
                return;
            }
            cancel.cancel();
            debug!("proactive refresh timer fired");
            if let Err(e) = coordinator.refresh().await {
                warn!(err = %e, "proactive token refresh failed");
            }
        });

        debug!(delay_secs = delay.as_secs(), "proactive refresh armed");
        self.store.emit(SessionEvent::RefreshScheduled { delay });
        Schedule::Armed(delay)
    }

    /// Cancel the armed timer, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.armed.lock().take() {
            previous.cancel();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.lock().as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for ProactiveScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
