// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and integration tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::api::{RefreshBackend, RefreshResponse};
use crate::error::AuthError;

/// Build an unsigned three-segment token carrying `claims` as its payload.
pub fn mint_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "none", "typ": "JWT" }).to_string());
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// Mint a token for `sub` that expires at `exp` (epoch seconds).
pub fn token_expiring_at(sub: &str, exp: i64) -> String {
    mint_token(&json!({
        "sub": sub,
        "email": format!("{sub}@shipdesk.test"),
        "username": sub,
        "role": ["staff"],
        "permissions": ["shipments:read"],
        "iat": exp - 3600,
        "exp": exp,
    }))
}

/// In-process refresh endpoint with a call counter and a scripted outcome.
///
/// A gated backend parks every call until [`Notify::notify_one`] is called
/// on the gate.
pub struct ScriptedRefresh {
    calls: AtomicU32,
    outcome: Mutex<Result<RefreshResponse, AuthError>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedRefresh {
    pub fn ok(access: String, refresh: Option<&str>) -> Arc<Self> {
        Self::with(
            Ok(RefreshResponse { access_token: access, refresh_token: refresh.map(str::to_owned) }),
            None,
        )
    }

    pub fn failing(err: AuthError) -> Arc<Self> {
        Self::with(Err(err), None)
    }

    pub fn gated(access: String, gate: Arc<Notify>) -> Arc<Self> {
        Self::with(Ok(RefreshResponse { access_token: access, refresh_token: None }), Some(gate))
    }

    fn with(outcome: Result<RefreshResponse, AuthError>, gate: Option<Arc<Notify>>) -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0), outcome: Mutex::new(outcome), gate })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_outcome(&self, outcome: Result<RefreshResponse, AuthError>) {
        *self.outcome.lock() = outcome;
    }

    /// Yield until at least `n` calls were made, or give up after 5s.
    pub async fn wait_for_calls(&self, n: u32) -> bool {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while self.calls() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .is_ok()
    }
}

impl RefreshBackend for ScriptedRefresh {
    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RefreshResponse, AuthError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.gate {
                Some(gate) => gate.notified().await,
                None => tokio::task::yield_now().await,
            }
            self.outcome.lock().clone()
        })
    }
}

/// Assert that an expression returns `Err` whose message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
