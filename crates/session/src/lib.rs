// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated session and token refresh for the shipdesk REST backend.

use std::sync::Once;

pub mod api;
pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod pipeline;
pub mod principal;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod store;
pub mod test_support;

pub use api::{AuthApi, RefreshBackend};
pub use claims::{claim, decode, Claims};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::{AuthError, ErrorKind};
pub use events::{LogoutReason, SessionEvent};
pub use expiry::ExpiryPolicy;
pub use pipeline::AuthClient;
pub use principal::Principal;
pub use session::{Session, SessionBuilder, SessionState};
pub use storage::{FileStorage, MemoryStorage, TokenStorage};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
