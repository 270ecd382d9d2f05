// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expiry decisions over decoded claims.

use std::sync::Arc;
use std::time::Duration;

use crate::claims;
use crate::clock::Clock;
use crate::error::AuthError;

/// Default safety buffer subtracted from `exp` before a token counts as live.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(5);

/// Decides whether a token is expired and how long it has left.
///
/// Undecodable tokens and tokens without an `exp` claim are expired: an
/// ambiguous credential forces a refresh or logout instead of riding along
/// as if it were valid.
#[derive(Debug, Clone)]
pub struct ExpiryPolicy {
    buffer: Duration,
    clock: Arc<dyn Clock>,
}

impl ExpiryPolicy {
    /// The buffer must be non-zero, otherwise a token can lapse between the
    /// local check and the server's.
    pub fn new(buffer: Duration, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        if buffer.is_zero() {
            return Err(AuthError::Config("expiry buffer must be greater than zero".into()));
        }
        Ok(Self { buffer, clock })
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn is_expired(&self, token: &str) -> bool {
        self.is_expired_within(token, self.buffer)
    }

    /// Expiry check with an explicit buffer instead of the configured one.
    pub fn is_expired_within(&self, token: &str, buffer: Duration) -> bool {
        let Some(expires_at) = claims::decode(token).and_then(|c| c.expires_at_ms()) else {
            return true;
        };
        self.clock.now_ms() >= expires_at.saturating_sub(buffer.as_millis() as i64)
    }

    /// Whole seconds until expiry, floored at zero.
    pub fn remaining_secs(&self, token: &str) -> u64 {
        let Some(expires_at) = claims::decode(token).and_then(|c| c.expires_at_ms()) else {
            return 0;
        };
        let remaining = expires_at.saturating_sub(self.clock.now_ms()).div_euclid(1000);
        remaining.max(0) as u64
    }
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;
