// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// `logout()` was called.
    UserRequested,
    /// The refresh endpoint failed or no refresh token was held.
    RefreshFailed,
    /// A replayed request was rejected again after a refresh.
    Rejected,
    /// The stored access token could not be decoded.
    InvalidToken,
    /// The access token expired and there was no refresh token to renew it.
    Expired,
}

/// Events broadcast by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { subject: Option<String> },
    TokenRefreshed { rotated: bool },
    /// The proactive timer was armed.
    RefreshScheduled { delay: Duration },
    /// A refresh failed; the session has been torn down.
    RefreshFailed { error: String },
    LoggedOut { reason: LogoutReason },
    /// The in-memory session changed but storage could not follow.
    PersistFailed { error: String },
}
