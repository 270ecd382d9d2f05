// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors surfaced by the session subsystem.
///
/// `Clone` because a single refresh outcome is fanned out to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Malformed token, or a response body that does not match the endpoint contract.
    #[error("decode failed: {0}")]
    Decode(String),
    /// Connectivity failure talking to the backend.
    #[error("network error: {0}")]
    Network(String),
    /// The server rejected the bearer token (HTTP 401).
    #[error("unauthorized: {0}")]
    Rejected(String),
    /// Bad login/register input, surfaced verbatim from the server.
    #[error("{0}")]
    Validation(String),
    /// Any other non-success HTTP status.
    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("no refresh token available")]
    NoRefreshToken,
    /// The refresh task went away without settling its waiters.
    #[error("token refresh aborted")]
    RefreshAborted,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) => ErrorKind::Decode,
            Self::Network(_) => ErrorKind::Network,
            Self::Rejected(_) => ErrorKind::Unauthorized,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Status { .. } => ErrorKind::Http,
            Self::NoRefreshToken | Self::RefreshAborted => ErrorKind::Unauthorized,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Map a transport-level reqwest failure.
    pub(crate) fn network(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Network(err.to_string())
    }
}

/// Machine-readable error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Decode,
    Network,
    Unauthorized,
    Validation,
    Http,
    Storage,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "DECODE",
            Self::Network => "NETWORK",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Validation => "VALIDATION",
            Self::Http => "HTTP",
            Self::Storage => "STORAGE",
            Self::Config => "CONFIG",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
