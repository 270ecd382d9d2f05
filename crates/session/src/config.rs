// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::error::AuthError;

/// Configuration for an authenticated session.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the REST backend.
    #[arg(long, default_value = "http://127.0.0.1:3000/api", env = "SHIPDESK_API_URL")]
    pub api_url: String,

    /// File holding the persisted token pair. Defaults to `<state dir>/tokens.json`.
    #[arg(long, env = "SHIPDESK_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Seconds before `exp` at which a token already counts as expired.
    #[arg(long, default_value_t = 5, env = "SHIPDESK_EXPIRY_BUFFER_SECS")]
    pub expiry_buffer_secs: u64,

    /// Remaining lifetime at or below which a refresh starts immediately.
    #[arg(long, default_value_t = 10, env = "SHIPDESK_EARLY_REFRESH_SECS")]
    pub early_refresh_secs: u64,

    /// How long before expiry the proactive refresh fires.
    #[arg(long, default_value_t = 300, env = "SHIPDESK_REFRESH_LEAD_SECS")]
    pub refresh_lead_secs: u64,

    /// Per-request HTTP timeout in milliseconds.
    #[arg(long, default_value_t = 30000, env = "SHIPDESK_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,
}

impl SessionConfig {
    /// Defaults pointed at `api_url`, ignoring the environment.
    pub fn for_api(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token_file: None,
            expiry_buffer_secs: 5,
            early_refresh_secs: 10,
            refresh_lead_secs: 300,
            request_timeout_ms: 30000,
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.api_url.trim().is_empty() {
            return Err(AuthError::Config("--api-url must not be empty".into()));
        }
        if self.expiry_buffer_secs == 0 {
            return Err(AuthError::Config("--expiry-buffer-secs must be greater than zero".into()));
        }
        if self.refresh_lead_secs <= self.early_refresh_secs {
            return Err(AuthError::Config(
                "--refresh-lead-secs must be greater than --early-refresh-secs".into(),
            ));
        }
        Ok(())
    }

    pub fn expiry_buffer(&self) -> Duration {
        Duration::from_secs(self.expiry_buffer_secs)
    }

    pub fn early_refresh(&self) -> Duration {
        Duration::from_secs(self.early_refresh_secs)
    }

    pub fn refresh_lead(&self) -> Duration {
        Duration::from_secs(self.refresh_lead_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Where the token pair is persisted.
    pub fn token_path(&self) -> PathBuf {
        self.token_file.clone().unwrap_or_else(|| state_dir().join("tokens.json"))
    }
}

/// Resolve the state directory for persisted session data.
///
/// `$SHIPDESK_STATE_DIR`, then `$XDG_STATE_HOME/shipdesk`, then
/// `$HOME/.local/state/shipdesk`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SHIPDESK_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("shipdesk");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/shipdesk");
    }
    PathBuf::from(".shipdesk")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
