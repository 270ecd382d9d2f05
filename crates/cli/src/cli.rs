// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line surface of `shipdesk`.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shipdesk_session::SessionConfig;

#[derive(Debug, Parser)]
#[command(name = "shipdesk", version, about = "Authenticated shipdesk API client")]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionConfig,

    /// Log format (json or text).
    #[arg(long, env = "SHIPDESK_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level, used when RUST_LOG is unset.
    #[arg(long, env = "SHIPDESK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and persist the token pair
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SHIPDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SHIPDESK_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        username: String,
    },
    /// Show the logged-in principal
    Whoami,
    /// GET an API path with the session's credentials
    Get {
        path: String,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "query", short = 'q', value_parser = parse_pair)]
        query: Vec<(String, String)>,
    },
    /// Refresh the access token now
    Refresh,
    /// End the session and forget the token pair
    Logout,
}

/// Parse a `key=value` pair.
pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

/// Initialize tracing on stderr so stdout stays machine-readable.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match cli.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
