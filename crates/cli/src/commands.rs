// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use shipdesk_session::{FileStorage, Session};

use crate::cli::{Cli, Command};

/// Run one subcommand against a session backed by the token file.
pub async fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    cli.session.validate()?;
    let token_path = cli.session.token_path();
    debug!(path = %token_path.display(), "opening token file");
    let storage = Arc::new(FileStorage::open(token_path)?);
    let session = Session::builder(cli.session).storage(storage).build()?;

    match cli.command {
        Command::Login { email, password } => {
            let principal = session.login(&email, &password).await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&principal)?)?;
        }
        Command::Register { email, password, username } => {
            let message = session.register(&email, &password, &username).await?;
            writeln!(out, "{}", message.unwrap_or_else(|| "registered".to_owned()))?;
        }
        Command::Whoami => {
            let report = json!({
                "state": session.state().as_str(),
                "remainingSecs": session.remaining_secs(),
                "principal": session.principal(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        }
        Command::Get { path, query } => {
            let body: Value = if query.is_empty() {
                session.client().get(&path).await?
            } else {
                session.client().get_with_query(&path, &query).await?
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
        }
        Command::Refresh => {
            session.refresh().await?;
            writeln!(out, "refreshed, expires in {}s", session.remaining_secs())?;
        }
        Command::Logout => {
            session.logout().await?;
            writeln!(out, "logged out")?;
        }
    }
    Ok(())
}
