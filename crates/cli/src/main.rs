// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use shipdesk::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.session.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    shipdesk::init_tracing(&cli);

    let mut stdout = std::io::stdout();
    if let Err(e) = shipdesk::run(cli, &mut stdout).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
