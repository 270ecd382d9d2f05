// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod cli;
pub mod commands;

pub use cli::{init_tracing, Cli, Command};
pub use commands::run;
