// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `valos`: developer CLI over the chronicle core.
//!
//! Converts plots, authors signed event logs and replays logs through a fresh
//! chronicle. Preferences load best-effort from the config directory; flags
//! override them.

mod cli;
mod commands;
mod keys;

use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use valos_app_core::config::ConfigService;
use valos_app_core::prefs::{ChroniclePrefs, PREFS_KEY};
use valos_config_fs::FsConfigStore;

use crate::cli::Cli;
use crate::commands::Env;

fn open_config(dir: Option<&Path>) -> Option<ConfigService<FsConfigStore>> {
    let store = match dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    store.map(ConfigService::new).ok()
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config (best-effort)
    let config = open_config(cli.config_dir.as_deref());
    let prefs: ChroniclePrefs = config
        .as_ref()
        .and_then(|c| c.load(PREFS_KEY).ok().flatten())
        .unwrap_or_default();
    init_tracing(&prefs.log_filter);

    let env = Env {
        format: cli.format.map_or(prefs.output, Into::into),
        config: config.as_ref(),
        prefs,
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    commands::run(cli.command, &env, &mut out)?;
    out.flush()?;
    Ok(())
}
