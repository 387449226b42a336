// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command implementations. Every command writes its result to `out`.

mod author;
mod config;
mod keygen;
mod plot;
mod replay;

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde_json::Value;
use valos_app_core::config::ConfigService;
use valos_app_core::prefs::{ChroniclePrefs, OutputFormat};
use valos_config_fs::FsConfigStore;

use crate::cli::Command;

/// What every command may consult besides its own arguments.
pub struct Env<'a> {
    /// Effective output format.
    pub format: OutputFormat,
    /// Preference store, when the config directory could be opened.
    pub config: Option<&'a ConfigService<FsConfigStore>>,
    /// Loaded (or default) preferences.
    pub prefs: ChroniclePrefs,
}

/// Dispatches one command.
pub fn run(command: Command, env: &Env<'_>, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Plot(cmd) => plot::run(cmd, out),
        Command::Keygen(key) => keygen::run(&key, env, out),
        Command::Author(args) => author::run(&args, out),
        Command::Replay(args) => replay::run(&args, env, out),
        Command::Config(cmd) => config::run(cmd, env, out),
    }
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn write_json(out: &mut dyn Write, value: &Value) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}
