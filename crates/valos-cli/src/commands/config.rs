// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::io::Write;

use anyhow::{Context, Result};
use valos_app_core::prefs::{ChroniclePrefs, OutputFormat, PREFS_KEY};
use valos_chronicle::ChronicleConfig;

use super::{table, write_json, Env};
use crate::cli::{ConfigCommand, ConfigSetArgs};

pub fn run(command: ConfigCommand, env: &Env<'_>, out: &mut dyn Write) -> Result<()> {
    let service = env.config.context("config directory is unavailable")?;
    match command {
        ConfigCommand::Show => show(&env.prefs, env.format, out),
        ConfigCommand::Set(args) => {
            if let Some(id) = &args.chronicle_id {
                ChronicleConfig::new(id.as_str()).validate()?;
            }
            let prefs = service.update(PREFS_KEY, |prefs: &mut ChroniclePrefs| {
                apply(prefs, args);
                prefs.clone()
            })?;
            show(&prefs, env.format, out)
        }
        ConfigCommand::Reset => {
            service.remove(PREFS_KEY)?;
            show(&ChroniclePrefs::default(), env.format, out)
        }
    }
}

fn apply(prefs: &mut ChroniclePrefs, args: ConfigSetArgs) {
    if let Some(id) = args.chronicle_id {
        prefs.chronicle_id = id;
    }
    if let Some(required) = args.require_authored_events {
        prefs.require_authored_events = required;
    }
    if let Some(output) = args.output {
        prefs.output = output.into();
    }
    if let Some(filter) = args.log_filter {
        prefs.log_filter = filter;
    }
}

fn show(prefs: &ChroniclePrefs, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(out, &serde_json::to_value(prefs)?),
        OutputFormat::Table => {
            let mut rows = table(vec!["Preference", "Value"]);
            rows.add_row(vec!["chronicleId", prefs.chronicle_id.as_str()]);
            rows.add_row(vec![
                "requireAuthoredEvents",
                if prefs.require_authored_events { "true" } else { "false" },
            ]);
            rows.add_row(vec![
                "output",
                match prefs.output {
                    OutputFormat::Table => "table",
                    OutputFormat::Json => "json",
                },
            ]);
            rows.add_row(vec!["logFilter", prefs.log_filter.as_str()]);
            writeln!(out, "{rows}")?;
            Ok(())
        }
    }
}
