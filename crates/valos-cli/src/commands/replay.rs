// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::io::Write;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;
use valos_app_core::prefs::OutputFormat;
use valos_chronicle::{Chronicle, ChronicleConfig, EventEnvelope, SealedEvent, StateTree};

use super::{read_json, table, write_json, Env};
use crate::cli::ReplayArgs;

struct Row {
    index: u64,
    command_id: String,
    author: Option<String>,
    outcome: Result<(), String>,
}

impl Row {
    fn to_json(&self) -> Value {
        let mut row = json!({
            "index": self.index,
            "commandId": self.command_id,
            "author": self.author,
            "status": if self.outcome.is_ok() { "accepted" } else { "rejected" },
        });
        if let (Err(reason), Some(map)) = (&self.outcome, row.as_object_mut()) {
            map.insert("error".into(), Value::String(reason.clone()));
        }
        row
    }
}

pub fn run(args: &ReplayArgs, env: &Env<'_>, out: &mut dyn Write) -> Result<()> {
    let log: Vec<EventEnvelope> = serde_json::from_value(read_json(&args.log)?)
        .with_context(|| format!("{} is not an event log", args.log.display()))?;
    let config = ChronicleConfig::new(
        args.chronicle_id
            .clone()
            .unwrap_or_else(|| env.prefs.chronicle_id.clone()),
    )
    .with_require_authored_events(
        args.require_authored_events || env.prefs.require_authored_events,
    );
    let mut chronicle = Chronicle::new(config)?;

    let total = log.len();
    let mut rows = Vec::with_capacity(total);
    for envelope in log {
        let mut row = Row {
            index: envelope.index(),
            command_id: envelope.command.id.clone(),
            author: envelope.author.as_ref().map(|a| a.public_identity.clone()),
            outcome: Ok(()),
        };
        let result = chronicle.receive(envelope);
        let failed = result.is_err();
        row.outcome = result.map(|_| ()).map_err(|err| err.to_string());
        rows.push(row);
        if failed {
            break;
        }
    }
    let accepted = rows.iter().filter(|row| row.outcome.is_ok()).count();
    let state = chronicle.current_state();
    info!(chronicle = chronicle.id(), accepted, total, "replayed log");

    match env.format {
        OutputFormat::Json => {
            let mut report = json!({
                "chronicleId": chronicle.id(),
                "accepted": accepted,
                "total": total,
                "events": rows.iter().map(Row::to_json).collect::<Vec<_>>(),
                "sealed": chronicle.seal().map(SealedEvent::to_json),
            });
            if let (true, Some(map)) = (args.show_state, report.as_object_mut()) {
                map.insert("state".into(), state_json(&state));
            }
            write_json(out, &report)?;
        }
        OutputFormat::Table => {
            let mut events = table(vec!["Index", "Command", "Author", "Result"]);
            for row in &rows {
                events.add_row(vec![
                    row.index.to_string(),
                    row.command_id.clone(),
                    row.author.clone().unwrap_or_else(|| "-".into()),
                    match &row.outcome {
                        Ok(()) => "accepted".into(),
                        Err(reason) => reason.clone(),
                    },
                ]);
            }
            writeln!(out, "{events}")?;
            writeln!(out, "accepted {accepted} of {total} events")?;
            if let Some(seal) = chronicle.seal() {
                writeln!(
                    out,
                    "chronicle '{}' sealed at event {}: {}",
                    seal.chronicle_id, seal.invalid_antecedent_index, seal.invalidation_reason
                )?;
            }
            if args.show_state {
                writeln!(out, "{}", state_table(&state))?;
            }
        }
    }

    if accepted < total {
        bail!("log rejected after {accepted} of {total} events");
    }
    Ok(())
}

fn state_json(state: &StateTree) -> Value {
    Value::Array(state.iter().map(|node| node.to_json()).collect())
}

fn state_table(state: &StateTree) -> comfy_table::Table {
    let mut nodes = table(vec!["Raw id", "Type", "Fields"]);
    for node in state.iter() {
        let fields: serde_json::Map<String, Value> = node
            .fields()
            .map(|(term, value)| (term.to_string(), value.to_json()))
            .collect();
        nodes.add_row(vec![
            node.id().raw_id().to_string(),
            node.type_name().to_string(),
            Value::Object(fields).to_string(),
        ]);
    }
    nodes
}
