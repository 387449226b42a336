// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::io::Write;

use anyhow::{Context, Result};
use serde_json::Value;
use valos_chronicle::{disjoin, form, IriLookup};

use crate::cli::PlotCommand;

pub fn run(command: PlotCommand, out: &mut dyn Write) -> Result<()> {
    match command {
        PlotCommand::Disjoin { plot, context } => {
            let mut lookup = IriLookup::new();
            if let Some(context) = context {
                let context: Value =
                    serde_json::from_str(&context).context("--context is not valid JSON")?;
                lookup.merge_context(&context)?;
            }
            let outline = disjoin(&Value::String(plot), &lookup)?;
            writeln!(out, "{}", serde_json::to_string(&outline)?)?;
        }
        PlotCommand::Form { outline } => {
            let outline = match serde_json::from_str::<Value>(&outline) {
                Ok(parsed @ Value::Array(_)) => parsed,
                _ => Value::String(outline),
            };
            writeln!(out, "{}", form(&outline)?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn capture(command: PlotCommand) -> String {
        let mut out = Vec::new();
        run(command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn form_accepts_outlines_and_strings() {
        let from_outline = capture(PlotCommand::Form {
            outline: r#"["@.", "a b"]"#.into(),
        });
        let from_string = capture(PlotCommand::Form {
            outline: "@.:a%20b".into(),
        });
        assert_eq!(from_outline, from_string);
        assert!(from_outline.trim_end().ends_with("@@"));
    }

    #[test]
    fn disjoin_prints_compact_json() {
        let text = capture(PlotCommand::Disjoin {
            plot: "@.:a%20b@@".into(),
            context: None,
        });
        assert_eq!(text, "[\"@.\",\"a b\"]\n");
    }
}
