// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::io::Write;

use anyhow::{Context, Result};
use serde_json::json;
use valos_app_core::prefs::OutputFormat;

use super::{table, write_json, Env};
use crate::cli::KeyArgs;
use crate::keys::public_key_hex;

pub fn run(key: &KeyArgs, env: &Env<'_>, out: &mut dyn Write) -> Result<()> {
    let key = key
        .signing_key()?
        .context("pass --seed or --secret-hex")?;
    let public_key = public_key_hex(&key);
    let secret_hex = hex::encode(key.to_bytes());
    match env.format {
        OutputFormat::Json => write_json(
            out,
            &json!({ "publicKey": public_key, "secretHex": secret_hex }),
        ),
        OutputFormat::Table => {
            let mut table = table(vec!["Key", "Hex"]);
            table.add_row(vec!["public", public_key.as_str()]);
            table.add_row(vec!["secret", secret_hex.as_str()]);
            writeln!(out, "{table}")?;
            Ok(())
        }
    }
}
