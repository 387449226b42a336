// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use ed25519_dalek::SigningKey;
use serde_json::{json, Value};
use tracing::info;
use valos_chronicle::ident::hash_from_hex;
use valos_chronicle::plot::is_valid_resource_id;
use valos_chronicle::{sign_envelope, ChainState, EventEnvelope};

use super::read_json;
use crate::cli::AuthorArgs;
use crate::keys::public_key_hex;

pub fn run(args: &AuthorArgs, out: &mut dyn Write) -> Result<()> {
    let Value::Array(mut deltas) = read_json(&args.deltas)? else {
        bail!("{} must hold a JSON array of deltas", args.deltas.display());
    };
    let key = args.key.signing_key()?;
    let signer = match (&args.identity, key) {
        (Some(identity), Some(key)) => Some((identity.as_str(), key)),
        (None, None) => None,
        (None, Some(_)) => bail!("signing needs --identity"),
        (Some(_), None) => bail!("--identity needs --seed or --secret-hex"),
    };
    if args.bootstrap {
        let Some((identity, key)) = &signer else {
            bail!("--bootstrap needs a signing identity");
        };
        deltas.insert(0, bootstrap_delta(identity, key)?);
    }

    let (mut index, mut chain) = match &args.after {
        Some(path) => resume_point(path)?,
        None => (0, ChainState::genesis()),
    };
    let mut log = Vec::with_capacity(deltas.len());
    for delta in deltas {
        ensure!(delta.is_object(), "event {index}: a delta must be a JSON object");
        let mut envelope = EventEnvelope::new(index, format!("cmd-{index}"), delta);
        if let Some((identity, key)) = &signer {
            let link = sign_envelope(&mut envelope, identity, key, &chain)?;
            chain = chain.advanced(link);
        }
        log.push(envelope);
        index += 1;
    }
    info!(events = log.len(), signed = signer.is_some(), "authored log");

    match &args.out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &log)?;
            writeln!(writer)?;
            writer.flush()?;
        }
        None => {
            serde_json::to_writer_pretty(&mut *out, &log)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Registers `identity` and makes it the first director.
fn bootstrap_delta(identity: &str, key: &SigningKey) -> Result<Value> {
    let resource = format!("identity-{identity}");
    ensure!(
        is_valid_resource_id(&resource),
        "identity '{identity}' does not form a valid resource id"
    );
    Ok(json!({
        "&+": {
            resource.as_str(): {
                "@type": "Identity",
                "publicIdentity": identity,
                "publicKey": public_key_hex(key),
            },
        },
        "directors": [{ "@id": format!("~{resource}") }],
    }))
}

/// Next index and chain position after the log at `path`.
fn resume_point(path: &Path) -> Result<(u64, ChainState)> {
    let log: Vec<EventEnvelope> = serde_json::from_value(read_json(path)?)
        .with_context(|| format!("{} is not an event log", path.display()))?;
    let next = log.last().map_or(0, |last| last.index() + 1);
    let chain = log
        .iter()
        .rev()
        .find_map(|envelope| {
            let author = envelope.author.as_ref()?;
            Some((envelope.index(), author.chain_hash.as_str()))
        })
        .map_or(Ok(ChainState::genesis()), |(index, hash)| {
            hash_from_hex(hash)
                .map(|last_chain_hash| ChainState {
                    last_author_index: Some(index),
                    last_chain_hash,
                })
                .with_context(|| format!("event {index} has a malformed chain hash"))
        })?;
    Ok((next, chain))
}
