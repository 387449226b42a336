// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use valos_app_core::prefs::OutputFormat;

/// Valos chronicle developer tool.
#[derive(Parser, Debug)]
#[command(name = "valos", version, about, long_about = None)]
pub struct Cli {
    /// Output format (overrides the saved preference).
    #[arg(long, global = true, value_enum)]
    pub format: Option<FormatArg>,

    /// Directory holding saved preferences (defaults to the platform config dir).
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// `--format` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// Human-readable tables.
    Table,
    /// JSON documents.
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Table => Self::Table,
            FormatArg::Json => Self::Json,
        }
    }
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert between plot strings and outlines.
    #[command(subcommand)]
    Plot(PlotCommand),
    /// Derive an Ed25519 author key and print its public half.
    Keygen(KeyArgs),
    /// Wrap a JSON array of deltas into a gapless, optionally signed event log.
    Author(AuthorArgs),
    /// Replay an event log through a fresh chronicle and report every event.
    Replay(ReplayArgs),
    /// Show or change saved preferences.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// `valos plot ...`
#[derive(Subcommand, Debug)]
pub enum PlotCommand {
    /// Parse a plot string into its normalized outline (JSON).
    Disjoin {
        /// Plot string, e.g. `@.:a%20b@@`.
        plot: String,
        /// IRI table as JSON, e.g. `{"0": "https://valospace.org/0#"}`.
        #[arg(long)]
        context: Option<String>,
    },
    /// Render an outline (JSON) or plot string in canonical string form.
    Form {
        /// Outline JSON such as `["@.", "a"]`, or a plot string.
        outline: String,
    },
}

/// Author key selection. Without either flag events stay unsigned.
#[derive(Args, Debug, Default, Clone)]
#[group(multiple = false)]
pub struct KeyArgs {
    /// Derive the secret key from this passphrase.
    #[arg(long)]
    pub seed: Option<String>,
    /// Secret key as 64 hex digits.
    #[arg(long)]
    pub secret_hex: Option<String>,
}

/// `valos author ...`
#[derive(Args, Debug)]
pub struct AuthorArgs {
    /// JSON file holding an array of delta objects.
    pub deltas: PathBuf,
    /// Public identity to sign as.
    #[arg(long)]
    pub identity: Option<String>,
    /// Signing key.
    #[command(flatten)]
    pub key: KeyArgs,
    /// Prepend an event registering the identity as the first director.
    #[arg(long)]
    pub bootstrap: bool,
    /// Continue an existing log: start after its last index and extend its hash chain.
    #[arg(long)]
    pub after: Option<PathBuf>,
    /// Write the log here instead of stdout.
    #[arg(long, short)]
    pub out: Option<PathBuf>,
}

/// `valos replay ...`
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON file holding an array of event envelopes.
    pub log: PathBuf,
    /// Chronicle id (raw id of the root resource).
    #[arg(long)]
    pub chronicle_id: Option<String>,
    /// Start with `requireAuthoredEvents` set on the root.
    #[arg(long)]
    pub require_authored_events: bool,
    /// Also print the final state.
    #[arg(long)]
    pub show_state: bool,
}

/// `valos config ...`
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the saved preferences.
    Show,
    /// Change saved preferences.
    Set(ConfigSetArgs),
    /// Remove saved preferences.
    Reset,
}

/// `valos config set ...`
#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    /// Default chronicle id.
    #[arg(long)]
    pub chronicle_id: Option<String>,
    /// Default for `requireAuthoredEvents` on replay.
    #[arg(long)]
    pub require_authored_events: Option<bool>,
    /// Default output format.
    #[arg(long, value_enum)]
    pub output: Option<FormatArg>,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long)]
    pub log_filter: Option<String>,
}
