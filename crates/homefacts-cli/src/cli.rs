//! CLI argument definitions for homefacts.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lookup` | Acquire and reconcile facts for one property |
//! | `sources` | List configured sources and their tiers |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$HOMEFACTS_CONFIG` | JSON engine configuration file |
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! # Every source at once, best-effort union
//! homefacts lookup --postcode "SW1A 1AA" --address "10 Downing Street"
//!
//! # Stop at the first source that answers
//! homefacts lookup --postcode HG31EN --strategy priority --pretty
//!
//! # Only the official registry, with the per-attempt audit trail
//! homefacts lookup --postcode "E1 6AN" --source land_registry --audit
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use homefacts_core::Strategy;

/// homefacts - multi-source UK property facts
///
/// Queries official registries, listing portals and browser-rendered
/// fallbacks, then reconciles their answers into one record with
/// field-level provenance and confidence.
#[derive(Debug, Parser)]
#[command(
    name = "homefacts",
    author,
    version,
    about = "Multi-source UK property facts with provenance"
)]
pub struct Cli {
    /// Engine configuration file (JSON). Environment overrides still apply.
    #[arg(long, global = true, env = "HOMEFACTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Table,
    /// Single JSON object output.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Sequential fallback, stopping at the first success.
    Priority,
    /// Bounded fan-out across every source.
    All,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Priority => Self::Priority,
            StrategyArg::All => Self::All,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Look up one property.
    ///
    /// Exits with code 3 when no source produced data; the failure envelope
    /// is still printed.
    ///
    /// # Examples
    ///
    ///   homefacts lookup --postcode "SW1A 1AA"
    ///   homefacts lookup --address "12 Mill Lane, Harrogate" --strategy priority
    Lookup(LookupArgs),

    /// List configured sources.
    Sources(SourcesArgs),
}

/// Arguments for the `lookup` command.
#[derive(Debug, Args)]
pub struct LookupArgs {
    /// Free-text address; a leading house number narrows registry searches.
    #[arg(long)]
    pub address: Option<String>,

    /// UK postcode, with or without the space.
    #[arg(long)]
    pub postcode: Option<String>,

    #[arg(long, value_enum, default_value_t = StrategyArg::All)]
    pub strategy: StrategyArg,

    /// Restrict the lookup to these sources (repeatable).
    #[arg(long = "source", value_name = "SOURCE")]
    pub sources: Vec<String>,

    /// Override the global deadline for this lookup.
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Include every per-attempt source result.
    #[arg(long, default_value_t = false)]
    pub audit: bool,

    /// Include the flat field view consumed by price models.
    #[arg(long, default_value_t = false)]
    pub prediction_view: bool,
}

/// Arguments for the `sources` command.
#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Include timeouts, rate limits and identity pool state.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}
