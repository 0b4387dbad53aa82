mod lookup;
mod sources;

use homefacts_core::EngineConfig;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    /// False when a lookup produced only the failure envelope.
    pub success: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            success: true,
        }
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let config = EngineConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Lookup(args) => lookup::run(args, config).await,
        Command::Sources(args) => sources::run(args, &config),
    }
}
