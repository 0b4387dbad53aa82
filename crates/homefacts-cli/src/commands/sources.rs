use serde::Serialize;

use homefacts_core::{AdapterRegistry, EngineConfig, PoolStats, SourceId, Tier};

use crate::cli::SourcesArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceStatus {
    id: SourceId,
    tier: Tier,
    enabled: bool,
    requires_postcode: bool,
    requires_identity: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<SourceDetails>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceDetails {
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requests_per_minute: Option<u32>,
    credential_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity_pool: Option<PoolStats>,
}

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceStatus>,
}

pub fn run(args: &SourcesArgs, config: &EngineConfig) -> Result<CommandResult, CliError> {
    let registry = AdapterRegistry::from_config(config)?;

    let sources = config
        .sources
        .iter()
        .map(|source| {
            let registered = registry.get(source.id);
            let descriptor = registered.map(|entry| entry.descriptor());
            let tier = descriptor.map_or(source.id.default_tier(), |d| d.tier);

            SourceStatus {
                id: source.id,
                tier,
                enabled: source.enabled,
                requires_postcode: descriptor.is_some_and(|d| d.requires_postcode),
                requires_identity: tier.requires_identity(),
                details: args.verbose.then(|| SourceDetails {
                    timeout_ms: source.timeout_ms,
                    base_url: source.base_url.clone(),
                    requests_per_minute: source.requests_per_minute,
                    credential_configured: source.credential.is_some(),
                    identity_pool: registered
                        .and_then(|entry| entry.identity_pool())
                        .map(|pool| pool.stats()),
                }),
            }
        })
        .collect::<Vec<_>>();

    let data = serde_json::to_value(SourcesResponseData { sources })?;
    Ok(CommandResult::ok(data))
}
