use homefacts_core::{Deadline, EngineConfig, Orchestrator, PropertyQuery, SourceId};
use tracing::warn;

use crate::cli::LookupArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &LookupArgs, mut config: EngineConfig) -> Result<CommandResult, CliError> {
    let mut query = PropertyQuery::new(args.address.as_deref(), args.postcode.as_deref())?
        .with_strategy(args.strategy.into());
    if !args.sources.is_empty() {
        let sources = args
            .sources
            .iter()
            .map(|source| source.parse::<SourceId>())
            .collect::<Result<Vec<_>, _>>()?;
        query = query.with_sources(sources);
    }

    if let Some(deadline_ms) = args.deadline_ms {
        config.global_deadline_ms = deadline_ms;
        config.validate()?;
    }
    let orchestrator = Orchestrator::from_config(&config)?;

    let root = Deadline::after(config.global_deadline());
    let interrupt = root.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling lookup");
            interrupt.cancel();
        }
    });
    let outcome = orchestrator.lookup_with_deadline(&query, &root).await;
    watcher.abort();

    let mut data = serde_json::to_value(&outcome.response)?;
    if args.prediction_view {
        if let Some(record) = &outcome.response.canonical_record {
            data["prediction"] = serde_json::to_value(record.prediction_view())?;
        }
    }
    if args.audit {
        data["auditTrail"] = serde_json::to_value(&outcome.audit_trail)?;
    }

    Ok(CommandResult {
        data,
        success: outcome.response.success,
    })
}
