//! Strategy execution over the adapter registry.
//!
//! - **Priority**: adapters run strictly in plan order. The first success
//!   ends the sequence; every later adapter is recorded as `Skipped`.
//! - **All**: every adapter runs concurrently, at most `max_in_flight` at a
//!   time, under one shared deadline. Calls still running when the deadline
//!   passes are cancelled and recorded as `Timeout`.
//!
//! Both strategies derive every call deadline, retry sleep, rate-limit wait
//! and identity checkout from the lookup's root [`Deadline`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterDescriptor, FetchContext, SourceResult};
use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::envelope::{FailureRecord, LookupResponse, ResponseMeta};
use crate::error::ConfigError;
use crate::evasion::CheckoutError;
use crate::http_client::HttpErrorKind;
use crate::reconcile::Reconciler;
use crate::registry::{AdapterRegistry, RegisteredAdapter};
use crate::reliability::ReliabilityTracker;
use crate::retry::{retry_with_backoff, RetryConfig, RetryOutcome};
use crate::{PropertyQuery, SourceId, Strategy};

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Budget for the whole lookup, across every adapter and retry.
    pub global_deadline: Duration,
    pub retry: RetryConfig,
    /// Concurrency limit for the all-sources strategy.
    pub max_in_flight: usize,
    /// How long past the deadline the all-sources strategy waits for
    /// cancelled calls to unwind before abandoning them.
    pub cancellation_grace: Duration,
    /// Demote repeatedly failing adapters behind their equal-tier peers.
    pub adaptive_tiebreak: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            global_deadline: Duration::from_secs(30),
            retry: RetryConfig::default(),
            max_in_flight: 4,
            cancellation_grace: Duration::from_millis(250),
            adaptive_tiebreak: true,
        }
    }
}

/// Response envelope plus every `SourceResult` produced along the way,
/// failed retry attempts included.
#[derive(Debug, Clone)]
pub struct LookupOutcome {
    pub response: LookupResponse,
    pub audit_trail: Vec<SourceResult>,
}

/// What happened to one planned adapter.
#[derive(Debug)]
struct Slot {
    descriptor: AdapterDescriptor,
    attempts: Vec<SourceResult>,
    skipped: bool,
}

impl Slot {
    fn finished(descriptor: AdapterDescriptor, outcome: RetryOutcome<SourceResult>) -> Self {
        let mut attempts = outcome.failed_attempts;
        attempts.push(outcome.last);
        Self {
            descriptor,
            attempts,
            skipped: false,
        }
    }

    fn skipped(descriptor: AdapterDescriptor) -> Self {
        Self {
            descriptor,
            attempts: Vec::new(),
            skipped: true,
        }
    }

    fn not_invoked(descriptor: AdapterDescriptor, deadline: &Deadline) -> Self {
        let detail = if deadline.is_cancelled() && deadline.remaining() > Duration::ZERO {
            "not invoked: lookup was cancelled"
        } else {
            "not invoked before the global deadline"
        };
        Self {
            attempts: vec![SourceResult::timeout(&descriptor, detail)],
            descriptor,
            skipped: false,
        }
    }

    fn success(&self) -> Option<&SourceResult> {
        self.attempts.last().filter(|result| result.is_success())
    }

    fn failure_record(&self) -> Option<FailureRecord> {
        let id = self.descriptor.id;
        let tier = self.descriptor.tier;
        if self.skipped {
            return Some(FailureRecord::skipped(
                id,
                tier,
                "a higher-priority source already succeeded",
            ));
        }
        if self.success().is_some() {
            return None;
        }
        Some(FailureRecord::from_attempts(id, tier, &self.attempts))
    }
}

/// Per-call machinery shared with spawned tasks.
#[derive(Clone)]
struct Invoker {
    retry: RetryConfig,
    reliability: Arc<ReliabilityTracker>,
}

impl Invoker {
    async fn invoke(
        &self,
        query: &PropertyQuery,
        entry: &RegisteredAdapter,
        deadline: &Deadline,
    ) -> RetryOutcome<SourceResult> {
        retry_with_backoff(
            &self.retry,
            deadline,
            |attempt| self.invoke_once(query, entry, deadline, attempt),
            |result: &SourceResult| result.status().is_transient(),
        )
        .await
    }

    async fn invoke_once(
        &self,
        query: &PropertyQuery,
        entry: &RegisteredAdapter,
        parent: &Deadline,
        attempt: u32,
    ) -> SourceResult {
        let descriptor = entry.descriptor();
        let call = parent.child(entry.timeout());

        let mut result = Self::call(query, entry, &call).await;
        if result.source_id() != descriptor.id || result.tier() != descriptor.tier {
            warn!(
                source = %descriptor.id,
                reported = %result.source_id(),
                "adapter mislabelled its result"
            );
            result = SourceResult::protocol_error(
                &descriptor,
                format!("adapter reported source '{}'", result.source_id()),
            );
        }

        self.reliability.record(descriptor.id, result.status());
        debug!(
            source = %descriptor.id,
            attempt,
            status = result.status().as_str(),
            "adapter attempt finished"
        );
        result
    }

    async fn call(query: &PropertyQuery, entry: &RegisteredAdapter, call: &Deadline) -> SourceResult {
        let descriptor = entry.descriptor();

        if let Some(gate) = entry.rate_gate() {
            if let Err(interrupted) = gate.acquire(call).await {
                return SourceResult::timeout(
                    &descriptor,
                    format!("waiting for rate budget: {interrupted}"),
                );
            }
        }

        let mut lease = match entry.identity_pool() {
            Some(pool) => match pool.checkout(call).await {
                Ok(lease) => Some(lease),
                Err(error) => return checkout_failure(&descriptor, error),
            },
            None => None,
        };

        let ctx = FetchContext::new(call.clone());
        let ctx = match lease.as_mut() {
            Some(lease) => ctx.with_identity(lease),
            None => ctx,
        };

        match call.run(entry.adapter().fetch(query, ctx)).await {
            Ok(Ok(result)) => result,
            Ok(Err(fault)) => {
                warn!(source = %descriptor.id, error = %fault, "adapter fault");
                SourceResult::protocol_error(&descriptor, fault.to_string())
            }
            Err(interrupted) => SourceResult::timeout(&descriptor, interrupted.to_string()),
        }
    }
}

fn checkout_failure(descriptor: &AdapterDescriptor, error: CheckoutError) -> SourceResult {
    let detail = error.to_string();
    match error {
        CheckoutError::NoCapacity { .. } => SourceResult::no_capacity(descriptor, detail),
        CheckoutError::Interrupted(_) => SourceResult::timeout(descriptor, detail),
        CheckoutError::WarmupBlocked { .. } => SourceResult::blocked(descriptor, detail),
        CheckoutError::WarmupFailed(error) if error.kind() == HttpErrorKind::Timeout => {
            SourceResult::timeout(descriptor, detail)
        }
        CheckoutError::WarmupFailed(_) => SourceResult::protocol_error(descriptor, detail),
    }
}

/// Runs lookups against a shared [`AdapterRegistry`].
pub struct Orchestrator {
    registry: Arc<AdapterRegistry>,
    reconciler: Reconciler,
    config: OrchestratorConfig,
    reliability: Arc<ReliabilityTracker>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        reconciler: Reconciler,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            reconciler,
            config,
            reliability: Arc::new(ReliabilityTracker::new()),
        }
    }

    /// Production orchestrator for every enabled source in `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let registry = AdapterRegistry::from_config(config)?;
        Ok(Self::new(
            Arc::new(registry),
            Reconciler::new(config.reconciler_config()),
            config.orchestrator_config(),
        ))
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn reliability(&self) -> &ReliabilityTracker {
        &self.reliability
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn lookup(&self, query: &PropertyQuery) -> LookupOutcome {
        let root = Deadline::after(self.config.global_deadline);
        self.lookup_with_deadline(query, &root).await
    }

    /// Runs `query` under `parent`; cancelling `parent` cancels every
    /// outstanding adapter call and identity wait.
    pub async fn lookup_with_deadline(
        &self,
        query: &PropertyQuery,
        parent: &Deadline,
    ) -> LookupOutcome {
        let started = Instant::now();
        let deadline = parent.child(self.config.global_deadline);

        let tracker = self.config.adaptive_tiebreak.then_some(&*self.reliability);
        let plan = self.registry.plan(query, tracker);
        let mut warnings: Vec<String> = plan.excluded.into_iter().map(|(_, reason)| reason).collect();
        if plan.entries.is_empty() {
            warnings.push(String::from("no configured source can serve this query"));
        }

        let slots = match query.strategy() {
            Strategy::Priority => self.run_priority(query, &plan.entries, &deadline).await,
            Strategy::All => self.run_all(query, plan.entries, &deadline).await,
        };
        deadline.cancel();

        let sources_queried: Vec<SourceId> = slots.iter().map(|slot| slot.descriptor.id).collect();
        let successes: Vec<SourceResult> = slots
            .iter()
            .filter_map(Slot::success)
            .cloned()
            .collect();
        let failed_sources: Vec<FailureRecord> =
            slots.iter().filter_map(Slot::failure_record).collect();
        let canonical_record = self.reconciler.reconcile(&successes);

        let latency_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
        info!(
            strategy = query.strategy().as_str(),
            queried = sources_queried.len(),
            succeeded = successes.len(),
            failed = failed_sources.len(),
            latency_ms,
            "lookup finished"
        );

        let response = LookupResponse::new(
            canonical_record,
            failed_sources,
            sources_queried,
            successes.len(),
            warnings,
            ResponseMeta::new(query.strategy(), latency_ms),
        );
        LookupOutcome {
            response,
            audit_trail: slots.into_iter().flat_map(|slot| slot.attempts).collect(),
        }
    }

    fn invoker(&self) -> Invoker {
        Invoker {
            retry: self.config.retry.clone(),
            reliability: Arc::clone(&self.reliability),
        }
    }

    async fn run_priority(
        &self,
        query: &PropertyQuery,
        entries: &[RegisteredAdapter],
        deadline: &Deadline,
    ) -> Vec<Slot> {
        let invoker = self.invoker();
        let mut slots = Vec::with_capacity(entries.len());
        let mut satisfied = false;

        for entry in entries {
            let descriptor = entry.descriptor();
            if satisfied {
                invoker.reliability.record_passed_over(descriptor.id);
                slots.push(Slot::skipped(descriptor));
                continue;
            }
            if deadline.is_expired() {
                slots.push(Slot::not_invoked(descriptor, deadline));
                continue;
            }

            let outcome = invoker.invoke(query, entry, deadline).await;
            satisfied = outcome.last.is_success();
            slots.push(Slot::finished(descriptor, outcome));
        }
        slots
    }

    async fn run_all(
        &self,
        query: &PropertyQuery,
        entries: Vec<RegisteredAdapter>,
        deadline: &Deadline,
    ) -> Vec<Slot> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let query = Arc::new(query.clone());
        let mut tasks = JoinSet::new();

        for (index, entry) in entries.iter().cloned().enumerate() {
            let invoker = self.invoker();
            let semaphore = Arc::clone(&semaphore);
            let query = Arc::clone(&query);
            let deadline = deadline.clone();
            tasks.spawn(async move {
                let Ok(Ok(permit)) = deadline.run(semaphore.acquire_owned()).await else {
                    return (index, None);
                };
                let outcome = invoker.invoke(&query, &entry, &deadline).await;
                drop(permit);
                (index, Some(outcome))
            });
        }

        let mut outcomes: Vec<Option<RetryOutcome<SourceResult>>> =
            entries.iter().map(|_| None).collect();
        let cutoff = deadline.instant() + self.config.cancellation_grace;
        loop {
            match timeout_at(cutoff, tasks.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => outcomes[index] = outcome,
                Ok(Some(Err(error))) => warn!(%error, "adapter task failed"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        outstanding = tasks.len(),
                        "abandoning adapter calls past the cancellation grace"
                    );
                    deadline.cancel();
                    tasks.abort_all();
                    break;
                }
            }
        }

        entries
            .iter()
            .zip(outcomes)
            .map(|(entry, outcome)| match outcome {
                Some(outcome) => Slot::finished(entry.descriptor(), outcome),
                None if deadline.is_expired() => Slot::not_invoked(entry.descriptor(), deadline),
                None => Slot {
                    descriptor: entry.descriptor(),
                    attempts: vec![SourceResult::protocol_error(
                        &entry.descriptor(),
                        "adapter task ended without a result",
                    )],
                    skipped: false,
                },
            })
            .collect()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sources", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpError;
    use crate::Tier;

    #[test]
    fn checkout_failures_map_to_statuses() {
        let descriptor = AdapterDescriptor::new(SourceId::Zoopla, false);
        let cases = [
            (
                CheckoutError::NoCapacity {
                    source_id: SourceId::Zoopla,
                },
                crate::adapter::FetchStatus::NoCapacity,
            ),
            (
                CheckoutError::WarmupBlocked {
                    reason: String::from("captcha"),
                },
                crate::adapter::FetchStatus::Blocked,
            ),
            (
                CheckoutError::WarmupFailed(HttpError::timeout("slow")),
                crate::adapter::FetchStatus::Timeout,
            ),
            (
                CheckoutError::WarmupFailed(HttpError::new("reset")),
                crate::adapter::FetchStatus::ProtocolError,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(checkout_failure(&descriptor, error).status(), expected);
        }
    }

    #[test]
    fn skipped_slot_yields_skipped_record() {
        let descriptor = AdapterDescriptor::new(SourceId::Rightmove, false);
        let record = Slot::skipped(descriptor).failure_record().expect("record");
        assert_eq!(record.status, crate::envelope::FailureKind::Skipped);
        assert_eq!(record.tier, Tier::Scraped);
    }
}
