//! Shared test doubles: a scripted source adapter and a scripted HTTP transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use homefacts_core::{
    AdapterDescriptor, AdapterFault, AdapterRegistry, EvasionConfig, FetchContext, FetchFuture,
    FetchStatus, HttpClient, HttpError, HttpRequest, HttpResponse, IdentityPool, Observed,
    Orchestrator, OrchestratorConfig, PacingWindow, PropertyPayload, PropertyQuery, Reconciler,
    Registration, RetryConfig, SourceAdapter, SourceId, SourceResult,
};

/// Invocation order shared between several scripted adapters.
pub type CallLog = Arc<Mutex<Vec<SourceId>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// What one scripted call returns.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(PropertyPayload),
    Failure(FetchStatus),
    Fault,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Duration,
    pub outcome: Outcome,
}

impl Step {
    pub fn success(payload: PropertyPayload) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Outcome::Success(payload),
        }
    }

    pub fn failure(status: FetchStatus) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Outcome::Failure(status),
        }
    }

    pub fn fault() -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Outcome::Fault,
        }
    }

    /// A call that never answers within any realistic deadline.
    pub fn hang() -> Self {
        Self::failure(FetchStatus::NotFound).after(Duration::from_secs(3600))
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Concurrency high-water mark across every adapter sharing it.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Adapter that replays a fixed script, repeating the last step once the
/// script runs out.
pub struct ScriptedAdapter {
    descriptor: AdapterDescriptor,
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicUsize,
    log: Option<CallLog>,
    in_flight: Arc<InFlight>,
}

impl ScriptedAdapter {
    pub fn new(source: SourceId, steps: Vec<Step>) -> Self {
        let last = steps
            .last()
            .cloned()
            .unwrap_or_else(|| Step::failure(FetchStatus::NotFound));
        Self {
            descriptor: AdapterDescriptor::new(source, false),
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
            log: None,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn always(source: SourceId, step: Step) -> Self {
        Self::new(source, vec![step])
    }

    pub fn requiring_postcode(mut self) -> Self {
        self.descriptor.requires_postcode = true;
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().expect("script lock");
        match steps.pop_front() {
            Some(step) => {
                *self.last.lock().expect("script lock") = step.clone();
                step
            }
            None => self.last.lock().expect("script lock").clone(),
        }
    }
}

impl SourceAdapter for ScriptedAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        self.descriptor
    }

    fn fetch<'a>(&'a self, _query: &'a PropertyQuery, ctx: FetchContext<'a>) -> FetchFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(log) = &self.log {
                log.lock().expect("log lock").push(self.descriptor.id);
            }
            let _guard = self.in_flight.enter();

            if self.descriptor.requires_identity && ctx.identity.is_none() {
                return Err(AdapterFault::MissingIdentity {
                    source_id: self.descriptor.id,
                });
            }

            let step = self.next_step();
            if ctx.deadline.sleep(step.delay).await.is_err() {
                return Ok(SourceResult::timeout(&self.descriptor, "scripted call interrupted"));
            }

            match step.outcome {
                Outcome::Success(payload) => Ok(SourceResult::success(&self.descriptor, payload)),
                Outcome::Failure(status) => {
                    if status == FetchStatus::Blocked {
                        if let Some(lease) = ctx.identity {
                            lease.report_blocked();
                        }
                    }
                    Ok(SourceResult::failure(
                        &self.descriptor,
                        status,
                        format!("scripted {}", status.as_str()),
                    ))
                }
                Outcome::Fault => Err(AdapterFault::Transport(HttpError::connect(
                    "scripted connection refused",
                ))),
            }
        })
    }
}

/// Transport that replays queued responses, then repeats a fallback.
pub struct ScriptedHttpClient {
    queue: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    fallback: Result<HttpResponse, HttpError>,
    delay: Duration,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn always(response: HttpResponse) -> Self {
        Self::sequence(Vec::new(), Ok(response))
    }

    pub fn failing(error: HttpError) -> Self {
        Self::sequence(Vec::new(), Err(error))
    }

    pub fn sequence(
        responses: Vec<Result<HttpResponse, HttpError>>,
        fallback: Result<HttpResponse, HttpError>,
    ) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            fallback,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("request lock").clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.url)
            .collect()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.requests.lock().expect("request lock").push(request);
        let response = self
            .queue
            .lock()
            .expect("response lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response
        })
    }
}

/// Evasion settings with no pacing and no warm-up, for deterministic tests.
pub fn quiet_evasion(max_identities: usize) -> EvasionConfig {
    EvasionConfig {
        pacing: PacingWindow::none(),
        max_identities,
        warmup_enabled: false,
        ..EvasionConfig::default()
    }
}

pub fn quiet_pool(source: SourceId) -> IdentityPool {
    IdentityPool::new(
        source,
        quiet_evasion(2),
        Arc::new(ScriptedHttpClient::always(HttpResponse::new(200, "<html></html>"))),
    )
}

/// Registers `adapter`, attaching a quiet identity pool for scraping tiers.
pub fn registration(adapter: Arc<ScriptedAdapter>) -> Registration {
    let descriptor = adapter.descriptor();
    let registration = Registration::new(adapter);
    if descriptor.requires_identity {
        registration.with_identity_pool(quiet_pool(descriptor.id))
    } else {
        registration
    }
}

pub fn registry_of(adapters: &[Arc<ScriptedAdapter>]) -> Arc<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry
            .register(registration(Arc::clone(adapter)))
            .expect("distinct sources register");
    }
    Arc::new(registry)
}

/// Short global deadline and a fast fixed backoff.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        global_deadline: Duration::from_secs(5),
        retry: RetryConfig::fixed(Duration::from_millis(10), 2),
        max_in_flight: 4,
        cancellation_grace: Duration::from_millis(100),
        adaptive_tiebreak: true,
    }
}

pub fn orchestrator_of(
    adapters: &[Arc<ScriptedAdapter>],
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(registry_of(adapters), Reconciler::default(), config)
}

pub fn price_payload(current_price: u64) -> PropertyPayload {
    PropertyPayload {
        current_price: Observed::Known(current_price),
        ..PropertyPayload::default()
    }
}

pub fn last_sale_payload(price: u64) -> PropertyPayload {
    PropertyPayload {
        last_sale_price: Observed::Known(price),
        ..PropertyPayload::default()
    }
}
