use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::detect::BlockDetector;
use super::fingerprint::PacingWindow;
use super::identity::{Identity, IdentityState};
use crate::deadline::{Deadline, Interrupted};
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::SourceId;

/// Tunables shared by every identity pool.
#[derive(Debug, Clone, PartialEq)]
pub struct EvasionConfig {
    pub pacing: PacingWindow,
    /// Requests an identity may issue before it is rotated.
    pub rotation_ceiling: u32,
    pub max_identities: usize,
    /// How long a checkout may wait for a busy pool. Zero fails fast.
    pub checkout_wait: Duration,
    pub warmup_enabled: bool,
    pub warmup_freshness: Duration,
}

impl Default for EvasionConfig {
    fn default() -> Self {
        Self {
            pacing: PacingWindow::default(),
            rotation_ceiling: 20,
            max_identities: 2,
            checkout_wait: Duration::ZERO,
            warmup_enabled: true,
            warmup_freshness: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("no idle identity available for '{source_id}'")]
    NoCapacity { source_id: SourceId },

    #[error("identity checkout interrupted: {0}")]
    Interrupted(#[from] Interrupted),

    #[error("warm-up navigation was blocked: {reason}")]
    WarmupBlocked { reason: String },

    #[error("warm-up navigation failed: {0}")]
    WarmupFailed(HttpError),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error(transparent)]
    Transport(#[from] HttpError),
}

/// Point-in-time view of a pool, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub created: u64,
    pub retired: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<Identity>,
    live: usize,
    next_id: u64,
    retired: u64,
}

impl PoolState {
    fn spawn_identity(&mut self) -> Identity {
        let identity = Identity::generate(self.next_id);
        self.next_id += 1;
        identity
    }
}

struct PoolShared {
    source: SourceId,
    config: EvasionConfig,
    transport: Arc<dyn HttpClient>,
    homepage: Option<String>,
    detector: BlockDetector,
    state: Mutex<PoolState>,
    available: Notify,
}

pub struct IdentityPoolBuilder {
    source: SourceId,
    config: EvasionConfig,
    transport: Arc<dyn HttpClient>,
    homepage: Option<String>,
    detector: BlockDetector,
}

impl IdentityPoolBuilder {
    /// Sets the page visited before an identity's first real request.
    pub fn with_homepage(mut self, homepage: impl Into<String>) -> Self {
        self.homepage = Some(homepage.into());
        self
    }

    /// Detector applied to warm-up responses.
    pub fn with_detector(mut self, detector: BlockDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn build(self) -> IdentityPool {
        IdentityPool {
            shared: Arc::new(PoolShared {
                source: self.source,
                config: self.config,
                transport: self.transport,
                homepage: self.homepage,
                detector: self.detector,
                state: Mutex::new(PoolState::default()),
                available: Notify::new(),
            }),
        }
    }
}

/// Identities for one scraping-tier adapter.
///
/// Identities are created lazily up to `max_identities` and lent out one
/// call at a time through [`IdentityLease`]. Every request a lease issues is
/// paced, decorated with the identity's headers and cookies, and counted
/// toward rotation. Checkin happens when the lease is dropped.
#[derive(Clone)]
pub struct IdentityPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for IdentityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityPool")
            .field("source", &self.shared.source)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl IdentityPool {
    pub fn new(source: SourceId, config: EvasionConfig, transport: Arc<dyn HttpClient>) -> Self {
        Self::builder(source, config, transport).build()
    }

    pub fn builder(
        source: SourceId,
        config: EvasionConfig,
        transport: Arc<dyn HttpClient>,
    ) -> IdentityPoolBuilder {
        IdentityPoolBuilder {
            source,
            config,
            transport,
            homepage: None,
            detector: BlockDetector::default(),
        }
    }

    pub fn source(&self) -> SourceId {
        self.shared.source
    }

    pub fn config(&self) -> &EvasionConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        PoolStats {
            live: state.live,
            idle: state.idle.len(),
            created: state.next_id,
            retired: state.retired,
        }
    }

    /// Lends an identity exclusively to the caller, warming it up if needed.
    ///
    /// Fails fast with [`CheckoutError::NoCapacity`] when every identity is
    /// busy and `checkout_wait` is zero; otherwise waits up to
    /// `checkout_wait`, bounded by `deadline`.
    pub async fn checkout(&self, deadline: &Deadline) -> Result<IdentityLease, CheckoutError> {
        let identity = self.acquire(deadline).await?;
        let mut lease = IdentityLease {
            shared: Arc::clone(&self.shared),
            identity: Some(identity),
        };
        lease.warm_up(deadline).await?;
        Ok(lease)
    }

    async fn acquire(&self, deadline: &Deadline) -> Result<Identity, CheckoutError> {
        let wait = self.shared.config.checkout_wait;
        let give_up_at = (Instant::now() + wait).min(deadline.instant());

        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(identity) = self.try_take() {
                return Ok(identity);
            }
            if wait.is_zero() || Instant::now() >= give_up_at {
                return Err(CheckoutError::NoCapacity {
                    source_id: self.shared.source,
                });
            }

            tokio::select! {
                biased;
                _ = deadline.token().cancelled() => {
                    return Err(CheckoutError::Interrupted(Interrupted::Cancelled));
                }
                _ = sleep_until(give_up_at) => {
                    return Err(CheckoutError::NoCapacity {
                        source_id: self.shared.source,
                    });
                }
                _ = &mut notified => {}
            }
        }
    }

    fn try_take(&self) -> Option<Identity> {
        let mut state = self.lock_state();
        if let Some(identity) = state.idle.pop_front() {
            return Some(identity);
        }
        if state.live < self.shared.config.max_identities {
            state.live += 1;
            return Some(state.spawn_identity());
        }
        None
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.shared.lock_state()
    }
}

impl PoolShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("identity pool lock is not poisoned")
    }

    fn check_in(&self, mut identity: Identity) {
        let over_ceiling = identity.request_count() >= self.config.rotation_ceiling;
        if over_ceiling {
            identity.transition(IdentityState::Exhausted);
        }

        {
            let mut state = self.lock_state();
            if identity.state() == IdentityState::Exhausted {
                state.retired += 1;
                let replacement = state.spawn_identity();
                debug!(
                    source = %self.source,
                    retired = identity.id(),
                    replacement = replacement.id(),
                    requests = identity.request_count(),
                    "identity rotated"
                );
                state.idle.push_back(replacement);
            } else {
                state.idle.push_back(identity);
            }
        }

        self.available.notify_one();
    }
}

/// Exclusive loan of one identity. Dropping the lease checks the identity
/// back in, retiring and replacing it if it became exhausted.
pub struct IdentityLease {
    shared: Arc<PoolShared>,
    identity: Option<Identity>,
}

impl std::fmt::Debug for IdentityLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityLease")
            .field("source", &self.shared.source)
            .field("identity", &self.identity.as_ref().map(Identity::id))
            .finish()
    }
}

impl IdentityLease {
    pub fn identity(&self) -> &Identity {
        self.identity
            .as_ref()
            .expect("lease holds its identity until dropped")
    }

    fn identity_mut(&mut self) -> &mut Identity {
        self.identity
            .as_mut()
            .expect("lease holds its identity until dropped")
    }

    pub fn identity_id(&self) -> u64 {
        self.identity().id()
    }

    /// Issues `request` through this identity: paced, decorated and counted.
    pub async fn send(
        &mut self,
        request: HttpRequest,
        referer: Option<&str>,
        deadline: &Deadline,
    ) -> Result<HttpResponse, SendError> {
        let delay = self.shared.config.pacing.sample();
        deadline.sleep(delay).await?;

        let identity = self.identity_mut();
        let request = identity
            .decorate(request, referer)
            .with_timeout(deadline.remaining());
        identity.record_request();

        let transport = Arc::clone(&self.shared.transport);
        let response = deadline.run(transport.execute(request)).await??;
        self.identity_mut().absorb(&response);
        Ok(response)
    }

    /// Marks the identity as burned; it is retired on checkin.
    pub fn report_blocked(&mut self) {
        let source = self.shared.source;
        let identity = self.identity_mut();
        warn!(source = %source, identity = identity.id(), "identity blocked");
        identity.transition(IdentityState::Exhausted);
    }

    pub fn report_success(&mut self) {
        self.identity_mut().transition(IdentityState::Active);
    }

    async fn warm_up(&mut self, deadline: &Deadline) -> Result<(), CheckoutError> {
        let freshness = self.shared.config.warmup_freshness;
        let homepage = self
            .shared
            .homepage
            .clone()
            .filter(|_| self.shared.config.warmup_enabled);
        let Some(homepage) = homepage else {
            self.report_success();
            return Ok(());
        };
        if !self.identity().needs_warmup(freshness) {
            self.report_success();
            return Ok(());
        }

        self.identity_mut().transition(IdentityState::WarmingUp);
        let response = match self.send(HttpRequest::get(homepage), None, deadline).await {
            Ok(response) => response,
            Err(SendError::Interrupted(interrupted)) => return Err(interrupted.into()),
            Err(SendError::Transport(error)) => return Err(CheckoutError::WarmupFailed(error)),
        };

        if let Some(reason) = self.shared.detector.inspect(&response) {
            self.report_blocked();
            return Err(CheckoutError::WarmupBlocked { reason });
        }

        self.identity_mut().mark_warmed();
        Ok(())
    }
}

impl Drop for IdentityLease {
    fn drop(&mut self) {
        if let Some(identity) = self.identity.take() {
            self.shared.check_in(identity);
        }
    }
}
