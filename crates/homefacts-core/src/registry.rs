//! Adapter registry, built once at startup and shared by reference.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::adapter::{AdapterDescriptor, SourceAdapter};
use crate::adapters::{
    FloodRiskAdapter, LandRegistryAdapter, PortalAdapter, PortalProfile, RenderServiceClient,
    ScansanAdapter,
};
use crate::config::{EngineConfig, SourceConfig};
use crate::error::ConfigError;
use crate::evasion::IdentityPool;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::reliability::ReliabilityTracker;
use crate::throttling::RateGate;
use crate::{PropertyQuery, SourceId, Tier};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// One registered adapter and the resources the orchestrator runs it with.
#[derive(Clone)]
pub struct RegisteredAdapter {
    adapter: Arc<dyn SourceAdapter>,
    descriptor: AdapterDescriptor,
    order: usize,
    timeout: Duration,
    identity_pool: Option<IdentityPool>,
    rate_gate: Option<RateGate>,
}

impl std::fmt::Debug for RegisteredAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAdapter")
            .field("descriptor", &self.descriptor)
            .field("order", &self.order)
            .field("timeout", &self.timeout)
            .field("identity_pool", &self.identity_pool)
            .field("rate_gate", &self.rate_gate)
            .finish_non_exhaustive()
    }
}

impl RegisteredAdapter {
    pub fn adapter(&self) -> &Arc<dyn SourceAdapter> {
        &self.adapter
    }

    /// Descriptor captured at registration; never re-read from the adapter.
    pub fn descriptor(&self) -> AdapterDescriptor {
        self.descriptor
    }

    pub fn id(&self) -> SourceId {
        self.descriptor.id
    }

    pub fn tier(&self) -> Tier {
        self.descriptor.tier
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn identity_pool(&self) -> Option<&IdentityPool> {
        self.identity_pool.as_ref()
    }

    pub fn rate_gate(&self) -> Option<&RateGate> {
        self.rate_gate.as_ref()
    }
}

/// Registration request for [`AdapterRegistry::register`].
pub struct Registration {
    adapter: Arc<dyn SourceAdapter>,
    timeout: Duration,
    identity_pool: Option<IdentityPool>,
    rate_gate: Option<RateGate>,
}

impl Registration {
    pub fn new(adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            adapter,
            timeout: DEFAULT_CALL_TIMEOUT,
            identity_pool: None,
            rate_gate: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_identity_pool(mut self, pool: IdentityPool) -> Self {
        self.identity_pool = Some(pool);
        self
    }

    pub fn with_rate_gate(mut self, gate: RateGate) -> Self {
        self.rate_gate = Some(gate);
        self
    }
}

/// Execution plan for one query.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Adapters in invocation order.
    pub entries: Vec<RegisteredAdapter>,
    /// Adapters the query cannot be served by, with the reason.
    pub excluded: Vec<(SourceId, String)>,
}

/// Ordered set of adapters. Registration order is the static tie-break
/// order among adapters of equal tier.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    entries: Vec<RegisteredAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: Registration) -> Result<(), ConfigError> {
        let descriptor = registration.adapter.descriptor();
        if self.get(descriptor.id).is_some() {
            return Err(ConfigError::DuplicateSource {
                source_id: descriptor.id,
            });
        }
        if descriptor.requires_identity && registration.identity_pool.is_none() {
            return Err(ConfigError::invalid(
                format!("sources.{}", descriptor.id),
                "scraping-tier adapters need an identity pool",
            ));
        }

        self.entries.push(RegisteredAdapter {
            adapter: registration.adapter,
            descriptor,
            order: self.entries.len(),
            timeout: registration.timeout,
            identity_pool: registration.identity_pool,
            rate_gate: registration.rate_gate,
        });
        Ok(())
    }

    /// Builds production adapters for every enabled source.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::with_transport(config, Arc::new(ReqwestHttpClient::new()))
    }

    /// Builds adapters for every enabled source over the given transport.
    pub fn with_transport(
        config: &EngineConfig,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for source in config.enabled_sources() {
            let registration = build_registration(config, source, Arc::clone(&http))?;
            registry.register(registration)?;
            debug!(source = %source.id, "registered adapter");
        }
        Ok(registry)
    }

    pub fn get(&self, id: SourceId) -> Option<&RegisteredAdapter> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredAdapter> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Orders the adapters that can serve `query`: tier first, then the
    /// reliability penalty when a tracker is given, then registration order.
    pub fn plan(&self, query: &PropertyQuery, reliability: Option<&ReliabilityTracker>) -> Plan {
        let mut plan = Plan::default();
        for entry in &self.entries {
            if !query.includes(entry.id()) {
                continue;
            }
            if entry.descriptor.requires_postcode && query.postcode().is_none() {
                plan.excluded.push((
                    entry.id(),
                    format!("source '{}' requires a postcode", entry.id()),
                ));
                continue;
            }
            plan.entries.push(entry.clone());
        }

        plan.entries.sort_by_key(|entry| {
            let penalty = reliability.map_or(0, |tracker| tracker.penalty(entry.id()));
            (entry.tier().rank(), penalty, entry.order)
        });
        plan
    }
}

fn build_registration(
    config: &EngineConfig,
    source: &SourceConfig,
    http: Arc<dyn HttpClient>,
) -> Result<Registration, ConfigError> {
    let id = source.id;
    let base_url = source.base_url.clone();

    let mut registration = match id {
        SourceId::LandRegistry => {
            let mut adapter = LandRegistryAdapter::new(http);
            if let Some(url) = base_url {
                adapter = adapter.with_base_url(url);
            }
            Registration::new(Arc::new(adapter))
        }
        SourceId::FloodRisk => {
            let mut adapter = FloodRiskAdapter::new(http);
            if let Some(url) = base_url {
                adapter = adapter.with_base_url(url);
            }
            Registration::new(Arc::new(adapter))
        }
        SourceId::Scansan => {
            let Some(credential) = &source.credential else {
                return Err(ConfigError::MissingCredential {
                    source_id: id,
                    env_var: id.credential_env().map_or("", |(primary, _)| primary),
                });
            };
            let mut adapter = ScansanAdapter::new(http, credential.expose());
            if let Some(url) = base_url {
                adapter = adapter.with_base_url(url);
            }
            Registration::new(Arc::new(adapter))
        }
        SourceId::Rightmove
        | SourceId::Zoopla
        | SourceId::OnTheMarket
        | SourceId::RightmoveBrowser
        | SourceId::ZooplaBrowser
        | SourceId::OnTheMarketBrowser => {
            let mut profile = PortalProfile::for_source(id)
                .ok_or_else(|| ConfigError::invalid(format!("sources.{id}"), "no portal profile"))?;
            if let Some(url) = base_url {
                profile = profile.with_base_url(url);
            }

            let transport: Arc<dyn HttpClient> = if id.default_tier() == Tier::BrowserAutomation {
                let endpoint = config.render_service_url.clone().ok_or_else(|| {
                    ConfigError::invalid(
                        "render_service_url",
                        format!("required by browser source '{id}'"),
                    )
                })?;
                let mut render = RenderServiceClient::new(http, endpoint);
                if let Some(token) = &config.render_service_token {
                    render = render.with_token(token.expose());
                }
                Arc::new(render)
            } else {
                http
            };

            let pool = IdentityPool::builder(id, config.evasion_config(), transport)
                .with_homepage(profile.referer())
                .with_detector(profile.detector())
                .build();
            Registration::new(Arc::new(PortalAdapter::new(profile)?)).with_identity_pool(pool)
        }
    };

    registration = registration.with_timeout(source.timeout());
    if let Some(limit) = source.requests_per_minute {
        registration = registration.with_rate_gate(RateGate::per_minute(limit));
    }
    Ok(registration)
}
