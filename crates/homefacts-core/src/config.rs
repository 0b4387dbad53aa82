//! Engine configuration.
//!
//! Configuration is layered: built-in defaults, then an optional JSON file,
//! then `HOMEFACTS_*` environment overrides, then credentials resolved from
//! the environment. [`EngineConfig::validate`] runs once at startup; a
//! misconfigured engine never reaches the first query.
//!
//! # Environment Variables
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `HOMEFACTS_DEADLINE_MS` | `global_deadline_ms` |
//! | `HOMEFACTS_MAX_RETRIES` | `max_retries` |
//! | `HOMEFACTS_MAX_IN_FLIGHT` | `max_in_flight` |
//! | `HOMEFACTS_NUMERIC_TOLERANCE` | `numeric_tolerance` |
//! | `HOMEFACTS_PACING_MIN_MS` / `HOMEFACTS_PACING_MAX_MS` | `evasion.pacing_*_ms` |
//! | `HOMEFACTS_ROTATION_CEILING` | `evasion.rotation_request_ceiling` |
//! | `HOMEFACTS_SOURCES` | enables exactly the listed sources |
//! | `HOMEFACTS_RENDER_URL` | `render_service_url` |
//! | `HOMEFACTS_RENDER_TOKEN` | `render_service_token` |
//! | `HOMEFACTS_SCANSAN_API_KEY` (fallback `SCANSAN_API_KEY`) | Scansan credential |

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::evasion::{EvasionConfig, PacingWindow};
use crate::orchestrator::OrchestratorConfig;
use crate::reconcile::{PrecedenceTable, ReconcilerConfig, DEFAULT_NUMERIC_TOLERANCE};
use crate::retry::{Backoff, RetryConfig};
use crate::{SourceId, Tier};

/// Secret value whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    pub base_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: 250,
            multiplier: 2.0,
            max_ms: 4_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvasionSettings {
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    pub rotation_request_ceiling: u32,
    pub identities_per_source: usize,
    pub checkout_wait_ms: u64,
    pub warmup: bool,
    pub warmup_freshness_secs: u64,
}

impl Default for EvasionSettings {
    fn default() -> Self {
        Self {
            pacing_min_ms: 500,
            pacing_max_ms: 2_000,
            rotation_request_ceiling: 20,
            identities_per_source: 2,
            checkout_wait_ms: 0,
            warmup: true,
            warmup_freshness_secs: 15 * 60,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

fn default_source_timeout_ms() -> u64 {
    10_000
}

/// One entry of the ordered source list. List order is the static
/// tie-break order among sources of equal tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub id: SourceId,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default = "default_source_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub credential: Option<Credential>,
}

impl SourceConfig {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            enabled: true,
            timeout_ms: default_source_timeout_ms(),
            base_url: None,
            requests_per_minute: None,
            credential: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = Some(requests_per_minute);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new(SourceId::LandRegistry).with_rate_limit(60),
        SourceConfig::new(SourceId::FloodRisk),
        SourceConfig::new(SourceId::Scansan).disabled(),
        SourceConfig::new(SourceId::Rightmove),
        SourceConfig::new(SourceId::Zoopla),
        SourceConfig::new(SourceId::OnTheMarket),
        SourceConfig::new(SourceId::RightmoveBrowser).disabled(),
        SourceConfig::new(SourceId::ZooplaBrowser).disabled(),
        SourceConfig::new(SourceId::OnTheMarketBrowser).disabled(),
    ]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub global_deadline_ms: u64,
    pub max_retries: u32,
    pub backoff: BackoffSettings,
    pub max_in_flight: usize,
    pub cancellation_grace_ms: u64,
    pub evasion: EvasionSettings,
    pub numeric_tolerance: f64,
    pub adaptive_tiebreak: bool,
    pub render_service_url: Option<String>,
    pub render_service_token: Option<Credential>,
    pub sources: Vec<SourceConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_deadline_ms: 30_000,
            max_retries: 2,
            backoff: BackoffSettings::default(),
            max_in_flight: 4,
            cancellation_grace_ms: 250,
            evasion: EvasionSettings::default(),
            numeric_tolerance: DEFAULT_NUMERIC_TOLERANCE,
            adaptive_tiebreak: true,
            render_service_url: None,
            render_service_token: None,
            sources: default_sources(),
        }
    }
}

impl EngineConfig {
    /// Loads, overrides from the process environment, and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::load`] with an injectable environment.
    pub fn load_with<L>(path: Option<&Path>, lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.resolve_credentials(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: String::from("<inline>"),
            source,
        })
    }

    pub fn apply_overrides<L>(&mut self, lookup: L) -> Result<(), ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "HOMEFACTS_DEADLINE_MS", &mut self.global_deadline_ms)?;
        override_parsed(&lookup, "HOMEFACTS_MAX_RETRIES", &mut self.max_retries)?;
        override_parsed(&lookup, "HOMEFACTS_MAX_IN_FLIGHT", &mut self.max_in_flight)?;
        override_parsed(
            &lookup,
            "HOMEFACTS_NUMERIC_TOLERANCE",
            &mut self.numeric_tolerance,
        )?;
        override_parsed(
            &lookup,
            "HOMEFACTS_PACING_MIN_MS",
            &mut self.evasion.pacing_min_ms,
        )?;
        override_parsed(
            &lookup,
            "HOMEFACTS_PACING_MAX_MS",
            &mut self.evasion.pacing_max_ms,
        )?;
        override_parsed(
            &lookup,
            "HOMEFACTS_ROTATION_CEILING",
            &mut self.evasion.rotation_request_ceiling,
        )?;

        if let Some(url) = non_empty(lookup("HOMEFACTS_RENDER_URL")) {
            self.render_service_url = Some(url);
        }
        if let Some(token) = non_empty(lookup("HOMEFACTS_RENDER_TOKEN")) {
            self.render_service_token = Some(Credential::new(token));
        }

        if let Some(list) = non_empty(lookup("HOMEFACTS_SOURCES")) {
            let wanted = list
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(SourceId::from_str)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| ConfigError::invalid("HOMEFACTS_SOURCES", error.to_string()))?;
            for source in &mut self.sources {
                source.enabled = wanted.contains(&source.id);
            }
            for id in wanted {
                if !self.sources.iter().any(|source| source.id == id) {
                    self.sources.push(SourceConfig::new(id));
                }
            }
        }
        Ok(())
    }

    /// Fills missing credentials from `HOMEFACTS_*` then the vendor's own variable.
    pub fn resolve_credentials<L>(&mut self, lookup: L)
    where
        L: Fn(&str) -> Option<String>,
    {
        for source in &mut self.sources {
            let Some((primary, fallback)) = source.id.credential_env() else {
                continue;
            };
            if source.credential.is_none() {
                source.credential = non_empty(lookup(primary))
                    .or_else(|| non_empty(lookup(fallback)))
                    .map(Credential::new);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_deadline_ms == 0 {
            return Err(ConfigError::invalid("global_deadline_ms", "must be positive"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::invalid("max_in_flight", "must be positive"));
        }
        if self.backoff.multiplier < 1.0 || !self.backoff.multiplier.is_finite() {
            return Err(ConfigError::invalid(
                "backoff.multiplier",
                "must be a finite value of at least 1",
            ));
        }
        if !(0.0..1.0).contains(&self.numeric_tolerance) {
            return Err(ConfigError::invalid(
                "numeric_tolerance",
                "must be within [0, 1)",
            ));
        }
        if self.evasion.pacing_min_ms > self.evasion.pacing_max_ms {
            return Err(ConfigError::invalid(
                "evasion.pacing_min_ms",
                "must not exceed evasion.pacing_max_ms",
            ));
        }
        if self.evasion.rotation_request_ceiling == 0 {
            return Err(ConfigError::invalid(
                "evasion.rotation_request_ceiling",
                "must be positive",
            ));
        }
        if self.evasion.identities_per_source == 0 {
            return Err(ConfigError::invalid(
                "evasion.identities_per_source",
                "must be positive",
            ));
        }

        let mut seen = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if seen.contains(&source.id) {
                return Err(ConfigError::DuplicateSource {
                    source_id: source.id,
                });
            }
            seen.push(source.id);
        }

        let mut enabled = self.enabled_sources().peekable();
        if enabled.peek().is_none() {
            return Err(ConfigError::NoSources);
        }
        for source in enabled {
            if source.timeout_ms == 0 {
                return Err(ConfigError::invalid(
                    format!("sources.{}.timeout_ms", source.id),
                    "must be positive",
                ));
            }
            if source.requests_per_minute == Some(0) {
                return Err(ConfigError::invalid(
                    format!("sources.{}.requests_per_minute", source.id),
                    "must be positive when set",
                ));
            }
            if let Some((env_var, _)) = source.id.credential_env() {
                if source.credential.is_none() {
                    return Err(ConfigError::MissingCredential {
                        source_id: source.id,
                        env_var,
                    });
                }
            }
            if source.id.default_tier() == Tier::BrowserAutomation
                && self.render_service_url.is_none()
            {
                return Err(ConfigError::invalid(
                    "render_service_url",
                    format!("required by browser source '{}'", source.id),
                ));
            }
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|source| source.enabled)
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceConfig> {
        self.sources.iter().find(|source| source.id == id)
    }

    pub fn global_deadline(&self) -> Duration {
        Duration::from_millis(self.global_deadline_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.backoff.base_ms),
                factor: self.backoff.multiplier,
                max: Duration::from_millis(self.backoff.max_ms),
                jitter: self.backoff.jitter,
            },
        }
    }

    pub fn evasion_config(&self) -> EvasionConfig {
        let settings = &self.evasion;
        EvasionConfig {
            pacing: PacingWindow::new(
                Duration::from_millis(settings.pacing_min_ms),
                Duration::from_millis(settings.pacing_max_ms),
            ),
            rotation_ceiling: settings.rotation_request_ceiling,
            max_identities: settings.identities_per_source,
            checkout_wait: Duration::from_millis(settings.checkout_wait_ms),
            warmup_enabled: settings.warmup,
            warmup_freshness: Duration::from_secs(settings.warmup_freshness_secs),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            numeric_tolerance: self.numeric_tolerance,
            precedence: PrecedenceTable::default(),
            source_order: self.sources.iter().map(|source| source.id).collect(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            global_deadline: self.global_deadline(),
            retry: self.retry_config(),
            max_in_flight: self.max_in_flight,
            cancellation_grace: Duration::from_millis(self.cancellation_grace_ms),
            adaptive_tiebreak: self.adaptive_tiebreak,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn override_parsed<L, T>(lookup: &L, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = non_empty(lookup(name)) {
        *target = raw
            .parse()
            .map_err(|error: T::Err| ConfigError::invalid(name, error.to_string()))?;
    }
    Ok(())
}
