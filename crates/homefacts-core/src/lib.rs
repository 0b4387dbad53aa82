//! Core engine for homefacts.
//!
//! This crate contains:
//! - Property query and fact models with validation
//! - The source adapter contract and concrete adapters
//! - The evasion session manager for scraping-tier identities
//! - The orchestrator (priority and all-sources strategies)
//! - The result reconciler and response envelope
//! - Layered engine configuration

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod deadline;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod evasion;
pub mod http_client;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;
pub mod reliability;
pub mod retry;
pub mod source;
pub mod throttling;

pub use adapter::{
    AdapterDescriptor, AdapterFault, FetchContext, FetchFuture, FetchStatus, SourceAdapter,
    SourceResult,
};
pub use adapters::{
    FloodRiskAdapter, LandRegistryAdapter, PortalAdapter, PortalProfile, RenderServiceClient,
    ScansanAdapter,
};
pub use config::{Credential, EngineConfig, SourceConfig};
pub use deadline::{Deadline, Interrupted};
pub use domain::{
    FactValue, Field, FloodRiskLevel, Observed, Postcode, PropertyPayload, PropertyQuery,
    PropertyType, SaleRecord, SaleStatistics, Strategy, Tenure, UtcDateTime,
};
pub use envelope::{AttemptFailure, FailureKind, FailureRecord, LookupResponse, ResponseMeta};
pub use error::{ConfigError, CoreError, ValidationError};
pub use evasion::{
    BlockDetector, CheckoutError, EvasionConfig, IdentityLease, IdentityPool, IdentityState,
    PacingWindow, PoolStats,
};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};
pub use orchestrator::{LookupOutcome, Orchestrator, OrchestratorConfig};
pub use reconcile::{
    CanonicalPropertyRecord, ConfidenceBand, FieldValue, PrecedenceTable, PredictionField,
    Reconciler, ReconcilerConfig, ResolutionRule, ResolvedField,
};
pub use registry::{AdapterRegistry, Plan, RegisteredAdapter, Registration};
pub use reliability::{ReliabilitySnapshot, ReliabilityTracker, RECOVERY_LOOKUPS};
pub use retry::{retry_with_backoff, Backoff, RetryConfig, RetryOutcome};
pub use source::{SourceId, Tier};
pub use throttling::RateGate;
