//! Source adapter contract.
//!
//! Every upstream provider (official API, scraped portal or browser probe)
//! is wrapped in a [`SourceAdapter`]. Adapters report expected negative
//! outcomes as data through [`FetchStatus`]; only infrastructure faults such
//! as DNS failure surface as [`AdapterFault`].
//!
//! | Status | Meaning | Retried |
//! |--------|---------|---------|
//! | `Success` | Upstream returned usable facts | - |
//! | `NotFound` | Upstream affirmatively has no record | no |
//! | `Blocked` | Bot defense detected | no |
//! | `Timeout` | Call deadline elapsed | yes |
//! | `ProtocolError` | Response could not be interpreted | yes |
//! | `NoCapacity` | No identity available for a scraping call | no |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deadline::Deadline;
use crate::evasion::IdentityLease;
use crate::http_client::HttpError;
use crate::{PropertyPayload, PropertyQuery, SourceId, Tier, UtcDateTime};

/// Static capabilities an adapter declares once, at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterDescriptor {
    pub id: SourceId,
    pub tier: Tier,
    pub requires_postcode: bool,
    pub requires_identity: bool,
}

impl AdapterDescriptor {
    /// Descriptor for a source served at its default tier.
    pub const fn new(id: SourceId, requires_postcode: bool) -> Self {
        let tier = id.default_tier();
        Self {
            id,
            tier,
            requires_postcode,
            requires_identity: tier.requires_identity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    NotFound,
    Blocked,
    Timeout,
    ProtocolError,
    NoCapacity,
}

impl FetchStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::Blocked => "blocked",
            Self::Timeout => "timeout",
            Self::ProtocolError => "protocol_error",
            Self::NoCapacity => "no_capacity",
        }
    }

    /// Transient failures are worth retrying within the same request.
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::ProtocolError)
    }

    /// Terminal failures end the adapter's turn without a retry.
    pub const fn is_terminal_failure(self) -> bool {
        matches!(self, Self::NotFound | Self::Blocked | Self::NoCapacity)
    }

    /// Failures that say the source is refusing us rather than lacking data.
    pub const fn signals_unreliability(self) -> bool {
        matches!(self, Self::Blocked | Self::NoCapacity)
    }
}

impl Display for FetchStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one adapter invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    source_id: SourceId,
    tier: Tier,
    status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<PropertyPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    fetched_at: UtcDateTime,
}

impl SourceResult {
    pub fn success(descriptor: &AdapterDescriptor, payload: PropertyPayload) -> Self {
        Self::success_at(descriptor, payload, UtcDateTime::now())
    }

    pub fn success_at(
        descriptor: &AdapterDescriptor,
        payload: PropertyPayload,
        fetched_at: UtcDateTime,
    ) -> Self {
        Self {
            source_id: descriptor.id,
            tier: descriptor.tier,
            status: FetchStatus::Success,
            payload: Some(payload),
            detail: None,
            fetched_at,
        }
    }

    /// Builds a non-success result. Passing `Success` here yields an empty success.
    pub fn failure(
        descriptor: &AdapterDescriptor,
        status: FetchStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            source_id: descriptor.id,
            tier: descriptor.tier,
            status,
            payload: None,
            detail: Some(detail.into()),
            fetched_at: UtcDateTime::now(),
        }
    }

    pub fn not_found(descriptor: &AdapterDescriptor, detail: impl Into<String>) -> Self {
        Self::failure(descriptor, FetchStatus::NotFound, detail)
    }

    pub fn blocked(descriptor: &AdapterDescriptor, detail: impl Into<String>) -> Self {
        Self::failure(descriptor, FetchStatus::Blocked, detail)
    }

    pub fn timeout(descriptor: &AdapterDescriptor, detail: impl Into<String>) -> Self {
        Self::failure(descriptor, FetchStatus::Timeout, detail)
    }

    pub fn protocol_error(descriptor: &AdapterDescriptor, detail: impl Into<String>) -> Self {
        Self::failure(descriptor, FetchStatus::ProtocolError, detail)
    }

    pub fn no_capacity(descriptor: &AdapterDescriptor, detail: impl Into<String>) -> Self {
        Self::failure(descriptor, FetchStatus::NoCapacity, detail)
    }

    pub const fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub const fn tier(&self) -> Tier {
        self.tier
    }

    pub const fn status(&self) -> FetchStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }

    pub fn payload(&self) -> Option<&PropertyPayload> {
        self.payload.as_ref()
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub const fn fetched_at(&self) -> UtcDateTime {
        self.fetched_at
    }
}

/// Per-call context: the call deadline and, for scraping tiers, the lent identity.
pub struct FetchContext<'a> {
    pub deadline: Deadline,
    pub identity: Option<&'a mut IdentityLease>,
}

impl<'a> FetchContext<'a> {
    pub fn new(deadline: Deadline) -> Self {
        Self {
            deadline,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: &'a mut IdentityLease) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// Infrastructure faults adapters may propagate. The orchestrator records
/// them exactly like `ProtocolError`.
#[derive(Debug, Error)]
pub enum AdapterFault {
    #[error("transport failure: {0}")]
    Transport(#[from] HttpError),

    #[error("source '{source_id}' was invoked without an identity")]
    MissingIdentity { source_id: SourceId },
}

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<SourceResult, AdapterFault>> + Send + 'a>>;

/// Uniform contract wrapping one upstream provider.
///
/// Implementations must be `Send + Sync`: the orchestrator shares them across
/// concurrently running lookups. `fetch` must honour `ctx.deadline` and must
/// never block without it.
pub trait SourceAdapter: Send + Sync {
    fn descriptor(&self) -> AdapterDescriptor;

    fn fetch<'a>(&'a self, query: &'a PropertyQuery, ctx: FetchContext<'a>) -> FetchFuture<'a>;
}
