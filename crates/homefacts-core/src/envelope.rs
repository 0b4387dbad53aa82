//! Response envelope returned for every lookup.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use uuid::Uuid;

use crate::adapter::{FetchStatus, SourceResult};
use crate::reconcile::CanonicalPropertyRecord;
use crate::{SourceId, Strategy, Tier, UtcDateTime};

/// Why a queried source contributed no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Blocked,
    Timeout,
    ProtocolError,
    NoCapacity,
    /// Never invoked because a higher-priority source already succeeded.
    Skipped,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Blocked => "blocked",
            Self::Timeout => "timeout",
            Self::ProtocolError => "protocol_error",
            Self::NoCapacity => "no_capacity",
            Self::Skipped => "skipped",
        }
    }

    /// `None` for `Success`, which is not a failure.
    pub const fn from_status(status: FetchStatus) -> Option<Self> {
        match status {
            FetchStatus::Success => None,
            FetchStatus::NotFound => Some(Self::NotFound),
            FetchStatus::Blocked => Some(Self::Blocked),
            FetchStatus::Timeout => Some(Self::Timeout),
            FetchStatus::ProtocolError => Some(Self::ProtocolError),
            FetchStatus::NoCapacity => Some(Self::NoCapacity),
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed attempt against a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptFailure {
    pub status: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub fetched_at: UtcDateTime,
}

/// A source that was queried but did not contribute data. Every failed
/// attempt is preserved in `attempts`; `status` is that of the last one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub source_id: SourceId,
    pub tier: Tier,
    pub status: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptFailure>,
}

impl FailureRecord {
    pub fn skipped(source_id: SourceId, tier: Tier, detail: impl Into<String>) -> Self {
        Self {
            source_id,
            tier,
            status: FailureKind::Skipped,
            detail: Some(detail.into()),
            attempts: Vec::new(),
        }
    }

    /// Builds the record from a non-empty run of failed results.
    pub fn from_attempts(source_id: SourceId, tier: Tier, results: &[SourceResult]) -> Self {
        let attempts: Vec<AttemptFailure> = results
            .iter()
            .filter_map(|result| {
                Some(AttemptFailure {
                    status: FailureKind::from_status(result.status())?,
                    detail: result.detail().map(str::to_owned),
                    fetched_at: result.fetched_at(),
                })
            })
            .collect();
        let (status, detail) = attempts.last().map_or(
            (FailureKind::ProtocolError, Some(String::from("no attempt recorded"))),
            |last| (last.status, last.detail.clone()),
        );

        Self {
            source_id,
            tier,
            status,
            detail,
            attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub request_id: String,
    pub strategy: Strategy,
    pub generated_at: UtcDateTime,
    pub latency_ms: u64,
}

impl ResponseMeta {
    pub fn new(strategy: Strategy, latency_ms: u64) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            strategy,
            generated_at: UtcDateTime::now(),
            latency_ms,
        }
    }
}

/// Success or failure envelope. `canonicalRecord` is present exactly when
/// `success` is true; `failedSources` is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_record: Option<CanonicalPropertyRecord>,
    pub failed_sources: Vec<FailureRecord>,
    pub sources_queried: Vec<SourceId>,
    pub successful_sources: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub meta: ResponseMeta,
}

impl LookupResponse {
    pub fn new(
        canonical_record: Option<CanonicalPropertyRecord>,
        failed_sources: Vec<FailureRecord>,
        sources_queried: Vec<SourceId>,
        successful_sources: usize,
        warnings: Vec<String>,
        meta: ResponseMeta,
    ) -> Self {
        Self {
            success: canonical_record.is_some(),
            canonical_record,
            failed_sources,
            sources_queried,
            successful_sources,
            warnings,
            meta,
        }
    }

    pub fn failure_for(&self, source: SourceId) -> Option<&FailureRecord> {
        self.failed_sources
            .iter()
            .find(|record| record.source_id == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterDescriptor;

    #[test]
    fn failure_record_keeps_every_attempt() {
        let descriptor = AdapterDescriptor::new(SourceId::Zoopla, false);
        let attempts = [
            SourceResult::timeout(&descriptor, "first"),
            SourceResult::protocol_error(&descriptor, "second"),
        ];

        let record = FailureRecord::from_attempts(SourceId::Zoopla, Tier::Scraped, &attempts);

        assert_eq!(record.status, FailureKind::ProtocolError);
        assert_eq!(record.detail.as_deref(), Some("second"));
        assert_eq!(record.attempts.len(), 2);
        assert_eq!(record.attempts[0].status, FailureKind::Timeout);
    }

    #[test]
    fn failure_envelope_omits_canonical_record() {
        let response = LookupResponse::new(
            None,
            vec![FailureRecord::skipped(SourceId::Zoopla, Tier::Scraped, "skipped")],
            vec![SourceId::Zoopla],
            0,
            Vec::new(),
            ResponseMeta::new(Strategy::Priority, 5),
        );

        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["success"], false);
        assert!(json.get("canonicalRecord").is_none());
        assert_eq!(json["failedSources"][0]["status"], "skipped");
        assert_eq!(json["sourcesQueried"][0], "zoopla");
        assert_eq!(json["successfulSources"], 0);
    }
}
