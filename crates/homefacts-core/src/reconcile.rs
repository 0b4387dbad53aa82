//! Field-level reconciliation of per-source results.
//!
//! Each logical [`Field`] is resolved independently under a
//! [`ResolutionRule`]. Candidates are always ranked by the same precedence
//! key: tier, then newest `fetchedAt`, then configured source order, then
//! source id. The ranking is total, so reconciling the same results twice
//! yields the same record.
//!
//! | Field | Default rule |
//! |-------|--------------|
//! | `currentPrice`, `estimatedValue` | tier precedence |
//! | `lastSalePrice`, `lastSaleDate` | tier precedence |
//! | `floodRisk` | tier precedence |
//! | `propertyType`, `tenure`, `bedrooms` | majority vote |

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::adapter::SourceResult;
use crate::{FactValue, Field, SaleRecord, SaleStatistics, SourceId, Tier, UtcDateTime};

pub const DEFAULT_NUMERIC_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    /// The best-ranked candidate wins outright.
    TierPrecedence,
    /// The largest agreeing group wins; ties go to the better-ranked group.
    MajorityVote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecedenceTable {
    rules: BTreeMap<Field, ResolutionRule>,
}

impl Default for PrecedenceTable {
    fn default() -> Self {
        let rules = Field::ALL
            .into_iter()
            .map(|field| {
                let rule = match field {
                    Field::PropertyType | Field::Tenure | Field::Bedrooms => {
                        ResolutionRule::MajorityVote
                    }
                    Field::CurrentPrice
                    | Field::EstimatedValue
                    | Field::LastSalePrice
                    | Field::LastSaleDate
                    | Field::FloodRisk => ResolutionRule::TierPrecedence,
                };
                (field, rule)
            })
            .collect();
        Self { rules }
    }
}

impl PrecedenceTable {
    pub fn rule(&self, field: Field) -> ResolutionRule {
        self.rules
            .get(&field)
            .copied()
            .unwrap_or(ResolutionRule::TierPrecedence)
    }

    pub fn with_rule(mut self, field: Field, rule: ResolutionRule) -> Self {
        self.rules.insert(field, rule);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Relative tolerance for price disagreement, in `[0, 1)`.
    pub numeric_tolerance: f64,
    pub precedence: PrecedenceTable,
    /// Static tie-break order among sources of equal tier and age.
    pub source_order: Vec<SourceId>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            numeric_tolerance: DEFAULT_NUMERIC_TOLERANCE,
            precedence: PrecedenceTable::default(),
            source_order: SourceId::ALL.to_vec(),
        }
    }
}

/// One source's observation of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    pub value: FactValue,
    pub source_id: SourceId,
    pub tier: Tier,
    pub observed_at: UtcDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedField {
    pub primary: FieldValue,
    pub confidence: f64,
    pub band: ConfidenceBand,
    pub disputed: bool,
    pub disputed_alternatives: Vec<FieldValue>,
    /// Other sources whose value agrees with `primary` within tolerance.
    pub corroborating: Vec<SourceId>,
}

/// Flattened field view handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionField {
    pub value: FactValue,
    pub confidence: f64,
    pub disputed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalPropertyRecord {
    pub fields: BTreeMap<Field, ResolvedField>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub listings: BTreeMap<SourceId, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sale_history: Vec<SaleRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale_statistics: Option<SaleStatistics>,
    pub contributing_sources: Vec<SourceId>,
}

impl CanonicalPropertyRecord {
    pub fn get(&self, field: Field) -> Option<&ResolvedField> {
        self.fields.get(&field)
    }

    pub fn prediction_view(&self) -> BTreeMap<Field, PredictionField> {
        self.fields
            .iter()
            .map(|(field, resolved)| {
                (
                    *field,
                    PredictionField {
                        value: resolved.primary.value.clone(),
                        confidence: resolved.confidence,
                        disputed: resolved.disputed,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcilerConfig,
}

type RankKey = (u8, Reverse<UtcDateTime>, usize, SourceId);

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Merges successful results into one record. Returns `None` when no
    /// result succeeded; a record is never fabricated from failures alone.
    pub fn reconcile(&self, results: &[SourceResult]) -> Option<CanonicalPropertyRecord> {
        let mut successes: Vec<&SourceResult> = results
            .iter()
            .filter(|result| result.payload().is_some())
            .collect();
        if successes.is_empty() {
            return None;
        }
        successes.sort_by_key(|result| {
            self.rank_key(result.tier(), result.fetched_at(), result.source_id())
        });

        let mut fields = BTreeMap::new();
        for field in Field::ALL {
            let candidates: Vec<FieldValue> = successes
                .iter()
                .filter_map(|result| {
                    let value = result.payload()?.value(field)?;
                    Some(FieldValue {
                        value,
                        source_id: result.source_id(),
                        tier: result.tier(),
                        observed_at: result.fetched_at(),
                    })
                })
                .collect();
            if let Some(resolved) = self.resolve(field, candidates) {
                fields.insert(field, resolved);
            }
        }

        let listings = successes
            .iter()
            .filter_map(|result| {
                let url = result.payload()?.listing_url.clone()?;
                Some((result.source_id(), url))
            })
            .collect();

        let sale_history = successes
            .iter()
            .filter_map(|result| result.payload())
            .map(|payload| &payload.sale_history)
            .find(|history| !history.is_empty())
            .cloned()
            .unwrap_or_default();

        Some(CanonicalPropertyRecord {
            fields,
            listings,
            sale_statistics: SaleStatistics::from_history(&sale_history),
            sale_history,
            contributing_sources: successes.iter().map(|result| result.source_id()).collect(),
        })
    }

    fn rank_key(&self, tier: Tier, observed_at: UtcDateTime, source: SourceId) -> RankKey {
        let order = self
            .config
            .source_order
            .iter()
            .position(|candidate| *candidate == source)
            .unwrap_or(usize::MAX);
        (tier.rank(), Reverse(observed_at), order, source)
    }

    fn resolve(&self, field: Field, mut candidates: Vec<FieldValue>) -> Option<ResolvedField> {
        candidates.sort_by_key(|candidate| {
            self.rank_key(candidate.tier, candidate.observed_at, candidate.source_id)
        });
        let tolerance = self.config.numeric_tolerance;

        let primary_index = match self.config.precedence.rule(field) {
            ResolutionRule::TierPrecedence => 0,
            ResolutionRule::MajorityVote => majority_anchor(&candidates, tolerance),
        };
        if primary_index >= candidates.len() {
            return None;
        }
        let primary = candidates.remove(primary_index);

        let (agreeing, disputed_alternatives): (Vec<FieldValue>, Vec<FieldValue>) = candidates
            .into_iter()
            .partition(|candidate| candidate.value.agrees_with(&primary.value, tolerance));
        let corroborating: Vec<SourceId> = agreeing
            .into_iter()
            .map(|candidate| candidate.source_id)
            .collect();
        let disputed = !disputed_alternatives.is_empty();
        if disputed {
            debug!(
                field = %field,
                primary = %primary.source_id,
                alternatives = disputed_alternatives.len(),
                "sources disagree"
            );
        }

        let score = confidence_hundredths(primary.tier, corroborating.len(), disputed);
        Some(ResolvedField {
            confidence: f64::from(score) / 100.0,
            band: band_for(score),
            primary,
            disputed,
            disputed_alternatives,
            corroborating,
        })
    }
}

/// Index of the anchor of the largest agreeing cluster. Candidates join the
/// first cluster whose anchor they agree with, so a cyclic disagreement
/// still resolves the same way every time.
fn majority_anchor(ranked: &[FieldValue], tolerance: f64) -> usize {
    let mut clusters: Vec<(usize, usize)> = Vec::new();
    for (index, candidate) in ranked.iter().enumerate() {
        match clusters
            .iter_mut()
            .find(|(anchor, _)| ranked[*anchor].value.agrees_with(&candidate.value, tolerance))
        {
            Some((_, size)) => *size += 1,
            None => clusters.push((index, 1)),
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (anchor, size) in clusters {
        if best.map_or(true, |(_, best_size)| size > best_size) {
            best = Some((anchor, size));
        }
    }
    best.map_or(0, |(anchor, _)| anchor)
}

fn confidence_hundredths(tier: Tier, corroborating: usize, disputed: bool) -> u32 {
    let base: i32 = match tier {
        Tier::Official => 80,
        Tier::Scraped => 55,
        Tier::BrowserAutomation => 45,
    };
    let support = 10 * corroborating.min(2) as i32;
    let penalty = if disputed { 15 } else { 0 };
    (base + support - penalty).clamp(5, 100) as u32
}

fn band_for(hundredths: u32) -> ConfidenceBand {
    match hundredths {
        75.. => ConfidenceBand::High,
        50.. => ConfidenceBand::Medium,
        _ => ConfidenceBand::Low,
    }
}
