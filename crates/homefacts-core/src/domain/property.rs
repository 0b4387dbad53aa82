use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::domain::Postcode;
use crate::{SourceId, ValidationError};

/// Execution strategy chosen per query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Sequential fallback that stops at the first success.
    Priority,
    /// Bounded-concurrency fan-out over every planned adapter.
    #[default]
    All,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::All => "all",
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "all" => Ok(Self::All),
            other => Err(ValidationError::InvalidStrategy {
                value: other.to_owned(),
            }),
        }
    }
}

/// Inbound property lookup. Lives for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyQuery {
    address: Option<String>,
    postcode: Option<Postcode>,
    strategy: Strategy,
    sources: Option<Vec<SourceId>>,
}

impl PropertyQuery {
    /// Builds a query; at least one of `address` or `postcode` must be non-blank.
    pub fn new(address: Option<&str>, postcode: Option<&str>) -> Result<Self, ValidationError> {
        let address = address
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);
        let postcode = postcode
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(Postcode::parse)
            .transpose()?;

        if address.is_none() && postcode.is_none() {
            return Err(ValidationError::EmptyQuery);
        }

        Ok(Self {
            address,
            postcode,
            strategy: Strategy::default(),
            sources: None,
        })
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Restricts the lookup to the given sources. An empty list means "all".
    pub fn with_sources(mut self, sources: Vec<SourceId>) -> Self {
        self.sources = (!sources.is_empty()).then_some(sources);
        self
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn postcode(&self) -> Option<&Postcode> {
        self.postcode.as_ref()
    }

    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn sources(&self) -> Option<&[SourceId]> {
        self.sources.as_deref()
    }

    pub fn includes(&self, source: SourceId) -> bool {
        self.sources
            .as_ref()
            .map_or(true, |sources| sources.contains(&source))
    }

    /// Free-text location handed to portal search forms.
    pub fn search_text(&self) -> String {
        match (&self.postcode, &self.address) {
            (Some(postcode), _) => postcode.as_str().to_owned(),
            (None, Some(address)) => address.clone(),
            (None, None) => String::new(),
        }
    }

    /// Leading house number of the address, e.g. `12` for `12 Acacia Avenue`.
    pub fn house_number(&self) -> Option<&str> {
        let first = self.address.as_deref()?.split_whitespace().next()?;
        let first = first.trim_end_matches(',');
        first
            .starts_with(|ch: char| ch.is_ascii_digit())
            .then_some(first)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Detached,
    SemiDetached,
    Terraced,
    Flat,
    Bungalow,
    Other,
}

impl PropertyType {
    /// Maps free-text labels from registries and listing titles.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase();
        if label.contains("semi-detached") || label.contains("semi detached") {
            Some(Self::SemiDetached)
        } else if label.contains("detached") {
            Some(Self::Detached)
        } else if label.contains("terrace") {
            Some(Self::Terraced)
        } else if label.contains("flat")
            || label.contains("apartment")
            || label.contains("maisonette")
            || label.contains("penthouse")
        {
            Some(Self::Flat)
        } else if label.contains("bungalow") {
            Some(Self::Bungalow)
        } else if label.contains("other") {
            Some(Self::Other)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tenure {
    Freehold,
    Leasehold,
}

impl Tenure {
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase();
        if label.contains("freehold") {
            Some(Self::Freehold)
        } else if label.contains("leasehold") {
            Some(Self::Leasehold)
        } else {
            None
        }
    }
}

/// Environment Agency flood warning level, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloodRiskLevel {
    Low,
    Medium,
    MediumHigh,
    High,
}

impl FloodRiskLevel {
    /// Severity 1 is a severe warning, 4 means the warning is no longer in force.
    pub const fn from_severity(severity: u8) -> Self {
        match severity {
            0 | 1 => Self::High,
            2 => Self::MediumHigh,
            3 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub const fn score(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 4,
            Self::MediumHigh => 7,
            Self::High => 10,
        }
    }
}

/// Per-field observation from one source.
///
/// `Absent` means the source does not carry the field at all; `Unknown` means
/// it carries the field but the value could not be determined (for example a
/// listing priced "POA").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Observed<T> {
    Absent,
    Unknown,
    Known(T),
}

impl<T> Default for Observed<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T> Observed<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Absent | Self::Unknown => None,
        }
    }

    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Observed<U> {
        match self {
            Self::Absent => Observed::Absent,
            Self::Unknown => Observed::Unknown,
            Self::Known(value) => Observed::Known(f(value)),
        }
    }
}

impl<T> From<Option<T>> for Observed<T> {
    /// A source that looked for the field but found nothing reports `Unknown`.
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

/// Logical fields of the canonical property record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    CurrentPrice,
    EstimatedValue,
    LastSalePrice,
    LastSaleDate,
    PropertyType,
    Tenure,
    Bedrooms,
    FloodRisk,
}

impl Field {
    pub const ALL: [Self; 8] = [
        Self::CurrentPrice,
        Self::EstimatedValue,
        Self::LastSalePrice,
        Self::LastSaleDate,
        Self::PropertyType,
        Self::Tenure,
        Self::Bedrooms,
        Self::FloodRisk,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CurrentPrice => "currentPrice",
            Self::EstimatedValue => "estimatedValue",
            Self::LastSalePrice => "lastSalePrice",
            Self::LastSaleDate => "lastSaleDate",
            Self::PropertyType => "propertyType",
            Self::Tenure => "tenure",
            Self::Bedrooms => "bedrooms",
            Self::FloodRisk => "floodRisk",
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized value of one logical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FactValue {
    Price(u64),
    Date(#[serde(with = "iso_date")] Date),
    Count(u32),
    PropertyType(PropertyType),
    Tenure(Tenure),
    FloodRisk(FloodRiskLevel),
}

impl FactValue {
    /// Prices agree within a relative `tolerance`; every other kind needs an exact match.
    pub fn agrees_with(&self, other: &Self, tolerance: f64) -> bool {
        match (self, other) {
            (Self::Price(left), Self::Price(right)) => {
                let larger = (*left).max(*right);
                if larger == 0 {
                    return true;
                }
                let diff = left.abs_diff(*right) as f64;
                diff / larger as f64 <= tolerance
            }
            _ => self == other,
        }
    }
}

/// Partial property facts produced by one adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPayload {
    pub current_price: Observed<u64>,
    pub estimated_value: Observed<u64>,
    pub last_sale_price: Observed<u64>,
    #[serde(serialize_with = "iso_date::serialize_observed")]
    pub last_sale_date: Observed<Date>,
    pub property_type: Observed<PropertyType>,
    pub tenure: Observed<Tenure>,
    pub bedrooms: Observed<u32>,
    pub flood_risk: Observed<FloodRiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sale_history: Vec<SaleRecord>,
}

impl PropertyPayload {
    pub fn value(&self, field: Field) -> Option<FactValue> {
        match field {
            Field::CurrentPrice => self.current_price.known().copied().map(FactValue::Price),
            Field::EstimatedValue => self.estimated_value.known().copied().map(FactValue::Price),
            Field::LastSalePrice => self.last_sale_price.known().copied().map(FactValue::Price),
            Field::LastSaleDate => self.last_sale_date.known().copied().map(FactValue::Date),
            Field::PropertyType => self
                .property_type
                .known()
                .copied()
                .map(FactValue::PropertyType),
            Field::Tenure => self.tenure.known().copied().map(FactValue::Tenure),
            Field::Bedrooms => self.bedrooms.known().copied().map(FactValue::Count),
            Field::FloodRisk => self.flood_risk.known().copied().map(FactValue::FloodRisk),
        }
    }

    /// True when no logical field carries a known value.
    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|field| self.value(*field).is_none())
    }
}

/// One historical transaction from the official registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub price: u64,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub property_type: Option<PropertyType>,
    pub tenure: Option<Tenure>,
    pub new_build: bool,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleStatistics {
    pub count: usize,
    pub average: u64,
    pub min: u64,
    pub max: u64,
    pub median: u64,
}

impl SaleStatistics {
    pub fn from_history(history: &[SaleRecord]) -> Option<Self> {
        if history.is_empty() {
            return None;
        }

        let mut prices: Vec<u64> = history.iter().map(|sale| sale.price).collect();
        prices.sort_unstable();
        let total: u128 = prices.iter().map(|price| u128::from(*price)).sum();
        let count = prices.len();

        Some(Self {
            count,
            average: (total / count as u128) as u64,
            min: prices[0],
            max: prices[count - 1],
            median: prices[count / 2],
        })
    }
}

pub(crate) mod iso_date {
    use serde::{Serialize, Serializer};
    use time::format_description::BorrowedFormatItem;
    use time::macros::format_description;
    use time::Date;

    use super::Observed;

    const FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

    pub fn parse(input: &str) -> Option<Date> {
        Date::parse(input, FORMAT).ok()
    }

    pub fn serialize<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = date.format(FORMAT).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn serialize_observed<S>(date: &Observed<Date>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        date.clone().map(IsoDate).serialize(serializer)
    }

    struct IsoDate(Date);

    impl Serialize for IsoDate {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serialize(&self.0, serializer)
        }
    }
}
