use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Reliability class of a data source, used for ordering and precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Official,
    Scraped,
    BrowserAutomation,
}

impl Tier {
    pub const ALL: [Self; 3] = [Self::Official, Self::Scraped, Self::BrowserAutomation];

    /// Lower rank wins. Official sources always precede scraped ones.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Official => 0,
            Self::Scraped => 1,
            Self::BrowserAutomation => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Official => "official",
            Self::Scraped => "scraped",
            Self::BrowserAutomation => "browser_automation",
        }
    }

    /// Scraping tiers route their traffic through an identity pool.
    pub const fn requires_identity(self) -> bool {
        !matches!(self, Self::Official)
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical source identifiers used in plans, results and envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceId {
    #[serde(rename = "land_registry")]
    LandRegistry,
    #[serde(rename = "scansan")]
    Scansan,
    #[serde(rename = "flood_risk")]
    FloodRisk,
    #[serde(rename = "rightmove")]
    Rightmove,
    #[serde(rename = "zoopla")]
    Zoopla,
    #[serde(rename = "onthemarket")]
    OnTheMarket,
    #[serde(rename = "rightmove_browser")]
    RightmoveBrowser,
    #[serde(rename = "zoopla_browser")]
    ZooplaBrowser,
    #[serde(rename = "onthemarket_browser")]
    OnTheMarketBrowser,
}

impl SourceId {
    pub const ALL: [Self; 9] = [
        Self::LandRegistry,
        Self::Scansan,
        Self::FloodRisk,
        Self::Rightmove,
        Self::Zoopla,
        Self::OnTheMarket,
        Self::RightmoveBrowser,
        Self::ZooplaBrowser,
        Self::OnTheMarketBrowser,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LandRegistry => "land_registry",
            Self::Scansan => "scansan",
            Self::FloodRisk => "flood_risk",
            Self::Rightmove => "rightmove",
            Self::Zoopla => "zoopla",
            Self::OnTheMarket => "onthemarket",
            Self::RightmoveBrowser => "rightmove_browser",
            Self::ZooplaBrowser => "zoopla_browser",
            Self::OnTheMarketBrowser => "onthemarket_browser",
        }
    }

    /// Tier of the built-in adapter serving this source.
    pub const fn default_tier(self) -> Tier {
        match self {
            Self::LandRegistry | Self::Scansan | Self::FloodRisk => Tier::Official,
            Self::Rightmove | Self::Zoopla | Self::OnTheMarket => Tier::Scraped,
            Self::RightmoveBrowser | Self::ZooplaBrowser | Self::OnTheMarketBrowser => {
                Tier::BrowserAutomation
            }
        }
    }

    /// Environment variables consulted for the source credential, primary first.
    pub const fn credential_env(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Scansan => Some(("HOMEFACTS_SCANSAN_API_KEY", "SCANSAN_API_KEY")),
            _ => None,
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or(ValidationError::InvalidSource { value: normalized })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_ids_case_insensitively() {
        assert_eq!("Land-Registry".parse::<SourceId>(), Ok(SourceId::LandRegistry));
        assert_eq!(" zoopla_browser ".parse::<SourceId>(), Ok(SourceId::ZooplaBrowser));
        assert!(matches!(
            "purplebricks".parse::<SourceId>(),
            Err(ValidationError::InvalidSource { .. })
        ));
    }

    #[test]
    fn serde_names_match_display_names() {
        for id in SourceId::ALL {
            let encoded = serde_json::to_string(&id).expect("source id serializes");
            assert_eq!(encoded, format!("\"{}\"", id.as_str()));
        }
    }

    #[test]
    fn tier_ranks_are_strictly_ordered() {
        assert!(Tier::Official.rank() < Tier::Scraped.rank());
        assert!(Tier::Scraped.rank() < Tier::BrowserAutomation.rank());
        assert!(!Tier::Official.requires_identity());
        assert!(Tier::BrowserAutomation.requires_identity());
    }
}
