use scraper::{ElementRef, Html, Selector};

use super::settle_transport;
use crate::adapter::{
    AdapterDescriptor, AdapterFault, FetchContext, FetchFuture, SourceAdapter, SourceResult,
};
use crate::error::ConfigError;
use crate::evasion::{BlockDetector, SendError};
use crate::http_client::HttpRequest;
use crate::{Observed, PropertyPayload, PropertyQuery, PropertyType, SourceId, Tenure};

/// Site-specific knowledge for one listing portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalProfile {
    pub source: SourceId,
    pub base_url: String,
    /// Path template; `{query}` is replaced with the encoded search text.
    pub search_path: &'static str,
    pub card_selector: &'static str,
    pub price_selector: &'static str,
    pub title_selector: &'static str,
    pub link_selector: &'static str,
    pub no_results_markers: &'static [&'static str],
    pub challenge_markers: &'static [&'static str],
}

impl PortalProfile {
    /// Built-in profile for a portal source, scraped or browser-rendered.
    pub fn for_source(source: SourceId) -> Option<Self> {
        let profile = match source {
            SourceId::Rightmove | SourceId::RightmoveBrowser => Self {
                source,
                base_url: String::from("https://www.rightmove.co.uk"),
                search_path: "/property-for-sale/search.html?searchLocation={query}",
                card_selector: "div.propertyCard, div[class*=\"propertyCard\"]",
                price_selector: ".propertyCard-priceValue",
                title_selector: "h2.propertyCard-title, .propertyCard-title",
                link_selector: "a.propertyCard-link",
                no_results_markers: &["no results found", "we couldn't find"],
                challenge_markers: &[],
            },
            SourceId::Zoopla | SourceId::ZooplaBrowser => Self {
                source,
                base_url: String::from("https://www.zoopla.co.uk"),
                search_path: "/for-sale/property/{query}/",
                card_selector: "div[data-testid=\"search-result\"]",
                price_selector: "[data-testid=\"listing-price\"], span[class*=\"price\"]",
                title_selector: "h2, a[data-testid=\"listing-details-link\"]",
                link_selector: "a[data-testid=\"listing-details-link\"], a[href*=\"/for-sale/details/\"]",
                no_results_markers: &["no results found", "0 results"],
                challenge_markers: &["_incapsula_resource"],
            },
            SourceId::OnTheMarket | SourceId::OnTheMarketBrowser => Self {
                source,
                base_url: String::from("https://www.onthemarket.com"),
                search_path: "/for-sale/property/{query}/",
                card_selector: "li[class*=\"property-result\"], div[class*=\"property-card\"]",
                price_selector: "span[class*=\"price\"], a[class*=\"price\"]",
                title_selector: "h2, a[class*=\"title\"]",
                link_selector: "a[href*=\"/details/\"]",
                no_results_markers: &["no properties found", "no results"],
                challenge_markers: &[],
            },
            SourceId::LandRegistry | SourceId::Scansan | SourceId::FloodRisk => return None,
        };
        Some(profile)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn search_url(&self, query: &PropertyQuery) -> String {
        let path = self
            .search_path
            .replace("{query}", &urlencoding::encode(&query.search_text()));
        format!("{}{path}", self.base_url)
    }

    /// Homepage used for warm-up navigation and as the search referer.
    pub fn referer(&self) -> String {
        format!("{}/", self.base_url)
    }

    pub fn detector(&self) -> BlockDetector {
        BlockDetector::default().with_markers(self.challenge_markers.iter().copied())
    }
}

#[derive(Debug)]
struct Selectors {
    card: Selector,
    price: Selector,
    title: Selector,
    link: Selector,
}

fn compile(source: SourceId, key: &str, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|error| {
        ConfigError::invalid(format!("sources.{source}.{key}"), error.to_string())
    })
}

/// Search-results scraper for one listing portal. Requests go out through the
/// identity lease handed in by the orchestrator, so the same adapter serves
/// both the plain-HTTP and the rendered-browser tier.
pub struct PortalAdapter {
    descriptor: AdapterDescriptor,
    profile: PortalProfile,
    selectors: Selectors,
    detector: BlockDetector,
}

impl PortalAdapter {
    pub fn new(profile: PortalProfile) -> Result<Self, ConfigError> {
        let source = profile.source;
        let selectors = Selectors {
            card: compile(source, "card", profile.card_selector)?,
            price: compile(source, "price", profile.price_selector)?,
            title: compile(source, "title", profile.title_selector)?,
            link: compile(source, "link", profile.link_selector)?,
        };
        Ok(Self {
            descriptor: AdapterDescriptor::new(source, false),
            detector: profile.detector(),
            profile,
            selectors,
        })
    }

    pub fn profile(&self) -> &PortalProfile {
        &self.profile
    }
}

#[derive(Debug, PartialEq)]
enum Extraction {
    Listing(PropertyPayload),
    NoResults,
    Unrecognised(&'static str),
}

impl PortalAdapter {
    /// Reads the first search result card. Runs synchronously: the parsed
    /// document must not live across an await point.
    fn extract_listing(&self, body: &str) -> Extraction {
        let document = Html::parse_document(body);
        let Some(card) = document.select(&self.selectors.card).next() else {
            let lowered = body.to_ascii_lowercase();
            return if self
                .profile
                .no_results_markers
                .iter()
                .any(|marker| lowered.contains(marker))
            {
                Extraction::NoResults
            } else {
                Extraction::Unrecognised("no listing cards in search page")
            };
        };

        let price_text = first_text(card, &self.selectors.price);
        let title = first_text(card, &self.selectors.title).unwrap_or_default();
        let card_text = collapse(&card.text().collect::<String>());

        let current_price = match price_text.as_deref() {
            Some(text) => parse_price(text).into(),
            None => Observed::Absent,
        };
        let payload = PropertyPayload {
            current_price,
            property_type: PropertyType::from_label(&title)
                .or_else(|| PropertyType::from_label(&card_text))
                .into(),
            bedrooms: parse_bedrooms(&title)
                .or_else(|| parse_bedrooms(&card_text))
                .into(),
            tenure: Tenure::from_label(&card_text).map_or(Observed::Absent, Observed::Known),
            listing_url: card
                .select(&self.selectors.link)
                .find_map(|link| link.value().attr("href"))
                .map(|href| self.absolute(href)),
            ..PropertyPayload::default()
        };

        if payload.is_empty() {
            Extraction::Unrecognised("listing card carried no readable facts")
        } else {
            Extraction::Listing(payload)
        }
    }

    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_owned()
        } else {
            format!("{}/{}", self.profile.base_url, href.trim_start_matches('/'))
        }
    }
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .map(|element| collapse(&element.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `£1,250,000` style prices. "POA" and similar yield `None`.
pub(crate) fn parse_price(text: &str) -> Option<u64> {
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("poa") || lowered.contains("on application") {
        return None;
    }
    let start = text.find(|ch: char| ch.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || *ch == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|price| *price > 0)
}

/// "3 bedroom semi-detached house" and "2 bed flat".
pub(crate) fn parse_bedrooms(text: &str) -> Option<u32> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.windows(2).find_map(|pair| {
        let noun = pair[1].to_ascii_lowercase();
        if noun.starts_with("bed") {
            pair[0].parse().ok()
        } else {
            None
        }
    })
}

impl SourceAdapter for PortalAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        self.descriptor
    }

    fn fetch<'a>(&'a self, query: &'a PropertyQuery, ctx: FetchContext<'a>) -> FetchFuture<'a> {
        Box::pin(async move {
            let descriptor = &self.descriptor;
            let Some(lease) = ctx.identity else {
                return Err(AdapterFault::MissingIdentity {
                    source_id: descriptor.id,
                });
            };

            let request = HttpRequest::get(self.profile.search_url(query));
            let referer = self.profile.referer();
            let response = match lease.send(request, Some(&referer), &ctx.deadline).await {
                Ok(response) => response,
                Err(SendError::Interrupted(interrupted)) => {
                    return Ok(super::settle_interrupted(descriptor, interrupted))
                }
                Err(SendError::Transport(error)) => return settle_transport(descriptor, error),
            };

            if let Some(reason) = self.detector.inspect(&response) {
                lease.report_blocked();
                return Ok(SourceResult::blocked(descriptor, reason));
            }
            lease.report_success();

            match response.status {
                200..=299 => {}
                404 | 410 => {
                    return Ok(SourceResult::not_found(descriptor, "search page not found"))
                }
                status => {
                    return Ok(SourceResult::protocol_error(
                        descriptor,
                        format!("unexpected portal status {status}"),
                    ))
                }
            }

            Ok(match self.extract_listing(&response.body) {
                Extraction::Listing(payload) => SourceResult::success(descriptor, payload),
                Extraction::NoResults => {
                    SourceResult::not_found(descriptor, "portal returned no results")
                }
                Extraction::Unrecognised(reason) => {
                    SourceResult::protocol_error(descriptor, reason)
                }
            })
        })
    }
}
