use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Deserialize;

use super::exchange;
use crate::adapter::{
    AdapterDescriptor, FetchContext, FetchFuture, SourceAdapter, SourceResult,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{FloodRiskLevel, Observed, PropertyPayload, PropertyQuery, SourceId};

const DEFAULT_GEOCODER_URL: &str = "https://api.postcodes.io/postcodes";
const DEFAULT_FLOODS_URL: &str = "https://environment.data.gov.uk/flood-monitoring/id/floods";
const SEARCH_RADIUS_KM: u32 = 1;
const DESCRIPTOR: AdapterDescriptor = AdapterDescriptor::new(SourceId::FloodRisk, true);

/// Active Environment Agency flood warnings around the postcode centroid.
pub struct FloodRiskAdapter {
    http: Arc<dyn HttpClient>,
    geocoder_url: String,
    floods_url: String,
}

impl FloodRiskAdapter {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            geocoder_url: DEFAULT_GEOCODER_URL.to_owned(),
            floods_url: DEFAULT_FLOODS_URL.to_owned(),
        }
    }

    pub fn with_base_url(mut self, floods_url: impl Into<String>) -> Self {
        self.floods_url = floods_url.into();
        self
    }

    pub fn with_geocoder_url(mut self, geocoder_url: impl Into<String>) -> Self {
        self.geocoder_url = geocoder_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeEnvelope {
    result: Option<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FloodEnvelope {
    #[serde(default)]
    items: Vec<FloodItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FloodItem {
    severity_level: Option<u8>,
}

/// Most severe active warning; no warnings at all means low risk.
fn risk_from_warnings(items: &[FloodItem]) -> FloodRiskLevel {
    items
        .iter()
        .filter_map(|item| item.severity_level)
        .min()
        .map_or(FloodRiskLevel::Low, FloodRiskLevel::from_severity)
}

impl SourceAdapter for FloodRiskAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        DESCRIPTOR
    }

    fn fetch<'a>(&'a self, query: &'a PropertyQuery, ctx: FetchContext<'a>) -> FetchFuture<'a> {
        Box::pin(async move {
            let Some(postcode) = query.postcode() else {
                return Ok(SourceResult::protocol_error(
                    &DESCRIPTOR,
                    "flood risk lookups require a postcode",
                ));
            };

            let geocode = HttpRequest::get(format!(
                "{}/{}",
                self.geocoder_url,
                urlencoding::encode(&postcode.compact())
            ));
            let response =
                match exchange(self.http.as_ref(), geocode, &DESCRIPTOR, &ctx.deadline).await? {
                    ControlFlow::Continue(response) => response,
                    ControlFlow::Break(settled) => return Ok(settled),
                };
            let location = match serde_json::from_str::<GeocodeEnvelope>(&response.body) {
                Ok(GeocodeEnvelope {
                    result:
                        Some(GeocodeResult {
                            latitude: Some(latitude),
                            longitude: Some(longitude),
                        }),
                }) => (latitude, longitude),
                Ok(_) => {
                    return Ok(SourceResult::not_found(
                        &DESCRIPTOR,
                        "postcode has no coordinates",
                    ))
                }
                Err(error) => {
                    return Ok(SourceResult::protocol_error(
                        &DESCRIPTOR,
                        format!("unreadable geocoder response: {error}"),
                    ))
                }
            };

            let floods = HttpRequest::get(format!(
                "{}?lat={:.6}&long={:.6}&dist={SEARCH_RADIUS_KM}",
                self.floods_url, location.0, location.1
            ))
            .with_header("accept", "application/json");
            let response =
                match exchange(self.http.as_ref(), floods, &DESCRIPTOR, &ctx.deadline).await? {
                    ControlFlow::Continue(response) => response,
                    ControlFlow::Break(settled) => return Ok(settled),
                };

            Ok(match serde_json::from_str::<FloodEnvelope>(&response.body) {
                Ok(envelope) => SourceResult::success(
                    &DESCRIPTOR,
                    PropertyPayload {
                        flood_risk: Observed::Known(risk_from_warnings(&envelope.items)),
                        ..PropertyPayload::default()
                    },
                ),
                Err(error) => SourceResult::protocol_error(
                    &DESCRIPTOR,
                    format!("unreadable flood warning response: {error}"),
                ),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warnings(levels: &[Option<u8>]) -> Vec<FloodItem> {
        levels
            .iter()
            .map(|level| FloodItem {
                severity_level: *level,
            })
            .collect()
    }

    #[test]
    fn most_severe_warning_wins() {
        assert_eq!(
            risk_from_warnings(&warnings(&[Some(3), Some(1), None])),
            FloodRiskLevel::High
        );
        assert_eq!(
            risk_from_warnings(&warnings(&[Some(2), Some(4)])),
            FloodRiskLevel::MediumHigh
        );
    }

    #[test]
    fn no_warnings_means_low_risk() {
        assert_eq!(risk_from_warnings(&[]), FloodRiskLevel::Low);
        assert_eq!(risk_from_warnings(&warnings(&[None])), FloodRiskLevel::Low);
    }
}
