use std::ops::ControlFlow;
use std::sync::Arc;

use serde_json::Value;

use super::exchange;
use crate::adapter::{
    AdapterDescriptor, FetchContext, FetchFuture, SourceAdapter, SourceResult,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::{Observed, PropertyPayload, PropertyQuery, PropertyType, SourceId};

const DEFAULT_BASE_URL: &str = "https://api.scansan.com/v1";
const DESCRIPTOR: AdapterDescriptor = AdapterDescriptor::new(SourceId::Scansan, true);

const VALUE_KEYS: &[&str] = &[
    "current_valuation",
    "valuation",
    "estimated_value",
    "value",
    "price",
];
const ADDRESS_KEYS: &[&str] = &["address", "property_address", "full_address"];

/// Scansan current-valuation API. Contributes the `estimatedValue` field.
pub struct ScansanAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
    auth: HttpAuth,
}

impl ScansanAdapter {
    pub fn new(http: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_owned(),
            auth: HttpAuth::Header {
                name: String::from("X-Auth-Token"),
                value: api_key.into(),
            },
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl SourceAdapter for ScansanAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        DESCRIPTOR
    }

    fn fetch<'a>(&'a self, query: &'a PropertyQuery, ctx: FetchContext<'a>) -> FetchFuture<'a> {
        Box::pin(async move {
            let Some(postcode) = query.postcode() else {
                return Ok(SourceResult::protocol_error(
                    &DESCRIPTOR,
                    "valuation lookups require a postcode",
                ));
            };

            let request = HttpRequest::get(format!(
                "{}/postcode/{}/valuations/current",
                self.base_url.trim_end_matches('/'),
                urlencoding::encode(postcode.as_str())
            ))
            .with_header("accept", "application/json")
            .with_auth(&self.auth);
            let response =
                match exchange(self.http.as_ref(), request, &DESCRIPTOR, &ctx.deadline).await? {
                    ControlFlow::Continue(response) => response,
                    ControlFlow::Break(settled) => return Ok(settled),
                };

            let body: Value = match serde_json::from_str(&response.body) {
                Ok(body) => body,
                Err(error) => {
                    return Ok(SourceResult::protocol_error(
                        &DESCRIPTOR,
                        format!("unreadable valuation response: {error}"),
                    ))
                }
            };

            Ok(match interpret(&body, query.house_number()) {
                Valuation::Empty => SourceResult::not_found(&DESCRIPTOR, "no valuations for postcode"),
                Valuation::Unreadable => {
                    SourceResult::protocol_error(&DESCRIPTOR, "valuation entry carried no value")
                }
                Valuation::Found(payload) => SourceResult::success(&DESCRIPTOR, payload),
            })
        })
    }
}

enum Valuation {
    Empty,
    Unreadable,
    Found(PropertyPayload),
}

/// Picks the entry matching the house number when one is given, else the first.
fn interpret(body: &Value, house_number: Option<&str>) -> Valuation {
    let data = body.get("data").unwrap_or(body);
    let entries: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![data],
        _ => Vec::new(),
    };
    if entries.is_empty() {
        return Valuation::Empty;
    }

    let matching = house_number.and_then(|number| {
        let prefix = format!("{} ", number.to_ascii_lowercase());
        entries.iter().copied().find(|entry| {
            text_field(entry, ADDRESS_KEYS)
                .is_some_and(|address| address.to_ascii_lowercase().starts_with(&prefix))
        })
    });
    let entry = matching.unwrap_or(entries[0]);

    let Some(value) = number_field(entry, VALUE_KEYS) else {
        return Valuation::Unreadable;
    };

    Valuation::Found(PropertyPayload {
        estimated_value: Observed::Known(value),
        bedrooms: number_field(entry, &["bedrooms", "beds"])
            .and_then(|beds| u32::try_from(beds).ok())
            .map_or(Observed::Absent, Observed::Known),
        property_type: text_field(entry, &["property_type", "propertyType"])
            .and_then(PropertyType::from_label)
            .map_or(Observed::Absent, Observed::Known),
        ..PropertyPayload::default()
    })
}

fn number_field(entry: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match entry.get(*key)? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v > 0.0).map(|v| v.round() as u64)),
        Value::String(text) => text.replace([',', '£'], "").trim().parse().ok(),
        _ => None,
    })
}

fn text_field<'v>(entry: &'v Value, keys: &[&str]) -> Option<&'v str> {
    keys.iter().find_map(|key| entry.get(*key)?.as_str())
}
