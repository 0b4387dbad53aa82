use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::Date;

use super::exchange;
use crate::adapter::{
    AdapterDescriptor, FetchContext, FetchFuture, SourceAdapter, SourceResult,
};
use crate::domain::iso_date;
use crate::http_client::{HttpClient, HttpRequest};
use crate::{
    Observed, PropertyPayload, PropertyQuery, PropertyType, SaleRecord, SourceId, Tenure,
};

const DEFAULT_BASE_URL: &str = "https://landregistry.data.gov.uk/data/ppi/transaction-record.json";
const DEFAULT_PAGE_SIZE: u32 = 50;
const DESCRIPTOR: AdapterDescriptor = AdapterDescriptor::new(SourceId::LandRegistry, true);

/// `Thu, 06 Jun 1996`, as served by the linked-data API.
const LINKED_DATA_DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year]");

/// HM Land Registry Price Paid Data over the linked-data JSON API.
pub struct LandRegistryAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl LandRegistryAdapter {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_owned(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_url(&self, query: &PropertyQuery) -> Option<String> {
        let postcode = query.postcode()?;
        let mut url = format!(
            "{}?_pageSize={}&propertyAddress.postcode={}",
            self.base_url,
            DEFAULT_PAGE_SIZE,
            urlencoding::encode(postcode.as_str())
        );
        if let Some(number) = query.house_number() {
            url.push_str("&propertyAddress.paon=");
            url.push_str(&urlencoding::encode(&number.to_ascii_uppercase()));
        }
        Some(url)
    }
}

impl SourceAdapter for LandRegistryAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        DESCRIPTOR
    }

    fn fetch<'a>(&'a self, query: &'a PropertyQuery, ctx: FetchContext<'a>) -> FetchFuture<'a> {
        Box::pin(async move {
            let Some(url) = self.search_url(query) else {
                return Ok(SourceResult::protocol_error(
                    &DESCRIPTOR,
                    "price paid lookups require a postcode",
                ));
            };

            let request = HttpRequest::get(url).with_header("accept", "application/json");
            let response =
                match exchange(self.http.as_ref(), request, &DESCRIPTOR, &ctx.deadline).await? {
                    ControlFlow::Continue(response) => response,
                    ControlFlow::Break(settled) => return Ok(settled),
                };

            Ok(match parse_transactions(&response.body) {
                Err(error) => SourceResult::protocol_error(
                    &DESCRIPTOR,
                    format!("unreadable price paid response: {error}"),
                ),
                Ok(Transactions { total: 0, .. }) => {
                    SourceResult::not_found(&DESCRIPTOR, "no recorded transactions")
                }
                Ok(Transactions { sales, .. }) if sales.is_empty() => {
                    SourceResult::protocol_error(&DESCRIPTOR, "transactions lacked price or date")
                }
                Ok(Transactions { sales, .. }) => {
                    SourceResult::success(&DESCRIPTOR, payload_from_history(sales))
                }
            })
        })
    }
}

#[derive(Debug, Deserialize)]
struct PpdEnvelope {
    result: PpdResult,
}

#[derive(Debug, Deserialize)]
struct PpdResult {
    #[serde(default)]
    items: Vec<PpdItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PpdItem {
    price_paid: Option<f64>,
    transaction_date: Option<String>,
    #[serde(default)]
    new_build: bool,
    estate_type: Option<Value>,
    property_type: Option<Value>,
    property_address: Option<PpdAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct PpdAddress {
    saon: Option<String>,
    paon: Option<String>,
    street: Option<String>,
    town: Option<String>,
    postcode: Option<String>,
}

impl PpdAddress {
    fn display(&self) -> String {
        [&self.saon, &self.paon, &self.street, &self.town, &self.postcode]
            .into_iter()
            .flatten()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

struct Transactions {
    total: usize,
    sales: Vec<SaleRecord>,
}

/// Parses the item list, newest sale first. Items without a price or date are dropped.
fn parse_transactions(body: &str) -> Result<Transactions, serde_json::Error> {
    let envelope: PpdEnvelope = serde_json::from_str(body)?;
    let total = envelope.result.items.len();

    let mut sales: Vec<SaleRecord> = envelope
        .result
        .items
        .into_iter()
        .filter_map(|item| {
            let price = item.price_paid.filter(|price| *price > 0.0)?.round() as u64;
            let date = parse_transaction_date(item.transaction_date.as_deref()?)?;
            Some(SaleRecord {
                price,
                date,
                property_type: item
                    .property_type
                    .as_ref()
                    .and_then(concept_label)
                    .and_then(|label| PropertyType::from_label(&label)),
                tenure: item
                    .estate_type
                    .as_ref()
                    .and_then(concept_label)
                    .and_then(|label| Tenure::from_label(&label)),
                new_build: item.new_build,
                address: item.property_address.unwrap_or_default().display(),
            })
        })
        .collect();
    sales.sort_by(|left, right| right.date.cmp(&left.date));

    Ok(Transactions { total, sales })
}

fn parse_transaction_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    raw.get(..10)
        .and_then(iso_date::parse)
        .or_else(|| Date::parse(raw, LINKED_DATA_DATE).ok())
}

/// Label of a linked-data concept: `label[]._value`, `prefLabel`, or the `_about` tail.
fn concept_label(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => items.iter().find_map(concept_label),
        Value::Object(map) => ["label", "prefLabel"]
            .iter()
            .find_map(|key| map.get(*key).and_then(label_text))
            .or_else(|| {
                map.get("_about")
                    .and_then(Value::as_str)
                    .and_then(|about| about.rsplit('/').next())
                    .map(str::to_owned)
            }),
        _ => None,
    }
}

fn label_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => items.iter().find_map(label_text),
        Value::Object(map) => map.get("_value").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

fn payload_from_history(sales: Vec<SaleRecord>) -> PropertyPayload {
    let latest = &sales[0];
    PropertyPayload {
        last_sale_price: Observed::Known(latest.price),
        last_sale_date: Observed::Known(latest.date),
        property_type: latest.property_type.into(),
        tenure: latest.tenure.into(),
        sale_history: sales,
        ..PropertyPayload::default()
    }
}

#[cfg(test)]
mod tests {
    use time::Month;

    use super::*;

    const SAMPLE: &str = r#"{
        "result": {
            "items": [
                {
                    "pricePaid": 250000,
                    "transactionDate": "Thu, 06 Jun 1996",
                    "newBuild": false,
                    "estateType": {"label": [{"_value": "Freehold"}]},
                    "propertyType": {"prefLabel": [{"_value": "Terraced"}]},
                    "propertyAddress": {"paon": "12", "street": "ACACIA AVENUE", "town": "LONDON", "postcode": "SW1A 1AA"}
                },
                {
                    "pricePaid": 300000,
                    "transactionDate": "2019-03-14",
                    "newBuild": false,
                    "estateType": {"_about": "http://landregistry.data.gov.uk/def/common/freehold"},
                    "propertyType": {"_about": "http://landregistry.data.gov.uk/def/common/terraced"},
                    "propertyAddress": {"paon": "12", "street": "ACACIA AVENUE", "town": "LONDON", "postcode": "SW1A 1AA"}
                },
                {"transactionDate": "2001-01-01"}
            ]
        }
    }"#;

    #[test]
    fn parses_and_orders_transactions_newest_first() {
        let parsed = parse_transactions(SAMPLE).expect("valid json");
        assert_eq!(parsed.total, 3);
        assert_eq!(parsed.sales.len(), 2);

        let latest = &parsed.sales[0];
        assert_eq!(latest.price, 300_000);
        assert_eq!(
            latest.date,
            Date::from_calendar_date(2019, Month::March, 14).expect("valid date")
        );
        assert_eq!(latest.tenure, Some(Tenure::Freehold));
        assert_eq!(latest.property_type, Some(PropertyType::Terraced));
        assert_eq!(latest.address, "12, ACACIA AVENUE, LONDON, SW1A 1AA");

        let earliest = &parsed.sales[1];
        assert_eq!(
            earliest.date,
            Date::from_calendar_date(1996, Month::June, 6).expect("valid date")
        );
    }

    #[test]
    fn payload_reports_latest_sale() {
        let parsed = parse_transactions(SAMPLE).expect("valid json");
        let payload = payload_from_history(parsed.sales);
        assert_eq!(payload.last_sale_price, Observed::Known(300_000));
        assert_eq!(payload.current_price, Observed::Absent);
        assert_eq!(payload.sale_history.len(), 2);
    }

    #[test]
    fn search_url_includes_house_number_when_present() {
        let adapter = LandRegistryAdapter::new(Arc::new(crate::ReqwestHttpClient::new()))
            .with_base_url("https://ppd.test/records.json");
        let query = PropertyQuery::new(Some("12a Acacia Avenue"), Some("SW1A 1AA"))
            .expect("valid query");

        assert_eq!(
            adapter.search_url(&query).as_deref(),
            Some("https://ppd.test/records.json?_pageSize=50&propertyAddress.postcode=SW1A%201AA&propertyAddress.paon=12A")
        );
    }

    #[test]
    fn address_only_query_cannot_be_searched() {
        let adapter = LandRegistryAdapter::new(Arc::new(crate::ReqwestHttpClient::new()));
        let query = PropertyQuery::new(Some("12 Acacia Avenue"), None).expect("valid query");
        assert!(adapter.search_url(&query).is_none());
    }
}
