//! Adapter contract tests
//!
//! Every concrete adapter must label its results with its own source and
//! tier, map upstream outcomes onto the shared status set, and honour the
//! call deadline. These tests drive the real adapters over a scripted
//! transport.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{quiet_evasion, ScriptedHttpClient};
use homefacts_core::{
    AdapterFault, Deadline, FetchContext, FetchStatus, FloodRiskAdapter, FloodRiskLevel,
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, IdentityPool,
    LandRegistryAdapter, Observed, PortalAdapter, PortalProfile, PropertyQuery,
    RenderServiceClient, ScansanAdapter, SourceAdapter, SourceId, SourceResult, Tier,
};

const PRICE_PAID: &str = r#"{
    "result": {
        "items": [
            {
                "pricePaid": 300000,
                "transactionDate": "2019-03-14",
                "newBuild": false,
                "estateType": {"_about": "http://landregistry.data.gov.uk/def/common/freehold"},
                "propertyType": {"_about": "http://landregistry.data.gov.uk/def/common/terraced"},
                "propertyAddress": {"paon": "12", "street": "ACACIA AVENUE", "town": "LONDON", "postcode": "SW1A 1AA"}
            }
        ]
    }
}"#;

const LISTING_PAGE: &str = r#"<html><body>
    <div class="propertyCard">
      <a class="propertyCard-link" href="/properties/98765#/"></a>
      <h2 class="propertyCard-title">4 bedroom detached house for sale</h2>
      <span class="propertyCard-priceValue">£725,000</span>
    </div>
</body></html>"#;

fn sw1a() -> PropertyQuery {
    PropertyQuery::new(Some("12 Acacia Avenue"), Some("SW1A 1AA")).expect("valid query")
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(10))
}

fn land_registry(transport: &Arc<ScriptedHttpClient>) -> LandRegistryAdapter {
    LandRegistryAdapter::new(Arc::clone(transport) as Arc<dyn HttpClient>)
        .with_base_url("https://ppd.test/transactions.json")
}

async fn fetch_official(adapter: &dyn SourceAdapter, query: &PropertyQuery) -> SourceResult {
    adapter
        .fetch(query, FetchContext::new(deadline()))
        .await
        .expect("no infrastructure fault")
}

fn portal_pool(source: SourceId, transport: &Arc<ScriptedHttpClient>) -> IdentityPool {
    IdentityPool::new(
        source,
        quiet_evasion(1),
        Arc::clone(transport) as Arc<dyn HttpClient>,
    )
}

fn rightmove_adapter() -> PortalAdapter {
    let profile = PortalProfile::for_source(SourceId::Rightmove)
        .expect("built-in profile")
        .with_base_url("https://portal.test/");
    PortalAdapter::new(profile).expect("selectors compile")
}

// =============================================================================
// Contract: Descriptors
// =============================================================================

#[test]
fn when_adapters_are_built_then_descriptors_match_their_source_and_tier() {
    // Given: Every built-in adapter
    let transport: Arc<dyn HttpClient> =
        Arc::new(ScriptedHttpClient::always(HttpResponse::new(200, "{}")));
    let mut adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(LandRegistryAdapter::new(Arc::clone(&transport))),
        Box::new(FloodRiskAdapter::new(Arc::clone(&transport))),
        Box::new(ScansanAdapter::new(Arc::clone(&transport), "key")),
    ];
    for source in SourceId::ALL {
        if let Some(profile) = PortalProfile::for_source(source) {
            adapters.push(Box::new(PortalAdapter::new(profile).expect("selectors compile")));
        }
    }

    // Then: Each declares its default tier; only scraping tiers need identities
    assert_eq!(adapters.len(), SourceId::ALL.len());
    for adapter in &adapters {
        let descriptor = adapter.descriptor();
        assert_eq!(descriptor.tier, descriptor.id.default_tier(), "{}", descriptor.id);
        assert_eq!(
            descriptor.requires_identity,
            descriptor.tier != Tier::Official,
            "{}",
            descriptor.id
        );
        assert_eq!(
            descriptor.requires_postcode,
            descriptor.tier == Tier::Official,
            "{}",
            descriptor.id
        );
    }
}

// =============================================================================
// Contract: Status Mapping for API Sources
// =============================================================================

#[tokio::test]
async fn when_price_paid_data_is_found_then_the_sale_is_reported() {
    // Given: The registry returns one transaction
    let transport = Arc::new(ScriptedHttpClient::always(HttpResponse::ok_json(PRICE_PAID)));
    let adapter = land_registry(&transport);

    // When: The adapter fetches for 12 Acacia Avenue, SW1A 1AA
    let result = fetch_official(&adapter, &sw1a()).await;

    // Then: The last sale is known and the request filtered by postcode and number
    assert_eq!(result.status(), FetchStatus::Success);
    assert_eq!(result.source_id(), SourceId::LandRegistry);
    assert_eq!(result.tier(), Tier::Official);
    let payload = result.payload().expect("payload present");
    assert_eq!(payload.last_sale_price, Observed::Known(300_000));
    assert_eq!(payload.sale_history.len(), 1);

    let url = &transport.urls()[0];
    assert!(url.starts_with("https://ppd.test/transactions.json?"));
    assert!(url.contains("propertyAddress.postcode=SW1A%201AA"), "{url}");
    assert!(url.contains("propertyAddress.paon=12"), "{url}");
}

#[tokio::test]
async fn when_upstream_answers_with_failures_then_statuses_are_mapped_uniformly() {
    let cases: Vec<(Result<HttpResponse, HttpError>, FetchStatus)> = vec![
        (Ok(HttpResponse::new(404, "")), FetchStatus::NotFound),
        (Ok(HttpResponse::new(410, "")), FetchStatus::NotFound),
        (Ok(HttpResponse::new(403, "")), FetchStatus::Blocked),
        (Ok(HttpResponse::new(429, "")), FetchStatus::Blocked),
        (Ok(HttpResponse::new(500, "")), FetchStatus::ProtocolError),
        (Ok(HttpResponse::ok_json("<html>")), FetchStatus::ProtocolError),
        (
            Ok(HttpResponse::ok_json(r#"{"result": {"items": []}}"#)),
            FetchStatus::NotFound,
        ),
        (Err(HttpError::timeout("read timed out")), FetchStatus::Timeout),
        (Err(HttpError::new("stream reset")), FetchStatus::ProtocolError),
    ];

    for (response, expected) in cases {
        // Given: A transport scripted with one upstream outcome
        let transport = Arc::new(ScriptedHttpClient::sequence(vec![], response));
        let adapter = land_registry(&transport);

        // When: The adapter fetches
        let result = fetch_official(&adapter, &sw1a()).await;

        // Then: The outcome maps to the expected status and stays labelled
        assert_eq!(result.status(), expected, "{:?}", result.detail());
        assert_eq!(result.source_id(), SourceId::LandRegistry);
        assert!(result.payload().is_none());
    }
}

#[tokio::test]
async fn when_the_upstream_cannot_be_reached_then_a_transport_fault_propagates() {
    // Given: A transport that fails to connect
    let transport = Arc::new(ScriptedHttpClient::failing(HttpError::connect(
        "dns lookup failed",
    )));
    let adapter = land_registry(&transport);

    // When: The adapter fetches
    let outcome = adapter.fetch(&sw1a(), FetchContext::new(deadline())).await;

    // Then: The fault surfaces instead of a status
    assert!(matches!(outcome, Err(AdapterFault::Transport(_))));
}

#[tokio::test(start_paused = true)]
async fn when_the_upstream_hangs_then_the_call_deadline_ends_it_as_timeout() {
    // Given: A transport that never answers in time
    let transport = Arc::new(
        ScriptedHttpClient::always(HttpResponse::ok_json(PRICE_PAID))
            .with_delay(Duration::from_secs(120)),
    );
    let adapter = land_registry(&transport);

    // When: The adapter fetches under a two second deadline
    let started = tokio::time::Instant::now();
    let result = adapter
        .fetch(
            &sw1a(),
            FetchContext::new(Deadline::after(Duration::from_secs(2))),
        )
        .await
        .expect("no infrastructure fault");

    // Then: It returns a Timeout at the deadline
    assert_eq!(result.status(), FetchStatus::Timeout);
    assert!(started.elapsed() <= Duration::from_secs(2));
}

#[tokio::test]
async fn when_flood_warnings_are_active_then_the_most_severe_sets_the_risk() {
    // Given: The geocoder resolves the postcode; one severe-ish warning is active
    let transport = Arc::new(ScriptedHttpClient::sequence(
        vec![
            Ok(HttpResponse::ok_json(
                r#"{"status": 200, "result": {"latitude": 51.501009, "longitude": -0.141588}}"#,
            )),
            Ok(HttpResponse::ok_json(
                r#"{"items": [{"severityLevel": 3}, {"severityLevel": 2}]}"#,
            )),
        ],
        Ok(HttpResponse::new(500, "")),
    ));
    let adapter = FloodRiskAdapter::new(Arc::clone(&transport) as Arc<dyn HttpClient>)
        .with_geocoder_url("https://geo.test/postcodes")
        .with_base_url("https://floods.test/floods");

    // When: The adapter fetches
    let result = fetch_official(&adapter, &sw1a()).await;

    // Then: Risk reflects severity 2 and both calls hit the configured hosts
    let payload = result.payload().expect("payload present");
    assert_eq!(payload.flood_risk, Observed::Known(FloodRiskLevel::MediumHigh));
    let urls = transport.urls();
    assert_eq!(urls[0], "https://geo.test/postcodes/SW1A1AA");
    assert!(urls[1].starts_with("https://floods.test/floods?lat=51.501009"));
}

#[tokio::test]
async fn when_the_postcode_has_no_coordinates_then_flood_risk_is_not_found() {
    // Given: The geocoder knows nothing about the postcode
    let transport = Arc::new(ScriptedHttpClient::always(HttpResponse::ok_json(
        r#"{"status": 200, "result": null}"#,
    )));
    let adapter = FloodRiskAdapter::new(Arc::clone(&transport) as Arc<dyn HttpClient>);

    // When/Then: The lookup reports NotFound after a single call
    let result = fetch_official(&adapter, &sw1a()).await;
    assert_eq!(result.status(), FetchStatus::NotFound);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn when_a_valuation_exists_then_scansan_reports_the_estimated_value() {
    // Given: A valuation API response listing two properties
    let transport = Arc::new(ScriptedHttpClient::always(HttpResponse::ok_json(
        r#"{"data": [
            {"address": "10 Acacia Avenue", "current_valuation": 610000},
            {"address": "12 Acacia Avenue", "current_valuation": 655000, "bedrooms": 3}
        ]}"#,
    )));
    let adapter = ScansanAdapter::new(Arc::clone(&transport) as Arc<dyn HttpClient>, "sk-test")
        .with_base_url("https://scansan.test/v1/");

    // When: The adapter fetches for number 12
    let result = fetch_official(&adapter, &sw1a()).await;

    // Then: The matching entry is used and the API key travels as a header
    let payload = result.payload().expect("payload present");
    assert_eq!(payload.estimated_value, Observed::Known(655_000));
    let request = &transport.requests()[0];
    assert_eq!(request.header("x-auth-token"), Some("sk-test"));
    assert_eq!(
        request.url,
        "https://scansan.test/v1/postcode/SW1A%201AA/valuations/current"
    );
}

// =============================================================================
// Contract: Portal Adapters and Identities
// =============================================================================

#[tokio::test]
async fn when_a_portal_adapter_has_no_identity_then_it_refuses_to_fetch() {
    // Given: A portal adapter called without a lease
    let adapter = rightmove_adapter();

    // When: It fetches
    let outcome = adapter.fetch(&sw1a(), FetchContext::new(deadline())).await;

    // Then: The missing identity is an infrastructure fault
    assert!(matches!(
        outcome,
        Err(AdapterFault::MissingIdentity {
            source_id: SourceId::Rightmove
        })
    ));
}

#[tokio::test]
async fn when_a_portal_lists_the_property_then_the_first_card_is_read_through_the_identity() {
    // Given: A search page with one listing and a leased identity
    let transport = Arc::new(ScriptedHttpClient::always(HttpResponse::new(200, LISTING_PAGE)));
    let pool = portal_pool(SourceId::Rightmove, &transport);
    let mut lease = pool.checkout(&deadline()).await.expect("capacity available");
    let adapter = rightmove_adapter();

    // When: The adapter fetches through the lease
    let result = adapter
        .fetch(
            &sw1a(),
            FetchContext::new(deadline()).with_identity(&mut lease),
        )
        .await
        .expect("no infrastructure fault");

    // Then: The listing facts are extracted
    assert_eq!(result.status(), FetchStatus::Success);
    assert_eq!(result.tier(), Tier::Scraped);
    let payload = result.payload().expect("payload present");
    assert_eq!(payload.current_price, Observed::Known(725_000));
    assert_eq!(payload.bedrooms, Observed::Known(4));
    assert_eq!(
        payload.listing_url.as_deref(),
        Some("https://portal.test/properties/98765#/")
    );

    // And: The request went out as the identity, searching the postcode
    let request = &transport.requests()[0];
    assert_eq!(request.method, HttpMethod::Get);
    assert!(request.url.contains("searchLocation=SW1A%201AA"), "{}", request.url);
    assert_eq!(request.header("referer"), Some("https://portal.test/"));
    assert_eq!(
        request.header("user-agent"),
        Some(lease.identity().profile().user_agent)
    );
    assert_eq!(lease.identity().request_count(), 1);
}

#[tokio::test]
async fn when_a_portal_serves_a_challenge_then_the_result_is_blocked_and_the_identity_burned() {
    // Given: The portal answers with a captcha interstitial
    let transport = Arc::new(ScriptedHttpClient::always(HttpResponse::new(
        200,
        "<html><body><div class=\"g-recaptcha\">Please complete the captcha</div></body></html>",
    )));
    let pool = portal_pool(SourceId::Rightmove, &transport);
    let mut lease = pool.checkout(&deadline()).await.expect("capacity available");
    let burned = lease.identity_id();
    let adapter = rightmove_adapter();

    // When: The adapter fetches and the lease is returned
    let result = adapter
        .fetch(
            &sw1a(),
            FetchContext::new(deadline()).with_identity(&mut lease),
        )
        .await
        .expect("no infrastructure fault");
    drop(lease);

    // Then: Blocked is reported and the identity never comes back
    assert_eq!(result.status(), FetchStatus::Blocked);
    assert_eq!(pool.stats().retired, 1);
    let next = pool.checkout(&deadline()).await.expect("replacement available");
    assert_ne!(next.identity_id(), burned);
}

#[tokio::test]
async fn when_a_portal_has_no_results_then_not_found_is_reported() {
    // Given: An empty search page
    let transport = Arc::new(ScriptedHttpClient::always(HttpResponse::new(
        200,
        "<html><body><h1>No results found</h1></body></html>",
    )));
    let pool = portal_pool(SourceId::Rightmove, &transport);
    let mut lease = pool.checkout(&deadline()).await.expect("capacity available");

    // When: The adapter fetches
    let result = rightmove_adapter()
        .fetch(
            &sw1a(),
            FetchContext::new(deadline()).with_identity(&mut lease),
        )
        .await
        .expect("no infrastructure fault");

    // Then: The portal affirmatively has nothing
    assert_eq!(result.status(), FetchStatus::NotFound);
}

#[tokio::test]
async fn when_pages_are_rendered_remotely_then_the_page_status_is_taken_from_the_service() {
    // Given: A render service that reports the page itself returned 404
    let service = Arc::new(ScriptedHttpClient::always(
        HttpResponse::new(200, "<html>gone</html>").with_header("x-response-code", "404"),
    ));
    let client = RenderServiceClient::new(
        Arc::clone(&service) as Arc<dyn HttpClient>,
        "http://render.test:3000",
    );

    // When: A page navigation is executed through the client
    let response = client
        .execute(HttpRequest::get("https://www.zoopla.co.uk/for-sale/property/york/"))
        .await
        .expect("service reachable");

    // Then: The page status is surfaced and the service saw one POST
    assert_eq!(response.status, 404);
    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Post);
    assert_eq!(requests[0].url, "http://render.test:3000/content");
}
