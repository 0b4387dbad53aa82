use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use crate::http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse,
};

const CONTENT_PATH: &str = "/content";
/// Header the render service uses to echo the page's own status.
const UPSTREAM_STATUS_HEADER: &str = "x-response-code";

/// Transport for the browser-automation tier.
///
/// Instead of fetching the page directly, each request is handed to a
/// headless-browser render service which navigates with the identity's
/// user agent, headers and cookies and returns the rendered HTML.
pub struct RenderServiceClient {
    http: Arc<dyn HttpClient>,
    endpoint: String,
    auth: HttpAuth,
}

impl RenderServiceClient {
    pub fn new(http: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            auth: HttpAuth::None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth = HttpAuth::BearerToken(token.into());
        self
    }

    fn render_request(&self, page: &HttpRequest) -> Result<HttpRequest, HttpError> {
        let body = RenderBody::for_page(page);
        let body = serde_json::to_string(&body)
            .map_err(|error| HttpError::new(format!("failed to encode render request: {error}")))?;
        Ok(HttpRequest::post(format!("{}{CONTENT_PATH}", self.endpoint))
            .with_header("content-type", "application/json")
            .with_body(body)
            .with_auth(&self.auth)
            .with_timeout_ms(page.timeout_ms))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderBody<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
    #[serde(rename = "setExtraHTTPHeaders")]
    set_extra_http_headers: BTreeMap<&'a str, &'a str>,
    cookies: Vec<RenderCookie<'a>>,
    goto_options: GotoOptions,
    viewport: Viewport,
}

#[derive(Debug, Serialize)]
struct RenderCookie<'a> {
    name: &'a str,
    value: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct Viewport {
    width: u32,
    height: u32,
}

impl<'a> RenderBody<'a> {
    fn for_page(page: &'a HttpRequest) -> Self {
        let cookies = page
            .header("cookie")
            .map(|header| {
                header
                    .split(';')
                    .filter_map(|pair| pair.trim().split_once('='))
                    .map(|(name, value)| RenderCookie {
                        name,
                        value,
                        url: &page.url,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            url: &page.url,
            user_agent: page.header("user-agent"),
            set_extra_http_headers: page
                .headers
                .iter()
                .filter(|(name, _)| !matches!(name.as_str(), "user-agent" | "cookie"))
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect(),
            cookies,
            goto_options: GotoOptions {
                wait_until: "networkidle2",
                timeout: page.timeout_ms,
            },
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
        }
    }
}

impl HttpClient for RenderServiceClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            if request.method != HttpMethod::Get {
                return Err(HttpError::new("render service only navigates with GET"));
            }

            let rendered = self.http.execute(self.render_request(&request)?).await?;
            if !rendered.is_success() {
                return Err(HttpError::new(format!(
                    "render service returned {}",
                    rendered.status
                )));
            }

            let status = rendered
                .header(UPSTREAM_STATUS_HEADER)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(200);
            Ok(HttpResponse {
                status,
                ..rendered
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn render_request_carries_identity() {
        let client = RenderServiceClient::new(
            Arc::new(crate::ReqwestHttpClient::new()),
            "http://render.local:3000/",
        )
        .with_token("secret");
        let page = HttpRequest::get("https://www.zoopla.co.uk/for-sale/property/york/")
            .with_header("User-Agent", "Mozilla/5.0")
            .with_header("Cookie", "sid=abc; consent=1")
            .with_header("Accept-Language", "en-GB")
            .with_timeout_ms(8_000);

        let request = client.render_request(&page).expect("render request");
        assert_eq!(request.url, "http://render.local:3000/content");
        assert_eq!(request.header("authorization"), Some("Bearer secret"));
        assert_eq!(request.timeout_ms, 8_000);

        let body: Value =
            serde_json::from_str(request.body.as_deref().expect("body")).expect("json body");
        assert_eq!(body["userAgent"], "Mozilla/5.0");
        assert_eq!(body["cookies"][1]["name"], "consent");
        assert_eq!(body["setExtraHTTPHeaders"]["accept-language"], "en-GB");
        assert!(body["setExtraHTTPHeaders"].get("cookie").is_none());
        assert_eq!(body["gotoOptions"]["waitUntil"], "networkidle2");
        assert_eq!(body["gotoOptions"]["timeout"], 8_000);
    }
}
