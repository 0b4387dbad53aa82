use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::cookies::CookieJar;
use super::fingerprint::FingerprintProfile;
use crate::http_client::{HttpRequest, HttpResponse};

/// Lifecycle of one identity.
///
/// `Idle -> WarmingUp -> Active -> Exhausted`; exhausted identities are
/// retired and never handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    Idle,
    WarmingUp,
    Active,
    Exhausted,
}

/// A rotatable simulated-browser bundle: fingerprint, headers and cookies.
#[derive(Debug, Clone)]
pub struct Identity {
    id: u64,
    profile: &'static FingerprintProfile,
    headers: BTreeMap<String, String>,
    cookies: CookieJar,
    request_count: u32,
    last_used_at: Option<Instant>,
    warmed_at: Option<Instant>,
    state: IdentityState,
}

impl Identity {
    pub(crate) fn generate(id: u64) -> Self {
        let profile = FingerprintProfile::random();
        Self {
            id,
            profile,
            headers: profile.navigation_headers(),
            cookies: CookieJar::new(),
            request_count: 0,
            last_used_at: None,
            warmed_at: None,
            state: IdentityState::Idle,
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub fn profile(&self) -> &'static FingerprintProfile {
        self.profile
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub const fn request_count(&self) -> u32 {
        self.request_count
    }

    pub const fn last_used_at(&self) -> Option<Instant> {
        self.last_used_at
    }

    pub const fn state(&self) -> IdentityState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: IdentityState) {
        if self.state != IdentityState::Exhausted {
            self.state = next;
        }
    }

    pub(crate) fn mark_warmed(&mut self) {
        self.warmed_at = Some(Instant::now());
        self.transition(IdentityState::Active);
    }

    /// Warm-up is needed on first use and once the last one falls outside `freshness`.
    pub(crate) fn needs_warmup(&self, freshness: Duration) -> bool {
        self.warmed_at
            .map_or(true, |warmed_at| warmed_at.elapsed() > freshness)
    }

    /// Applies this identity's headers and cookies to `request`.
    pub(crate) fn decorate(&self, mut request: HttpRequest, referer: Option<&str>) -> HttpRequest {
        for (name, value) in &self.headers {
            request.headers.entry(name.clone()).or_insert_with(|| value.clone());
        }
        if let Some(cookie) = self.cookies.header_value() {
            request.headers.insert(String::from("cookie"), cookie);
        }
        if let Some(referer) = referer {
            request = request
                .with_header("referer", referer)
                .with_header("sec-fetch-site", "same-origin");
        }
        request
    }

    pub(crate) fn record_request(&mut self) {
        self.request_count = self.request_count.saturating_add(1);
        self.last_used_at = Some(Instant::now());
    }

    pub(crate) fn absorb(&mut self, response: &HttpResponse) {
        for cookie in &response.set_cookies {
            self.cookies.absorb(cookie);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_identity_is_idle_and_needs_warmup() {
        let identity = Identity::generate(7);
        assert_eq!(identity.id(), 7);
        assert_eq!(identity.state(), IdentityState::Idle);
        assert!(identity.needs_warmup(Duration::from_secs(900)));
        assert_eq!(identity.request_count(), 0);
    }

    #[test]
    fn decorate_adds_headers_cookies_and_referer() {
        let mut identity = Identity::generate(1);
        identity.absorb(&HttpResponse::new(200, "").with_set_cookie("sid=42; Path=/"));

        let request = identity.decorate(
            HttpRequest::get("https://portal.example.test/search"),
            Some("https://portal.example.test/"),
        );

        assert_eq!(request.header("user-agent"), Some(identity.profile().user_agent));
        assert_eq!(request.header("cookie"), Some("sid=42"));
        assert_eq!(request.header("referer"), Some("https://portal.example.test/"));
        assert_eq!(request.header("sec-fetch-site"), Some("same-origin"));
    }

    #[test]
    fn exhausted_is_final() {
        let mut identity = Identity::generate(1);
        identity.transition(IdentityState::Exhausted);
        identity.mark_warmed();
        assert_eq!(identity.state(), IdentityState::Exhausted);
    }
}
