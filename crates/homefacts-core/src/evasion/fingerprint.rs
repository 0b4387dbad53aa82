use std::collections::BTreeMap;
use std::time::Duration;

/// A coherent browser fingerprint: user agent plus the client hints a real
/// build of that browser would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintProfile {
    pub name: &'static str,
    pub user_agent: &'static str,
    /// `Sec-CH-UA` brand list; only Chromium browsers send client hints.
    pub client_hints: Option<&'static str>,
    pub platform: &'static str,
    pub mobile: bool,
    pub accept: &'static str,
}

const CHROMIUM_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const GECKO_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const WEBKIT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

pub const PROFILES: &[FingerprintProfile] = &[
    FingerprintProfile {
        name: "chrome_120_windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        client_hints: Some("\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\""),
        platform: "\"Windows\"",
        mobile: false,
        accept: CHROMIUM_ACCEPT,
    },
    FingerprintProfile {
        name: "chrome_119_macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        client_hints: Some("\"Google Chrome\";v=\"119\", \"Chromium\";v=\"119\", \"Not?A_Brand\";v=\"24\""),
        platform: "\"macOS\"",
        mobile: false,
        accept: CHROMIUM_ACCEPT,
    },
    FingerprintProfile {
        name: "chrome_118_linux",
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
        client_hints: Some("\"Chromium\";v=\"118\", \"Google Chrome\";v=\"118\", \"Not=A?Brand\";v=\"99\""),
        platform: "\"Linux\"",
        mobile: false,
        accept: CHROMIUM_ACCEPT,
    },
    FingerprintProfile {
        name: "edge_120_windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
        client_hints: Some("\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Microsoft Edge\";v=\"120\""),
        platform: "\"Windows\"",
        mobile: false,
        accept: CHROMIUM_ACCEPT,
    },
    FingerprintProfile {
        name: "firefox_120_windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
        client_hints: None,
        platform: "\"Windows\"",
        mobile: false,
        accept: GECKO_ACCEPT,
    },
    FingerprintProfile {
        name: "firefox_117_macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:117.0) Gecko/20100101 Firefox/117.0",
        client_hints: None,
        platform: "\"macOS\"",
        mobile: false,
        accept: GECKO_ACCEPT,
    },
    FingerprintProfile {
        name: "safari_15_6_macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.6.1 Safari/605.1.15",
        client_hints: None,
        platform: "\"macOS\"",
        mobile: false,
        accept: WEBKIT_ACCEPT,
    },
    FingerprintProfile {
        name: "safari_ios_16_5",
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 16_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Mobile/15E148 Safari/604.1",
        client_hints: None,
        platform: "\"iOS\"",
        mobile: true,
        accept: WEBKIT_ACCEPT,
    },
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-GB,en;q=0.9",
    "en-GB,en-US;q=0.9,en;q=0.8",
    "en-GB,en;q=0.8",
];

impl FingerprintProfile {
    pub fn random() -> &'static Self {
        &PROFILES[fastrand::usize(..PROFILES.len())]
    }

    /// Top-level navigation headers for a fresh tab of this browser.
    pub fn navigation_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        let mut set = |name: &str, value: &str| {
            headers.insert(name.to_owned(), value.to_owned());
        };

        set("user-agent", self.user_agent);
        set("accept", self.accept);
        set(
            "accept-language",
            ACCEPT_LANGUAGES[fastrand::usize(..ACCEPT_LANGUAGES.len())],
        );
        set("upgrade-insecure-requests", "1");
        set("sec-fetch-dest", "document");
        set("sec-fetch-mode", "navigate");
        set("sec-fetch-site", "none");
        set("sec-fetch-user", "?1");
        if fastrand::bool() {
            set("dnt", "1");
        }

        if let Some(brands) = self.client_hints {
            set("sec-ch-ua", brands);
            set("sec-ch-ua-mobile", if self.mobile { "?1" } else { "?0" });
            set("sec-ch-ua-platform", self.platform);
        }

        headers
    }
}

/// Randomized delay window preceding every identity request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingWindow {
    min: Duration,
    max: Duration,
}

impl PacingWindow {
    /// An inverted window collapses to `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub const fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub const fn min(&self) -> Duration {
        self.min
    }

    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Uniform sample from `[min, max]`; never below `min`.
    pub fn sample(&self) -> Duration {
        let spread = self.max.saturating_sub(self.min);
        let spread_ms = u64::try_from(spread.as_millis()).unwrap_or(u64::MAX);
        if spread_ms == 0 {
            return self.min;
        }
        self.min + Duration::from_millis(fastrand::u64(0..=spread_ms))
    }
}

impl Default for PacingWindow {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(2_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chromium_profiles_send_client_hints() {
        let chrome = PROFILES
            .iter()
            .find(|profile| profile.name.starts_with("chrome"))
            .expect("chrome profile");
        let headers = chrome.navigation_headers();
        assert!(headers.contains_key("sec-ch-ua"));
        assert_eq!(headers.get("sec-ch-ua-mobile").map(String::as_str), Some("?0"));
        assert!(headers["accept-language"].starts_with("en-GB"));
    }

    #[test]
    fn gecko_and_webkit_profiles_omit_client_hints() {
        for profile in PROFILES.iter().filter(|profile| profile.client_hints.is_none()) {
            let headers = profile.navigation_headers();
            assert!(!headers.contains_key("sec-ch-ua"), "{}", profile.name);
            assert_eq!(headers["user-agent"], profile.user_agent);
        }
    }

    #[test]
    fn pacing_samples_stay_within_window() {
        let window = PacingWindow::new(Duration::from_millis(500), Duration::from_millis(900));
        for _ in 0..200 {
            let delay = window.sample();
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(900));
        }
    }

    #[test]
    fn inverted_window_collapses_to_minimum() {
        let window = PacingWindow::new(Duration::from_millis(800), Duration::from_millis(100));
        assert_eq!(window.sample(), Duration::from_millis(800));
        assert_eq!(PacingWindow::none().sample(), Duration::ZERO);
    }
}
