use crate::http_client::HttpResponse;

const DEFAULT_STATUSES: &[u16] = &[403, 429, 503];
// Widget scripts alone are not a challenge; listing pages embed reCAPTCHA on
// contact forms.
const DEFAULT_MARKERS: &[&str] = &[
    "complete the captcha",
    "g-recaptcha-response",
    "captcha-delivery",
    "cf-challenge",
    "challenge-platform",
    "just a moment",
    "access denied",
    "px-captcha",
    "are you a robot",
    "unusual traffic",
];

/// Recognises bot-defense responses by status code or body marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDetector {
    statuses: Vec<u16>,
    markers: Vec<String>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self {
            statuses: DEFAULT_STATUSES.to_vec(),
            markers: DEFAULT_MARKERS.iter().map(|m| (*m).to_owned()).collect(),
        }
    }
}

impl BlockDetector {
    pub fn new(statuses: Vec<u16>, markers: Vec<String>) -> Self {
        Self {
            statuses,
            markers: markers
                .into_iter()
                .map(|marker| marker.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Adds site-specific challenge markers to the defaults.
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.markers
            .extend(markers.into_iter().map(|m| m.as_ref().to_ascii_lowercase()));
        self
    }

    /// Returns the reason when `response` looks like a bot-defense page.
    pub fn inspect(&self, response: &HttpResponse) -> Option<String> {
        if self.statuses.contains(&response.status) {
            return Some(format!("bot defense status {}", response.status));
        }

        let body = response.body.to_ascii_lowercase();
        self.markers
            .iter()
            .find(|marker| body.contains(marker.as_str()))
            .map(|marker| format!("challenge marker '{marker}' in response body"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_block_statuses() {
        let detector = BlockDetector::default();
        let reason = detector
            .inspect(&HttpResponse::new(429, "slow down"))
            .expect("429 is a block");
        assert!(reason.contains("429"));
    }

    #[test]
    fn detects_challenge_markers_case_insensitively() {
        let detector = BlockDetector::default();
        let page = HttpResponse::new(200, "<title>Just a moment...</title>");
        assert!(detector.inspect(&page).is_some());
    }

    #[test]
    fn ordinary_pages_pass() {
        let detector = BlockDetector::default().with_markers(["Pardon Our Interruption"]);
        assert!(detector
            .inspect(&HttpResponse::new(200, "<div class=\"propertyCard\">"))
            .is_none());
        assert!(detector
            .inspect(&HttpResponse::new(200, "pardon our interruption"))
            .is_some());
    }

    #[test]
    fn embedded_recaptcha_widget_is_not_a_block() {
        let detector = BlockDetector::default();
        let listing = HttpResponse::new(
            200,
            "<script src=\"https://www.google.com/recaptcha/api.js\"></script>\
             <div class=\"propertyCard\">Terraced house</div>\
             <form id=\"contact-agent\"><div class=\"g-recaptcha\" data-sitekey=\"k\"></div></form>",
        );
        assert_eq!(detector.inspect(&listing), None);

        let interstitial =
            HttpResponse::new(200, "<p>Please complete the CAPTCHA to continue</p>");
        assert!(detector.inspect(&interstitial).is_some());
    }
}
