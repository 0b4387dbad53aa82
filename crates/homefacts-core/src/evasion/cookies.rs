use std::collections::BTreeMap;

/// Name/value cookie store owned by a single identity.
///
/// Attributes such as `Path` and `Domain` are ignored: an identity only ever
/// talks to the one site its pool serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one `Set-Cookie` header value.
    pub fn absorb(&mut self, set_cookie: &str) {
        let mut parts = set_cookie.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let expired = parts
            .filter_map(|attribute| attribute.split_once('='))
            .any(|(key, value)| {
                key.trim().eq_ignore_ascii_case("max-age")
                    && value.trim().parse::<i64>().is_ok_and(|age| age <= 0)
            });

        if expired {
            self.cookies.remove(name);
        } else {
            self.cookies.insert(name.to_owned(), value.trim().to_owned());
        }
    }

    /// Value for the `Cookie` request header, or `None` when empty.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorbs_and_replays_cookies() {
        let mut jar = CookieJar::new();
        jar.absorb("session=abc123; Path=/; HttpOnly");
        jar.absorb("consent=yes; Max-Age=31536000");

        assert_eq!(jar.get("session"), Some("abc123"));
        assert_eq!(
            jar.header_value().as_deref(),
            Some("consent=yes; session=abc123")
        );
    }

    #[test]
    fn expired_cookies_are_removed() {
        let mut jar = CookieJar::new();
        jar.absorb("session=abc123");
        jar.absorb("session=; Max-Age=0");
        assert!(jar.is_empty());
        assert_eq!(jar.header_value(), None);
    }

    #[test]
    fn malformed_values_are_ignored() {
        let mut jar = CookieJar::new();
        jar.absorb("no-equals-sign");
        jar.absorb("=orphan");
        assert_eq!(jar.len(), 0);
    }
}
