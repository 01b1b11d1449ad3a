//! Session cookies for sticky client sessions.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredCookie {
    name: String,
    value: String,
    expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e <= now)
    }
}

/// Cookies remembered per endpoint, shared by every call of a client.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<HashMap<String, Vec<StoredCookie>>>,
}

/// Scheme, host and port of `uri`; the raw string when it does not parse.
fn jar_key(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(url) => url.origin().ascii_serialization(),
        Err(_) => uri.to_string(),
    }
}

/// Parse one `Set-Cookie` / `Set-Cookie2` value.
fn parse_set_cookie(value: &str, now: DateTime<Utc>) -> Option<StoredCookie> {
    let mut parts = value.split(';');
    let (name, val) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut max_age: Option<i64> = None;
    let mut expires: Option<DateTime<Utc>> = None;
    for attr in parts {
        let (key, v) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim().trim_matches('"')),
            None => (attr.trim(), ""),
        };
        if key.eq_ignore_ascii_case("max-age") {
            max_age = v.parse().ok();
        } else if key.eq_ignore_ascii_case("expires") {
            expires = DateTime::parse_from_rfc2822(v)
                .ok()
                .map(|d| d.with_timezone(&Utc));
        }
    }
    // Max-Age wins over Expires.
    let expires = match max_age {
        Some(secs) => Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d)),
        None => expires,
    };
    Some(StoredCookie {
        name: name.to_string(),
        value: val.trim().trim_matches('"').to_string(),
        expires,
    })
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the cookies a response from `uri` set.
    pub fn record<'a>(&self, uri: &str, set_cookie: impl IntoIterator<Item = &'a str>) {
        self.record_at(uri, set_cookie, Utc::now());
    }

    fn record_at<'a>(
        &self,
        uri: &str,
        set_cookie: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) {
        let mut jar = self.cookies.lock();
        let stored = jar.entry(jar_key(uri)).or_default();
        for value in set_cookie {
            let cookie = match parse_set_cookie(value, now) {
                Some(c) => c,
                None => continue,
            };
            stored.retain(|c| c.name != cookie.name);
            if cookie.is_expired(now) {
                debug!(cookie = %cookie.name, "Cookie removed");
            } else {
                stored.push(cookie);
            }
        }
    }

    /// `Cookie` header for a request to `uri`. Remembered cookies are
    /// merged into `explicit`; a cookie the caller set explicitly wins.
    pub fn cookie_header(&self, uri: &str, explicit: Option<&str>) -> Option<String> {
        self.cookie_header_at(uri, explicit, Utc::now())
    }

    fn cookie_header_at(
        &self,
        uri: &str,
        explicit: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let mut pairs: Vec<String> = explicit
            .map(|e| {
                e.split(';')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let explicit_names: Vec<String> = pairs
            .iter()
            .filter_map(|p| p.split_once('=').map(|(n, _)| n.trim().to_string()))
            .collect();

        let mut jar = self.cookies.lock();
        if let Some(stored) = jar.get_mut(&jar_key(uri)) {
            stored.retain(|c| !c.is_expired(now));
            for c in stored.iter() {
                if !explicit_names.contains(&c.name) {
                    pairs.push(format!("{}={}", c.name, c.value));
                }
            }
        }
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    /// Number of live cookies for `uri`.
    pub fn len(&self, uri: &str) -> usize {
        let now = Utc::now();
        self.cookies
            .lock()
            .get(&jar_key(uri))
            .map(|s| s.iter().filter(|c| !c.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.cookies.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "http://localhost:8080/soap";

    #[test]
    fn test_record_and_send() {
        let jar = CookieJar::new();
        jar.record(URI, ["JSESSIONID=abc123; Path=/; HttpOnly"]);
        assert_eq!(
            jar.cookie_header("http://localhost:8080/other", None).as_deref(),
            Some("JSESSIONID=abc123")
        );
        assert_eq!(jar.cookie_header("http://otherhost/soap", None), None);
    }

    #[test]
    fn test_explicit_cookie_is_merged() {
        let jar = CookieJar::new();
        jar.record(URI, ["JSESSIONID=abc123", "route=r1"]);
        assert_eq!(
            jar.cookie_header(URI, Some("route=mine; lang=en")).as_deref(),
            Some("route=mine; lang=en; JSESSIONID=abc123")
        );
    }

    #[test]
    fn test_max_age_and_expires() {
        let jar = CookieJar::new();
        let now = Utc::now();
        jar.record_at(
            URI,
            [
                "short=1; Max-Age=10",
                "old=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
                "long=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Max-Age=3600",
            ],
            now,
        );
        assert_eq!(
            jar.cookie_header_at(URI, None, now).as_deref(),
            Some("short=1; long=1")
        );
        let later = now + Duration::seconds(60);
        assert_eq!(jar.cookie_header_at(URI, None, later).as_deref(), Some("long=1"));
    }

    #[test]
    fn test_zero_max_age_deletes() {
        let jar = CookieJar::new();
        jar.record(URI, ["JSESSIONID=abc123"]);
        jar.record(URI, ["JSESSIONID=; Max-Age=0"]);
        assert_eq!(jar.len(URI), 0);
    }
}
