//! Request fingerprints.

use std::{borrow::Cow, fmt};

use sha2::{Digest, Sha256};

use crate::{Method, Request};

/// Separator between the URL and each `name:value` header pair.
const DELIMITER: &str = "__";

/// Storage-key suffix of an episode's in-flight marker.
const MARKER_SUFFIX: &str = "__requested";

/// A deterministic fingerprint of a cacheable request.
///
/// The key is the lowercase hex SHA-256 digest of `METHOD url` followed by
/// the configured header names and their values, in configuration order. A
/// header the request lacks contributes an empty value, so "absent" and
/// "present but empty" share a key. Repeated headers contribute all their
/// values joined with `", "`.
///
/// # Examples
///
/// ```
/// use rttp_singleflight::{Method, cache::CacheKey};
///
/// let headers = vec!["x-should-applied".to_string()];
/// let yes = CacheKey::build(&Method::Get, "/headers", &headers, |_| Some("yes"));
/// let no = CacheKey::build(&Method::Get, "/headers", &headers, |_| Some("no"));
///
/// assert_ne!(yes, no);
/// assert_eq!(yes.as_str().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprints `method` and `url` together with the values `lookup`
    /// yields for each of `header_names`.
    pub fn build<'a, F>(method: &Method, url: &str, header_names: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        Self::digest(
            method,
            url,
            header_names
                .iter()
                .map(|name| (name.as_str(), lookup(name).map(Cow::Borrowed))),
        )
    }

    /// Fingerprints a parsed request: its method, full target URL and the
    /// configured headers, looked up case-insensitively.
    pub fn for_request(request: &Request, header_names: &[String]) -> Self {
        let headers = request.headers();
        Self::digest(
            request.method(),
            &request.url(),
            header_names
                .iter()
                .map(|name| (name.as_str(), headers.get_joined(name))),
        )
    }

    fn digest<'n, 'v>(
        method: &Method,
        url: &str,
        headers: impl IntoIterator<Item = (&'n str, Option<Cow<'v, str>>)>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str());
        hasher.update(" ");
        hasher.update(url);
        hasher.update(DELIMITER);

        for (name, value) in headers {
            hasher.update(DELIMITER);
            hasher.update(name);
            hasher.update(":");
            hasher.update(value.as_deref().unwrap_or_default());
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The storage key under which this fingerprint's in-flight marker lives.
    pub fn marker_key(&self) -> String {
        format!("{}{MARKER_SUFFIX}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn digest_of_concatenated_input() {
        // sha256("GET /cache__")
        let key = CacheKey::build(&Method::Get, "/cache", &[], |_| None);
        let expected = hex::encode(Sha256::digest(b"GET /cache__"));
        assert_eq!(key.as_str(), expected);

        let key = CacheKey::build(&Method::Get, "/cache", &names(&["a", "b"]), |name| {
            (name == "a").then_some("1")
        });
        let expected = hex::encode(Sha256::digest(b"GET /cache____a:1__b:"));
        assert_eq!(key.as_str(), expected);
    }

    #[test]
    fn deterministic() {
        let headers = names(&["x-tenant"]);
        let a = CacheKey::build(&Method::Get, "/items?page=1", &headers, |_| Some("acme"));
        let b = CacheKey::build(&Method::Get, "/items?page=1", &headers, |_| Some("acme"));
        assert_eq!(a, b);
    }

    #[test]
    fn header_order_is_configuration_order() {
        let lookup = |name: &str| match name {
            "a" => Some("1"),
            "b" => Some("2"),
            _ => None,
        };
        let ab = CacheKey::build(&Method::Get, "/x", &names(&["a", "b"]), lookup);
        let ba = CacheKey::build(&Method::Get, "/x", &names(&["b", "a"]), lookup);
        assert_ne!(ab, ba);
    }

    #[test]
    fn missing_header_equals_empty_value() {
        let headers = names(&["x-should-applied"]);
        let absent = CacheKey::build(&Method::Get, "/headers", &headers, |_| None);
        let empty = CacheKey::build(&Method::Get, "/headers", &headers, |_| Some(""));
        assert_eq!(absent, empty);
    }

    #[test]
    fn configured_header_separates_keys() {
        let headers = names(&["x-should-applied"]);
        let yes = request("GET /headers HTTP/1.1\r\nX-Should-Applied: yes\r\n\r\n");
        let no = request("GET /headers HTTP/1.1\r\nX-Should-Applied: no\r\n\r\n");
        let none = request("GET /headers HTTP/1.1\r\n\r\n");

        let keys = [
            CacheKey::for_request(&yes, &headers),
            CacheKey::for_request(&no, &headers),
            CacheKey::for_request(&none, &headers),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);
        assert_ne!(keys[1], keys[2]);
    }

    #[test]
    fn unconfigured_header_is_ignored() {
        let a = request("GET /cache HTTP/1.1\r\nUser-Agent: curl\r\n\r\n");
        let b = request("GET /cache HTTP/1.1\r\nUser-Agent: wget\r\n\r\n");
        assert_eq!(CacheKey::for_request(&a, &[]), CacheKey::for_request(&b, &[]));
    }

    #[test]
    fn query_string_is_part_of_the_key() {
        let a = request("GET /items?page=1 HTTP/1.1\r\n\r\n");
        let b = request("GET /items?page=2 HTTP/1.1\r\n\r\n");
        assert_ne!(CacheKey::for_request(&a, &[]), CacheKey::for_request(&b, &[]));
    }

    #[test]
    fn method_is_part_of_the_key() {
        let get = request("GET /cache HTTP/1.1\r\n\r\n");
        let head = request("HEAD /cache HTTP/1.1\r\n\r\n");
        assert_ne!(CacheKey::for_request(&get, &[]), CacheKey::for_request(&head, &[]));
    }

    #[test]
    fn repeated_header_folds_in_every_value() {
        let headers = names(&["x-tenant"]);
        let single = request("GET /x HTTP/1.1\r\nX-Tenant: a\r\n\r\n");
        let repeated = request("GET /x HTTP/1.1\r\nX-Tenant: a\r\nx-tenant: b\r\n\r\n");

        assert_ne!(
            CacheKey::for_request(&single, &headers),
            CacheKey::for_request(&repeated, &headers)
        );
        assert_eq!(
            CacheKey::for_request(&repeated, &headers),
            CacheKey::build(&Method::Get, "/x", &headers, |_| Some("a, b"))
        );
    }

    #[test]
    fn non_utf8_header_is_not_treated_as_missing() {
        let headers = names(&["x-tenant"]);
        let raw = b"GET /x HTTP/1.1\r\nX-Tenant: \xff\r\n\r\n";
        let garbled = Request::parse(raw).unwrap().0;
        let absent = request("GET /x HTTP/1.1\r\n\r\n");
        assert_ne!(
            CacheKey::for_request(&garbled, &headers),
            CacheKey::for_request(&absent, &headers)
        );
    }

    #[test]
    fn marker_key_lives_in_its_own_namespace() {
        let key = CacheKey::build(&Method::Get, "/cache", &[], |_| None);
        assert_eq!(key.marker_key(), format!("{key}__requested"));
        assert_ne!(key.marker_key(), key.as_str());
    }
}
