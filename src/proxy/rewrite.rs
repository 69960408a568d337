//! # Host Rewriting
//!
//! Substitutes the upstream target host with the local listener host in
//! response bodies and redirect headers, so that clients keep talking
//! through the proxy. Plain substring replacement is intentional: full
//! URL parsing would miss hosts embedded in JSON string literals and
//! HTML attributes. Compact JOSE tokens pass through untouched — a
//! rewritten character would break their signatures.

use http::HeaderMap;
use http::header::{CONTENT_LOCATION, HeaderName, HeaderValue, LOCATION};

use crate::format;

/// Headers whose values carry URLs back to the client.
const REWRITTEN_HEADERS: [HeaderName; 2] = [LOCATION, CONTENT_LOCATION];

/// Rewrites host references between an upstream target and the local
/// listener.
#[derive(Clone, Debug)]
pub struct Rewriter {
    target_host: String,
    local_host: String,
}

impl Rewriter {
    /// Create a rewriter mapping `target_host` to `local_host`.
    #[must_use]
    pub fn new(target_host: impl Into<String>, local_host: impl Into<String>) -> Self {
        Self { target_host: target_host.into(), local_host: local_host.into() }
    }

    /// Rewrite a response body. JWT bodies (by content type or shape)
    /// are returned unchanged; everything else gets every occurrence of
    /// the target host replaced.
    #[must_use]
    pub fn rewrite_body(&self, body: &str, content_type: &str) -> String {
        if content_type.starts_with("application/jwt") || format::is_compact_token(body.trim()) {
            return body.to_string();
        }
        body.replace(&self.target_host, &self.local_host)
    }

    /// Rewrite `Location` and `Content-Location` headers in place. All
    /// other headers are left untouched.
    pub fn rewrite_headers(&self, headers: &mut HeaderMap) {
        for name in REWRITTEN_HEADERS {
            let Some(value) = headers.get(&name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            let rewritten = value.replace(&self.target_host, &self.local_host);
            if let Ok(value) = HeaderValue::from_str(&rewritten) {
                headers.insert(name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http::header::CONTENT_TYPE;

    use super::*;

    fn rewriter() -> Rewriter {
        Rewriter::new("target.example.com", "localhost:9090")
    }

    #[test]
    fn replaces_host_in_body() {
        let body = r#"{"redirect_uri":"http://target.example.com/callback","other":"value"}"#;
        assert_eq!(
            rewriter().rewrite_body(body, "application/json"),
            r#"{"redirect_uri":"http://localhost:9090/callback","other":"value"}"#
        );
    }

    #[test]
    fn replaces_multiple_occurrences() {
        let body = "http://target.example.com/a and http://target.example.com/b";
        assert_eq!(
            rewriter().rewrite_body(body, "text/html"),
            "http://localhost:9090/a and http://localhost:9090/b"
        );
    }

    #[test]
    fn no_match_is_identity() {
        let body = r#"{"key":"value"}"#;
        assert_eq!(rewriter().rewrite_body(body, "application/json"), body);
    }

    #[test]
    fn jwt_content_type_untouched() {
        // payload contains the target host, base64url-encoded
        let jwt = "eyJhbGciOiJFUzI1NiJ9.eyJpc3MiOiJ0YXJnZXQuZXhhbXBsZS5jb20ifQ.sig";
        assert_eq!(rewriter().rewrite_body(jwt, "application/jwt"), jwt);
    }

    #[test]
    fn compact_token_body_untouched_regardless_of_content_type() {
        let jws = "eyJhbGciOiJFUzI1NiJ9.eyJpc3MiOiJ0YXJnZXQuZXhhbXBsZS5jb20ifQ.sig";
        assert_eq!(rewriter().rewrite_body(jws, "text/plain"), jws);

        let jwe = "eyJhbGciOiJFQ0RILUVTIn0..aXY.Y2lwaGVydGV4dA.dGFn";
        assert_eq!(rewriter().rewrite_body(jwe, "application/jose"), jwe);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let rw = rewriter();
        for body in [
            "http://target.example.com/a",
            r#"{"uri":"http://target.example.com/x"}"#,
            "eyJhbGciOiJFUzI1NiJ9.eyJpc3MiOiJ0YXJnZXQuZXhhbXBsZS5jb20ifQ.sig",
            "no hosts here",
        ] {
            let once = rw.rewrite_body(body, "text/plain");
            assert_eq!(rw.rewrite_body(&once, "text/plain"), once);
        }
    }

    #[test]
    fn rewrites_location_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, "http://target.example.com/callback?code=123".parse().unwrap());
        headers.insert(CONTENT_LOCATION, "http://target.example.com/resource".parse().unwrap());

        rewriter().rewrite_headers(&mut headers);

        assert_eq!(headers[LOCATION], "http://localhost:9090/callback?code=123");
        assert_eq!(headers[CONTENT_LOCATION], "http://localhost:9090/resource");
    }

    #[test]
    fn other_headers_untouched() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("x-upstream", "http://target.example.com".parse().unwrap());

        rewriter().rewrite_headers(&mut headers);

        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-upstream"], "http://target.example.com");
    }
}
