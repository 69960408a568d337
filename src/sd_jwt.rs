//! # JWT and SD-JWT Parsing
//!
//! Decodes compact JWS and IETF SD-JWT serializations
//! (`<JWT>~<Disclosure 1>~…~[<KB-JWT>]`) without verifying signatures,
//! resolving selective disclosures back into the claim set the issuer
//! originally signed over.
//!
//! Disclosure digests are SHA-256 over the ASCII bytes of the
//! base64url-encoded disclosure segment exactly as it appeared on the
//! wire, per [I-D.ietf-oauth-selective-disclosure-jwt].
//!
//! [I-D.ietf-oauth-selective-disclosure-jwt]: https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-17.html

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::format;

/// A single disclosed claim.
#[derive(Clone, Debug, PartialEq)]
pub struct Disclosure {
    /// The random salt, first element of the disclosure array.
    pub salt: String,

    /// The claim name. Empty for array-entry disclosures.
    pub name: String,

    /// The disclosed claim value.
    pub value: Value,

    /// base64url(SHA-256(base64url-encoded disclosure segment)).
    pub digest: String,

    /// Whether this is a 2-element array-entry disclosure.
    pub is_array_entry: bool,

    /// The original base64url segment, retained for digest
    /// recomputation.
    pub encoded: String,
}

/// A key-binding JWT appended after the final `~`. Only header and
/// payload are decoded; the signature is not checked.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyBindingJwt {
    /// Decoded JOSE header.
    pub header: Map<String, Value>,

    /// Decoded claims.
    pub payload: Map<String, Value>,
}

/// A parsed JWT or SD-JWT. A plain JWT is the degenerate case with no
/// disclosures, where `resolved_claims` equals `payload`.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// Decoded JOSE header.
    pub header: Map<String, Value>,

    /// The signed payload as issued, digests and all.
    pub payload: Map<String, Value>,

    /// Raw signature bytes. Empty when the signature segment is empty.
    pub signature: Vec<u8>,

    /// All disclosures carried by the serialization, referenced or not.
    pub disclosures: Vec<Disclosure>,

    /// The payload with `_sd` / `...` digests replaced by the disclosed
    /// claims and `_sd_alg` removed.
    pub resolved_claims: Map<String, Value>,

    /// Key-binding JWT, when the trailing segment was present and
    /// parseable.
    pub key_binding_jwt: Option<KeyBindingJwt>,

    /// Non-fatal findings: unknown `_sd_alg`, duplicate or unreferenced
    /// disclosures, unresolvable digests, malformed key binding.
    pub warnings: Vec<String>,
}

/// Parse a compact JWT or SD-JWT serialization.
///
/// # Errors
///
/// Returns [`Error::MalformedCompact`], [`Error::InvalidBase64`],
/// [`Error::InvalidJsonHeader`], [`Error::InvalidJsonPayload`], or
/// [`Error::InvalidDisclosure`]. A malformed key-binding JWT is a
/// warning, not an error.
pub fn parse(compact: &str) -> Result<Token, Error> {
    let compact = compact.trim();

    if !compact.contains('~') {
        let (header, payload, signature) = parse_jws_parts(compact)?;
        return Ok(Token {
            header,
            resolved_claims: payload.clone(),
            payload,
            signature,
            disclosures: Vec::new(),
            key_binding_jwt: None,
            warnings: Vec::new(),
        });
    }

    let parts = format::split_sd_jwt(compact)?;
    let (header, payload, signature) = parse_jws_parts(parts.jwt)?;
    let mut warnings = Vec::new();

    if let Some(alg) = payload.get("_sd_alg").and_then(Value::as_str)
        && alg != "sha-256"
    {
        warnings.push(format!("unsupported _sd_alg \"{alg}\"; continuing with sha-256"));
    }

    let disclosures: Vec<Disclosure> =
        parts.disclosures.iter().map(|seg| parse_disclosure(seg)).collect::<Result<_, _>>()?;

    let resolved_claims = resolve_claims(&payload, &disclosures, &mut warnings);

    let key_binding_jwt = match parts.key_binding {
        Some(segment) => match parse_key_binding(segment) {
            Ok(kb) => Some(kb),
            Err(e) => {
                warnings.push(format!("malformed key-binding JWT: {e}"));
                None
            }
        },
        None => None,
    };

    Ok(Token {
        header,
        payload,
        signature,
        disclosures,
        resolved_claims,
        key_binding_jwt,
        warnings,
    })
}

/// Split and decode a compact JWS into header, payload, and signature
/// bytes. No signature verification.
///
/// # Errors
///
/// Returns [`Error::MalformedCompact`] on the wrong segment count,
/// [`Error::InvalidBase64`] on undecodable segments, and
/// [`Error::InvalidJsonHeader`] / [`Error::InvalidJsonPayload`] when a
/// segment is not a JSON object.
pub fn parse_jws_parts(
    compact: &str,
) -> Result<(Map<String, Value>, Map<String, Value>, Vec<u8>), Error> {
    let segments: Vec<&str> = compact.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::MalformedCompact(format!(
            "expected 3 dot-separated segments, got {}",
            segments.len()
        )));
    }
    if segments[0].is_empty() || segments[1].is_empty() {
        return Err(Error::MalformedCompact("empty header or payload segment".to_string()));
    }

    let header_bytes = format::decode_base64url(segments[0])?;
    let header: Map<String, Value> = serde_json::from_slice(&header_bytes)
        .map_err(|e| Error::InvalidJsonHeader(e.to_string()))?;

    let payload_bytes = format::decode_base64url(segments[1])?;
    let payload: Map<String, Value> = serde_json::from_slice(&payload_bytes)
        .map_err(|e| Error::InvalidJsonPayload(e.to_string()))?;

    let signature =
        if segments[2].is_empty() { Vec::new() } else { format::decode_base64url(segments[2])? };

    Ok((header, payload, signature))
}

/// Compute the digest of a base64url-encoded disclosure segment.
#[must_use]
pub fn disclosure_digest(encoded: &str) -> String {
    format::encode_base64url(Sha256::digest(encoded.as_bytes()).as_slice())
}

fn parse_disclosure(encoded: &str) -> Result<Disclosure, Error> {
    let bytes = format::decode_base64url(encoded)
        .map_err(|e| Error::InvalidDisclosure(format!("{encoded}: {e}")))?;
    let array: Vec<Value> = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidDisclosure(format!("not a JSON array: {e}")))?;

    let salt = array
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidDisclosure("salt must be a string".to_string()))?
        .to_string();

    let (name, value, is_array_entry) = match array.len() {
        3 => {
            let name = array[1]
                .as_str()
                .ok_or_else(|| Error::InvalidDisclosure("claim name must be a string".to_string()))?
                .to_string();
            (name, array[2].clone(), false)
        }
        2 => (String::new(), array[1].clone(), true),
        n => {
            return Err(Error::InvalidDisclosure(format!("array has {n} elements, expected 2 or 3")));
        }
    };

    Ok(Disclosure {
        salt,
        name,
        value,
        digest: disclosure_digest(encoded),
        is_array_entry,
        encoded: encoded.to_string(),
    })
}

fn parse_key_binding(segment: &str) -> Result<KeyBindingJwt, Error> {
    let (header, payload, _) = parse_jws_parts(segment)?;
    Ok(KeyBindingJwt { header, payload })
}

// Post-order walk replacing `_sd` digests and `{"...": digest}` array
// placeholders with disclosed values, producing a new tree. A digest
// index built up front keeps resolution linear in the payload size.
fn resolve_claims(
    payload: &Map<String, Value>, disclosures: &[Disclosure], warnings: &mut Vec<String>,
) -> Map<String, Value> {
    let index: HashMap<&str, &Disclosure> =
        disclosures.iter().map(|d| (d.digest.as_str(), d)).collect();
    let mut matched = HashSet::new();

    let resolved = resolve_value(&Value::Object(payload.clone()), &index, &mut matched, warnings);

    for disclosure in disclosures {
        if !matched.contains(disclosure.digest.as_str()) {
            let label =
                if disclosure.is_array_entry { "(array entry)" } else { disclosure.name.as_str() };
            warnings
                .push(format!("unreferenced disclosure {label} (digest {})", disclosure.digest));
        }
    }

    match resolved {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn resolve_value(
    value: &Value, index: &HashMap<&str, &Disclosure>, matched: &mut HashSet<String>,
    warnings: &mut Vec<String>,
) -> Value {
    match value {
        Value::Object(entries) => {
            let mut out = Map::new();
            for (key, val) in entries {
                match key.as_str() {
                    "_sd" => resolve_digest_list(val, &mut out, index, matched, warnings),
                    "_sd_alg" => {}
                    _ => {
                        out.insert(key.clone(), resolve_value(val, index, matched, warnings));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                if let Some(digest) = array_placeholder_digest(item) {
                    if matched.contains(digest) {
                        warnings.push(format!("duplicate digest {digest}; first match wins"));
                        continue;
                    }
                    match index.get(digest) {
                        Some(d) if d.is_array_entry => {
                            matched.insert(digest.to_string());
                            out.push(resolve_value(&d.value, index, matched, warnings));
                        }
                        _ => {
                            warnings.push(format!(
                                "no matching disclosure for digest {digest}; array entry dropped"
                            ));
                        }
                    }
                } else {
                    out.push(resolve_value(item, index, matched, warnings));
                }
            }
            Value::Array(out)
        }
        other => other.clone(),
    }
}

fn resolve_digest_list(
    digests: &Value, out: &mut Map<String, Value>, index: &HashMap<&str, &Disclosure>,
    matched: &mut HashSet<String>, warnings: &mut Vec<String>,
) {
    let Some(digests) = digests.as_array() else {
        warnings.push("_sd is not an array; ignored".to_string());
        return;
    };

    for digest in digests.iter().filter_map(Value::as_str) {
        if matched.contains(digest) {
            warnings.push(format!("duplicate digest {digest}; first match wins"));
            continue;
        }
        match index.get(digest) {
            Some(d) if !d.is_array_entry => {
                matched.insert(digest.to_string());
                let value = resolve_value(&d.value, index, matched, warnings);
                out.insert(d.name.clone(), value);
            }
            _ => {
                warnings
                    .push(format!("no matching disclosure for digest {digest}; claim dropped"));
            }
        }
    }
}

// `{"...": "<digest>"}` with no other members.
fn array_placeholder_digest(value: &Value) -> Option<&str> {
    let entries = value.as_object()?;
    if entries.len() != 1 {
        return None;
    }
    entries.get("...")?.as_str()
}

impl Token {
    /// Project a plain JWT as its canonical JSON shape.
    #[must_use]
    pub fn to_jwt_json(&self) -> Value {
        json!({
            "format": "jwt",
            "header": self.header,
            "payload": self.payload,
        })
    }

    /// Project an SD-JWT as its canonical JSON shape. `warnings` and
    /// `keyBindingJWT` are omitted when empty or absent.
    #[must_use]
    pub fn to_sd_jwt_json(&self) -> Value {
        let disclosures: Vec<Value> = self
            .disclosures
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "value": d.value,
                    "salt": d.salt,
                    "digest": d.digest,
                    "isArrayEntry": d.is_array_entry,
                })
            })
            .collect();

        let mut out = Map::new();
        out.insert("format".to_string(), json!("dc+sd-jwt"));
        out.insert("header".to_string(), Value::Object(self.header.clone()));
        out.insert("payload".to_string(), Value::Object(self.payload.clone()));
        out.insert("disclosures".to_string(), Value::Array(disclosures));
        out.insert("resolvedClaims".to_string(), Value::Object(self.resolved_claims.clone()));
        if !self.warnings.is_empty() {
            out.insert("warnings".to_string(), json!(self.warnings));
        }
        if let Some(kb) = &self.key_binding_jwt {
            out.insert(
                "keyBindingJWT".to_string(),
                json!({"header": kb.header, "payload": kb.payload}),
            );
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn encode_segment(value: &Value) -> String {
        format::encode_base64url(&serde_json::to_vec(value).unwrap())
    }

    fn make_jwt(header: &Value, payload: &Value) -> String {
        format!("{}.{}.c2ln", encode_segment(header), encode_segment(payload))
    }

    // Builds an SD-JWT whose payload `_sd` (or nested `_sd`) arrays
    // hold the digests of the given disclosure arrays.
    fn make_sd_jwt(payload: Value, disclosures: &[Value]) -> String {
        let encoded: Vec<String> = disclosures.iter().map(encode_segment).collect();
        let jwt = make_jwt(&json!({"alg": "ES256", "typ": "dc+sd-jwt"}), &payload);
        let mut out = jwt;
        for seg in &encoded {
            out.push('~');
            out.push_str(seg);
        }
        out.push('~');
        out
    }

    fn digest_of(disclosure: &Value) -> String {
        disclosure_digest(&encode_segment(disclosure))
    }

    #[test]
    fn plain_jwt() {
        let jwt = make_jwt(
            &json!({"alg": "ES256", "typ": "JWT"}),
            &json!({"sub": "user123", "iss": "https://example.com"}),
        );
        let token = parse(&jwt).unwrap();

        assert_eq!(token.header["alg"], "ES256");
        assert_eq!(token.payload["sub"], "user123");
        assert_eq!(token.resolved_claims, token.payload);
        assert!(token.disclosures.is_empty());
        assert!(token.warnings.is_empty());
    }

    #[test]
    fn empty_signature_allowed() {
        let jwt = format!(
            "{}.{}.",
            encode_segment(&json!({"alg": "none"})),
            encode_segment(&json!({"sub": "x"}))
        );
        let token = parse(&jwt).unwrap();
        assert!(token.signature.is_empty());
    }

    #[test]
    fn malformed_inputs() {
        assert!(matches!(parse("only-one-part"), Err(Error::MalformedCompact(_))));
        assert!(matches!(parse("a.b.c.d"), Err(Error::MalformedCompact(_))));
        assert!(matches!(
            parse("!!!.eyJhIjoxfQ.x"),
            Err(Error::InvalidBase64(_))
        ));

        let not_json = format!("{}.{}.x", format::encode_base64url(b"hi"), encode_segment(&json!({})));
        assert!(matches!(parse(&not_json), Err(Error::InvalidJsonHeader(_))));

        let bad_payload =
            format!("{}.{}.x", encode_segment(&json!({})), format::encode_base64url(b"hi"));
        assert!(matches!(parse(&bad_payload), Err(Error::InvalidJsonPayload(_))));
    }

    #[test]
    fn resolves_object_disclosures() {
        let d1 = json!(["salt1", "given_name", "Erika"]);
        let d2 = json!(["salt2", "family_name", "Mustermann"]);
        let sd_jwt = make_sd_jwt(
            json!({
                "iss": "https://issuer.example",
                "_sd_alg": "sha-256",
                "_sd": [digest_of(&d1), digest_of(&d2)],
            }),
            &[d1, d2],
        );

        let token = parse(&sd_jwt).unwrap();

        assert_eq!(
            Value::Object(token.resolved_claims.clone()),
            json!({
                "iss": "https://issuer.example",
                "given_name": "Erika",
                "family_name": "Mustermann",
            })
        );
        assert_eq!(token.disclosures.len(), 2);
        assert_eq!(token.disclosures[0].digest, digest_of(&json!(["salt1", "given_name", "Erika"])));
        assert!(token.warnings.is_empty());
        // insertion order: signed claims first, disclosed claims at the
        // point of the `_sd` array
        let keys: Vec<&String> = token.resolved_claims.keys().collect();
        assert_eq!(keys, ["iss", "given_name", "family_name"]);
    }

    #[test]
    fn resolves_nested_disclosures() {
        let inner = json!(["salt-street", "street_address", "123 Elm St"]);
        let outer = json!(["salt-addr", "address", {"_sd": [digest_of(&inner)]}]);
        let sd_jwt = make_sd_jwt(
            json!({"iss": "x", "_sd": [digest_of(&outer)]}),
            &[outer, inner],
        );

        let token = parse(&sd_jwt).unwrap();

        assert_eq!(
            token.resolved_claims["address"],
            json!({"street_address": "123 Elm St"})
        );
        assert!(token.warnings.is_empty());
    }

    #[test]
    fn resolves_array_entry_disclosures() {
        let entry = json!(["salt-a", "DE"]);
        let sd_jwt = make_sd_jwt(
            json!({
                "nationalities": [{"...": digest_of(&entry)}, "FR", {"...": "bm90LWZvdW5k"}],
            }),
            &[entry],
        );

        let token = parse(&sd_jwt).unwrap();

        // unmatched placeholder is dropped with a warning
        assert_eq!(token.resolved_claims["nationalities"], json!(["DE", "FR"]));
        assert!(token.disclosures[0].is_array_entry);
        assert_eq!(token.disclosures[0].name, "");
        assert_eq!(token.warnings.len(), 1);
        assert!(token.warnings[0].contains("no matching disclosure"));
    }

    #[test]
    fn no_sd_markers_survive_resolution() {
        let inner = json!(["s1", "deep", {"_sd": []}]);
        let sd_jwt = make_sd_jwt(
            json!({"_sd_alg": "sha-256", "_sd": [digest_of(&inner)], "nested": {"_sd": []}}),
            &[inner],
        );

        let token = parse(&sd_jwt).unwrap();

        fn assert_clean(value: &Value) {
            match value {
                Value::Object(map) => {
                    assert!(!map.contains_key("_sd"));
                    assert!(!map.contains_key("_sd_alg"));
                    map.values().for_each(assert_clean);
                }
                Value::Array(items) => items.iter().for_each(assert_clean),
                _ => {}
            }
        }
        assert_clean(&Value::Object(token.resolved_claims));
    }

    #[test]
    fn duplicate_digest_first_wins() {
        let d = json!(["salt", "email", "erika@example.com"]);
        let digest = digest_of(&d);
        let sd_jwt = make_sd_jwt(json!({"_sd": [digest, digest]}), &[d]);

        let token = parse(&sd_jwt).unwrap();

        assert_eq!(token.resolved_claims["email"], "erika@example.com");
        assert_eq!(token.warnings.len(), 1);
        assert!(token.warnings[0].contains("duplicate digest"));
    }

    #[test]
    fn unreferenced_disclosure_flagged() {
        let referenced = json!(["s1", "a", 1]);
        let stray = json!(["s2", "b", 2]);
        let sd_jwt = make_sd_jwt(json!({"_sd": [digest_of(&referenced)]}), &[referenced, stray]);

        let token = parse(&sd_jwt).unwrap();

        assert_eq!(token.disclosures.len(), 2);
        assert_eq!(token.resolved_claims.get("b"), None);
        assert!(token.warnings.iter().any(|w| w.contains("unreferenced disclosure b")));
    }

    #[test]
    fn unknown_sd_alg_warns_and_continues() {
        let d = json!(["s", "name", "x"]);
        let sd_jwt = make_sd_jwt(json!({"_sd_alg": "sha-512", "_sd": [digest_of(&d)]}), &[d]);

        let token = parse(&sd_jwt).unwrap();

        assert_eq!(token.resolved_claims["name"], "x");
        assert!(token.warnings.iter().any(|w| w.contains("sha-512")));
    }

    #[test]
    fn key_binding_jwt_parsed() {
        let kb = make_jwt(
            &json!({"alg": "ES256", "typ": "kb+jwt"}),
            &json!({"aud": "verifier", "nonce": "abc123"}),
        );
        let sd_jwt = format!("{}~{kb}", make_jwt(&json!({"alg": "ES256"}), &json!({"iss": "x"})));

        let token = parse(&sd_jwt).unwrap();

        let kb = token.key_binding_jwt.expect("key binding");
        assert_eq!(kb.header["typ"], "kb+jwt");
        assert_eq!(kb.payload["nonce"], "abc123");
    }

    #[test]
    fn malformed_key_binding_is_warning() {
        let sd_jwt =
            format!("{}~not-a-jwt", make_jwt(&json!({"alg": "ES256"}), &json!({"iss": "x"})));

        let token = parse(&sd_jwt).unwrap();

        assert!(token.key_binding_jwt.is_none());
        assert!(token.warnings.iter().any(|w| w.contains("key-binding")));
    }

    #[test]
    fn invalid_disclosure_is_fatal() {
        let jwt = make_jwt(&json!({"alg": "ES256"}), &json!({"_sd": []}));
        let bad = format::encode_base64url(br#"{"not":"an array"}"#);
        assert!(matches!(
            parse(&format!("{jwt}~{bad}~")),
            Err(Error::InvalidDisclosure(_))
        ));

        let wrong_len = encode_segment(&json!(["only-salt"]));
        assert!(matches!(
            parse(&format!("{jwt}~{wrong_len}~")),
            Err(Error::InvalidDisclosure(_))
        ));
    }

    #[test]
    fn disclosure_digest_round_trip() {
        let disclosure = json!(["2GLC42sKQveCfGfryNRN9w", "given_name", "Erika"]);
        let encoded = encode_segment(&disclosure);

        let sd_jwt = make_sd_jwt(json!({"_sd": [disclosure_digest(&encoded)]}), &[disclosure]);
        let token = parse(&sd_jwt).unwrap();

        let parsed = &token.disclosures[0];
        assert_eq!(parsed.salt, "2GLC42sKQveCfGfryNRN9w");
        assert_eq!(parsed.name, "given_name");
        assert_eq!(parsed.value, "Erika");
        assert_eq!(parsed.digest, disclosure_digest(&parsed.encoded));
    }
}
