//! # Credential Format Detection
//!
//! Classifies a raw credential string as JWT, SD-JWT, or mDOC and
//! provides the base64url and compact-serialization splitting helpers
//! shared by every decoder in the crate.

use base64ct::{Base64UrlUnpadded as Base64, Encoding};
use ciborium::Value;

use crate::error::Error;

/// Characters that never occur inside a compact JOSE serialization.
/// Their presence means the input is JSON, HTML, or free text.
const NON_COMPACT_CHARS: [char; 4] = [' ', '\n', '\t', '{'];

/// A detected credential format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Compact JWS, `header.payload.signature`.
    Jwt,

    /// SD-JWT: a JWS followed by `~`-delimited disclosures and an
    /// optional key-binding JWT.
    SdJwt,

    /// ISO 18013-5 issuer-signed document, base64url-encoded CBOR.
    Mdoc,

    /// None of the above.
    Unknown,
}

/// Detect the credential format of a raw string.
///
/// Rules are applied in order: SD-JWT (tilde-delimited with a JWS
/// prefix), then plain JWT, then base64url-encoded CBOR carrying an
/// mdoc document map. Anything else is `Unknown`.
#[must_use]
pub fn detect(input: &str) -> Format {
    let input = input.trim();

    if input.contains('~') {
        let prefix = input.split('~').next().unwrap_or_default();
        if is_compact_jws(prefix) {
            return Format::SdJwt;
        }
        return Format::Unknown;
    }

    if is_compact_jws(input) {
        return Format::Jwt;
    }

    if let Ok(bytes) = decode_base64url(input)
        && looks_like_mdoc(&bytes)
    {
        return Format::Mdoc;
    }

    Format::Unknown
}

/// Decode base64url with or without `=` padding.
///
/// # Errors
///
/// Returns [`Error::InvalidBase64`] if the input is not base64url.
pub fn decode_base64url(input: &str) -> Result<Vec<u8>, Error> {
    Base64::decode_vec(input.trim_end_matches('='))
        .map_err(|e| Error::InvalidBase64(e.to_string()))
}

/// Encode bytes as unpadded base64url.
#[must_use]
pub fn encode_base64url(bytes: &[u8]) -> String {
    Base64::encode_string(bytes)
}

/// An SD-JWT compact serialization split into its `~`-delimited parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdJwtParts<'a> {
    /// The issuer-signed JWS.
    pub jwt: &'a str,

    /// Base64url-encoded disclosure segments, in wire order.
    pub disclosures: Vec<&'a str>,

    /// The key-binding JWT, present when the trailing segment is
    /// nonempty.
    pub key_binding: Option<&'a str>,
}

/// Split `jwt~d1~…~[kb]` into its parts.
///
/// # Errors
///
/// Returns [`Error::MalformedCompact`] when the input has fewer than two
/// `~`-delimited segments.
pub fn split_sd_jwt(compact: &str) -> Result<SdJwtParts<'_>, Error> {
    let segments: Vec<&str> = compact.split('~').collect();
    if segments.len() < 2 {
        return Err(Error::MalformedCompact(format!(
            "expected at least 2 tilde-delimited segments, got {}",
            segments.len()
        )));
    }

    let last = segments[segments.len() - 1];
    Ok(SdJwtParts {
        jwt: segments[0],
        disclosures: segments[1..segments.len() - 1].to_vec(),
        key_binding: if last.is_empty() { None } else { Some(last) },
    })
}

/// Whether the string has the shape of a compact JWS: three
/// dot-separated segments with nonempty header and payload, and no
/// whitespace or JSON delimiters. The signature segment may be empty.
#[must_use]
pub fn is_compact_jws(input: &str) -> bool {
    let parts: Vec<&str> = input.split('.').collect();
    parts.len() == 3
        && !parts[0].is_empty()
        && !parts[1].is_empty()
        && !input.contains(NON_COMPACT_CHARS)
}

/// Whether the string has the shape of a compact JWE: five
/// dot-separated segments with a nonempty protected header.
#[must_use]
pub fn is_compact_jwe(input: &str) -> bool {
    let parts: Vec<&str> = input.split('.').collect();
    parts.len() == 5 && !parts[0].is_empty() && !input.contains(NON_COMPACT_CHARS)
}

/// Whether the string is a single compact JOSE token (JWS or JWE).
#[must_use]
pub fn is_compact_token(input: &str) -> bool {
    is_compact_jws(input) || is_compact_jwe(input)
}

// An mdoc is a CBOR map carrying `docType` alongside issuer-signed
// namespaces, either directly or nested under `issuerSigned`.
fn looks_like_mdoc(bytes: &[u8]) -> bool {
    let Ok(value) = ciborium::from_reader::<Value, _>(bytes) else {
        return false;
    };
    let Value::Map(entries) = value else {
        return false;
    };

    fn has_key(entries: &[(Value, Value)], key: &str) -> bool {
        entries.iter().any(|(k, _)| k.as_text() == Some(key))
    }

    if !has_key(&entries, "docType") {
        return false;
    }
    if has_key(&entries, "nameSpaces") {
        return true;
    }
    entries.iter().any(|(k, v)| {
        k.as_text() == Some("issuerSigned")
            && matches!(v, Value::Map(inner) if has_key(inner, "nameSpaces"))
    })
}
