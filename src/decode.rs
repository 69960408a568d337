//! # Credential Auto-Decoding
//!
//! Detects the format of a raw credential string and projects it as the
//! canonical JSON shape consumed by downstream adapters (terminal
//! output, NDJSON, the decode API).

use serde_json::{Map, Value, json};

use crate::error::Error;
use crate::format::{self, Format};
use crate::{mso_mdoc, sd_jwt};

/// Keys hidden from filtered output unless verbose mode is requested.
pub const DEFAULT_HIDDEN_KEYS: &[&str] = &["x5c"];

/// Detect the credential format and project it as JSON.
///
/// # Errors
///
/// Returns [`Error::UnknownFormat`] when the input matches no known
/// format, or the underlying parser error.
pub fn decode(input: &str) -> Result<Value, Error> {
    match format::detect(input) {
        Format::SdJwt => Ok(sd_jwt::parse(input)?.to_sd_jwt_json()),
        Format::Jwt => Ok(sd_jwt::parse(input)?.to_jwt_json()),
        Format::Mdoc => Ok(mso_mdoc::parse(input)?.to_json()),
        Format::Unknown => Err(Error::UnknownFormat),
    }
}

/// Produce a copy of `value` with noisy keys hidden, for terminal-style
/// display. Hidden array-valued keys collapse to a summary string,
/// hidden non-array keys are removed. With `verbose` set the value is
/// returned unchanged.
#[must_use]
pub fn filtered(value: &Value, verbose: bool, hidden: &[&str]) -> Value {
    if verbose {
        return value.clone();
    }

    match value {
        Value::Object(entries) => {
            let mut out = Map::new();
            for (key, val) in entries {
                if hidden.contains(&key.as_str()) {
                    if let Value::Array(items) = val {
                        out.insert(
                            key.clone(),
                            json!(format!("({} entries, use -v to show)", items.len())),
                        );
                    }
                    // non-array hidden keys are silently omitted
                    continue;
                }
                out.insert(key.clone(), filtered(val, verbose, hidden));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| filtered(v, verbose, hidden)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_unknown_format() {
        assert!(matches!(decode("definitely not a credential"), Err(Error::UnknownFormat)));
    }

    #[test]
    fn filtered_hides_array_key_with_summary() {
        let value = json!({
            "alg": "ES256",
            "typ": "dc+sd-jwt",
            "x5c": ["MIIC...", "MIID..."],
        });

        let out = filtered(&value, false, DEFAULT_HIDDEN_KEYS);

        assert_eq!(out["alg"], "ES256");
        assert_eq!(out["x5c"], "(2 entries, use -v to show)");
    }

    #[test]
    fn filtered_omits_non_array_hidden_key() {
        let value = json!({"alg": "ES256", "secret": "hidden-string"});

        let out = filtered(&value, false, &["secret"]);

        assert_eq!(out["alg"], "ES256");
        assert!(out.get("secret").is_none());
    }

    #[test]
    fn filtered_verbose_passes_through() {
        let value = json!({"x5c": ["MIIC..."], "nested": {"x5c": [1, 2]}});
        assert_eq!(filtered(&value, true, DEFAULT_HIDDEN_KEYS), value);
    }

    #[test]
    fn filtered_recurses_into_nested_objects() {
        let value = json!({"header": {"x5c": ["a", "b", "c"]}});

        let out = filtered(&value, false, DEFAULT_HIDDEN_KEYS);

        assert_eq!(out["header"]["x5c"], "(3 entries, use -v to show)");
    }
}
