//! # Traffic Classification and Decoding
//!
//! Maps an intercepted exchange to its OID4VP/VCI message class, then
//! extracts the semantically meaningful fields for that class: query
//! parameters, form/JSON payloads, nested JWT/JWE structures, and any
//! embedded credentials. Classification is total — anything
//! unrecognized is `Unknown` — and nested parse failures are swallowed
//! by omitting the affected field.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use url::Url;

use crate::proxy::{TrafficClass, TrafficEntry, jarm};
use crate::{decode, format, sd_jwt};

const PREVIEW_LEN: usize = 100;

pub(crate) fn classify(entry: &mut TrafficEntry) {
    entry.class = classify_entry(entry);
    entry.class_label = entry.class.label().to_string();
    entry.decoded = decode_entry(entry);
    entry.credentials = extract_credentials(entry);
}

// Rule order matters: a POST to /credential carrying a `response` field
// is a VP auth response, not a credential request.
fn classify_entry(entry: &TrafficEntry) -> TrafficClass {
    let url = Url::parse(&entry.url).ok();
    let path = url.as_ref().map(Url::path).unwrap_or_default();

    if path.contains(".well-known/openid-credential-issuer") {
        return TrafficClass::VciMetadata;
    }

    if let Some(url) = &url {
        if query_has(url, "credential_offer") || query_has(url, "credential_offer_uri") {
            return TrafficClass::VciCredentialOffer;
        }
        if query_get(url, "client_id").is_some_and(|v| !v.is_empty())
            && query_get(url, "response_type").as_deref() == Some("vp_token")
        {
            return TrafficClass::VpAuthRequest;
        }
    }

    if entry.method == "GET" && format::is_compact_jws(entry.response_body.trim()) {
        return TrafficClass::VpRequestObject;
    }

    if entry.method == "POST" {
        if ["vp_token", "presentation_submission", "id_token", "response"]
            .iter()
            .any(|field| has_body_field(&entry.request_body, field))
        {
            return TrafficClass::VpAuthResponse;
        }
        if path.ends_with("/token") {
            return TrafficClass::VciTokenRequest;
        }
        if path.ends_with("/credential") || path.ends_with("/credentials") {
            return TrafficClass::VciCredentialRequest;
        }
    }

    TrafficClass::Unknown
}

fn decode_entry(entry: &TrafficEntry) -> Option<Map<String, Value>> {
    let mut decoded = Map::new();

    match entry.class {
        TrafficClass::VpAuthRequest => {
            if let Ok(url) = Url::parse(&entry.url) {
                decode_auth_request(&url, &mut decoded);
            }
        }

        TrafficClass::VpRequestObject => {
            if let Ok((header, payload, _)) =
                sd_jwt::parse_jws_parts(entry.response_body.trim())
            {
                // the verifier's ephemeral key, used by the wallet to
                // encrypt the JARM response in direct_post.jwt
                if let Some(jwks) = payload.get("jwks").filter(|v| v.is_object()) {
                    decoded.insert("encryption_jwks".to_string(), jwks.clone());
                }
                decoded.insert("header".to_string(), Value::Object(header));
                decoded.insert("payload".to_string(), Value::Object(payload));
            }
        }

        TrafficClass::VpAuthResponse => {
            decode_auth_response(&entry.request_body, &mut decoded);
        }

        TrafficClass::VciCredentialOffer => {
            if let Ok(url) = Url::parse(&entry.url) {
                if let Some(offer) = query_get(&url, "credential_offer")
                    && let Ok(parsed) = serde_json::from_str::<Map<String, Value>>(&offer)
                {
                    decoded.insert("credential_offer".to_string(), Value::Object(parsed));
                }
                if let Some(uri) = query_get(&url, "credential_offer_uri") {
                    decoded.insert("credential_offer_uri".to_string(), json!(uri));
                }
            }
        }

        TrafficClass::VciMetadata => {
            if let Ok(metadata) =
                serde_json::from_str::<Map<String, Value>>(&entry.response_body)
            {
                decoded.insert("metadata".to_string(), Value::Object(metadata));
            }
        }

        TrafficClass::VciTokenRequest => {
            for (key, value) in parse_form_or_json(&entry.request_body) {
                decoded.insert(key, json!(value));
            }
            if let Ok(response) =
                serde_json::from_str::<Map<String, Value>>(&entry.response_body)
            {
                decoded.insert("response".to_string(), Value::Object(response));
            }
        }

        TrafficClass::VciCredentialRequest => {
            if let Ok(request) = serde_json::from_str::<Map<String, Value>>(&entry.request_body)
            {
                decoded.insert("request".to_string(), Value::Object(request));
            }
            if let Ok(response) =
                serde_json::from_str::<Map<String, Value>>(&entry.response_body)
            {
                decode_issued_credentials(&response, &mut decoded);
                decoded.insert("response".to_string(), Value::Object(response));
            }
        }

        TrafficClass::Unknown => {}
    }

    if decoded.is_empty() { None } else { Some(decoded) }
}

fn decode_auth_request(url: &Url, decoded: &mut Map<String, Value>) {
    decoded.insert(
        "client_id".to_string(),
        json!(query_get(url, "client_id").unwrap_or_default()),
    );
    decoded.insert(
        "response_type".to_string(),
        json!(query_get(url, "response_type").unwrap_or_default()),
    );

    for param in ["response_mode", "nonce", "state", "request_uri", "response_uri"] {
        if let Some(value) = query_get(url, param).filter(|v| !v.is_empty()) {
            decoded.insert(param.to_string(), json!(value));
        }
    }

    // JSON-valued query params become objects; kept raw when unparseable
    for param in ["dcql_query", "presentation_definition"] {
        if let Some(value) = query_get(url, param).filter(|v| !v.is_empty()) {
            match serde_json::from_str::<Map<String, Value>>(&value) {
                Ok(parsed) => decoded.insert(param.to_string(), Value::Object(parsed)),
                Err(_) => decoded.insert(param.to_string(), json!(value)),
            };
        }
    }
}

fn decode_auth_response(request_body: &str, decoded: &mut Map<String, Value>) {
    let fields = parse_form_or_json(request_body);

    // direct_post.jwt: encrypted/signed JARM response in `response`
    if let Some(response) = fields.get("response").filter(|v| !v.is_empty()) {
        decoded.insert("response_preview".to_string(), json!(preview(response)));
        jarm::decode_response(response, decoded);
    }

    if let Some(vp_token) = fields.get("vp_token") {
        decoded.insert("vp_token_preview".to_string(), json!(preview(vp_token)));
        if let Ok(credential) = decode::decode(vp_token) {
            decoded.insert("vp_token_decoded".to_string(), credential);
        }
    }

    if let Some(id_token) = fields.get("id_token") {
        decoded.insert("id_token_preview".to_string(), json!(preview(id_token)));
        if let Ok((header, payload, _)) = sd_jwt::parse_jws_parts(id_token) {
            decoded.insert("id_token_header".to_string(), Value::Object(header));
            decoded.insert("id_token_payload".to_string(), Value::Object(payload));
        }
    }

    if let Some(state) = fields.get("state") {
        decoded.insert("state".to_string(), json!(state));
    }

    if let Some(submission) = fields.get("presentation_submission")
        && let Ok(parsed) = serde_json::from_str::<Map<String, Value>>(submission)
    {
        decoded.insert("presentation_submission".to_string(), Value::Object(parsed));
    }
}

fn decode_issued_credentials(response: &Map<String, Value>, decoded: &mut Map<String, Value>) {
    if let Some(credential) = response.get("credential").and_then(Value::as_str)
        && let Ok(parsed) = decode::decode(credential)
    {
        decoded.insert("credential_decoded".to_string(), parsed);
    }

    // batch response: credentials array of {credential} objects
    if let Some(batch) = response.get("credentials").and_then(Value::as_array) {
        let parsed: Vec<Value> = batch
            .iter()
            .filter_map(|item| item.get("credential").and_then(Value::as_str))
            .filter_map(|credential| decode::decode(credential).ok())
            .collect();
        if !parsed.is_empty() {
            decoded.insert("credentials_decoded".to_string(), Value::Array(parsed));
        }
    }
}

// Raw credential strings, so downstream tooling can offer them to the
// credential decoder directly.
fn extract_credentials(entry: &TrafficEntry) -> Vec<String> {
    let mut credentials = Vec::new();

    match entry.class {
        TrafficClass::VpAuthResponse => {
            let fields = parse_form_or_json(&entry.request_body);
            for field in ["vp_token", "id_token"] {
                if let Some(value) = fields.get(field).filter(|v| !v.is_empty()) {
                    credentials.push(value.clone());
                }
            }
        }

        TrafficClass::VpRequestObject => {
            let body = entry.response_body.trim();
            if format::is_compact_jws(body) {
                credentials.push(body.to_string());
            }
        }

        TrafficClass::VciCredentialRequest => {
            if let Ok(response) =
                serde_json::from_str::<Map<String, Value>>(&entry.response_body)
            {
                if let Some(credential) =
                    response.get("credential").and_then(Value::as_str).filter(|v| !v.is_empty())
                {
                    credentials.push(credential.to_string());
                }
                if let Some(batch) = response.get("credentials").and_then(Value::as_array) {
                    credentials.extend(
                        batch
                            .iter()
                            .filter_map(|item| item.get("credential").and_then(Value::as_str))
                            .filter(|v| !v.is_empty())
                            .map(ToString::to_string),
                    );
                }
            }
        }

        _ => {}
    }

    credentials
}

fn query_get(url: &Url, key: &str) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
}

fn query_has(url: &Url, key: &str) -> bool {
    url.query_pairs().any(|(k, _)| k == key)
}

// A field counts as present in either URL-encoded form data or a JSON
// object body.
fn has_body_field(body: &str, field: &str) -> bool {
    if body.trim_start().starts_with('{') {
        if let Ok(map) = serde_json::from_str::<Map<String, Value>>(body) {
            return map.contains_key(field);
        }
    }
    url::form_urlencoded::parse(body.as_bytes()).any(|(k, _)| k == field)
}

// URL-encoded form first, falling back to JSON; non-string JSON values
// are re-serialized so nested objects survive as raw strings.
fn parse_form_or_json(body: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();

    if body.trim_start().starts_with('{') {
        if let Ok(map) = serde_json::from_str::<Map<String, Value>>(body) {
            for (key, value) in map {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                fields.insert(key, value);
            }
            return fields;
        }
    }

    for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
        fields.insert(key.into_owned(), value.into_owned());
    }
    fields
}

fn preview(value: &str) -> String {
    if value.chars().count() <= PREVIEW_LEN {
        return value.to_string();
    }
    let truncated: String = value.chars().take(PREVIEW_LEN).collect();
    format!("{truncated}...")
}
