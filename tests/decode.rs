//! End-to-End Credential Decoding Tests

use ciborium::Value as Cbor;
use oid4vc_probe::format::encode_base64url;
use oid4vc_probe::{Error, decode};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

fn encode_segment(value: &Value) -> String {
    encode_base64url(&serde_json::to_vec(value).expect("should serialize"))
}

fn make_jwt(header: &Value, payload: &Value) -> String {
    format!("{}.{}.c2ln", encode_segment(header), encode_segment(payload))
}

fn disclosure_digest(encoded: &str) -> String {
    encode_base64url(Sha256::digest(encoded.as_bytes()).as_slice())
}

#[test]
fn jwt_projection() {
    let jwt = make_jwt(
        &json!({"alg": "ES256", "typ": "JWT"}),
        &json!({"sub": "user123", "iss": "https://example.com"}),
    );

    let projected = decode(&jwt).expect("should decode");

    assert_eq!(
        projected,
        json!({
            "format": "jwt",
            "header": {"alg": "ES256", "typ": "JWT"},
            "payload": {"sub": "user123", "iss": "https://example.com"},
        })
    );
    // absent, not null or empty
    assert!(projected.get("warnings").is_none());
    assert!(projected.get("disclosures").is_none());
}

#[test]
fn sd_jwt_resolution() {
    // --------------------------------------------------
    // issue: two disclosures referenced from the payload `_sd`
    // --------------------------------------------------
    let d1 = encode_segment(&json!(["salt1", "given_name", "Erika"]));
    let d2 = encode_segment(&json!(["salt2", "family_name", "Mustermann"]));
    let jwt = make_jwt(
        &json!({"alg": "ES256", "typ": "dc+sd-jwt"}),
        &json!({
            "iss": "https://issuer.example",
            "_sd_alg": "sha-256",
            "_sd": [disclosure_digest(&d1), disclosure_digest(&d2)],
        }),
    );
    let sd_jwt = format!("{jwt}~{d1}~{d2}~");

    // --------------------------------------------------
    // decode and check the resolved claim set
    // --------------------------------------------------
    let projected = decode(&sd_jwt).expect("should decode");

    assert_eq!(projected["format"], "dc+sd-jwt");
    assert_eq!(
        projected["resolvedClaims"],
        json!({
            "iss": "https://issuer.example",
            "given_name": "Erika",
            "family_name": "Mustermann",
        })
    );

    let disclosures = projected["disclosures"].as_array().expect("should have disclosures");
    assert_eq!(disclosures.len(), 2);
    assert_eq!(disclosures[0]["name"], "given_name");
    assert_eq!(disclosures[0]["digest"], disclosure_digest(&d1));
    assert_eq!(disclosures[1]["value"], "Mustermann");

    // clean resolution: no warnings, no key binding, no digest markers
    assert!(projected.get("warnings").is_none());
    assert!(projected.get("keyBindingJWT").is_none());
    assert!(projected["resolvedClaims"].get("_sd").is_none());
    assert!(projected["resolvedClaims"].get("_sd_alg").is_none());
}

// --------------------------------------------------
// mdoc fixtures, CBOR built by hand
// --------------------------------------------------

fn cbor_bytes(value: &Cbor) -> Vec<u8> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).expect("should serialize");
    bytes
}

fn text(s: &str) -> Cbor {
    Cbor::Text(s.to_string())
}

fn tagged_item(digest_id: u32, identifier: &str, element_value: Cbor) -> Cbor {
    let item = Cbor::Map(vec![
        (text("digestID"), Cbor::Integer(digest_id.into())),
        (text("random"), Cbor::Bytes(vec![0x5A; 16])),
        (text("elementIdentifier"), text(identifier)),
        (text("elementValue"), element_value),
    ]);
    Cbor::Tag(24, Box::new(Cbor::Bytes(cbor_bytes(&item))))
}

fn pid_mdoc() -> String {
    let doc_type = "eu.europa.ec.eudi.pid.1";

    let mso = Cbor::Map(vec![
        (text("version"), text("1.0")),
        (text("digestAlgorithm"), text("SHA-256")),
        (text("valueDigests"), Cbor::Map(vec![])),
        (text("docType"), text(doc_type)),
        (
            text("validityInfo"),
            Cbor::Map(vec![
                (text("signed"), text("2026-01-01T00:00:00Z")),
                (text("validFrom"), text("2026-01-01T00:00:00Z")),
                (text("validUntil"), text("2027-01-01T00:00:00Z")),
            ]),
        ),
    ]);
    let issuer_auth = Cbor::Array(vec![
        Cbor::Bytes(cbor_bytes(&Cbor::Map(vec![(
            Cbor::Integer(1.into()),
            Cbor::Integer((-7).into()),
        )]))),
        Cbor::Map(vec![]),
        Cbor::Bytes(cbor_bytes(&Cbor::Tag(24, Box::new(Cbor::Bytes(cbor_bytes(&mso)))))),
        Cbor::Bytes(vec![0xCC; 64]),
    ]);

    let doc = Cbor::Map(vec![
        (text("docType"), text(doc_type)),
        (
            text("issuerSigned"),
            Cbor::Map(vec![
                (
                    text("nameSpaces"),
                    Cbor::Map(vec![
                        (
                            text(doc_type),
                            Cbor::Array(vec![tagged_item(0, "given_name", text("ERIKA"))]),
                        ),
                        (
                            text("org.iso.18013.5.1"),
                            Cbor::Array(vec![tagged_item(
                                1,
                                "portrait",
                                Cbor::Bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]),
                            )]),
                        ),
                    ]),
                ),
                (text("issuerAuth"), issuer_auth),
            ]),
        ),
    ]);

    encode_base64url(&cbor_bytes(&doc))
}

#[test]
fn mdoc_namespaces() {
    let projected = decode(&pid_mdoc()).expect("should decode");

    assert_eq!(projected["format"], "mso_mdoc");
    assert_eq!(projected["docType"], "eu.europa.ec.eudi.pid.1");

    let claims = projected["claims"].as_object().expect("should have claims");
    assert_eq!(claims.len(), 2);
    assert_eq!(claims["eu.europa.ec.eudi.pid.1"]["given_name"], "ERIKA");
    assert!(claims["org.iso.18013.5.1"]["portrait"].is_string());
}

#[test]
fn mdoc_validity_formatting() {
    let projected = decode(&pid_mdoc()).expect("should decode");

    let validity = &projected["mso"]["validityInfo"];
    assert_eq!(validity["signed"], "2026-01-01T00:00:00Z");
    assert_eq!(validity["validFrom"], "2026-01-01T00:00:00Z");
    assert_eq!(validity["validUntil"], "2027-01-01T00:00:00Z");

    // deviceAuth and expectedUpdate are absent, not null
    assert!(projected.get("deviceAuth").is_none());
    assert!(validity.get("expectedUpdate").is_none());
}

#[test]
fn unknown_input_rejected() {
    assert_eq!(decode("not a credential").unwrap_err(), Error::UnknownFormat);
    assert_eq!(decode(r#"{"json":"object"}"#).unwrap_err(), Error::UnknownFormat);
}
