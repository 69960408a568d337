//! # ISO mDL (mso_mdoc) Decoding
//!
//! Decodes an ISO 18013-5 issuer-signed document: namespaces of
//! tag-24-wrapped `IssuerSignedItem`s, the `COSE_Sign1` issuer
//! authentication, and the Mobile Security Object it signs over.
//! Signatures are decoded but never verified; the raw MSO bytes are
//! preserved so a verifier can be layered on top.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use ciborium::Value;
use coset::{AsCborValue, CoseSign1};
use serde_json::{Map, Value as Json, json};

use crate::error::Error;
use crate::format;

/// A decoded mdoc document.
#[derive(Clone, Debug)]
pub struct Document {
    /// Document type, e.g. `org.iso.18013.5.1.mDL`.
    pub doc_type: String,

    /// Issuer-signed data elements per namespace, in emitted order.
    pub name_spaces: Vec<(String, Vec<IssuerSignedItem>)>,

    /// Issuer data authentication. `None` when the document carries no
    /// `issuerAuth`.
    pub issuer_auth: Option<IssuerAuth>,

    /// Device-signed namespaces and authentication, when present.
    pub device_signed: Option<DeviceSigned>,
}

/// A single issuer-signed data element.
#[derive(Clone, Debug)]
pub struct IssuerSignedItem {
    /// Digest id matching an entry in the MSO `valueDigests`.
    pub digest_id: u32,

    /// Random salt for issuer data authentication.
    pub random: Vec<u8>,

    /// Data element identifier, e.g. `family_name`.
    pub element_identifier: String,

    /// Data element value, preserved as CBOR.
    pub element_value: Value,
}

/// `issuerAuth`: the `COSE_Sign1` envelope and the MSO it carries.
#[derive(Clone, Debug)]
pub struct IssuerAuth {
    /// The decoded `COSE_Sign1` structure.
    pub cose: CoseSign1,

    /// Raw MSO bytes (the tag-24 inner byte string), preserved for
    /// signature verification by downstream tooling.
    pub mso_bytes: Vec<u8>,

    /// The parsed Mobile Security Object.
    pub mso: Mso,
}

/// Mobile Security Object.
#[derive(Clone, Debug)]
pub struct Mso {
    /// MSO version, `1.0`.
    pub version: String,

    /// Digest algorithm used for `valueDigests`, e.g. `SHA-256`.
    pub digest_algorithm: String,

    /// Document type the MSO signs over.
    pub doc_type: String,

    /// MSO validity window.
    pub validity_info: ValidityInfo,

    /// Digests over every issuer-signed item, per namespace.
    pub value_digests: Vec<(String, Vec<(u64, Vec<u8>)>)>,

    /// Device key information (`COSE_Key` and authorizations).
    pub device_key_info: Option<Value>,

    /// Revocation status information.
    pub status: Option<Value>,
}

/// MSO validity window, normalized to UTC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidityInfo {
    /// When the MSO was signed.
    pub signed: DateTime<Utc>,

    /// Start of validity.
    pub valid_from: DateTime<Utc>,

    /// End of validity.
    pub valid_until: DateTime<Utc>,

    /// When the issuer expects to re-sign.
    pub expected_update: Option<DateTime<Utc>>,
}

/// `deviceSigned`: data elements and authentication from the holder
/// device.
#[derive(Clone, Debug)]
pub struct DeviceSigned {
    /// Device namespaces, with the tag-24 wrapper removed.
    pub name_spaces: Value,

    /// `deviceAuth`: a `deviceSignature` or `deviceMac`.
    pub device_auth: Value,
}

/// Parse a base64url-encoded mdoc.
///
/// # Errors
///
/// Returns [`Error::InvalidBase64`] or any error from [`parse_bytes`].
pub fn parse(input: &str) -> Result<Document, Error> {
    parse_bytes(&format::decode_base64url(input.trim())?)
}

/// Parse an mdoc from raw CBOR bytes.
///
/// # Errors
///
/// Returns [`Error::NotCbor`], [`Error::WrongTopLevelShape`],
/// [`Error::MissingDocType`], [`Error::MalformedCoseSign1`], or
/// [`Error::MalformedMso`]. A missing `issuerAuth` is not an error.
pub fn parse_bytes(bytes: &[u8]) -> Result<Document, Error> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| Error::NotCbor(e.to_string()))?;
    let Value::Map(top) = &value else {
        return Err(Error::WrongTopLevelShape("expected a CBOR map".to_string()));
    };

    let doc_type = entry(top, "docType")
        .and_then(Value::as_text)
        .ok_or(Error::MissingDocType)?
        .to_string();

    // `nameSpaces`/`issuerAuth` live under `issuerSigned` in a
    // device-response document, or at the top level in a bare
    // issuer-signed structure.
    let (ns_value, auth_value) = if let Some(issuer_signed) = entry(top, "issuerSigned") {
        let Value::Map(inner) = issuer_signed else {
            return Err(Error::WrongTopLevelShape("issuerSigned is not a map".to_string()));
        };
        (entry(inner, "nameSpaces"), entry(inner, "issuerAuth"))
    } else {
        (entry(top, "nameSpaces"), entry(top, "issuerAuth"))
    };

    let name_spaces = match ns_value {
        Some(v) => parse_name_spaces(v)?,
        None => Vec::new(),
    };
    let issuer_auth = auth_value.map(parse_issuer_auth).transpose()?;
    let device_signed = entry(top, "deviceSigned").map(parse_device_signed).transpose()?;

    Ok(Document { doc_type, name_spaces, issuer_auth, device_signed })
}

fn entry<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries.iter().find(|(k, _)| k.as_text() == Some(key)).map(|(_, v)| v)
}

fn parse_name_spaces(value: &Value) -> Result<Vec<(String, Vec<IssuerSignedItem>)>, Error> {
    let Value::Map(entries) = value else {
        return Err(Error::WrongTopLevelShape("nameSpaces is not a map".to_string()));
    };

    let mut name_spaces = Vec::new();
    for (key, items) in entries {
        let Some(name_space) = key.as_text() else {
            return Err(Error::WrongTopLevelShape("namespace key is not a string".to_string()));
        };
        let Value::Array(items) = items else {
            return Err(Error::WrongTopLevelShape(format!(
                "namespace {name_space} is not an array"
            )));
        };

        let mut parsed = Vec::new();
        for item in items {
            parsed.push(parse_item(item)?);
        }
        name_spaces.push((name_space.to_string(), parsed));
    }

    Ok(name_spaces)
}

// Each item is tag 24 wrapping the CBOR-encoded IssuerSignedItem map.
fn parse_item(value: &Value) -> Result<IssuerSignedItem, Error> {
    let bytes = tag24_bytes(value)
        .ok_or_else(|| Error::WrongTopLevelShape("issuer-signed item is not tag 24".to_string()))?;
    let inner: Value = ciborium::from_reader(bytes)
        .map_err(|e| Error::WrongTopLevelShape(format!("issuer-signed item: {e}")))?;
    let Value::Map(entries) = &inner else {
        return Err(Error::WrongTopLevelShape("issuer-signed item is not a map".to_string()));
    };

    let digest_id = entry(entries, "digestID")
        .and_then(Value::as_integer)
        .and_then(|i| u32::try_from(i128::from(i)).ok())
        .ok_or_else(|| Error::WrongTopLevelShape("issuer-signed item digestID".to_string()))?;
    let random = entry(entries, "random")
        .and_then(Value::as_bytes)
        .cloned()
        .unwrap_or_default();
    let element_identifier = entry(entries, "elementIdentifier")
        .and_then(Value::as_text)
        .ok_or_else(|| {
            Error::WrongTopLevelShape("issuer-signed item elementIdentifier".to_string())
        })?
        .to_string();
    let element_value = entry(entries, "elementValue").cloned().unwrap_or(Value::Null);

    Ok(IssuerSignedItem { digest_id, random, element_identifier, element_value })
}

fn parse_issuer_auth(value: &Value) -> Result<IssuerAuth, Error> {
    let cose = CoseSign1::from_cbor_value(value.clone())
        .map_err(|e| Error::MalformedCoseSign1(e.to_string()))?;
    let payload = cose
        .payload
        .clone()
        .ok_or_else(|| Error::MalformedCoseSign1("payload missing".to_string()))?;

    // The payload is itself CBOR: tag 24 wrapping the MSO byte string.
    let inner: Value = ciborium::from_reader(payload.as_slice())
        .map_err(|e| Error::MalformedMso(format!("payload is not CBOR: {e}")))?;
    let mso_bytes = match &inner {
        Value::Tag(24, boxed) => match boxed.as_ref() {
            Value::Bytes(bytes) => bytes.clone(),
            _ => {
                return Err(Error::MalformedMso("tag 24 content is not a byte string".to_string()));
            }
        },
        Value::Map(_) => payload,
        _ => return Err(Error::MalformedMso("payload is neither tag 24 nor a map".to_string())),
    };

    let mso = parse_mso(&mso_bytes)?;
    Ok(IssuerAuth { cose, mso_bytes, mso })
}

fn parse_mso(bytes: &[u8]) -> Result<Mso, Error> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| Error::MalformedMso(format!("not CBOR: {e}")))?;
    let Value::Map(entries) = &value else {
        return Err(Error::MalformedMso("expected a map".to_string()));
    };

    let text_field = |key: &str| {
        entry(entries, key)
            .and_then(Value::as_text)
            .map(ToString::to_string)
            .ok_or_else(|| Error::MalformedMso(format!("missing {key}")))
    };

    let validity_value = entry(entries, "validityInfo")
        .ok_or_else(|| Error::MalformedMso("missing validityInfo".to_string()))?;

    Ok(Mso {
        version: text_field("version")?,
        digest_algorithm: text_field("digestAlgorithm")?,
        doc_type: text_field("docType")?,
        validity_info: parse_validity_info(validity_value)?,
        value_digests: parse_value_digests(entry(entries, "valueDigests"))?,
        device_key_info: entry(entries, "deviceKeyInfo").cloned(),
        status: entry(entries, "status").cloned(),
    })
}

fn parse_validity_info(value: &Value) -> Result<ValidityInfo, Error> {
    let Value::Map(entries) = value else {
        return Err(Error::MalformedMso("validityInfo is not a map".to_string()));
    };

    let instant = |key: &str| {
        entry(entries, key)
            .ok_or_else(|| Error::MalformedMso(format!("validityInfo missing {key}")))
            .and_then(parse_instant)
    };

    Ok(ValidityInfo {
        signed: instant("signed")?,
        valid_from: instant("validFrom")?,
        valid_until: instant("validUntil")?,
        expected_update: entry(entries, "expectedUpdate").map(parse_instant).transpose()?,
    })
}

fn parse_value_digests(value: Option<&Value>) -> Result<Vec<(String, Vec<(u64, Vec<u8>)>)>, Error> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Value::Map(entries) = value else {
        return Err(Error::MalformedMso("valueDigests is not a map".to_string()));
    };

    let mut digests = Vec::new();
    for (name_space, ids) in entries {
        let Some(name_space) = name_space.as_text() else {
            return Err(Error::MalformedMso("valueDigests namespace key".to_string()));
        };
        let Value::Map(ids) = ids else {
            return Err(Error::MalformedMso(format!("valueDigests[{name_space}] is not a map")));
        };

        let mut by_id = Vec::new();
        for (id, digest) in ids {
            let id = id
                .as_integer()
                .and_then(|i| u64::try_from(i128::from(i)).ok())
                .ok_or_else(|| Error::MalformedMso("digest id is not an unsigned int".to_string()))?;
            let Value::Bytes(digest) = digest else {
                return Err(Error::MalformedMso("digest is not a byte string".to_string()));
            };
            by_id.push((id, digest.clone()));
        }
        digests.push((name_space.to_string(), by_id));
    }

    Ok(digests)
}

// Accepts tdate strings, tag 0 (RFC 3339 text), and tag 1 (epoch
// seconds); everything is normalized to UTC.
fn parse_instant(value: &Value) -> Result<DateTime<Utc>, Error> {
    match value {
        Value::Text(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::MalformedMso(format!("timestamp {s}: {e}"))),
        Value::Tag(0, inner) => parse_instant(inner),
        Value::Tag(1, inner) => match inner.as_ref() {
            Value::Integer(n) => {
                let seconds = i64::try_from(i128::from(*n))
                    .map_err(|_| Error::MalformedMso("epoch out of range".to_string()))?;
                Utc.timestamp_opt(seconds, 0)
                    .single()
                    .ok_or_else(|| Error::MalformedMso("epoch out of range".to_string()))
            }
            Value::Float(f) => Utc
                .timestamp_opt(*f as i64, 0)
                .single()
                .ok_or_else(|| Error::MalformedMso("epoch out of range".to_string())),
            _ => Err(Error::MalformedMso("tag 1 content is not numeric".to_string())),
        },
        _ => Err(Error::MalformedMso("unsupported timestamp encoding".to_string())),
    }
}

fn parse_device_signed(value: &Value) -> Result<DeviceSigned, Error> {
    let Value::Map(entries) = value else {
        return Err(Error::WrongTopLevelShape("deviceSigned is not a map".to_string()));
    };

    let name_spaces = match entry(entries, "nameSpaces") {
        Some(v) => untag(v),
        None => Value::Null,
    };
    let device_auth = entry(entries, "deviceAuth").cloned().unwrap_or(Value::Null);

    Ok(DeviceSigned { name_spaces, device_auth })
}

fn tag24_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Tag(24, boxed) => match boxed.as_ref() {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        },
        _ => None,
    }
}

// Transparently decode a tag-24 byte string into its inner CBOR value;
// anything else passes through.
fn untag(value: &Value) -> Value {
    if let Some(bytes) = tag24_bytes(value)
        && let Ok(inner) = ciborium::from_reader::<Value, _>(bytes)
    {
        return inner;
    }
    value.clone()
}

impl Document {
    /// Project the document as its canonical JSON shape. `mso` and
    /// `deviceAuth` are omitted when absent.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut claims = Map::new();
        for (name_space, items) in &self.name_spaces {
            let mut elements = Map::new();
            for item in items {
                elements
                    .insert(item.element_identifier.clone(), cbor_to_json(&item.element_value));
            }
            claims.insert(name_space.clone(), Json::Object(elements));
        }

        let mut out = Map::new();
        out.insert("format".to_string(), json!("mso_mdoc"));
        out.insert("docType".to_string(), json!(self.doc_type));
        out.insert("claims".to_string(), Json::Object(claims));
        if let Some(auth) = &self.issuer_auth {
            out.insert("mso".to_string(), auth.mso.to_json());
        }
        if let Some(device) = &self.device_signed
            && device.device_auth != Value::Null
        {
            out.insert("deviceAuth".to_string(), cbor_to_json(&device.device_auth));
        }
        Json::Object(out)
    }
}

impl Mso {
    fn to_json(&self) -> Json {
        let mut out = Map::new();
        out.insert("version".to_string(), json!(self.version));
        out.insert("digestAlgorithm".to_string(), json!(self.digest_algorithm));
        out.insert("docType".to_string(), json!(self.doc_type));
        out.insert("validityInfo".to_string(), self.validity_info.to_json());
        if let Some(status) = &self.status {
            out.insert("status".to_string(), cbor_to_json(status));
        }
        if let Some(info) = &self.device_key_info {
            out.insert("deviceKeyInfo".to_string(), device_key_info_json(info));
        }
        Json::Object(out)
    }
}

impl ValidityInfo {
    fn to_json(&self) -> Json {
        let rfc3339 = |dt: &DateTime<Utc>| dt.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut out = Map::new();
        out.insert("signed".to_string(), json!(rfc3339(&self.signed)));
        out.insert("validFrom".to_string(), json!(rfc3339(&self.valid_from)));
        out.insert("validUntil".to_string(), json!(rfc3339(&self.valid_until)));
        if let Some(update) = &self.expected_update {
            out.insert("expectedUpdate".to_string(), json!(rfc3339(update)));
        }
        Json::Object(out)
    }
}

/// Project a CBOR value as JSON: byte strings become unpadded base64url
/// text, tag 24 is decoded transparently, other tags project their
/// inner value, and integer map keys are stringified.
#[must_use]
pub fn cbor_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Integer(n) => {
            let n = i128::from(*n);
            i64::try_from(n).map_or_else(
                |_| u64::try_from(n).map_or_else(|_| json!(n.to_string()), |u| json!(u)),
                |i| json!(i),
            )
        }
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => json!(s),
        Value::Bytes(bytes) => json!(format::encode_base64url(bytes)),
        Value::Array(items) => Json::Array(items.iter().map(cbor_to_json).collect()),
        Value::Map(entries) => {
            let mut out = Map::new();
            for (key, val) in entries {
                let key = match key {
                    Value::Text(s) => s.clone(),
                    Value::Integer(n) => i128::from(*n).to_string(),
                    other => format!("{other:?}"),
                };
                out.insert(key, cbor_to_json(val));
            }
            Json::Object(out)
        }
        Value::Tag(24, inner) => match tag24_bytes(value)
            .and_then(|bytes| ciborium::from_reader::<Value, _>(bytes).ok())
        {
            Some(decoded) => cbor_to_json(&decoded),
            None => cbor_to_json(inner),
        },
        Value::Tag(_, inner) => cbor_to_json(inner),
        _ => Json::Null,
    }
}

// COSE_Key integer labels projected to JOSE-style names so the device
// key is legible.
fn device_key_info_json(value: &Value) -> Json {
    let Value::Map(entries) = value else {
        return cbor_to_json(value);
    };

    let mut out = Map::new();
    for (key, val) in entries {
        match key.as_text() {
            Some("deviceKey") => {
                out.insert("deviceKey".to_string(), cose_key_json(val));
            }
            Some(name) => {
                out.insert(name.to_string(), cbor_to_json(val));
            }
            None => {
                out.insert(format!("{key:?}"), cbor_to_json(val));
            }
        }
    }
    Json::Object(out)
}

fn cose_key_json(value: &Value) -> Json {
    let Value::Map(entries) = value else {
        return cbor_to_json(value);
    };

    let mut out = Map::new();
    for (label, val) in entries {
        let Some(label) = label.as_integer().map(i128::from) else {
            // text-labeled keys pass through untranslated
            let key = label.as_text().map_or_else(|| format!("{label:?}"), ToString::to_string);
            out.insert(key, cbor_to_json(val));
            continue;
        };

        match label {
            1 => {
                let kty = match val.as_integer().map(i128::from) {
                    Some(1) => json!("OKP"),
                    Some(2) => json!("EC"),
                    Some(3) => json!("RSA"),
                    _ => cbor_to_json(val),
                };
                out.insert("kty".to_string(), kty);
            }
            2 => {
                out.insert("kid".to_string(), cbor_to_json(val));
            }
            3 => {
                out.insert("alg".to_string(), cbor_to_json(val));
            }
            -1 => {
                let crv = match val.as_integer().map(i128::from) {
                    Some(1) => json!("P-256"),
                    Some(2) => json!("P-384"),
                    Some(3) => json!("P-521"),
                    Some(4) => json!("X25519"),
                    Some(5) => json!("X448"),
                    Some(6) => json!("Ed25519"),
                    Some(7) => json!("Ed448"),
                    _ => cbor_to_json(val),
                };
                out.insert("crv".to_string(), crv);
            }
            -2 => {
                out.insert("x".to_string(), cbor_to_json(val));
            }
            -3 => {
                out.insert("y".to_string(), cbor_to_json(val));
            }
            other => {
                out.insert(other.to_string(), cbor_to_json(val));
            }
        }
    }
    Json::Object(out)
}
