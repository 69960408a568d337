//! # Errors
//!
//! The closed set of error kinds produced by the credential and traffic
//! decoders. Parsers fail loudly with one of these; projectors and the
//! traffic classifier never fail — they degrade to warnings or the
//! `Unknown` class instead.

use thiserror::Error;

/// Decoding errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The compact serialization does not have the expected segment
    /// structure (`h.p.s`, `h.p.s~d~…~`, or 5-segment JWE).
    #[error("malformed compact serialization: {0}")]
    MalformedCompact(String),

    /// A segment is not valid base64url (padded or unpadded).
    #[error("invalid base64url: {0}")]
    InvalidBase64(String),

    /// The JOSE header did not decode to a JSON object.
    #[error("invalid JSON header: {0}")]
    InvalidJsonHeader(String),

    /// The JWS payload did not decode to a JSON object.
    #[error("invalid JSON payload: {0}")]
    InvalidJsonPayload(String),

    /// A disclosure segment is not a base64url-encoded JSON array of
    /// length 2 or 3.
    #[error("invalid disclosure: {0}")]
    InvalidDisclosure(String),

    /// The input is not decodable as CBOR.
    #[error("not CBOR: {0}")]
    NotCbor(String),

    /// The CBOR document does not have the expected issuer-signed shape.
    #[error("wrong top-level shape: {0}")]
    WrongTopLevelShape(String),

    /// The mdoc top-level map has no `docType` entry.
    #[error("missing docType")]
    MissingDocType,

    /// `issuerAuth` is not a well-formed `COSE_Sign1` structure.
    #[error("malformed COSE_Sign1: {0}")]
    MalformedCoseSign1(String),

    /// The `COSE_Sign1` payload is not a well-formed Mobile Security
    /// Object.
    #[error("malformed MSO: {0}")]
    MalformedMso(String),

    /// The input is not a 5-segment JWE compact serialization.
    #[error("malformed JWE: {0}")]
    MalformedJwe(String),

    /// The supplied content-encryption key cannot initialize an AES-GCM
    /// cipher (only 128- and 256-bit keys are supported).
    #[error("AES cipher initialization failed: {0}")]
    AesInitFailed(String),

    /// AEAD open failed: wrong key, tampered ciphertext, or mismatched
    /// additional authenticated data.
    #[error("AES-GCM decryption failed")]
    AeadOpenFailed,

    /// The input matched none of the known credential formats.
    #[error("unable to auto-detect credential format (not JWT, SD-JWT, or mDOC)")]
    UnknownFormat,
}
