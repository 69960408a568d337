//! # Interception Proxy Core
//!
//! The traffic data model shared by the classifier, the rewriter, the
//! writer sinks, and the proxy loop. Each completed HTTP exchange
//! becomes one [`TrafficEntry`], classified into a [`TrafficClass`] and
//! enriched with decoded fields and extracted credentials.

pub mod classify;
pub mod jarm;
pub mod rewrite;
pub mod server;
pub mod write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// The OID4VP/VCI message class of an intercepted exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficClass {
    /// Not recognized as OID4VP/VCI traffic.
    #[default]
    Unknown,

    /// OID4VP authorization request (query-borne).
    VpAuthRequest,

    /// OID4VP request object fetched by reference (JWS response body).
    VpRequestObject,

    /// OID4VP authorization response (`direct_post` / `direct_post.jwt`).
    VpAuthResponse,

    /// OID4VCI credential offer.
    VciCredentialOffer,

    /// OID4VCI issuer metadata.
    VciMetadata,

    /// OID4VCI token request.
    VciTokenRequest,

    /// OID4VCI credential request.
    VciCredentialRequest,
}

impl TrafficClass {
    /// Fixed display label for the class.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::VpAuthRequest => "VP Auth Request",
            Self::VpRequestObject => "VP Request Object",
            Self::VpAuthResponse => "VP Auth Response",
            Self::VciCredentialOffer => "VCI Credential Offer",
            Self::VciMetadata => "VCI Metadata",
            Self::VciTokenRequest => "VCI Token Request",
            Self::VciCredentialRequest => "VCI Credential Request",
        }
    }
}

/// One completed HTTP exchange, created by the proxy and enriched by
/// the classifier. Serialization emits only the fields the NDJSON
/// contract names; raw headers and bodies stay in memory for
/// classification.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficEntry {
    /// When the exchange started.
    pub timestamp: DateTime<Utc>,

    /// HTTP method.
    pub method: String,

    /// Full request URL.
    pub url: String,

    /// Request headers as received.
    #[serde(skip_serializing)]
    pub request_headers: Vec<(String, String)>,

    /// Request body, captured up to the configured cap.
    #[serde(skip_serializing)]
    pub request_body: String,

    /// Upstream response status code.
    pub status: u16,

    /// Response headers before rewriting.
    #[serde(skip_serializing)]
    pub response_headers: Vec<(String, String)>,

    /// Response body before rewriting, captured up to the cap.
    #[serde(skip_serializing)]
    pub response_body: String,

    /// Classified message class.
    pub class: TrafficClass,

    /// Display label for `class`.
    pub class_label: String,

    /// Semantically meaningful decoded fields, per class. Absent when
    /// nothing was decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded: Option<Map<String, Value>>,

    /// Raw credential strings found in the exchange.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<String>,

    /// Non-fatal findings, e.g. `body_truncated`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TrafficEntry {
    /// Classify the exchange and populate `class`, `class_label`,
    /// `decoded`, and `credentials`. Never fails; unrecognized traffic
    /// becomes [`TrafficClass::Unknown`].
    pub fn classify(&mut self) {
        classify::classify(self);
    }
}
