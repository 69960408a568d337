//! # OID4VC Probe
//!
//! A debugging toolkit for the OpenID for Verifiable Credentials
//! protocol family ([OpenID4VP] and [OpenID4VCI]): decoders for the
//! credential formats that cross the wire (JWT, SD-JWT, ISO mDL
//! `mso_mdoc`), a classifier for intercepted OID4VP/VCI traffic, and an
//! intercepting proxy that records every exchange for inspection.
//!
//! Nothing here verifies signatures — the point is to make otherwise
//! opaque traffic and credential artifacts readable. The one
//! cryptographic operation is symmetric: decrypting a JARM JWE when the
//! wallet volunteers the content-encryption key.
//!
//! [OpenID4VP]: https://openid.net/specs/openid-4-verifiable-presentations-1_0.html
//! [OpenID4VCI]: https://openid.net/specs/openid-4-verifiable-credential-issuance-1_0.html

pub mod decode;
pub mod error;
pub mod format;
pub mod mso_mdoc;
pub mod proxy;
pub mod sd_jwt;

pub use crate::decode::decode;
pub use crate::error::Error;
pub use crate::format::{Format, detect};
