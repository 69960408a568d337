//! # JARM Response Handling
//!
//! Decodes JWT-secured authorization responses (`direct_post.jwt`). A
//! signed response (JWS) is fully readable; an encrypted response (JWE)
//! exposes only its protected header — unless the wallet volunteers the
//! content-encryption key, in which case the payload can be opened with
//! AES-GCM for debugging.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use serde_json::{Map, Value, json};

use crate::error::Error;
use crate::{format, sd_jwt};

/// JWE nonce size for AES-GCM content encryption (RFC 7518 §5.3).
const GCM_IV_LEN: usize = 12;

/// Decode a JARM response string into `decoded`, surfacing the
/// protected header fields of a JWE or the header and payload of a JWS.
/// Unreadable input leaves `decoded` untouched.
pub fn decode_response(raw: &str, decoded: &mut Map<String, Value>) {
    let raw = raw.trim();

    if format::is_compact_jwe(raw) {
        decoded.insert(
            "response_type".to_string(),
            json!("JWE (encrypted — payload not readable without verifier's ephemeral private key)"),
        );

        let Some(header_b64) = raw.split('.').next() else {
            return;
        };
        let Ok(header_bytes) = format::decode_base64url(header_b64) else {
            return;
        };
        let Ok(header) = serde_json::from_slice::<Map<String, Value>>(&header_bytes) else {
            return;
        };

        for (field, key) in [
            ("alg", "encryption_alg"),
            ("enc", "encryption_enc"),
            ("kid", "encryption_kid"),
            ("apu", "encryption_apu"),
            ("apv", "encryption_apv"),
        ] {
            if let Some(value) = header.get(field).filter(|v| v.is_string()) {
                decoded.insert(key.to_string(), value.clone());
            }
        }
        // ephemeral public key from the JWE sender (wallet)
        if let Some(epk) = header.get("epk").filter(|v| v.is_object()) {
            decoded.insert("encryption_epk".to_string(), epk.clone());
        }
        decoded.insert("response_header".to_string(), Value::Object(header));
        return;
    }

    if let Ok((header, payload, _)) = sd_jwt::parse_jws_parts(raw) {
        decoded.insert("response_type".to_string(), json!("JWS (signed)"));
        decoded.insert("response_header".to_string(), Value::Object(header));
        decoded.insert("response_payload".to_string(), Value::Object(payload));
    }
}

/// Decrypt a JWE compact serialization with the raw content-encryption
/// key derived during ECDH-ES key agreement. Debug aid: the wallet can
/// hand the proxy its CEK so JARM responses become readable.
///
/// # Errors
///
/// Returns [`Error::MalformedJwe`] for a wrong segment count or IV
/// size, [`Error::InvalidBase64`] for undecodable segments,
/// [`Error::AesInitFailed`] for CEK lengths other than 16 or 32, and
/// [`Error::AeadOpenFailed`] when the key or tag does not match.
pub fn decrypt_with_cek(jwe: &str, cek: &[u8]) -> Result<Vec<u8>, Error> {
    let parts: Vec<&str> = jwe.split('.').collect();
    if parts.len() != 5 {
        return Err(Error::MalformedJwe(format!("expected 5 segments, got {}", parts.len())));
    }

    // parts[1] is the encrypted key: empty for ECDH-ES direct agreement
    let iv = format::decode_base64url(parts[2])?;
    let ciphertext = format::decode_base64url(parts[3])?;
    let tag = format::decode_base64url(parts[4])?;

    if iv.len() != GCM_IV_LEN {
        return Err(Error::MalformedJwe(format!("IV must be {GCM_IV_LEN} bytes, got {}", iv.len())));
    }

    // AAD is the ASCII base64url protected header exactly as received;
    // AES-GCM expects ciphertext || tag
    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);
    let payload = Payload { msg: &sealed, aad: parts[0].as_bytes() };
    let nonce = Nonce::from_slice(&iv);

    match cek.len() {
        16 => Aes128Gcm::new_from_slice(cek)
            .map_err(|e| Error::AesInitFailed(e.to_string()))?
            .decrypt(nonce, payload)
            .map_err(|_| Error::AeadOpenFailed),
        32 => Aes256Gcm::new_from_slice(cek)
            .map_err(|e| Error::AesInitFailed(e.to_string()))?
            .decrypt(nonce, payload)
            .map_err(|_| Error::AeadOpenFailed),
        n => Err(Error::AesInitFailed(format!("unsupported CEK length {n}"))),
    }
}
