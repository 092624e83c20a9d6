//! Small helpers for session ids and cookie values.

use anyhow::{Context, Result};
use axum::http::{HeaderMap, header::COOKIE};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// Raw session ids are this many random bytes before encoding.
pub(crate) const SESSION_ID_BYTES: usize = 32;

/// Create a new session id for the auth cookie.
/// The raw value is only returned to set the cookie; the store keeps a hash.
pub(crate) fn generate_session_id() -> Result<String> {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session id")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// True when `raw` decodes to exactly [`SESSION_ID_BYTES`] bytes.
pub(crate) fn is_well_formed_session_id(raw: &str) -> bool {
    Base64UrlUnpadded::decode_vec(raw).is_ok_and(|bytes| bytes.len() == SESSION_ID_BYTES)
}

/// Hash a session id so raw values never touch the store.
pub(crate) fn hash_session_id(raw: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.finalize().to_vec()
}

/// Cookie values cannot carry a literal space, so `Bearer <jwt>` travels as `Bearer%20<jwt>`.
pub(crate) fn encode_cookie_value(raw: &str) -> String {
    raw.replace(' ', "%20")
}

pub(crate) fn decode_cookie_value(value: &str) -> String {
    value.replace("%20", " ")
}

/// Find the named cookie across every `Cookie` header and decode its value.
pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() == name {
                return Some(decode_cookie_value(val.trim()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn generated_session_id_is_well_formed() -> Result<()> {
        let id = generate_session_id()?;
        assert!(is_well_formed_session_id(&id));
        assert_ne!(id, generate_session_id()?);
        Ok(())
    }

    #[test]
    fn session_id_shape_is_checked() {
        assert!(!is_well_formed_session_id(""));
        assert!(!is_well_formed_session_id("not base64!"));
        assert!(!is_well_formed_session_id(&Base64UrlUnpadded::encode_string(
            &[1u8; 16]
        )));
    }

    #[test]
    fn hash_session_id_is_stable() {
        assert_eq!(hash_session_id("token"), hash_session_id("token"));
        assert_ne!(hash_session_id("token"), hash_session_id("other"));
        assert_eq!(hash_session_id("token").len(), 32);
    }

    #[test]
    fn cookie_value_space_round_trips() {
        let encoded = encode_cookie_value("Bearer abc.def");
        assert_eq!(encoded, "Bearer%20abc.def");
        assert_eq!(decode_cookie_value(&encoded), "Bearer abc.def");
    }

    #[test]
    fn extract_cookie_finds_named_pair() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; flag"));
        headers.append(
            COOKIE,
            HeaderValue::from_static("other=1; authorization=Bearer%20abc"),
        );
        assert_eq!(
            extract_cookie(&headers, "authorization"),
            Some("Bearer abc".to_string())
        );
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }
}
