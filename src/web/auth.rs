//! Token authentication helpers
//!
//! Tokens are never stored; environments are keyed by the hex encoded
//! SHA-512 digest of their token.

use sha2::{Digest, Sha512};

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Fingerprint of a raw token as stored in `token_sha512`
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Credentials of an `Authorization: Basic ...` header
#[derive(Clone, Debug, PartialEq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn parse(header: &str) -> Option<BasicCredentials> {
        let mut parts = header.trim().splitn(2, ' ');
        let scheme = parts.next()?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = base64::decode(parts.next()?.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;

        Some(BasicCredentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}
