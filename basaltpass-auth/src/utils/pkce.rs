//! PKCE (RFC 7636) challenge handling.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkceMethod {
    S256,
    Plain,
}

impl PkceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PkceMethod::S256 => "S256",
            PkceMethod::Plain => "plain",
        }
    }

    /// A missing method means `S256`.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw {
            None | Some("") | Some("S256") => Some(PkceMethod::S256),
            Some("plain") => Some(PkceMethod::Plain),
            Some(_) => None,
        }
    }
}

/// `[A-Za-z0-9-._~]{43,128}`, shared by verifiers and plain challenges.
pub fn is_well_formed(value: &str) -> bool {
    (43..=128).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Constant-time check of `verifier` against the stored challenge.
pub fn verify(verifier: &str, challenge: &str, method: PkceMethod) -> bool {
    if !is_well_formed(verifier) {
        return false;
    }
    let expected = match method {
        PkceMethod::S256 => s256_challenge(verifier),
        PkceMethod::Plain => verifier.to_string(),
    };
    expected.as_bytes().ct_eq(challenge.as_bytes()).into()
}
