//! Opaque credential generation and at-rest digests.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

pub const ACCESS_TOKEN_PREFIX: &str = "bp_at_";
pub const REFRESH_TOKEN_PREFIX: &str = "bp_rt_";
pub const AUTHORIZATION_CODE_PREFIX: &str = "bp_ac_";
pub const CONSOLE_REFRESH_PREFIX: &str = "bp_cr_";
pub const CLIENT_ID_PREFIX: &str = "bp_client_";

/// 32 random bytes, base64url without padding (43 characters, 256 bits).
pub fn random_urlsafe() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn generate_opaque(prefix: &str) -> String {
    format!("{}{}", prefix, random_urlsafe())
}

pub fn generate_client_id() -> String {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", CLIENT_ID_PREFIX, hex::encode(bytes))
}

pub fn generate_client_secret() -> String {
    random_urlsafe()
}

/// Zero-padded numeric code for email challenges.
pub fn generate_numeric_code(digits: u32) -> String {
    let upper = 10u32.pow(digits);
    let n = OsRng.gen_range(0..upper);
    format!("{:0width$}", n, width = digits as usize)
}

/// SHA-256 hex digest used as the lookup key for stored tokens.
pub fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
