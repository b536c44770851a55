//! Argon2id hashing for user passwords and client secrets.

use std::fmt;
use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// A plaintext secret. `Debug` never prints it.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// PHC-format argon2 hash as stored in the database.
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(PasswordHashString::new(hash.to_string()))
}

/// Constant-time check through argon2's verifier.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;
    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}

fn dummy_hash() -> &'static PasswordHashString {
    static DUMMY: OnceLock<PasswordHashString> = OnceLock::new();
    DUMMY.get_or_init(|| {
        hash_password(&Password::new(crate::utils::token::random_urlsafe()))
            .unwrap_or_else(|_| PasswordHashString::new(String::new()))
    })
}

/// Verifies against `stored`, or spends the same argon2 work on a throwaway
/// hash when there is nothing to compare with, so unknown accounts and
/// clients cost as much as known ones.
pub fn verify_or_burn(password: &Password, stored: Option<&str>) -> bool {
    match stored {
        Some(hash) => verify_password(password, &PasswordHashString::new(hash.to_string())).is_ok(),
        None => {
            let _ = verify_password(password, dummy_hash());
            false
        }
    }
}
