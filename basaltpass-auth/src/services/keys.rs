//! ID-token signing keys: load, generate, rotate, publish.

use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::SigningKey;
use crate::store::{Store, StoreError};

pub const MIN_RSA_BITS: usize = 2048;
const ALGORITHM: &str = "RS256";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no active signing key")]
    KeyUnavailable,

    #[error("RSA key has {0} bits, at least 2048 required")]
    WeakKey(usize),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("key store failure: {0}")]
    Store(#[from] StoreError),

    #[error("signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("key generation task failed: {0}")]
    Task(String),
}

struct LoadedKey {
    kid: String,
    encoding: EncodingKey,
    jwk: Value,
    not_after: Option<DateTime<Utc>>,
}

impl LoadedKey {
    fn is_published(&self, now: DateTime<Utc>) -> bool {
        self.not_after.map_or(true, |t| t > now)
    }
}

/// Immutable snapshot swapped in whole on rotation.
#[derive(Default)]
struct KeySet {
    active: Option<LoadedKey>,
    /// Every published key, active first.
    published: Vec<LoadedKey>,
}

impl KeySet {
    fn build(mut keys: Vec<SigningKey>, now: DateTime<Utc>) -> Result<Self, KeyError> {
        keys.retain(|k| k.is_published(now));
        keys.sort_by(|a, b| {
            b.is_active()
                .cmp(&a.is_active())
                .then(b.not_before_utc.cmp(&a.not_before_utc))
        });

        let mut set = KeySet::default();
        for key in keys {
            let encoding = EncodingKey::from_rsa_pem(key.private_key_pem.as_bytes())?;
            let loaded = LoadedKey {
                kid: key.kid.clone(),
                encoding,
                jwk: key.public_jwk.clone(),
                not_after: key.not_after_utc,
            };
            if key.is_active() && set.active.is_none() {
                set.active = Some(LoadedKey {
                    kid: loaded.kid.clone(),
                    encoding: loaded.encoding.clone(),
                    jwk: loaded.jwk.clone(),
                    not_after: loaded.not_after,
                });
            }
            set.published.push(loaded);
        }
        Ok(set)
    }
}

/// Owns the RSA private keys. Nothing else in the crate reads key bytes.
pub struct KeyManager {
    store: Arc<dyn Store>,
    keys: RwLock<Arc<KeySet>>,
    rotation: Mutex<()>,
    retirement: Duration,
}

impl KeyManager {
    /// Loads persisted keys. When no active key exists, imports the PEM at
    /// `import_path` or generates a fresh RSA-2048 key, and persists it.
    pub async fn init(
        store: Arc<dyn Store>,
        import_path: Option<&str>,
        retirement_hours: i64,
    ) -> Result<Self, KeyError> {
        let manager = Self {
            store,
            keys: RwLock::new(Arc::new(KeySet::default())),
            rotation: Mutex::new(()),
            retirement: Duration::hours(retirement_hours),
        };

        let existing = manager.store.list_signing_keys().await?;
        if !existing.iter().any(SigningKey::is_active) {
            let pem = match import_path {
                Some(path) => {
                    tracing::info!(path = %path, "Importing signing key");
                    tokio::fs::read_to_string(path).await?
                }
                None => {
                    tracing::info!("No signing key found, generating RSA-2048 key");
                    generate_pem().await?
                }
            };
            let key = signing_key_from_pem(&pem, Utc::now())?;
            manager.store.insert_signing_key(&key, None).await?;
        }

        manager.reload().await?;
        tracing::info!(kid = ?manager.active_kid(), "Key manager initialized");
        Ok(manager)
    }

    fn snapshot(&self) -> Arc<KeySet> {
        self.keys
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    async fn reload(&self) -> Result<(), KeyError> {
        let set = Arc::new(KeySet::build(self.store.list_signing_keys().await?, Utc::now())?);
        match self.keys.write() {
            Ok(mut guard) => *guard = set,
            Err(poisoned) => *poisoned.into_inner() = set,
        }
        Ok(())
    }

    pub fn active_kid(&self) -> Option<String> {
        self.snapshot().active.as_ref().map(|k| k.kid.clone())
    }

    /// Signs `claims` as a compact RS256 JWS with the active key.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<(String, String), KeyError> {
        let set = self.snapshot();
        let key = set.active.as_ref().ok_or(KeyError::KeyUnavailable)?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        let jws = encode(&header, claims, &key.encoding)?;
        Ok((jws, key.kid.clone()))
    }

    /// JWKS document of every key still published, active key first.
    /// A retired key drops out as soon as its `not_after` passes.
    pub fn jwks(&self) -> Value {
        let set = self.snapshot();
        let now = Utc::now();
        let keys: Vec<Value> = set
            .published
            .iter()
            .filter(|k| k.is_published(now))
            .map(|k| k.jwk.clone())
            .collect();
        json!({ "keys": keys })
    }

    /// Generates a new active key and retires the current one.
    pub async fn rotate(&self) -> Result<String, KeyError> {
        let _guard = self.rotation.lock().await;
        let pem = generate_pem().await?;
        self.install(&pem).await
    }

    /// Rotates to caller-provided key material.
    pub async fn rotate_with_pem(&self, pem: &str) -> Result<String, KeyError> {
        let _guard = self.rotation.lock().await;
        self.install(pem).await
    }

    /// Caller holds the rotation lock.
    async fn install(&self, pem: &str) -> Result<String, KeyError> {
        let now = Utc::now();
        let key = signing_key_from_pem(pem, now)?;
        let previous = self.active_kid();
        let retire_at = now + self.retirement;

        self.store
            .insert_signing_key(&key, previous.as_deref().map(|kid| (kid, retire_at)))
            .await?;
        self.reload().await?;

        tracing::info!(new_kid = %key.kid, retired_kid = ?previous, "Signing key rotated");
        Ok(key.kid)
    }
}

async fn generate_pem() -> Result<String, KeyError> {
    tokio::task::spawn_blocking(|| {
        let mut rng = rand::rngs::OsRng;
        let key = RsaPrivateKey::new(&mut rng, MIN_RSA_BITS)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        key.to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))
    })
    .await
    .map_err(|e| KeyError::Task(e.to_string()))?
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, KeyError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| KeyError::InvalidKey(e.to_string()))
}

/// RFC 7638 thumbprint over the required RSA members in lexicographic order.
pub fn jwk_thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, e, n);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

/// Validates PEM material and builds the persisted record, normalised to PKCS#8.
pub fn signing_key_from_pem(pem: &str, now: DateTime<Utc>) -> Result<SigningKey, KeyError> {
    let private = parse_private_key(pem)?;
    let bits = private.size() * 8;
    if bits < MIN_RSA_BITS {
        return Err(KeyError::WeakKey(bits));
    }

    let n = URL_SAFE_NO_PAD.encode(private.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(private.e().to_bytes_be());
    let kid = jwk_thumbprint(&n, &e);
    let pkcs8 = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeyError::InvalidKey(e.to_string()))?
        .to_string();

    Ok(SigningKey {
        public_jwk: json!({
            "kty": "RSA",
            "use": "sig",
            "alg": ALGORITHM,
            "kid": kid,
            "n": n,
            "e": e,
        }),
        kid,
        algorithm: ALGORITHM.to_string(),
        private_key_pem: pkcs8,
        created_utc: now,
        not_before_utc: now,
        not_after_utc: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
    use serde::Deserialize;

    const PRIMARY: &str = include_str!("../../tests/fixtures/signing_key_primary.pem");
    const SECONDARY: &str = include_str!("../../tests/fixtures/signing_key_secondary.pem");
    const WEAK: &str = include_str!("../../tests/fixtures/signing_key_weak.pem");

    #[derive(Serialize, Deserialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    fn fixture_path(name: &str) -> String {
        format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    async fn manager() -> KeyManager {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        KeyManager::init(store, Some(&fixture_path("signing_key_primary.pem")), 24)
            .await
            .unwrap()
    }

    fn verify(jwks: &Value, jws: &str) -> Claims {
        let kid = decode_header(jws).unwrap().kid.unwrap();
        let jwk = jwks["keys"]
            .as_array()
            .unwrap()
            .iter()
            .find(|k| k["kid"] == kid.as_str())
            .unwrap();
        let key = DecodingKey::from_rsa_components(
            jwk["n"].as_str().unwrap(),
            jwk["e"].as_str().unwrap(),
        )
        .unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.required_spec_claims.clear();
        decode::<Claims>(jws, &key, &validation).unwrap().claims
    }

    #[test]
    fn test_weak_keys_rejected() {
        assert!(matches!(
            signing_key_from_pem(WEAK, Utc::now()),
            Err(KeyError::WeakKey(1024))
        ));
    }

    #[test]
    fn test_kid_is_stable_thumbprint() {
        let a = signing_key_from_pem(PRIMARY, Utc::now()).unwrap();
        let b = signing_key_from_pem(PRIMARY, Utc::now()).unwrap();
        assert_eq!(a.kid, b.kid);
        assert_eq!(a.kid.len(), 43);
        assert_eq!(
            a.kid,
            jwk_thumbprint(
                a.public_jwk["n"].as_str().unwrap(),
                a.public_jwk["e"].as_str().unwrap()
            )
        );
        assert_ne!(a.kid, signing_key_from_pem(SECONDARY, Utc::now()).unwrap().kid);
    }

    #[tokio::test]
    async fn test_signature_verifies_against_jwks() {
        let keys = manager().await;
        let claims = Claims {
            sub: "u1".into(),
            exp: Utc::now().timestamp() + 60,
        };
        let (jws, kid) = keys.sign(&claims).unwrap();
        assert_eq!(Some(kid), keys.active_kid());
        assert_eq!(verify(&keys.jwks(), &jws).sub, "u1");
    }

    #[tokio::test]
    async fn test_rotation_keeps_retired_key_published() {
        let keys = manager().await;
        let old_kid = keys.active_kid().unwrap();
        let (old_jws, _) = keys
            .sign(&Claims { sub: "a".into(), exp: Utc::now().timestamp() + 60 })
            .unwrap();

        let new_kid = keys.rotate_with_pem(SECONDARY).await.unwrap();
        assert_ne!(old_kid, new_kid);

        let (new_jws, kid) = keys
            .sign(&Claims { sub: "b".into(), exp: Utc::now().timestamp() + 60 })
            .unwrap();
        assert_eq!(kid, new_kid);

        let jwks = keys.jwks();
        let kids: Vec<&str> = jwks["keys"]
            .as_array()
            .unwrap()
            .iter()
            .map(|k| k["kid"].as_str().unwrap())
            .collect();
        assert_eq!(kids, vec![new_kid.as_str(), old_kid.as_str()]);
        assert_eq!(verify(&jwks, &old_jws).sub, "a");
        assert_eq!(verify(&jwks, &new_jws).sub, "b");
    }

    #[tokio::test]
    async fn test_zero_retirement_unpublishes_old_key() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let keys = KeyManager::init(store, Some(&fixture_path("signing_key_primary.pem")), 0)
            .await
            .unwrap();
        keys.rotate_with_pem(SECONDARY).await.unwrap();
        assert_eq!(keys.jwks()["keys"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retired_key_unpublished_once_window_closes() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let old = signing_key_from_pem(PRIMARY, Utc::now()).unwrap();
        let new = signing_key_from_pem(SECONDARY, Utc::now()).unwrap();
        store.insert_signing_key(&old, None).await.unwrap();
        store
            .insert_signing_key(
                &new,
                Some((old.kid.as_str(), Utc::now() + Duration::milliseconds(300))),
            )
            .await
            .unwrap();

        let keys = KeyManager::init(store, None, 24).await.unwrap();
        assert_eq!(keys.jwks()["keys"].as_array().unwrap().len(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        let jwks = keys.jwks();
        let published = jwks["keys"].as_array().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["kid"], new.kid.as_str());
        assert_eq!(keys.active_kid(), Some(new.kid));
    }

    #[tokio::test]
    async fn test_init_reuses_persisted_key() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let first = KeyManager::init(store.clone(), Some(&fixture_path("signing_key_primary.pem")), 24)
            .await
            .unwrap();
        let second = KeyManager::init(store, Some(&fixture_path("signing_key_secondary.pem")), 24)
            .await
            .unwrap();
        assert_eq!(first.active_kid(), second.active_kid());
    }
}
