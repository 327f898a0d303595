//! Authenticated symmetric encryption for stored secret values.
//!
//! Values are sealed with AES-256-GCM and carried as strings of the form
//! `encrypted:<token>`, where `<token>` is the urlsafe-base64 encoding of
//!
//! ```text
//! version (1 byte, 0x80) | issued-at unix seconds (8 bytes, BE) | nonce (12 bytes) | ciphertext + tag
//! ```
//!
//! The 9-byte header is bound to the ciphertext as additional authenticated data,
//! so a token whose timestamp or version was altered fails to open.
//!
//! ## Key material
//!
//! The key string (normally `ENCRYPTION_KEY`) is either 32 bytes of base64
//! (urlsafe or standard alphabet) used directly, or a passphrase stretched with
//! PBKDF2-HMAC-SHA256 (100 000 iterations) over a fixed salt.

use std::num::NonZeroU32;
use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::{Map, Value};
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

use crate::errors::{ResolverError, Result};

/// Tag marking a string as an encrypted value
pub const ENCRYPTED_PREFIX: &str = "encrypted:";

/// Environment variable holding the key or passphrase
pub const ENCRYPTION_KEY_ENV: &str = "ENCRYPTION_KEY";

const TOKEN_VERSION: u8 = 0x80;
const HEADER_SIZE: usize = 9;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => unreachable!(),
};
const KEY_DERIVATION_SALT: &[u8] = b"manifest-resolver-key-salt-v1";

/// How the key string was interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// 32 bytes of base64-encoded key material
    Direct,
    /// Passphrase stretched with PBKDF2
    Passphrase,
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Encrypts and decrypts opaque strings with a fixed key.
#[derive(Clone)]
pub struct EncryptionBackend {
    key_bytes: Arc<Zeroizing<[u8; KEY_SIZE]>>,
    key_source: KeySource,
    rng: Arc<SystemRandom>,
}

impl EncryptionBackend {
    /// Build a backend from a key string, detecting direct key vs passphrase.
    pub fn new(key: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(ResolverError::config("Encryption key is empty"));
        }

        let (key_bytes, key_source) = match decode_direct_key(key) {
            Some(bytes) => (bytes, KeySource::Direct),
            None => (derive_key_from_passphrase(key), KeySource::Passphrase),
        };

        debug!(key_source = ?key_source, "Encryption backend initialized");

        Ok(Self { key_bytes: Arc::new(key_bytes), key_source, rng: Arc::new(SystemRandom::new()) })
    }

    /// Build a backend from `ENCRYPTION_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(ENCRYPTION_KEY_ENV).map_err(|_| {
            ResolverError::config(format!(
                "{} environment variable not set. Generate a key with: manifest-resolver generate-key",
                ENCRYPTION_KEY_ENV
            ))
        })?;
        Self::new(&key)
    }

    /// Generate fresh key material suitable for `ENCRYPTION_KEY`.
    pub fn generate_key() -> Result<String> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        SystemRandom::new()
            .fill(&mut key[..])
            .map_err(|_| ResolverError::config("Failed to generate random key material"))?;
        Ok(URL_SAFE.encode(&key[..]))
    }

    pub fn key_source(&self) -> KeySource {
        self.key_source
    }

    /// Whether `value` carries the encrypted tag.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }

    /// Encrypt a string. Empty input is returned unchanged.
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            ResolverError::config("Failed to generate random nonce for encryption")
        })?;

        let issued_at = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let mut header = [0u8; HEADER_SIZE];
        header[0] = TOKEN_VERSION;
        header[1..].copy_from_slice(&issued_at.to_be_bytes());

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key_bytes[..])
            .map_err(|_| ResolverError::config("Failed to create encryption key"))?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut sealed = plaintext.as_bytes().to_vec();
        sealed.reserve(TAG_SIZE);
        sealing_key.seal_in_place_append_tag(Aad::from(header), &mut sealed).map_err(|_| {
            error!("Encryption failed");
            ResolverError::config("Failed to encrypt value")
        })?;

        let mut token = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + sealed.len());
        token.extend_from_slice(&header);
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&sealed);

        debug!(token_len = token.len(), "Encrypted value");

        Ok(format!("{}{}", ENCRYPTED_PREFIX, URL_SAFE.encode(token)))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt). The tag is
    /// optional; empty input is returned unchanged.
    #[instrument(skip(self, ciphertext), fields(ciphertext_len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        self.open(ciphertext).map(|(_, plaintext)| plaintext)
    }

    /// Verify a token and return the time it was issued.
    pub fn token_issued_at(&self, ciphertext: &str) -> Result<DateTime<Utc>> {
        let (issued_at, _) = self.open(ciphertext)?;
        let seconds = i64::try_from(issued_at)
            .map_err(|_| ResolverError::decryption("Token timestamp out of range"))?;
        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| ResolverError::decryption("Token timestamp out of range"))
    }

    fn open(&self, ciphertext: &str) -> Result<(u64, String)> {
        let encoded = ciphertext.strip_prefix(ENCRYPTED_PREFIX).unwrap_or(ciphertext);

        let token = URL_SAFE.decode(encoded).map_err(|e| {
            ResolverError::decryption_with_source("Token is not valid urlsafe base64", Box::new(e))
        })?;

        if token.len() < HEADER_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(ResolverError::decryption("Token too short"));
        }
        if token[0] != TOKEN_VERSION {
            return Err(ResolverError::decryption(format!(
                "Unsupported token version 0x{:02x}",
                token[0]
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&token[..HEADER_SIZE]);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&token[HEADER_SIZE..HEADER_SIZE + NONCE_SIZE]);
        let mut issued_at = [0u8; 8];
        issued_at.copy_from_slice(&header[1..]);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key_bytes[..])
            .map_err(|_| ResolverError::decryption("Failed to create decryption key"))?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut buffer = token[HEADER_SIZE + NONCE_SIZE..].to_vec();
        let plaintext = opening_key.open_in_place(Aad::from(header), &mut buffer).map_err(|_| {
            error!("Decryption failed - wrong key or tampered token");
            ResolverError::decryption("Authentication failed (wrong key or tampered token)")
        })?;

        let plaintext = String::from_utf8(plaintext.to_vec()).map_err(|e| {
            ResolverError::decryption_with_source("Decrypted value is not UTF-8", Box::new(e))
        })?;

        Ok((u64::from_be_bytes(issued_at), plaintext))
    }

    /// Encrypt string leaves of a map, recursing into nested maps.
    ///
    /// With `keys == None` every string leaf is encrypted; otherwise only
    /// leaves whose own key is listed.
    pub fn encrypt_dict(
        &self,
        data: &Map<String, Value>,
        keys: Option<&[&str]>,
    ) -> Result<Map<String, Value>> {
        let mut encrypted = Map::with_capacity(data.len());
        for (key, value) in data {
            let next = match value {
                Value::Object(nested) => Value::Object(self.encrypt_dict(nested, keys)?),
                Value::String(s) if key_selected(keys, key) => Value::String(self.encrypt(s)?),
                other => other.clone(),
            };
            encrypted.insert(key.clone(), next);
        }
        Ok(encrypted)
    }

    /// Decrypt tagged string leaves of a map, recursing into nested maps.
    ///
    /// Untagged strings are left alone even when their key is listed.
    pub fn decrypt_dict(
        &self,
        data: &Map<String, Value>,
        keys: Option<&[&str]>,
    ) -> Result<Map<String, Value>> {
        let mut decrypted = Map::with_capacity(data.len());
        for (key, value) in data {
            let next = match value {
                Value::Object(nested) => Value::Object(self.decrypt_dict(nested, keys)?),
                Value::String(s) if Self::is_encrypted(s) && key_selected(keys, key) => {
                    Value::String(self.decrypt(s)?)
                }
                other => other.clone(),
            };
            decrypted.insert(key.clone(), next);
        }
        Ok(decrypted)
    }
}

impl std::fmt::Debug for EncryptionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionBackend")
            .field("key_source", &self.key_source)
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}

fn key_selected(keys: Option<&[&str]>, key: &str) -> bool {
    keys.map_or(true, |allowed| allowed.contains(&key))
}

fn decode_direct_key(key: &str) -> Option<Zeroizing<[u8; KEY_SIZE]>> {
    let decoded = URL_SAFE.decode(key).or_else(|_| STANDARD.decode(key)).ok()?;
    let decoded = Zeroizing::new(decoded);
    if decoded.len() != KEY_SIZE {
        return None;
    }
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    bytes.copy_from_slice(&decoded);
    Some(bytes)
}

fn derive_key_from_passphrase(passphrase: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        PBKDF2_ITERATIONS,
        KEY_DERIVATION_SALT,
        passphrase.as_bytes(),
        &mut bytes[..],
    );
    bytes
}
