//! Key hashing and sealed secrets.
//!
//! Agent auth keys are high-entropy random strings; the database stores only
//! their SHA-256 hex digest. Secret system-settings values are sealed with
//! AES-256-GCM and persisted as `base64(iv || tag || ciphertext)` with a
//! 96-bit IV and 128-bit tag.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// GCM nonce length in bytes (96 bits).
const NONCE_LEN: usize = 12;

/// GCM tag length in bytes (128 bits).
const TAG_LEN: usize = 16;

/// Hash an agent auth key or enrollment token for storage and comparison.
pub fn hash_auth_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

/// Mint a new agent auth key (256 bits of randomness, hex-encoded).
pub fn generate_auth_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Mint a one-shot enrollment token.
pub fn generate_enrollment_token() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Seals and opens secret values with AES-256-GCM.
pub struct SecretSealer {
    cipher: Aes256Gcm,
}

impl SecretSealer {
    /// Create a sealer from a base64-encoded 32-byte key.
    pub fn from_base64(key_b64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_b64)
            .map_err(|e| Error::config(format!("settings key is not valid base64: {}", e)))?;
        if key.len() != 32 {
            return Err(Error::config(format!(
                "settings key must be 32 bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::config(format!("invalid AES key: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Seal a plaintext value into `base64(iv || tag || ciphertext)`.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ct_and_tag = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &[],
                },
            )
            .map_err(|_| Error::Other("failed to seal secret".to_string()))?;

        // aes-gcm appends the tag; reorder to iv || tag || ciphertext
        let (ct, tag) = ct_and_tag.split_at(ct_and_tag.len() - TAG_LEN);
        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(tag);
        out.extend_from_slice(ct);
        Ok(BASE64.encode(out))
    }

    /// Open a sealed value produced by [`SecretSealer::seal`].
    pub fn open(&self, sealed_b64: &str) -> Result<String> {
        let sealed = BASE64
            .decode(sealed_b64)
            .map_err(|_| Error::Other("sealed value is not valid base64".to_string()))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Other("sealed value too short".to_string()));
        }

        let (nonce_bytes, rest) = sealed.split_at(NONCE_LEN);
        let (tag, ct) = rest.split_at(TAG_LEN);

        let mut ct_and_tag = Vec::with_capacity(ct.len() + TAG_LEN);
        ct_and_tag.extend_from_slice(ct);
        ct_and_tag.extend_from_slice(tag);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: &ct_and_tag,
                    aad: &[],
                },
            )
            .map_err(|_| Error::Other("failed to open sealed secret".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Other("sealed secret is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sealer() -> SecretSealer {
        let key = BASE64.encode([7u8; 32]);
        SecretSealer::from_base64(&key).unwrap()
    }

    #[test]
    fn test_hash_is_stable_and_hex() {
        let h1 = hash_auth_key("abc");
        let h2 = hash_auth_key("abc");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_auth_key("abd"));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        assert_ne!(generate_auth_key(), generate_auth_key());
        assert_eq!(generate_auth_key().len(), 64);
        assert_eq!(generate_enrollment_token().len(), 48);
    }

    #[test]
    fn test_seal_open_round_trip() {
        let sealer = test_sealer();
        let sealed = sealer.seal("hunter2").unwrap();
        assert_ne!(sealed, "hunter2");
        assert_eq!(sealer.open(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_seal_uses_fresh_iv() {
        let sealer = test_sealer();
        assert_ne!(sealer.seal("x").unwrap(), sealer.seal("x").unwrap());
    }

    #[test]
    fn test_open_rejects_tampered_value() {
        let sealer = test_sealer();
        let sealed = sealer.seal("secret").unwrap();
        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(sealer.open(&BASE64.encode(raw)).is_err());
    }

    #[test]
    fn test_rejects_short_key() {
        let short = BASE64.encode([1u8; 16]);
        assert!(SecretSealer::from_base64(&short).is_err());
    }
}
