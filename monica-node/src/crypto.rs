//! Encrypted payload channel shared by every node and controller.
//!
//! All payloads exchanged with controllers are sealed with AES-256-GCM under
//! the fleet's pre-shared key. Wire format:
//!
//! ```text
//! [issued_at: 8 bytes BE unix seconds][nonce: 12 bytes][ciphertext + tag]
//! ```
//!
//! `issued_at` is bound as associated data, so a tampered timestamp fails
//! authentication like any other corruption. The key lives entirely behind
//! this type: swapping the scheme for per-node keys later does not touch any
//! caller.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Length of the issued_at prefix.
const HEADER_SIZE: usize = 8;

/// Key value shipped in `config.example.toml`. The channel refuses to
/// initialize on it so a fleet can never silently run unsecured.
pub const PLACEHOLDER_KEY: &str = "GENERATE_A_STRONG_32_BYTE_KEY_AND_REPLACE_THIS";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key is the shipped placeholder; generate a real key before deploying")]
    PlaceholderKey,
    #[error("encryption key is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),
    #[error("encryption key must decode to {KEY_SIZE} bytes, got {0}")]
    KeyLength(usize),
    #[error("encryption failure")]
    Encrypt,
    #[error("payload too short to carry header and nonce")]
    Truncated,
    #[error("authentication failed: payload tampered or sealed with a different key")]
    Authentication,
    #[error("payload serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Authenticated symmetric cipher over serialized payload objects.
pub struct CipherChannel {
    cipher: Aes256Gcm,
}

impl CipherChannel {
    /// Build the channel from the configured base64-encoded key.
    pub fn new(key_base64: &str) -> Result<Self, CryptoError> {
        let key_base64 = key_base64.trim();
        if key_base64.is_empty() || key_base64 == PLACEHOLDER_KEY {
            return Err(CryptoError::PlaceholderKey);
        }
        let key_bytes = BASE64.decode(key_base64)?;
        if key_bytes.len() != KEY_SIZE {
            return Err(CryptoError::KeyLength(key_bytes.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    /// Serialize and encrypt a payload for transmission.
    pub fn seal<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>, CryptoError> {
        let plaintext = serde_json::to_vec(payload)?;
        let issued_at = (Utc::now().timestamp().max(0) as u64).to_be_bytes();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, Payload { msg: &plaintext, aad: &issued_at })
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&issued_at);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt and deserialize a received payload.
    ///
    /// Fails loudly on tampered or mis-keyed data; callers never see
    /// partially valid plaintext.
    pub fn open<T: DeserializeOwned>(&self, sealed: &[u8]) -> Result<T, CryptoError> {
        if sealed.len() < HEADER_SIZE + NONCE_SIZE {
            return Err(CryptoError::Truncated);
        }
        let (issued_at, rest) = sealed.split_at(HEADER_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: issued_at })
            .map_err(|_| CryptoError::Authentication)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_channel() -> CipherChannel {
        CipherChannel::new(&BASE64.encode([0x42u8; KEY_SIZE])).unwrap()
    }

    #[test]
    fn round_trip_preserves_payload() {
        let channel = test_channel();
        let report = json!({
            "node_id": "a1b2c3",
            "type": "heartbeat",
            "metrics": { "cpu_percent": 12.5, "memory": { "total": 1024 } },
        });

        let sealed = channel.seal(&report).unwrap();
        let opened: serde_json::Value = channel.open(&sealed).unwrap();
        assert_eq!(opened, report);
    }

    #[test]
    fn placeholder_key_is_refused() {
        assert!(matches!(
            CipherChannel::new(PLACEHOLDER_KEY),
            Err(CryptoError::PlaceholderKey)
        ));
        assert!(matches!(CipherChannel::new("  "), Err(CryptoError::PlaceholderKey)));
    }

    #[test]
    fn wrong_length_key_is_refused() {
        let short_key = BASE64.encode([1u8; 16]);
        assert!(matches!(
            CipherChannel::new(&short_key),
            Err(CryptoError::KeyLength(16))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let channel = test_channel();
        let mut sealed = channel.seal(&json!({ "command": "uptime" })).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(matches!(
            channel.open::<serde_json::Value>(&sealed),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn tampered_timestamp_header_fails_authentication() {
        let channel = test_channel();
        let mut sealed = channel.seal(&json!({ "command": "uptime" })).unwrap();
        sealed[0] ^= 0x01;

        assert!(matches!(
            channel.open::<serde_json::Value>(&sealed),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn mis_keyed_payload_fails_authentication() {
        let other = CipherChannel::new(&BASE64.encode([0x07u8; KEY_SIZE])).unwrap();
        let sealed = test_channel().seal(&json!({ "x": 1 })).unwrap();

        assert!(matches!(
            other.open::<serde_json::Value>(&sealed),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let channel = test_channel();
        assert!(matches!(
            channel.open::<serde_json::Value>(&[0u8; 5]),
            Err(CryptoError::Truncated)
        ));
    }
}
