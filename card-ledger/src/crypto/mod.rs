//! PAN encryption and display masking
//!
//! Card numbers are sealed with AES-256-GCM before they reach the store. The
//! nonce is derived from the key and the plaintext (HMAC-SHA256, truncated),
//! so a given (key, PAN) pair always produces the same ciphertext; the unique
//! index on stored ciphertexts relies on this determinism.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

/// Placeholder shown when a PAN is too short to mask meaningfully.
const SHORT_PAN_MASK: &str = "****";

/// Symmetric codec for card numbers.
///
/// Stateless apart from the key; safe to share across worker threads.
pub struct PanCipher {
    cipher: Aes256Gcm,
    nonce_key: [u8; 32],
}

impl PanCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self {
            cipher,
            nonce_key: *key,
        }
    }

    /// Encrypt a plaintext PAN into a base64 envelope of `nonce || ciphertext`.
    pub fn encrypt(&self, plain_pan: &str) -> Result<String, CryptoError> {
        if plain_pan.is_empty() {
            return Err(CryptoError::EmptyPlaintext);
        }

        let nonce = self.nonce_for(plain_pan.as_bytes());
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plain_pan.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + sealed.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(envelope))
    }

    /// Decrypt a base64 envelope produced by [`PanCipher::encrypt`].
    ///
    /// Failure messages never include plaintext or ciphertext fragments.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let envelope = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::MalformedCiphertext("invalid base64"))?;
        if envelope.len() <= NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext("envelope too short"));
        }

        let (nonce, sealed) = envelope.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::DecryptFailed)?;
        String::from_utf8(plain)
            .map_err(|_| CryptoError::MalformedCiphertext("payload is not valid UTF-8"))
    }

    /// Deterministic per-plaintext nonce: first 12 bytes of HMAC(key, plain).
    fn nonce_for(&self, plain: &[u8]) -> [u8; NONCE_LEN] {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.nonce_key)
            .expect("HMAC accepts keys of any length");
        mac.update(plain);
        let digest = mac.finalize().into_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }
}

/// Mask a plaintext PAN for display: all but the last four characters hidden.
///
/// Computed at read time from decrypted data; the masked form is never stored.
pub fn mask_pan(plain_pan: &str) -> String {
    let chars: Vec<char> = plain_pan.chars().collect();
    if chars.len() < 4 {
        return SHORT_PAN_MASK.to_string();
    }
    let last4: String = chars[chars.len() - 4..].iter().collect();
    format!("**** **** **** {last4}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> PanCipher {
        PanCipher::new(&[7u8; 32])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let c = cipher();
        let sealed = c.encrypt("4111111111111234").unwrap();
        assert_eq!(c.decrypt(&sealed).unwrap(), "4111111111111234");
    }

    #[test]
    fn encryption_is_deterministic_for_a_fixed_key() {
        let c = cipher();
        let a = c.encrypt("4111111111111234").unwrap();
        let b = c.encrypt("4111111111111234").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_pans_produce_different_ciphertexts() {
        let c = cipher();
        let a = c.encrypt("4111111111111234").unwrap();
        let b = c.encrypt("4111111111111235").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_keys_produce_different_ciphertexts() {
        let a = PanCipher::new(&[1u8; 32]).encrypt("4111111111111234").unwrap();
        let b = PanCipher::new(&[2u8; 32]).encrypt("4111111111111234").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        assert_eq!(cipher().encrypt(""), Err(CryptoError::EmptyPlaintext));
    }

    #[test]
    fn malformed_base64_is_rejected() {
        assert!(matches!(
            cipher().decrypt("%%% not base64 %%%"),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let short = general_purpose::STANDARD.encode([0u8; NONCE_LEN]);
        assert!(matches!(
            cipher().decrypt(&short),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let c = cipher();
        let sealed = c.encrypt("4111111111111234").unwrap();
        let mut bytes = general_purpose::STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = general_purpose::STANDARD.encode(bytes);
        assert_eq!(c.decrypt(&tampered), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = PanCipher::new(&[1u8; 32]).encrypt("4111111111111234").unwrap();
        assert_eq!(
            PanCipher::new(&[2u8; 32]).decrypt(&sealed),
            Err(CryptoError::DecryptFailed)
        );
    }

    #[test]
    fn masking_reveals_exactly_the_last_four() {
        assert_eq!(mask_pan("4111111111111234"), "**** **** **** 1234");
        assert_eq!(mask_pan("1234"), "**** **** **** 1234");
    }

    #[test]
    fn short_pans_get_the_placeholder_mask() {
        assert_eq!(mask_pan("123"), "****");
        assert_eq!(mask_pan(""), "****");
    }
}
