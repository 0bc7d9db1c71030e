//! Signing, encryption and random tokens used by the cookie envelopes.

use crate::{Error, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::fmt::{Debug, Formatter};

pub(crate) mod token_generator;

type HmacSha512 = Hmac<Sha512>;

const NONCE_LENGTH: usize = 12;

/// Computes the hex encoded HMAC-SHA512 of `message` keyed with `secret`.
pub fn sign(secret: &str, message: &str) -> Result<String> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|error| Error::Crypto(error.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Returns true if `signature` is the hex encoded HMAC-SHA512 of `message` keyed with `secret`.
///
/// A signature that is not valid hex never verifies.
pub fn verify(secret: &str, message: &str, signature: &str) -> Result<bool> {
    let Ok(signature) = hex::decode(signature) else {
        return Ok(false);
    };
    let mut mac = <HmacSha512 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|error| Error::Crypto(error.to_string()))?;
    mac.update(message.as_bytes());
    Ok(mac.verify_slice(&signature).is_ok())
}

/// Symmetric AES-256-GCM encryption of cookie values.
///
/// The key is the SHA-256 digest of the configured key material.
/// Ciphertexts are `base64url(nonce || ciphertext)` without padding, so they are valid cookie values.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Derive a cipher from the given key material.
    pub fn new(key_material: &str) -> Result<Self> {
        let key = Sha256::digest(key_material.as_bytes());
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|error| Error::Crypto(error.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|error| Error::Crypto(error.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(nonce.as_slice());
        combined.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    /// Decrypt a value produced by [`Cipher::encrypt`].
    ///
    /// Returns `None` for anything that is not such a value under this key.
    pub fn decrypt(&self, encrypted: &str) -> Option<String> {
        let combined = URL_SAFE_NO_PAD.decode(encrypted.as_bytes()).ok()?;
        if combined.len() <= NONCE_LENGTH {
            return None;
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}

impl Debug for Cipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cipher(AES-256-GCM)")
    }
}
