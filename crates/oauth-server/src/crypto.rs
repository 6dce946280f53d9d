//! Authenticated encryption envelopes
//!
//! Every opaque value the server hands out (authorization codes, device codes,
//! registration access tokens, access tokens) is a payload sealed with
//! XChaCha20-Poly1305 under a key dedicated to that purpose. A value sealed for
//! one purpose never opens under another key.
//!
//! Wire format: `nonce (24 bytes) || ciphertext || tag (16 bytes)`

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Extended nonce size of XChaCha20-Poly1305
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size
pub const TAG_SIZE: usize = 16;

const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The payload could not be opened. Deliberately carries no detail.
    #[error("invalid data")]
    InvalidData,

    #[error("encryption failed")]
    Seal,

    #[error("key derivation failed")]
    KeyDerivation,
}

/// A single-purpose AEAD key.
#[derive(Clone)]
pub struct Envelope {
    cipher: XChaCha20Poly1305,
}

impl Envelope {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Encrypt `plaintext` with a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a payload produced by [`Envelope::seal`].
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidData);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::InvalidData)
    }

    /// Seal and encode as unpadded base64url, safe for URLs and headers.
    pub fn seal_to_string(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        self.seal(plaintext).map(|sealed| URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decode unpadded base64url and open.
    pub fn open_str(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let data = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidData)?;
        self.open(&data)
    }

    /// Open a payload that is expected to hold UTF-8 text, such as an ID.
    pub fn open_text(&self, encoded: &str) -> Result<String, CryptoError> {
        let plaintext = self.open_str(encoded)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidData)
    }
}

/// The set of envelopes used by the server, one per purpose.
#[derive(Clone)]
pub struct Keys {
    /// Stateless authorization codes
    pub auth_code: Envelope,
    /// Device codes (sealed user codes)
    pub device_code: Envelope,
    /// Client registration access tokens (RFC 7592)
    pub client_token: Envelope,
    /// Bearer access tokens
    pub access_token: Envelope,
}

impl Keys {
    /// Derive every purpose key from a master secret with HKDF-SHA256.
    pub fn derive(secret: &[u8]) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, secret);
        let expand = |info: &str| -> Result<Envelope, CryptoError> {
            let mut key = [0u8; KEY_SIZE];
            hk.expand(info.as_bytes(), &mut key)
                .map_err(|_| CryptoError::KeyDerivation)?;
            Ok(Envelope::new(&key))
        };

        Ok(Self {
            auth_code: expand("oauth_auth_code")?,
            device_code: expand("oauth_device_code")?,
            client_token: expand("oauth_client_token")?,
            access_token: expand("api_access_token")?,
        })
    }

    /// Generate a random master secret suitable for [`Keys::derive`].
    pub fn generate_secret() -> [u8; KEY_SIZE] {
        let mut secret = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut secret);
        secret
    }
}
