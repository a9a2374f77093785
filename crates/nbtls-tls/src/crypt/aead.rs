//! TLS AEAD cipher abstraction over the `aes-gcm` crate.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use nbtls_types::{CipherAlgId, CryptoError, TlsError};

/// Trait for TLS record-layer AEAD operations.
pub trait TlsAead: Send + Sync {
    /// Encrypt plaintext with AEAD. Returns `ciphertext || tag`.
    fn encrypt(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// Decrypt `ciphertext || tag` with AEAD. Returns plaintext.
    fn decrypt(
        &self,
        nonce: &[u8],
        aad: &[u8],
        ciphertext_with_tag: &[u8],
    ) -> Result<Vec<u8>, TlsError>;

    /// Tag size in bytes.
    fn tag_size(&self) -> usize;
}

/// AES-GCM AEAD (128-bit or 256-bit key).
pub enum AesGcmAead {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl AesGcmAead {
    pub fn new(key: &[u8]) -> Result<Self, TlsError> {
        match key.len() {
            16 => Ok(Self::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ))),
            32 => Ok(Self::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ))),
            got => Err(CryptoError::InvalidKeyLength { expected: 16, got }.into()),
        }
    }
}

impl TlsAead for AesGcmAead {
    fn encrypt(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, TlsError> {
        if nonce.len() != 12 {
            return Err(CryptoError::InvalidIvLength.into());
        }
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let out = match self {
            Self::Aes128(c) => c.encrypt(nonce, payload),
            Self::Aes256(c) => c.encrypt(nonce, payload),
        };
        out.map_err(|_| CryptoError::InvalidArg.into())
    }

    fn decrypt(
        &self,
        nonce: &[u8],
        aad: &[u8],
        ciphertext_with_tag: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        if nonce.len() != 12 {
            return Err(CryptoError::InvalidIvLength.into());
        }
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext_with_tag,
            aad,
        };
        let out = match self {
            Self::Aes128(c) => c.decrypt(nonce, payload),
            Self::Aes256(c) => c.decrypt(nonce, payload),
        };
        out.map_err(|_| CryptoError::AeadTagVerifyFail.into())
    }

    fn tag_size(&self) -> usize {
        16
    }
}

/// Create an AEAD for a bulk cipher.
pub fn create_aead(cipher: CipherAlgId, key: &[u8]) -> Result<Box<dyn TlsAead>, TlsError> {
    if !cipher.is_aead() {
        return Err(TlsError::Unsupported(format!("{cipher:?} is not an AEAD")));
    }
    if key.len() != cipher.key_len() {
        return Err(CryptoError::InvalidKeyLength {
            expected: cipher.key_len(),
            got: key.len(),
        }
        .into());
    }
    Ok(Box::new(AesGcmAead::new(key)?))
}
