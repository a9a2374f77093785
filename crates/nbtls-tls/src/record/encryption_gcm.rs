//! AES-GCM record protection (RFC 5288).
//!
//! Record fragment = explicit_nonce(8) || ciphertext || tag(16)
//! Nonce = fixed_iv(4) || explicit_nonce(8)
//! AAD = seq(8) || type(1) || version(2) || plaintext_length(2)

use crate::crypt::aead::{create_aead, TlsAead};
use nbtls_types::{CipherAlgId, TlsError};
use zeroize::Zeroize;

use super::{MAX_CIPHERTEXT_LENGTH, MAX_PLAINTEXT_LENGTH};

/// Explicit nonce length carried in each record.
pub const EXPLICIT_NONCE_LEN: usize = 8;

const TAG_LEN: usize = 16;

/// Build the 12-byte GCM nonce.
pub fn build_nonce(fixed_iv: &[u8], explicit: &[u8; EXPLICIT_NONCE_LEN]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(&fixed_iv[..4]);
    nonce[4..].copy_from_slice(explicit);
    nonce
}

/// Build the additional authenticated data.
pub fn build_aad(seq: u64, content_type: u8, version: u16, plaintext_len: u16) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..8].copy_from_slice(&seq.to_be_bytes());
    aad[8] = content_type;
    aad[9..11].copy_from_slice(&version.to_be_bytes());
    aad[11..13].copy_from_slice(&plaintext_len.to_be_bytes());
    aad
}

/// Keys for one direction of a GCM suite.
pub struct GcmProtection {
    aead: Box<dyn TlsAead>,
    fixed_iv: Vec<u8>,
}

impl Drop for GcmProtection {
    fn drop(&mut self) {
        self.fixed_iv.zeroize();
    }
}

impl GcmProtection {
    pub fn new(cipher: CipherAlgId, key: &[u8], fixed_iv: &[u8]) -> Result<Self, TlsError> {
        if fixed_iv.len() != 4 {
            return Err(TlsError::InvalidMessage(format!(
                "GCM fixed IV length {}",
                fixed_iv.len()
            )));
        }
        Ok(Self {
            aead: create_aead(cipher, key)?,
            fixed_iv: fixed_iv.to_vec(),
        })
    }

    /// Protect one record under the given explicit nonce.
    pub fn seal(
        &self,
        seq: u64,
        content_type: u8,
        version: u16,
        plaintext: &[u8],
        explicit: &[u8; EXPLICIT_NONCE_LEN],
    ) -> Result<Vec<u8>, TlsError> {
        if plaintext.len() > MAX_PLAINTEXT_LENGTH {
            return Err(TlsError::InvalidMessage("plaintext exceeds maximum".into()));
        }
        let nonce = build_nonce(&self.fixed_iv, explicit);
        let aad = build_aad(seq, content_type, version, plaintext.len() as u16);
        let sealed = self.aead.encrypt(&nonce, &aad, plaintext)?;

        let mut fragment = Vec::with_capacity(EXPLICIT_NONCE_LEN + sealed.len());
        fragment.extend_from_slice(explicit);
        fragment.extend_from_slice(&sealed);
        Ok(fragment)
    }

    /// Decrypt and authenticate one record.
    pub fn open(
        &self,
        seq: u64,
        content_type: u8,
        version: u16,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        if fragment.len() < EXPLICIT_NONCE_LEN + TAG_LEN {
            return Err(TlsError::InvalidMessage("GCM record too short".into()));
        }
        if fragment.len() > MAX_CIPHERTEXT_LENGTH {
            return Err(TlsError::InvalidMessage("record overflow".into()));
        }
        let mut explicit = [0u8; EXPLICIT_NONCE_LEN];
        explicit.copy_from_slice(&fragment[..EXPLICIT_NONCE_LEN]);
        let ciphertext = &fragment[EXPLICIT_NONCE_LEN..];
        let plaintext_len = ciphertext.len() - TAG_LEN;

        let nonce = build_nonce(&self.fixed_iv, &explicit);
        let aad = build_aad(seq, content_type, version, plaintext_len as u16);
        self.aead
            .decrypt(&nonce, &aad, ciphertext)
            .map_err(|_| TlsError::AuthFailed("bad record tag".into()))
    }
}
