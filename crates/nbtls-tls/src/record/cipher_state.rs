//! Per-direction cipher state: bound suite, keys and sequence number.

use std::sync::Arc;

use crate::config::RandomSource;
use crate::crypt::block::AES_BLOCK_SIZE;
use crate::crypt::{CipherSuiteParams, NULL_SUITE};
use crate::CipherSuite;
use nbtls_types::TlsError;

use super::encryption_cbc::CbcProtection;
use super::encryption_gcm::{GcmProtection, EXPLICIT_NONCE_LEN};

enum Protection {
    Null,
    Cbc(CbcProtection),
    Gcm(GcmProtection),
}

/// Cipher state for one direction.
///
/// Every direction starts with the null suite. A handshake builds a pending
/// state which ChangeCipherSpec promotes; the sequence number restarts at
/// zero with each state.
pub struct CipherState {
    params: CipherSuiteParams,
    protection: Protection,
    seq: u64,
}

impl CipherState {
    /// The TLS_NULL_WITH_NULL_NULL state.
    pub fn null() -> Self {
        Self {
            params: NULL_SUITE,
            protection: Protection::Null,
            seq: 0,
        }
    }

    /// Key a state for `params`.
    ///
    /// `fixed_iv` is only used by AEAD suites; `mac_key` only by CBC suites.
    pub fn new(
        params: &CipherSuiteParams,
        key: &[u8],
        mac_key: &[u8],
        fixed_iv: &[u8],
    ) -> Result<Self, TlsError> {
        let protection = match (params.cipher, params.mac) {
            (Some(cipher), _) if cipher.is_aead() => {
                Protection::Gcm(GcmProtection::new(cipher, key, fixed_iv)?)
            }
            (Some(cipher), Some(mac)) => {
                Protection::Cbc(CbcProtection::new(cipher, key, mac, mac_key)?)
            }
            _ => {
                return Err(TlsError::Unsupported(format!(
                    "cannot key cipher suite 0x{:04x}",
                    params.suite.0
                )))
            }
        };
        Ok(Self {
            params: *params,
            protection,
            seq: 0,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self.protection, Protection::Null)
    }

    pub fn suite(&self) -> CipherSuite {
        self.params.suite
    }

    pub fn params(&self) -> &CipherSuiteParams {
        &self.params
    }

    pub fn sequence_number(&self) -> u64 {
        self.seq
    }

    fn next_seq(&mut self) -> Result<u64, TlsError> {
        let seq = self.seq;
        self.seq = seq
            .checked_add(1)
            .ok_or_else(|| TlsError::ProtocolViolation("sequence number overflow".into()))?;
        Ok(seq)
    }

    /// Protect one record's plaintext, returning the record body.
    pub fn seal(
        &mut self,
        content_type: u8,
        version: u16,
        plaintext: &[u8],
        random: &Arc<dyn RandomSource>,
    ) -> Result<Vec<u8>, TlsError> {
        let seq = self.next_seq()?;
        match &self.protection {
            Protection::Null => Ok(plaintext.to_vec()),
            Protection::Cbc(p) => {
                let mut iv = [0u8; AES_BLOCK_SIZE];
                random.fill(&mut iv)?;
                p.seal(seq, content_type, version, plaintext, &iv)
            }
            Protection::Gcm(p) => {
                let mut explicit = [0u8; EXPLICIT_NONCE_LEN];
                random.fill(&mut explicit)?;
                p.seal(seq, content_type, version, plaintext, &explicit)
            }
        }
    }

    /// Remove protection from one record body.
    pub fn open(
        &mut self,
        content_type: u8,
        version: u16,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let seq = self.next_seq()?;
        match &self.protection {
            Protection::Null => Ok(fragment.to_vec()),
            Protection::Cbc(p) => p.open(seq, content_type, version, fragment),
            Protection::Gcm(p) => p.open(seq, content_type, version, fragment),
        }
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherState")
            .field("suite", &self.params.suite)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
