//! Handshake transcript digest.
//!
//! The digest algorithm is only known once ServerHello picks the version and
//! cipher suite, but ClientHello must already be part of the transcript.
//! Messages are therefore buffered and replayed into a fresh hasher when a
//! digest is requested.

use super::provider::{new_digest, Digest};
use nbtls_types::{HashAlgId, TlsError};

/// Running transcript over handshake messages.
pub struct TranscriptHash {
    message_buffer: Vec<u8>,
    hash: Option<HashAlgId>,
}

impl TranscriptHash {
    /// Create an empty transcript with no digest selected yet.
    pub fn new() -> Self {
        Self {
            message_buffer: Vec::new(),
            hash: None,
        }
    }

    /// Select the digest. Can be called again on renegotiation.
    pub fn select(&mut self, hash: HashAlgId) {
        self.hash = Some(hash);
    }

    /// Feed a complete handshake message (header included).
    pub fn update(&mut self, data: &[u8]) {
        self.message_buffer.extend_from_slice(data);
    }

    /// Digest of every message fed so far.
    pub fn current_hash(&self) -> Result<Vec<u8>, TlsError> {
        let alg = self.hash.ok_or_else(|| {
            TlsError::ProtocolViolation("transcript digest not selected".into())
        })?;
        self.hash_with(alg)
    }

    /// Digest of every message fed so far under `alg`, regardless of the
    /// selected digest. CertificateVerify may sign with a different hash.
    pub fn hash_with(&self, alg: HashAlgId) -> Result<Vec<u8>, TlsError> {
        let mut hasher: Box<dyn Digest> = new_digest(alg);
        hasher.update(&self.message_buffer)?;
        let mut out = vec![0u8; hasher.output_size()];
        hasher.finish(&mut out)?;
        Ok(out)
    }

    /// Hash output size in bytes, once selected.
    pub fn hash_len(&self) -> Option<usize> {
        self.hash.map(HashAlgId::output_size)
    }

    /// Forget all buffered messages (new negotiation).
    pub fn reset(&mut self) {
        self.message_buffer.clear();
        self.hash = None;
    }

    pub fn is_empty(&self) -> bool {
        self.message_buffer.is_empty()
    }
}

impl Default for TranscriptHash {
    fn default() -> Self {
        Self::new()
    }
}
