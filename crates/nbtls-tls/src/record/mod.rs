//! TLS record layer: header codec, fragmentation, and cipher state
//! management for both directions.

pub mod cipher_state;
pub mod encryption_cbc;
pub mod encryption_gcm;
pub mod reassembly;

use std::sync::Arc;

use crate::config::RandomSource;
use crate::CipherSuite;
use cipher_state::CipherState;
use nbtls_types::TlsError;

/// Record header length.
pub const RECORD_HEADER_LEN: usize = 5;

/// Maximum plaintext fragment length (2^14).
pub const MAX_PLAINTEXT_LENGTH: usize = 16384;

/// Maximum protected fragment length (2^14 + 2048).
pub const MAX_CIPHERTEXT_LENGTH: usize = MAX_PLAINTEXT_LENGTH + 2048;

/// Plaintext fragment length granted by the max_fragment_length extension.
pub const NEGOTIATED_FRAGMENT_LENGTH: usize = 4096;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            20 => Some(Self::ChangeCipherSpec),
            21 => Some(Self::Alert),
            22 => Some(Self::Handshake),
            23 => Some(Self::ApplicationData),
            _ => None,
        }
    }
}

/// A parsed record header. The content type is kept raw so that records of
/// unknown type can still be authenticated before they are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: u8,
    pub version: u16,
    pub length: u16,
}

impl RecordHeader {
    pub fn parse(data: &[u8]) -> Result<Self, TlsError> {
        if data.len() < RECORD_HEADER_LEN {
            return Err(TlsError::InvalidMessage("incomplete record header".into()));
        }
        Ok(Self {
            content_type: data[0],
            version: u16::from_be_bytes([data[1], data[2]]),
            length: u16::from_be_bytes([data[3], data[4]]),
        })
    }

    pub fn serialize(&self) -> [u8; RECORD_HEADER_LEN] {
        let v = self.version.to_be_bytes();
        let l = self.length.to_be_bytes();
        [self.content_type, v[0], v[1], l[0], l[1]]
    }
}

/// Active and pending cipher states for both directions.
pub struct RecordLayer {
    tx: CipherState,
    tx_pending: CipherState,
    rx: CipherState,
    rx_pending: CipherState,
    /// Version written into outgoing record headers.
    version: u16,
    /// Largest plaintext fragment to send.
    max_fragment_size: usize,
    random: Arc<dyn RandomSource>,
}

impl RecordLayer {
    pub fn new(version: u16, random: Arc<dyn RandomSource>) -> Self {
        Self {
            tx: CipherState::null(),
            tx_pending: CipherState::null(),
            rx: CipherState::null(),
            rx_pending: CipherState::null(),
            version,
            max_fragment_size: MAX_PLAINTEXT_LENGTH,
            random,
        }
    }

    pub fn set_version(&mut self, version: u16) {
        self.version = version;
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn set_max_fragment_size(&mut self, size: usize) {
        self.max_fragment_size = size.clamp(1, MAX_PLAINTEXT_LENGTH);
    }

    pub fn max_fragment_size(&self) -> usize {
        self.max_fragment_size
    }

    /// Install freshly keyed pending states for both directions.
    pub fn set_pending(&mut self, tx: CipherState, rx: CipherState) {
        self.tx_pending = tx;
        self.rx_pending = rx;
    }

    /// Promote the pending TX state. The sequence number restarts at zero
    /// and the pending slot returns to the null state.
    pub fn activate_tx(&mut self) -> Result<(), TlsError> {
        if self.tx_pending.is_null() {
            return Err(TlsError::Unsupported(
                "attempted to activate the null cipher".into(),
            ));
        }
        self.tx = std::mem::replace(&mut self.tx_pending, CipherState::null());
        log::trace!("TX cipher activated: {:?}", self.tx);
        Ok(())
    }

    /// Promote the pending RX state.
    pub fn activate_rx(&mut self) -> Result<(), TlsError> {
        if self.rx_pending.is_null() {
            return Err(TlsError::Unsupported(
                "attempted to activate the null cipher".into(),
            ));
        }
        self.rx = std::mem::replace(&mut self.rx_pending, CipherState::null());
        log::trace!("RX cipher activated: {:?}", self.rx);
        Ok(())
    }

    pub fn tx_suite(&self) -> CipherSuite {
        self.tx.suite()
    }

    pub fn rx_suite(&self) -> CipherSuite {
        self.rx.suite()
    }

    pub fn is_rx_protected(&self) -> bool {
        !self.rx.is_null()
    }

    pub fn tx_sequence(&self) -> u64 {
        self.tx.sequence_number()
    }

    pub fn rx_sequence(&self) -> u64 {
        self.rx.sequence_number()
    }

    /// Protect `data` as one or more records of `content_type`.
    ///
    /// Data longer than the maximum fragment is split; empty data still
    /// produces a single empty record.
    pub fn seal(&mut self, content_type: ContentType, data: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut out = Vec::with_capacity(data.len() + RECORD_HEADER_LEN + 64);
        let mut chunks: Vec<&[u8]> = data.chunks(self.max_fragment_size).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        for chunk in chunks {
            let body = self
                .tx
                .seal(content_type as u8, self.version, chunk, &self.random)?;
            let header = RecordHeader {
                content_type: content_type as u8,
                version: self.version,
                length: u16::try_from(body.len())
                    .map_err(|_| TlsError::InvalidMessage("record too long".into()))?,
            };
            out.extend_from_slice(&header.serialize());
            out.extend_from_slice(&body);
        }
        Ok(out)
    }

    /// Remove protection from one received record.
    pub fn open(&mut self, header: &RecordHeader, body: &[u8]) -> Result<Vec<u8>, TlsError> {
        self.rx.open(header.content_type, header.version, body)
    }
}
