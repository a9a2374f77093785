//! Receive-side record reassembly.
//!
//! The transport delivers ciphertext in arbitrary pieces. [`RecordReader`]
//! collects the 5-byte header, then exactly `header.length` bytes of body
//! into a queue of bounded segments, and yields each record once complete.

use super::{RecordHeader, MAX_CIPHERTEXT_LENGTH, RECORD_HEADER_LEN};
use nbtls_types::TlsError;

/// Largest receive segment.
pub const RX_SEGMENT_SIZE: usize = 4096;

/// Smallest receive segment; a shorter tail joins the previous segment.
pub const RX_MIN_SEGMENT_SIZE: usize = 512;

/// Split a record body length into segment capacities.
pub fn segment_sizes(mut remaining: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    while remaining > 0 {
        let mut len = remaining.min(RX_SEGMENT_SIZE);
        remaining -= len;
        if remaining < RX_MIN_SEGMENT_SIZE {
            len += remaining;
            remaining = 0;
        }
        sizes.push(len);
    }
    sizes
}

/// A completed record: header plus still-protected body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub header: RecordHeader,
    pub body: Vec<u8>,
}

enum RxState {
    Header,
    Body {
        header: RecordHeader,
        segments: Vec<Vec<u8>>,
        capacities: Vec<usize>,
        current: usize,
    },
}

/// Incremental record reader.
pub struct RecordReader {
    header_buf: [u8; RECORD_HEADER_LEN],
    header_len: usize,
    state: RxState,
}

impl RecordReader {
    pub fn new() -> Self {
        Self {
            header_buf: [0u8; RECORD_HEADER_LEN],
            header_len: 0,
            state: RxState::Header,
        }
    }

    /// Bytes still needed to finish the header or body in progress.
    pub fn pending_bytes(&self) -> usize {
        match &self.state {
            RxState::Header => RECORD_HEADER_LEN - self.header_len,
            RxState::Body {
                segments,
                capacities,
                ..
            } => {
                let filled: usize = segments.iter().map(Vec::len).sum();
                capacities.iter().sum::<usize>() - filled
            }
        }
    }

    /// Consume ciphertext and return every record it completes.
    ///
    /// On error the reader is left in an unspecified state; the connection
    /// is expected to close.
    pub fn push(&mut self, mut data: &[u8]) -> Result<Vec<RawRecord>, TlsError> {
        let mut records = Vec::new();
        loop {
            let completed = match &mut self.state {
                RxState::Header => None,
                RxState::Body {
                    header,
                    segments,
                    capacities,
                    current,
                } => {
                    while *current < segments.len() && !data.is_empty() {
                        let seg = &mut segments[*current];
                        let take = (capacities[*current] - seg.len()).min(data.len());
                        seg.extend_from_slice(&data[..take]);
                        data = &data[take..];
                        if seg.len() == capacities[*current] {
                            *current += 1;
                        }
                    }
                    if *current < segments.len() {
                        break;
                    }
                    Some(RawRecord {
                        header: *header,
                        body: segments.concat(),
                    })
                }
            };

            match completed {
                Some(record) => {
                    debug_assert_eq!(record.body.len(), record.header.length as usize);
                    records.push(record);
                    self.state = RxState::Header;
                }
                None => {
                    let take = (RECORD_HEADER_LEN - self.header_len).min(data.len());
                    self.header_buf[self.header_len..self.header_len + take]
                        .copy_from_slice(&data[..take]);
                    self.header_len += take;
                    data = &data[take..];
                    if self.header_len < RECORD_HEADER_LEN {
                        break;
                    }
                    let header = RecordHeader::parse(&self.header_buf)?;
                    if header.length as usize > MAX_CIPHERTEXT_LENGTH {
                        return Err(TlsError::InvalidMessage(format!(
                            "record length {} exceeds maximum",
                            header.length
                        )));
                    }
                    self.header_len = 0;
                    let capacities = segment_sizes(header.length as usize);
                    let segments = capacities.iter().map(|&c| Vec::with_capacity(c)).collect();
                    self.state = RxState::Body {
                        header,
                        segments,
                        capacities,
                        current: 0,
                    };
                }
            }

            if data.is_empty() && matches!(self.state, RxState::Header) {
                break;
            }
        }
        Ok(records)
    }
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new()
    }
}
