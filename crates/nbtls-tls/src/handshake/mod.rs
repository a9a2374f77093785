//! TLS handshake protocol: message codecs, key exchange, signatures and the
//! client-side negotiation state.

pub mod client;
pub mod codec;
pub mod codec12;
pub mod extensions_codec;
pub mod key_exchange;
pub mod signing;

/// Handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        use HandshakeType::*;
        Some(match v {
            0 => HelloRequest,
            1 => ClientHello,
            2 => ServerHello,
            4 => NewSessionTicket,
            11 => Certificate,
            12 => ServerKeyExchange,
            13 => CertificateRequest,
            14 => ServerHelloDone,
            15 => CertificateVerify,
            16 => ClientKeyExchange,
            20 => Finished,
            _ => return None,
        })
    }
}

/// Connection-level handshake state, as reported to diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// ClientHello queued but not yet sent.
    ClientHelloPending,
    /// Waiting for the server's hello flight.
    WaitServerHello,
    /// Server flight received; the external validator is running.
    ValidatingCertificate,
    /// Client key exchange flight is being transmitted.
    KeyExchangePending,
    /// Waiting to send or receive ChangeCipherSpec.
    ChangeCipherPending,
    /// Waiting for the server Finished.
    FinishedPending,
    /// Negotiation complete; application data flows.
    Established,
    /// Closed, normally or after an error.
    Closed,
}

/// A complete handshake message split out of the handshake byte stream.
#[derive(Debug, Clone)]
pub struct HandshakeMessage {
    /// Raw type byte; unknown types are carried through and ignored.
    pub msg_type: u8,
    pub body: Vec<u8>,
    /// Header plus body, exactly as received, for the transcript.
    pub raw: Vec<u8>,
}

impl HandshakeMessage {
    pub fn handshake_type(&self) -> Option<HandshakeType> {
        HandshakeType::from_u8(self.msg_type)
    }
}
