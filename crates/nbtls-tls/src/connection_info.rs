//! Diagnostic snapshot of a connection's negotiated parameters.

use crate::handshake::HandshakeState;
use crate::{CipherSuite, TlsVersion};

/// Returned by `ClientConnection::connection_info` once a ServerHello has
/// been accepted.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub state: HandshakeState,
    pub version: TlsVersion,
    pub cipher_suite: CipherSuite,
    /// DER chain as sent by the server, leaf first.
    pub peer_certificates: Vec<Vec<u8>>,
    /// Name sent as SNI and checked against the validated certificate.
    pub server_name: String,
    /// The id offered, echoed or newly assigned by the server.
    pub session_id: Vec<u8>,
    pub session_resumed: bool,
    /// The server acknowledged renegotiation_info.
    pub secure_renegotiation: bool,
    /// Outgoing plaintext limit per record.
    pub max_fragment_size: usize,
    /// Finished verify_data received from the server.
    pub peer_verify_data: Vec<u8>,
    /// Finished verify_data this client sent.
    pub local_verify_data: Vec<u8>,
}
