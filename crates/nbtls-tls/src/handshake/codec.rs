//! Handshake message framing and the hello/certificate/finished codecs.
//!
//! Every decoder takes the message body (after the 4-byte header) and
//! rejects any length field that runs past the end of its container.

use crate::crypt::key_schedule::VERIFY_DATA_LEN;
use crate::extensions::Extension;
use crate::handshake::extensions_codec::{encode_extensions, parse_extensions};
use crate::handshake::{HandshakeMessage, HandshakeType};
use crate::CipherSuite;
use nbtls_types::TlsError;

/// Handshake header: msg_type(1) || length(3).
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Largest handshake message accepted from the peer.
pub const MAX_HANDSHAKE_MESSAGE_LEN: usize = 0x20000;

/// ChangeCipherSpec record payload.
pub const CHANGE_CIPHER_SPEC_PAYLOAD: [u8; 1] = [0x01];

// ---------------------------------------------------------------------------
// Bounds-checked reader
// ---------------------------------------------------------------------------

/// Cursor over a message body. Every read fails with `InvalidMessage`
/// instead of reading past the end.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    fn truncated(&self) -> TlsError {
        TlsError::InvalidMessage(format!("{}: truncated", self.what))
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.remaining() < n {
            return Err(self.truncated());
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, TlsError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u24(&mut self) -> Result<usize, TlsError> {
        Ok(read_u24(self.bytes(3)?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, TlsError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn vec8(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u8()? as usize;
        self.bytes(n)
    }

    pub(crate) fn vec16(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u16()? as usize;
        self.bytes(n)
    }

    pub(crate) fn vec24(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u24()?;
        self.bytes(n)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    /// Fail if anything is left over.
    pub(crate) fn finish(&self) -> Result<(), TlsError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TlsError::InvalidMessage(format!(
                "{}: {} trailing bytes",
                self.what,
                self.remaining()
            )))
        }
    }
}

pub(crate) fn read_u24(b: &[u8]) -> usize {
    ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | (b[2] as usize)
}

pub(crate) fn push_u24(out: &mut Vec<u8>, v: usize) {
    out.push((v >> 16) as u8);
    out.push((v >> 8) as u8);
    out.push(v as u8);
}

pub(crate) fn push_vec8(out: &mut Vec<u8>, data: &[u8]) {
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

pub(crate) fn push_vec16(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Wrap a handshake body with the 4-byte header.
pub fn wrap_handshake(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
    out.push(msg_type as u8);
    push_u24(&mut out, body.len());
    out.extend_from_slice(body);
    out
}

/// Split one complete message off the front of the handshake byte stream.
///
/// Returns `Ok(None)` while the message is still incomplete. A declared
/// length above [`MAX_HANDSHAKE_MESSAGE_LEN`] is rejected immediately.
pub fn split_handshake_message(buf: &[u8]) -> Result<Option<(HandshakeMessage, usize)>, TlsError> {
    if buf.len() < HANDSHAKE_HEADER_LEN {
        return Ok(None);
    }
    let len = read_u24(&buf[1..4]);
    if len > MAX_HANDSHAKE_MESSAGE_LEN {
        return Err(TlsError::InvalidMessage(format!(
            "handshake message of {len} bytes exceeds limit"
        )));
    }
    let total = HANDSHAKE_HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }
    let msg = HandshakeMessage {
        msg_type: buf[0],
        body: buf[HANDSHAKE_HEADER_LEN..total].to_vec(),
        raw: buf[..total].to_vec(),
    };
    Ok(Some((msg, total)))
}

// ---------------------------------------------------------------------------
// ClientHello / ServerHello
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    /// `None` when the extensions block is absent altogether.
    pub extensions: Option<Vec<Extension>>,
}

/// Encode a ClientHello as a complete handshake message.
pub fn encode_client_hello(ch: &ClientHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(256);
    body.extend_from_slice(&ch.version.to_be_bytes());
    body.extend_from_slice(&ch.random);
    push_vec8(&mut body, &ch.session_id);

    body.extend_from_slice(&((ch.cipher_suites.len() * 2) as u16).to_be_bytes());
    for s in &ch.cipher_suites {
        body.extend_from_slice(&s.0.to_be_bytes());
    }

    // compression_methods = { null }
    body.push(1);
    body.push(0);

    push_vec16(&mut body, &encode_extensions(&ch.extensions));
    wrap_handshake(HandshakeType::ClientHello, &body)
}

/// Decode a ClientHello body.
pub fn decode_client_hello(body: &[u8]) -> Result<ClientHello, TlsError> {
    let mut r = Reader::new(body, "ClientHello");
    let version = r.u16()?;
    let mut random = [0u8; 32];
    random.copy_from_slice(r.bytes(32)?);
    let session_id = r.vec8()?.to_vec();
    if session_id.len() > 32 {
        return Err(TlsError::InvalidMessage("ClientHello: session id too long".into()));
    }
    let suites = r.vec16()?;
    if suites.len() % 2 != 0 {
        return Err(TlsError::InvalidMessage("ClientHello: odd cipher suite list".into()));
    }
    let cipher_suites = suites
        .chunks_exact(2)
        .map(|c| CipherSuite(u16::from_be_bytes([c[0], c[1]])))
        .collect();
    let _compression = r.vec8()?;
    let extensions = if r.is_empty() {
        Vec::new()
    } else {
        parse_extensions(r.vec16()?)?
    };
    r.finish()?;
    Ok(ClientHello {
        version,
        random,
        session_id,
        cipher_suites,
        extensions,
    })
}

/// Encode a ServerHello as a complete handshake message.
pub fn encode_server_hello(sh: &ServerHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(128);
    body.extend_from_slice(&sh.version.to_be_bytes());
    body.extend_from_slice(&sh.random);
    push_vec8(&mut body, &sh.session_id);
    body.extend_from_slice(&sh.cipher_suite.0.to_be_bytes());
    body.push(sh.compression_method);
    if let Some(exts) = &sh.extensions {
        push_vec16(&mut body, &encode_extensions(exts));
    }
    wrap_handshake(HandshakeType::ServerHello, &body)
}

/// Decode a ServerHello body.
pub fn decode_server_hello(body: &[u8]) -> Result<ServerHello, TlsError> {
    let mut r = Reader::new(body, "ServerHello");
    let version = r.u16()?;
    let mut random = [0u8; 32];
    random.copy_from_slice(r.bytes(32)?);
    let session_id = r.vec8()?.to_vec();
    if session_id.len() > 32 {
        return Err(TlsError::InvalidMessage("ServerHello: session id too long".into()));
    }
    let cipher_suite = CipherSuite(r.u16()?);
    let compression_method = r.u8()?;
    let extensions = if r.is_empty() {
        None
    } else {
        Some(parse_extensions(r.vec16()?)?)
    };
    r.finish()?;
    Ok(ServerHello {
        version,
        random,
        session_id,
        cipher_suite,
        compression_method,
        extensions,
    })
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// Encode a Certificate message carrying `chain` (leaf first).
pub fn encode_certificate(chain: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = chain.iter().map(|c| 3 + c.len()).sum();
    let mut body = Vec::with_capacity(3 + total);
    push_u24(&mut body, total);
    for cert in chain {
        push_u24(&mut body, cert.len());
        body.extend_from_slice(cert);
    }
    wrap_handshake(HandshakeType::Certificate, &body)
}

/// Decode a Certificate body into its DER certificates, leaf first.
pub fn decode_certificate(body: &[u8]) -> Result<Vec<Vec<u8>>, TlsError> {
    let mut outer = Reader::new(body, "Certificate");
    let list = outer.vec24()?;
    outer.finish()?;

    let mut r = Reader::new(list, "Certificate entry");
    let mut certs = Vec::new();
    while !r.is_empty() {
        let cert = r.vec24()?;
        if cert.is_empty() {
            return Err(TlsError::InvalidMessage("Certificate: empty entry".into()));
        }
        certs.push(cert.to_vec());
    }
    Ok(certs)
}

// ---------------------------------------------------------------------------
// Small messages
// ---------------------------------------------------------------------------

/// Encode a Finished message.
pub fn encode_finished(verify_data: &[u8]) -> Vec<u8> {
    wrap_handshake(HandshakeType::Finished, verify_data)
}

/// Decode a Finished body; verify_data is always 12 bytes.
pub fn decode_finished(body: &[u8]) -> Result<[u8; VERIFY_DATA_LEN], TlsError> {
    body.try_into().map_err(|_| {
        TlsError::InvalidMessage(format!(
            "Finished: verify_data must be {VERIFY_DATA_LEN} bytes, got {}",
            body.len()
        ))
    })
}

pub fn encode_hello_request() -> Vec<u8> {
    wrap_handshake(HandshakeType::HelloRequest, &[])
}

pub fn encode_server_hello_done() -> Vec<u8> {
    wrap_handshake(HandshakeType::ServerHelloDone, &[])
}

/// Check the (empty) body of HelloRequest or ServerHelloDone.
pub fn decode_empty(body: &[u8], what: &'static str) -> Result<(), TlsError> {
    Reader::new(body, what).finish()
}

/// NewSessionTicket (RFC 5077 Section 3.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    pub lifetime_hint: u32,
    pub ticket: Vec<u8>,
}

pub fn encode_new_session_ticket(nst: &NewSessionTicket) -> Vec<u8> {
    let mut body = Vec::with_capacity(6 + nst.ticket.len());
    body.extend_from_slice(&nst.lifetime_hint.to_be_bytes());
    push_vec16(&mut body, &nst.ticket);
    wrap_handshake(HandshakeType::NewSessionTicket, &body)
}

pub fn decode_new_session_ticket(body: &[u8]) -> Result<NewSessionTicket, TlsError> {
    let mut r = Reader::new(body, "NewSessionTicket");
    let lifetime_hint = r.u32()?;
    let ticket = r.vec16()?.to_vec();
    r.finish()?;
    Ok(NewSessionTicket {
        lifetime_hint,
        ticket,
    })
}
