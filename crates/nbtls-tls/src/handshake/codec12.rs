//! Key exchange and client authentication message codecs.
//!
//! Handles ServerKeyExchange (DHE and ECDHE parameters plus signature),
//! ClientKeyExchange (RSA, DHE, ECDHE), CertificateRequest and
//! CertificateVerify. The layout of signatures depends on the version:
//! TLS 1.2 prefixes an explicit signature/hash pair, TLS 1.1 does not.

use crate::crypt::{KeyExchangeAlg, NamedGroup, SignatureScheme};
use crate::handshake::codec::{push_vec16, push_vec8, wrap_handshake, Reader};
use crate::handshake::HandshakeType;
use crate::TlsVersion;
use nbtls_types::TlsError;

/// ECParameters curve_type for named curves (RFC 4492 Section 5.4).
pub const CURVE_TYPE_NAMED_CURVE: u8 = 3;

/// ClientCertificateType codes (RFC 5246 Section 7.4.4).
pub const CERT_TYPE_RSA_SIGN: u8 = 1;
pub const CERT_TYPE_ECDSA_SIGN: u8 = 64;

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// A `digitally-signed` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    /// Explicit pair on TLS 1.2; absent on TLS 1.1.
    pub scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

fn read_digitally_signed(r: &mut Reader<'_>, version: TlsVersion) -> Result<DigitallySigned, TlsError> {
    let scheme = if version >= TlsVersion::Tls12 {
        Some(SignatureScheme(r.u16()?))
    } else {
        None
    };
    let signature = r.vec16()?.to_vec();
    Ok(DigitallySigned { scheme, signature })
}

fn write_digitally_signed(out: &mut Vec<u8>, ds: &DigitallySigned) {
    if let Some(scheme) = ds.scheme {
        out.extend_from_slice(&scheme.0.to_be_bytes());
    }
    push_vec16(out, &ds.signature);
}

// ---------------------------------------------------------------------------
// ServerKeyExchange
// ---------------------------------------------------------------------------

/// Server ephemeral parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKeyParams {
    /// ServerDHParams: prime, generator and server public value.
    Dhe { p: Vec<u8>, g: Vec<u8>, ys: Vec<u8> },
    /// ServerECDHParams with a named curve.
    Ecdhe { group: NamedGroup, public: Vec<u8> },
}

impl ServerKeyParams {
    /// Wire encoding of the parameters; this is what the server signs.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Dhe { p, g, ys } => {
                push_vec16(&mut out, p);
                push_vec16(&mut out, g);
                push_vec16(&mut out, ys);
            }
            Self::Ecdhe { group, public } => {
                out.push(CURVE_TYPE_NAMED_CURVE);
                out.extend_from_slice(&group.0.to_be_bytes());
                push_vec8(&mut out, public);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub params: ServerKeyParams,
    /// Parameter bytes exactly as received.
    pub params_raw: Vec<u8>,
    pub signed: DigitallySigned,
}

/// Data covered by the ServerKeyExchange signature.
pub fn ske_signed_data(client_random: &[u8; 32], server_random: &[u8; 32], params: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(64 + params.len());
    data.extend_from_slice(client_random);
    data.extend_from_slice(server_random);
    data.extend_from_slice(params);
    data
}

pub fn encode_server_key_exchange(params: &ServerKeyParams, signed: &DigitallySigned) -> Vec<u8> {
    let mut body = params.encode();
    write_digitally_signed(&mut body, signed);
    wrap_handshake(HandshakeType::ServerKeyExchange, &body)
}

/// Decode a ServerKeyExchange body for the negotiated exchange and version.
pub fn decode_server_key_exchange(
    body: &[u8],
    kx: KeyExchangeAlg,
    version: TlsVersion,
) -> Result<ServerKeyExchange, TlsError> {
    let mut r = Reader::new(body, "ServerKeyExchange");
    let params = match kx {
        KeyExchangeAlg::Dhe => {
            let p = r.vec16()?.to_vec();
            let g = r.vec16()?.to_vec();
            let ys = r.vec16()?.to_vec();
            if p.is_empty() || g.is_empty() || ys.is_empty() {
                return Err(TlsError::InvalidMessage(
                    "ServerKeyExchange: empty DH parameter".into(),
                ));
            }
            ServerKeyParams::Dhe { p, g, ys }
        }
        KeyExchangeAlg::Ecdhe => {
            let curve_type = r.u8()?;
            if curve_type != CURVE_TYPE_NAMED_CURVE {
                return Err(TlsError::Unsupported(format!(
                    "ECDHE curve type {curve_type}"
                )));
            }
            let group = NamedGroup(r.u16()?);
            let public = r.vec8()?.to_vec();
            if public.is_empty() {
                return Err(TlsError::InvalidMessage(
                    "ServerKeyExchange: empty EC point".into(),
                ));
            }
            ServerKeyParams::Ecdhe { group, public }
        }
        KeyExchangeAlg::Rsa | KeyExchangeAlg::Null => {
            return Err(TlsError::ProtocolViolation(
                "ServerKeyExchange not used with this key exchange".into(),
            ))
        }
    };
    let params_len = body.len() - r.remaining();
    let params_raw = body[..params_len].to_vec();
    let signed = read_digitally_signed(&mut r, version)?;
    r.finish()?;
    Ok(ServerKeyExchange {
        params,
        params_raw,
        signed,
    })
}

// ---------------------------------------------------------------------------
// ClientKeyExchange
// ---------------------------------------------------------------------------

/// ClientKeyExchange payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchange {
    /// EncryptedPreMasterSecret.
    Rsa(Vec<u8>),
    /// ClientDiffieHellmanPublic (explicit Yc).
    Dhe(Vec<u8>),
    /// ClientECDiffieHellmanPublic.
    Ecdhe(Vec<u8>),
}

pub fn encode_client_key_exchange(cke: &ClientKeyExchange) -> Vec<u8> {
    let mut body = Vec::new();
    match cke {
        ClientKeyExchange::Rsa(v) | ClientKeyExchange::Dhe(v) => push_vec16(&mut body, v),
        ClientKeyExchange::Ecdhe(v) => push_vec8(&mut body, v),
    }
    wrap_handshake(HandshakeType::ClientKeyExchange, &body)
}

pub fn decode_client_key_exchange(body: &[u8], kx: KeyExchangeAlg) -> Result<ClientKeyExchange, TlsError> {
    let mut r = Reader::new(body, "ClientKeyExchange");
    let cke = match kx {
        KeyExchangeAlg::Rsa => ClientKeyExchange::Rsa(r.vec16()?.to_vec()),
        KeyExchangeAlg::Dhe => ClientKeyExchange::Dhe(r.vec16()?.to_vec()),
        KeyExchangeAlg::Ecdhe => ClientKeyExchange::Ecdhe(r.vec8()?.to_vec()),
        KeyExchangeAlg::Null => {
            return Err(TlsError::Unsupported("null key exchange".into()));
        }
    };
    r.finish()?;
    Ok(cke)
}

// ---------------------------------------------------------------------------
// CertificateRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub cert_types: Vec<u8>,
    /// supported_signature_algorithms; empty on TLS 1.1.
    pub sig_hash_algs: Vec<SignatureScheme>,
    /// DER distinguished names of acceptable CAs.
    pub ca_names: Vec<Vec<u8>>,
}

pub fn encode_certificate_request(cr: &CertificateRequest, version: TlsVersion) -> Vec<u8> {
    let mut body = Vec::new();
    push_vec8(&mut body, &cr.cert_types);
    if version >= TlsVersion::Tls12 {
        let algs: Vec<u8> = cr.sig_hash_algs.iter().flat_map(|s| s.0.to_be_bytes()).collect();
        push_vec16(&mut body, &algs);
    }
    let mut names = Vec::new();
    for dn in &cr.ca_names {
        push_vec16(&mut names, dn);
    }
    push_vec16(&mut body, &names);
    wrap_handshake(HandshakeType::CertificateRequest, &body)
}

pub fn decode_certificate_request(body: &[u8], version: TlsVersion) -> Result<CertificateRequest, TlsError> {
    let mut r = Reader::new(body, "CertificateRequest");
    let cert_types = r.vec8()?.to_vec();
    let sig_hash_algs = if version >= TlsVersion::Tls12 {
        let algs = r.vec16()?;
        if algs.len() % 2 != 0 {
            return Err(TlsError::InvalidMessage(
                "CertificateRequest: odd signature algorithm list".into(),
            ));
        }
        algs.chunks_exact(2)
            .map(|c| SignatureScheme(u16::from_be_bytes([c[0], c[1]])))
            .collect()
    } else {
        Vec::new()
    };
    let mut names = Reader::new(r.vec16()?, "CertificateRequest CA list");
    let mut ca_names = Vec::new();
    while !names.is_empty() {
        ca_names.push(names.vec16()?.to_vec());
    }
    r.finish()?;
    Ok(CertificateRequest {
        cert_types,
        sig_hash_algs,
        ca_names,
    })
}

// ---------------------------------------------------------------------------
// CertificateVerify
// ---------------------------------------------------------------------------

pub fn encode_certificate_verify(signed: &DigitallySigned) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + signed.signature.len());
    write_digitally_signed(&mut body, signed);
    wrap_handshake(HandshakeType::CertificateVerify, &body)
}

pub fn decode_certificate_verify(body: &[u8], version: TlsVersion) -> Result<DigitallySigned, TlsError> {
    let mut r = Reader::new(body, "CertificateVerify");
    let signed = read_digitally_signed(&mut r, version)?;
    r.finish()?;
    Ok(signed)
}
