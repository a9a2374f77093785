//! Hello extension encoding/decoding.

use crate::crypt::{NamedGroup, SignatureScheme};
use crate::extensions::{Extension, ExtensionType, MaxFragmentLength};
use crate::handshake::codec::Reader;
use nbtls_types::TlsError;

// ---------------------------------------------------------------------------
// Extension blocks
// ---------------------------------------------------------------------------

/// Serialize extension entries (without the outer length prefix).
pub fn encode_extensions(exts: &[Extension]) -> Vec<u8> {
    let mut out = Vec::new();
    for ext in exts {
        out.extend_from_slice(&ext.extension_type.0.to_be_bytes());
        out.extend_from_slice(&(ext.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&ext.data);
    }
    out
}

/// Parse extension entries (without the outer length prefix). The entries
/// must fill the block exactly.
pub fn parse_extensions(data: &[u8]) -> Result<Vec<Extension>, TlsError> {
    let mut r = Reader::new(data, "extensions");
    let mut exts = Vec::new();
    while !r.is_empty() {
        let extension_type = ExtensionType(r.u16()?);
        let data = r.vec16()?.to_vec();
        if exts.iter().any(|e: &Extension| e.extension_type == extension_type) {
            return Err(TlsError::InvalidMessage(format!(
                "duplicate extension 0x{:04x}",
                extension_type.0
            )));
        }
        exts.push(Extension {
            extension_type,
            data,
        });
    }
    Ok(exts)
}

// ---------------------------------------------------------------------------
// ClientHello extensions
// ---------------------------------------------------------------------------

/// Build a `server_name` (SNI) extension with a single host_name entry.
pub fn build_server_name(hostname: &str) -> Extension {
    let name = hostname.as_bytes();
    let entry_len = 1 + 2 + name.len();
    let mut data = Vec::with_capacity(2 + entry_len);
    data.extend_from_slice(&(entry_len as u16).to_be_bytes());
    data.push(0); // host_name
    data.extend_from_slice(&(name.len() as u16).to_be_bytes());
    data.extend_from_slice(name);
    Extension::new(ExtensionType::SERVER_NAME, data)
}

/// Build `max_fragment_length` (RFC 6066).
pub fn build_max_fragment_length(mfl: MaxFragmentLength) -> Extension {
    Extension::new(ExtensionType::MAX_FRAGMENT_LENGTH, vec![mfl as u8])
}

/// Build `signature_algorithms`.
pub fn build_signature_algorithms(schemes: &[SignatureScheme]) -> Extension {
    let mut data = Vec::with_capacity(2 + schemes.len() * 2);
    data.extend_from_slice(&((schemes.len() * 2) as u16).to_be_bytes());
    for s in schemes {
        data.extend_from_slice(&s.0.to_be_bytes());
    }
    Extension::new(ExtensionType::SIGNATURE_ALGORITHMS, data)
}

/// Build `renegotiation_info` (RFC 5746). `renegotiated_connection` is empty
/// on an initial handshake and the client verify_data on a renegotiation.
pub fn build_renegotiation_info(renegotiated_connection: &[u8]) -> Extension {
    let mut data = Vec::with_capacity(1 + renegotiated_connection.len());
    data.push(renegotiated_connection.len() as u8);
    data.extend_from_slice(renegotiated_connection);
    Extension::new(ExtensionType::RENEGOTIATION_INFO, data)
}

/// Build `session_ticket` (RFC 5077): empty to ask for a ticket, or the
/// cached ticket to resume.
pub fn build_session_ticket(ticket: &[u8]) -> Extension {
    Extension::new(ExtensionType::SESSION_TICKET, ticket.to_vec())
}

/// Build `supported_groups` ("elliptic_curves" in RFC 4492).
pub fn build_supported_groups(groups: &[NamedGroup]) -> Extension {
    let mut data = Vec::with_capacity(2 + groups.len() * 2);
    data.extend_from_slice(&((groups.len() * 2) as u16).to_be_bytes());
    for g in groups {
        data.extend_from_slice(&g.0.to_be_bytes());
    }
    Extension::new(ExtensionType::SUPPORTED_GROUPS, data)
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Parse `renegotiation_info`, returning the renegotiated_connection bytes.
pub fn parse_renegotiation_info(data: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut r = Reader::new(data, "renegotiation_info");
    let out = r.vec8()?.to_vec();
    r.finish()?;
    Ok(out)
}

/// Parse `max_fragment_length`.
pub fn parse_max_fragment_length(data: &[u8]) -> Result<MaxFragmentLength, TlsError> {
    let [v] = data else {
        return Err(TlsError::InvalidMessage(
            "max_fragment_length: expected 1 byte".into(),
        ));
    };
    MaxFragmentLength::from_u8(*v).ok_or_else(|| {
        TlsError::InvalidMessage(format!("max_fragment_length: invalid value {v}"))
    })
}

/// Parse the server's `session_ticket` acknowledgement, which must be empty.
pub fn parse_session_ticket_sh(data: &[u8]) -> Result<(), TlsError> {
    Reader::new(data, "session_ticket").finish()
}

/// Parse `server_name`, returning the host name.
pub fn parse_server_name(data: &[u8]) -> Result<String, TlsError> {
    let mut outer = Reader::new(data, "server_name");
    let list = outer.vec16()?;
    outer.finish()?;
    let mut r = Reader::new(list, "server_name entry");
    let name_type = r.u8()?;
    if name_type != 0 {
        return Err(TlsError::InvalidMessage(format!(
            "server_name: unsupported name type {name_type}"
        )));
    }
    let name = r.vec16()?;
    String::from_utf8(name.to_vec())
        .map_err(|_| TlsError::InvalidMessage("server_name: invalid UTF-8".into()))
}

fn parse_u16_list(data: &[u8], what: &'static str) -> Result<Vec<u16>, TlsError> {
    let mut outer = Reader::new(data, what);
    let list = outer.vec16()?;
    outer.finish()?;
    if list.len() % 2 != 0 {
        return Err(TlsError::InvalidMessage(format!("{what}: odd length")));
    }
    Ok(list
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// Parse `signature_algorithms`.
pub fn parse_signature_algorithms(data: &[u8]) -> Result<Vec<SignatureScheme>, TlsError> {
    Ok(parse_u16_list(data, "signature_algorithms")?
        .into_iter()
        .map(SignatureScheme)
        .collect())
}

/// Parse `supported_groups`.
pub fn parse_supported_groups(data: &[u8]) -> Result<Vec<NamedGroup>, TlsError> {
    Ok(parse_u16_list(data, "supported_groups")?
        .into_iter()
        .map(NamedGroup)
        .collect())
}
