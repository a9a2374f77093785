//! TLS hello extensions understood by the client.

/// TLS extension type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionType(pub u16);

impl ExtensionType {
    pub const SERVER_NAME: Self = Self(0);
    pub const MAX_FRAGMENT_LENGTH: Self = Self(1);
    /// "elliptic_curves" in RFC 4492.
    pub const SUPPORTED_GROUPS: Self = Self(10);
    pub const SIGNATURE_ALGORITHMS: Self = Self(13);
    pub const SESSION_TICKET: Self = Self(35);
    pub const RENEGOTIATION_INFO: Self = Self(0xFF01);
}

/// A raw TLS extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub data: Vec<u8>,
}

impl Extension {
    pub fn new(extension_type: ExtensionType, data: Vec<u8>) -> Self {
        Self {
            extension_type,
            data,
        }
    }
}

/// Maximum fragment length codes (RFC 6066 Section 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MaxFragmentLength {
    Bits9 = 1,
    Bits10 = 2,
    Bits11 = 3,
    Bits12 = 4,
}

impl MaxFragmentLength {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Bits9),
            2 => Some(Self::Bits10),
            3 => Some(Self::Bits11),
            4 => Some(Self::Bits12),
            _ => None,
        }
    }

    /// Plaintext fragment limit in bytes.
    pub fn to_size(self) -> usize {
        match self {
            Self::Bits9 => 512,
            Self::Bits10 => 1024,
            Self::Bits11 => 2048,
            Self::Bits12 => 4096,
        }
    }
}

/// Find an extension by type.
pub fn find_extension(exts: &[Extension], ty: ExtensionType) -> Option<&Extension> {
    exts.iter().find(|e| e.extension_type == ty)
}
