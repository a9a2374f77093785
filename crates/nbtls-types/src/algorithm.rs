/// Hash algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgId {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    /// Concatenated MD5 and SHA-1 digests, used by the TLS 1.1 handshake.
    Md5Sha1,
}

impl HashAlgId {
    /// Digest output size in bytes.
    pub fn output_size(self) -> usize {
        match self {
            HashAlgId::Md5 => 16,
            HashAlgId::Sha1 => 20,
            HashAlgId::Sha256 => 32,
            HashAlgId::Sha384 => 48,
            HashAlgId::Sha512 => 64,
            HashAlgId::Md5Sha1 => 36,
        }
    }

    /// Internal block size in bytes.
    pub fn block_size(self) -> usize {
        match self {
            HashAlgId::Sha384 | HashAlgId::Sha512 => 128,
            _ => 64,
        }
    }
}

/// Elliptic curve identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EccCurveId {
    NistP256,
    NistP384,
}

impl EccCurveId {
    /// Size of a field element / scalar in bytes.
    pub fn field_size(self) -> usize {
        match self {
            EccCurveId::NistP256 => 32,
            EccCurveId::NistP384 => 48,
        }
    }
}

/// Symmetric bulk cipher identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgId {
    Aes128Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes256Gcm,
}

impl CipherAlgId {
    pub fn key_len(self) -> usize {
        match self {
            CipherAlgId::Aes128Cbc | CipherAlgId::Aes128Gcm => 16,
            CipherAlgId::Aes256Cbc | CipherAlgId::Aes256Gcm => 32,
        }
    }

    pub fn is_aead(self) -> bool {
        matches!(self, CipherAlgId::Aes128Gcm | CipherAlgId::Aes256Gcm)
    }
}
