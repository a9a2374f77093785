//! TLS cryptographic operations and algorithm registries.
//!
//! Maps wire-format codes (cipher suites, signature/hash pairs, named
//! curves) onto the algorithm descriptors the handshake and record layer
//! work with. Lookups of unknown codes fail with `Unsupported`.

pub mod aead;
pub mod block;
pub mod hmac;
pub mod key_schedule;
pub mod keylog;
pub mod prf;
pub mod provider;
pub mod transcript;

use crate::{CipherSuite, TlsVersion};
use nbtls_types::{CipherAlgId, EccCurveId, HashAlgId, TlsError};
use prf::PrfAlgorithm;
use provider::{hash_factory, HashFactory};

/// TLS named group identifiers (for ECDHE key exchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamedGroup(pub u16);

impl NamedGroup {
    pub const SECP256R1: Self = Self(0x0017);
    pub const SECP384R1: Self = Self(0x0018);
    pub const X25519: Self = Self(0x001D);

    /// Whether the engine implements this curve.
    pub fn is_supported(&self) -> bool {
        matches!(*self, Self::SECP256R1 | Self::SECP384R1 | Self::X25519)
    }
}

/// Signature algorithm used by a certificate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Rsa,
    Ecdsa,
}

impl SignatureAlgorithm {
    pub fn wire(self) -> u8 {
        match self {
            Self::Rsa => 1,
            Self::Ecdsa => 3,
        }
    }
}

/// TLS 1.2 signature/hash pair (RFC 5246 §7.4.1.4.1), high byte hash,
/// low byte signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const RSA_PKCS1_SHA1: Self = Self(0x0201);
    pub const RSA_PKCS1_SHA256: Self = Self(0x0401);
    pub const RSA_PKCS1_SHA384: Self = Self(0x0501);
    pub const RSA_PKCS1_SHA512: Self = Self(0x0601);
    pub const ECDSA_SHA1: Self = Self(0x0203);
    pub const ECDSA_SECP256R1_SHA256: Self = Self(0x0403);
    pub const ECDSA_SECP384R1_SHA384: Self = Self(0x0503);

    /// Split into the (signature algorithm, digest) pair.
    pub fn parts(&self) -> Result<(SignatureAlgorithm, HashAlgId), TlsError> {
        let hash = match self.0 >> 8 {
            2 => HashAlgId::Sha1,
            4 => HashAlgId::Sha256,
            5 => HashAlgId::Sha384,
            6 => HashAlgId::Sha512,
            _ => {
                return Err(TlsError::Unsupported(format!(
                    "signature/hash pair 0x{:04x}",
                    self.0
                )))
            }
        };
        let sig = match self.0 & 0xff {
            1 => SignatureAlgorithm::Rsa,
            3 if hash != HashAlgId::Sha512 => SignatureAlgorithm::Ecdsa,
            _ => {
                return Err(TlsError::Unsupported(format!(
                    "signature/hash pair 0x{:04x}",
                    self.0
                )))
            }
        };
        Ok((sig, hash))
    }

    /// Build the pair for a signature algorithm and digest.
    pub fn from_parts(sig: SignatureAlgorithm, hash: HashAlgId) -> Option<Self> {
        let h: u16 = match hash {
            HashAlgId::Sha1 => 2,
            HashAlgId::Sha256 => 4,
            HashAlgId::Sha384 => 5,
            HashAlgId::Sha512 => 6,
            _ => return None,
        };
        let scheme = Self((h << 8) | u16::from(sig.wire()));
        scheme.parts().ok().map(|_| scheme)
    }
}

/// Key exchange algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlg {
    /// No key exchange: the initial null suite.
    Null,
    /// Static RSA key exchange (client encrypts PMS with server's RSA cert key).
    Rsa,
    /// Ephemeral Diffie-Hellman key exchange (server sends DH params in SKE).
    Dhe,
    /// Ephemeral elliptic-curve Diffie-Hellman.
    Ecdhe,
}

impl KeyExchangeAlg {
    /// Returns true if the server must send a ServerKeyExchange.
    pub fn requires_server_key_exchange(&self) -> bool {
        matches!(self, Self::Dhe | Self::Ecdhe)
    }
}

/// Server authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAlg {
    Null,
    Rsa,
    Ecdsa,
}

/// Parameters associated with a TLS 1.1/1.2 cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuiteParams {
    /// The cipher suite identifier.
    pub suite: CipherSuite,
    /// Key exchange algorithm.
    pub kx_alg: KeyExchangeAlg,
    /// Authentication algorithm.
    pub auth_alg: AuthAlg,
    /// Bulk cipher; `None` only for the null suite.
    pub cipher: Option<CipherAlgId>,
    /// Digest of the TLS 1.2 PRF and handshake transcript.
    pub prf_hash: HashAlgId,
    /// Encryption key length in bytes (0, 16 or 32).
    pub key_len: usize,
    /// Fixed IV length from key_block (4 for GCM, 0 otherwise).
    pub fixed_iv_len: usize,
    /// Explicit IV/nonce length sent with each record (16 for CBC, 8 for GCM).
    pub record_iv_len: usize,
    /// AEAD tag length in bytes (16 for GCM, 0 for CBC).
    pub tag_len: usize,
    /// MAC digest for CBC suites.
    pub mac: Option<HashAlgId>,
    /// MAC key and output length (0 for AEAD, 20 for SHA-1, 32/48 for SHA-2).
    pub mac_len: usize,
    /// Usable only from TLS 1.2 on (SHA-2 MAC or AEAD).
    pub tls12_only: bool,
}

const fn cbc(
    suite: u16,
    kx_alg: KeyExchangeAlg,
    auth_alg: AuthAlg,
    cipher: CipherAlgId,
    mac: HashAlgId,
) -> CipherSuiteParams {
    let (key_len, mac_len) = (
        match cipher {
            CipherAlgId::Aes256Cbc | CipherAlgId::Aes256Gcm => 32,
            _ => 16,
        },
        match mac {
            HashAlgId::Sha384 => 48,
            HashAlgId::Sha256 => 32,
            _ => 20,
        },
    );
    CipherSuiteParams {
        suite: CipherSuite(suite),
        kx_alg,
        auth_alg,
        cipher: Some(cipher),
        prf_hash: match mac {
            HashAlgId::Sha384 => HashAlgId::Sha384,
            _ => HashAlgId::Sha256,
        },
        key_len,
        fixed_iv_len: 0,
        record_iv_len: 16,
        tag_len: 0,
        mac: Some(mac),
        mac_len,
        tls12_only: !matches!(mac, HashAlgId::Sha1),
    }
}

const fn gcm(
    suite: u16,
    kx_alg: KeyExchangeAlg,
    auth_alg: AuthAlg,
    cipher: CipherAlgId,
    prf_hash: HashAlgId,
) -> CipherSuiteParams {
    CipherSuiteParams {
        suite: CipherSuite(suite),
        kx_alg,
        auth_alg,
        cipher: Some(cipher),
        prf_hash,
        key_len: match cipher {
            CipherAlgId::Aes256Cbc | CipherAlgId::Aes256Gcm => 32,
            _ => 16,
        },
        fixed_iv_len: 4,
        record_iv_len: 8,
        tag_len: 16,
        mac: None,
        mac_len: 0,
        tls12_only: true,
    }
}

use AuthAlg as A;
use CipherAlgId as C;
use HashAlgId as H;
use KeyExchangeAlg as K;

/// Every suite the engine implements, in default preference order.
static CIPHER_SUITES: &[CipherSuiteParams] = &[
    gcm(0xc02b, K::Ecdhe, A::Ecdsa, C::Aes128Gcm, H::Sha256),
    gcm(0xc02c, K::Ecdhe, A::Ecdsa, C::Aes256Gcm, H::Sha384),
    gcm(0xc02f, K::Ecdhe, A::Rsa, C::Aes128Gcm, H::Sha256),
    gcm(0xc030, K::Ecdhe, A::Rsa, C::Aes256Gcm, H::Sha384),
    cbc(0xc023, K::Ecdhe, A::Ecdsa, C::Aes128Cbc, H::Sha256),
    cbc(0xc024, K::Ecdhe, A::Ecdsa, C::Aes256Cbc, H::Sha384),
    cbc(0xc027, K::Ecdhe, A::Rsa, C::Aes128Cbc, H::Sha256),
    cbc(0xc028, K::Ecdhe, A::Rsa, C::Aes256Cbc, H::Sha384),
    cbc(0xc009, K::Ecdhe, A::Ecdsa, C::Aes128Cbc, H::Sha1),
    cbc(0xc00a, K::Ecdhe, A::Ecdsa, C::Aes256Cbc, H::Sha1),
    cbc(0xc013, K::Ecdhe, A::Rsa, C::Aes128Cbc, H::Sha1),
    cbc(0xc014, K::Ecdhe, A::Rsa, C::Aes256Cbc, H::Sha1),
    gcm(0x009e, K::Dhe, A::Rsa, C::Aes128Gcm, H::Sha256),
    gcm(0x009f, K::Dhe, A::Rsa, C::Aes256Gcm, H::Sha384),
    cbc(0x0067, K::Dhe, A::Rsa, C::Aes128Cbc, H::Sha256),
    cbc(0x006b, K::Dhe, A::Rsa, C::Aes256Cbc, H::Sha256),
    cbc(0x0033, K::Dhe, A::Rsa, C::Aes128Cbc, H::Sha1),
    cbc(0x0039, K::Dhe, A::Rsa, C::Aes256Cbc, H::Sha1),
    gcm(0x009c, K::Rsa, A::Rsa, C::Aes128Gcm, H::Sha256),
    gcm(0x009d, K::Rsa, A::Rsa, C::Aes256Gcm, H::Sha384),
    cbc(0x003c, K::Rsa, A::Rsa, C::Aes128Cbc, H::Sha256),
    cbc(0x003d, K::Rsa, A::Rsa, C::Aes256Cbc, H::Sha256),
    cbc(0x002f, K::Rsa, A::Rsa, C::Aes128Cbc, H::Sha1),
    cbc(0x0035, K::Rsa, A::Rsa, C::Aes256Cbc, H::Sha1),
];

/// The TLS_NULL_WITH_NULL_NULL suite every cipher state starts with.
pub const NULL_SUITE: CipherSuiteParams = CipherSuiteParams {
    suite: CipherSuite::TLS_NULL_WITH_NULL_NULL,
    kx_alg: KeyExchangeAlg::Null,
    auth_alg: AuthAlg::Null,
    cipher: None,
    prf_hash: HashAlgId::Sha256,
    key_len: 0,
    fixed_iv_len: 0,
    record_iv_len: 0,
    tag_len: 0,
    mac: None,
    mac_len: 0,
    tls12_only: false,
};

impl CipherSuiteParams {
    /// Look up parameters for a cipher suite.
    pub fn from_suite(suite: CipherSuite) -> Result<Self, TlsError> {
        CIPHER_SUITES
            .iter()
            .find(|p| p.suite == suite)
            .copied()
            .ok_or_else(|| TlsError::Unsupported(format!("cipher suite 0x{:04x}", suite.0)))
    }

    /// All implemented suites in default preference order.
    pub fn all() -> &'static [CipherSuiteParams] {
        CIPHER_SUITES
    }

    pub fn is_null(&self) -> bool {
        self.cipher.is_none()
    }

    pub fn is_aead(&self) -> bool {
        self.cipher.map(|c| c.is_aead()).unwrap_or(false)
    }

    /// Whether the suite may be used with `version`.
    pub fn usable_with(&self, version: TlsVersion) -> bool {
        !self.tls12_only || version >= TlsVersion::Tls12
    }

    /// PRF construction for `version`.
    pub fn prf_algorithm(&self, version: TlsVersion) -> PrfAlgorithm {
        if version >= TlsVersion::Tls12 {
            PrfAlgorithm::Tls12(self.prf_hash)
        } else {
            PrfAlgorithm::Md5Sha1
        }
    }

    /// Digest over the handshake transcript for `version`.
    pub fn handshake_hash(&self, version: TlsVersion) -> HashAlgId {
        if version >= TlsVersion::Tls12 {
            self.prf_hash
        } else {
            HashAlgId::Md5Sha1
        }
    }

    /// Create a HashFactory for the transcript digest.
    pub fn hash_factory(&self, version: TlsVersion) -> HashFactory {
        hash_factory(self.handshake_hash(version))
    }

    /// Total key material needed from the key block.
    pub fn key_block_len(&self) -> usize {
        2 * self.mac_len + 2 * self.key_len + 2 * self.fixed_iv_len
    }
}

/// Look up a named curve.
pub fn curve_for_group(group: NamedGroup) -> Option<EccCurveId> {
    match group {
        NamedGroup::SECP256R1 => Some(EccCurveId::NistP256),
        NamedGroup::SECP384R1 => Some(EccCurveId::NistP384),
        _ => None,
    }
}
