//! TLS client configuration with builder pattern.
//!
//! Besides protocol preferences the configuration carries the services the
//! engine consumes but does not implement: the certificate validator, the
//! trust root it validates against, the client key and the certificate
//! store used to find a chain for it, and the random number source.

use std::fmt;
use std::sync::Arc;

use crate::crypt::{CipherSuiteParams, NamedGroup, SignatureScheme};
use crate::validator::{TrustRoot, Validator};
use crate::{CipherSuite, TlsVersion};
use nbtls_types::{CryptoError, EccCurveId, TlsError};
use zeroize::Zeroize;

/// Client private key material for CertificateVerify signing.
#[derive(Clone)]
pub enum PrivateKey {
    /// ECDSA private key scalar (big-endian) + curve identifier.
    Ecdsa {
        curve_id: EccCurveId,
        private_key: Vec<u8>,
    },
    /// RSA private key components (all big-endian).
    Rsa {
        n: Vec<u8>,
        d: Vec<u8>,
        e: Vec<u8>,
        p: Vec<u8>,
        q: Vec<u8>,
    },
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        match self {
            PrivateKey::Ecdsa { private_key, .. } => private_key.zeroize(),
            PrivateKey::Rsa { d, p, q, .. } => {
                d.zeroize();
                p.zeroize();
                q.zeroize();
            }
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKey::Ecdsa { curve_id, .. } => f
                .debug_struct("Ecdsa")
                .field("curve_id", curve_id)
                .finish_non_exhaustive(),
            PrivateKey::Rsa { n, .. } => f
                .debug_struct("Rsa")
                .field("bits", &(n.len() * 8))
                .finish_non_exhaustive(),
        }
    }
}

/// Source of cryptographically strong random bytes.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TlsError>;
}

/// Operating-system randomness via `getrandom`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TlsError> {
        getrandom::getrandom(buf).map_err(|_| TlsError::CryptoError(CryptoError::RandomFail))
    }
}

/// Lookup of a client certificate chain for a private key.
pub trait CertificateStore: Send + Sync {
    /// Return the chain (leaf first) whose leaf certifies `public_key`
    /// (a DER SubjectPublicKeyInfo), if any.
    fn find_chain(&self, public_key: &[u8]) -> Option<Vec<Vec<u8>>>;
}

/// A fixed set of (public key, chain) pairs.
#[derive(Debug, Default, Clone)]
pub struct StaticCertificateStore {
    entries: Vec<(Vec<u8>, Vec<Vec<u8>>)>,
}

impl StaticCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain for the key whose SubjectPublicKeyInfo is `spki_der`.
    pub fn add(mut self, spki_der: Vec<u8>, chain: Vec<Vec<u8>>) -> Self {
        self.entries.push((spki_der, chain));
        self
    }
}

impl CertificateStore for StaticCertificateStore {
    fn find_chain(&self, public_key: &[u8]) -> Option<Vec<Vec<u8>>> {
        self.entries
            .iter()
            .find(|(spki, _)| spki.as_slice() == public_key)
            .map(|(_, chain)| chain.clone())
    }
}

/// Callback receiving NSS key log lines.
pub type KeyLogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// TLS client configuration.
#[derive(Clone)]
pub struct TlsConfig {
    /// Minimum accepted TLS version.
    pub min_version: TlsVersion,
    /// Version offered in ClientHello.
    pub max_version: TlsVersion,
    /// Enabled cipher suites (in preference order).
    pub cipher_suites: Vec<CipherSuite>,
    /// Server name for SNI and certificate name checking.
    pub server_name: Option<String>,
    /// Supported signature algorithms (in preference order).
    pub signature_algorithms: Vec<SignatureScheme>,
    /// Named curves offered for ECDHE. Empty disables the extension.
    pub supported_groups: Vec<NamedGroup>,
    /// Request 4096-byte maximum fragments from the server.
    pub request_max_fragment_length: bool,
    /// Trust anchors handed to the validator.
    pub trust_root: Arc<TrustRoot>,
    /// Certificate validator. Without one every handshake fails validation.
    pub validator: Option<Arc<dyn Validator>>,
    /// Client private key, used when the server requests a certificate.
    pub private_key: Option<Arc<PrivateKey>>,
    /// Where to look up the chain for `private_key`.
    pub certificate_store: Arc<dyn CertificateStore>,
    /// Randomness for client random, IVs, nonces and pre-master secrets.
    pub random: Arc<dyn RandomSource>,
    /// Key log callback (NSS format).
    pub key_log_callback: Option<KeyLogCallback>,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("cipher_suites", &self.cipher_suites)
            .field("server_name", &self.server_name)
            .field("supported_groups", &self.supported_groups)
            .field("private_key", &self.private_key.as_ref().map(|_| "<key>"))
            .field(
                "key_log_callback",
                &self.key_log_callback.as_ref().map(|_| "<callback>"),
            )
            .finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Create a builder for TLS configuration.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Cipher suites actually offered: configured, implemented, and usable
    /// at the maximum version.
    pub fn offered_suites(&self) -> Vec<CipherSuite> {
        self.cipher_suites
            .iter()
            .copied()
            .filter(|s| {
                CipherSuiteParams::from_suite(*s)
                    .map(|p| p.usable_with(self.max_version))
                    .unwrap_or(false)
            })
            .collect()
    }
}

/// Builder for `TlsConfig`.
pub struct TlsConfigBuilder {
    min_version: TlsVersion,
    max_version: TlsVersion,
    cipher_suites: Vec<CipherSuite>,
    server_name: Option<String>,
    signature_algorithms: Vec<SignatureScheme>,
    supported_groups: Vec<NamedGroup>,
    request_max_fragment_length: bool,
    trust_root: Arc<TrustRoot>,
    validator: Option<Arc<dyn Validator>>,
    private_key: Option<Arc<PrivateKey>>,
    certificate_store: Arc<dyn CertificateStore>,
    random: Arc<dyn RandomSource>,
    key_log_callback: Option<KeyLogCallback>,
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self {
            min_version: TlsVersion::Tls11,
            max_version: TlsVersion::Tls12,
            cipher_suites: CipherSuiteParams::all().iter().map(|p| p.suite).collect(),
            server_name: None,
            signature_algorithms: vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::ECDSA_SECP384R1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::RSA_PKCS1_SHA1,
                SignatureScheme::ECDSA_SHA1,
            ],
            supported_groups: vec![
                NamedGroup::X25519,
                NamedGroup::SECP256R1,
                NamedGroup::SECP384R1,
            ],
            request_max_fragment_length: true,
            trust_root: Arc::new(TrustRoot::default()),
            validator: None,
            private_key: None,
            certificate_store: Arc::new(StaticCertificateStore::new()),
            random: Arc::new(OsRandom),
            key_log_callback: None,
        }
    }
}

impl fmt::Debug for TlsConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfigBuilder")
            .field("server_name", &self.server_name)
            .field("cipher_suites", &self.cipher_suites)
            .finish_non_exhaustive()
    }
}

impl TlsConfigBuilder {
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    pub fn max_version(mut self, version: TlsVersion) -> Self {
        self.max_version = version;
        self
    }

    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = Some(name.to_string());
        self
    }

    pub fn signature_algorithms(mut self, schemes: &[SignatureScheme]) -> Self {
        self.signature_algorithms = schemes.to_vec();
        self
    }

    pub fn supported_groups(mut self, groups: &[NamedGroup]) -> Self {
        self.supported_groups = groups.to_vec();
        self
    }

    pub fn request_max_fragment_length(mut self, enabled: bool) -> Self {
        self.request_max_fragment_length = enabled;
        self
    }

    pub fn trust_root(mut self, root: Arc<TrustRoot>) -> Self {
        self.trust_root = root;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn private_key(mut self, key: Arc<PrivateKey>) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn certificate_store(mut self, store: Arc<dyn CertificateStore>) -> Self {
        self.certificate_store = store;
        self
    }

    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn key_log(mut self, cb: KeyLogCallback) -> Self {
        self.key_log_callback = Some(cb);
        self
    }

    pub fn build(self) -> TlsConfig {
        TlsConfig {
            min_version: self.min_version,
            max_version: self.max_version,
            cipher_suites: self.cipher_suites,
            server_name: self.server_name,
            signature_algorithms: self.signature_algorithms,
            supported_groups: self.supported_groups,
            request_max_fragment_length: self.request_max_fragment_length,
            trust_root: self.trust_root,
            validator: self.validator,
            private_key: self.private_key,
            certificate_store: self.certificate_store,
            random: self.random,
            key_log_callback: self.key_log_callback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_defaults() {
        let config = TlsConfig::builder().build();
        assert_eq!(config.min_version, TlsVersion::Tls11);
        assert_eq!(config.max_version, TlsVersion::Tls12);
        assert_eq!(config.cipher_suites.len(), CipherSuiteParams::all().len());
        assert!(config.request_max_fragment_length);
        assert!(config.validator.is_none());
        assert!(config.private_key.is_none());
        assert_eq!(config.supported_groups[0], NamedGroup::X25519);
    }

    #[test]
    fn test_config_builder_setters() {
        let config = TlsConfig::builder()
            .server_name("boot.example.com")
            .min_version(TlsVersion::Tls12)
            .cipher_suites(&[CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA])
            .signature_algorithms(&[SignatureScheme::RSA_PKCS1_SHA256])
            .supported_groups(&[])
            .request_max_fragment_length(false)
            .build();
        assert_eq!(config.server_name.as_deref(), Some("boot.example.com"));
        assert_eq!(config.min_version, TlsVersion::Tls12);
        assert_eq!(config.cipher_suites.len(), 1);
        assert!(config.supported_groups.is_empty());
        assert!(!config.request_max_fragment_length);
    }

    #[test]
    fn test_offered_suites_filters_by_version() {
        let config = TlsConfig::builder()
            .max_version(TlsVersion::Tls11)
            .cipher_suites(&[
                CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
                CipherSuite(0x1301),
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256,
            ])
            .build();
        assert_eq!(
            config.offered_suites(),
            vec![CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA]
        );
    }

    #[test]
    fn test_config_debug_hides_key() {
        let config = TlsConfig::builder()
            .private_key(Arc::new(PrivateKey::Ecdsa {
                curve_id: EccCurveId::NistP256,
                private_key: vec![0x42; 32],
            }))
            .build();
        let s = format!("{config:?}");
        assert!(s.contains("<key>"));
        assert!(!s.contains("66, 66"));
        let k = format!("{:?}", config.private_key.as_ref().unwrap());
        assert!(k.contains("NistP256"));
        assert!(!k.contains("66"));
    }

    #[test]
    fn test_static_certificate_store() {
        let store = StaticCertificateStore::new()
            .add(vec![1, 2, 3], vec![vec![0x30, 0x01], vec![0x30, 0x02]])
            .add(vec![4, 5], vec![vec![0x30, 0x03]]);
        assert_eq!(store.find_chain(&[4, 5]), Some(vec![vec![0x30, 0x03]]));
        assert_eq!(store.find_chain(&[1, 2, 3]).map(|c| c.len()), Some(2));
        assert!(store.find_chain(&[9]).is_none());
    }

    #[test]
    fn test_os_random_fills() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        OsRandom.fill(&mut a).unwrap();
        OsRandom.fill(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
