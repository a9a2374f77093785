/// Cryptographic operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("null or empty input")]
    NullInput,
    #[error("invalid argument")]
    InvalidArg,
    #[error("operation not supported")]
    NotSupported,
    #[error("invalid key")]
    InvalidKey,

    // Buffer errors
    #[error("buffer length not enough: need {need}, got {got}")]
    BufferTooSmall { need: usize, got: usize },

    // Public-key errors
    #[error("rsa: verification failed")]
    RsaVerifyFail,
    #[error("rsa: invalid padding")]
    RsaInvalidPadding,
    #[error("ecc: invalid public key")]
    EccInvalidPublicKey,
    #[error("ecdsa: verification failed")]
    EcdsaVerifyFail,
    #[error("dh: invalid public value")]
    DhInvalidPublicValue,

    // Symmetric cipher errors
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid iv length")]
    InvalidIvLength,
    #[error("aead: tag verification failed")]
    AeadTagVerifyFail,

    // Randomness
    #[error("random source failed")]
    RandomFail,

    // Encoding/Decoding errors
    #[error("decode: asn1 buffer failed")]
    DecodeAsn1Fail,
}

/// Coarse classification of a [`TlsError`].
///
/// Every failure that closes a connection maps onto exactly one kind. The
/// comments give the errno-style class each kind corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// EINVAL: message shorter/longer than its structure, bad padding,
    /// unknown record type.
    Malformed,
    /// EPERM: MAC/tag mismatch, Finished mismatch, signature failure,
    /// renegotiation or certificate name mismatch.
    Authentication,
    /// ENOMEM.
    Resource,
    /// ENOTSUP: unknown suite, curve, signature scheme or version.
    Unsupported,
    /// EPROTO: peer broke the message ordering or version rules.
    Protocol,
    /// A fatal alert was received from the peer.
    PeerAlert,
    /// ENOTCONN: application data before the handshake completed.
    NotConnected,
    /// The connection was already closed.
    Closed,
    /// Transport failure.
    Io,
}

/// TLS protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("malformed message: {0}")]
    InvalidMessage(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("out of resources: {0}")]
    NoMemory(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("alert received: {0}")]
    AlertReceived(String),
    #[error("certificate verification failed: {0}")]
    CertVerifyFailed(String),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

impl TlsError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TlsError::InvalidMessage(_) => ErrorKind::Malformed,
            TlsError::AuthFailed(_) | TlsError::CertVerifyFailed(_) => ErrorKind::Authentication,
            TlsError::NoMemory(_) => ErrorKind::Resource,
            TlsError::Unsupported(_) => ErrorKind::Unsupported,
            TlsError::ProtocolViolation(_) => ErrorKind::Protocol,
            TlsError::AlertReceived(_) => ErrorKind::PeerAlert,
            TlsError::NotConnected => ErrorKind::NotConnected,
            TlsError::ConnectionClosed => ErrorKind::Closed,
            TlsError::IoError(_) => ErrorKind::Io,
            TlsError::CryptoError(e) => match e {
                CryptoError::RsaVerifyFail
                | CryptoError::RsaInvalidPadding
                | CryptoError::EcdsaVerifyFail
                | CryptoError::AeadTagVerifyFail => ErrorKind::Authentication,
                CryptoError::NotSupported => ErrorKind::Unsupported,
                _ => ErrorKind::Malformed,
            },
        }
    }
}

impl Clone for TlsError {
    /// Errors are recorded as the close reason of a connection and handed
    /// back on every later call, so they need to be cloneable. I/O and
    /// crypto payloads are flattened into equivalent variants.
    fn clone(&self) -> Self {
        match self {
            TlsError::InvalidMessage(s) => TlsError::InvalidMessage(s.clone()),
            TlsError::AuthFailed(s) => TlsError::AuthFailed(s.clone()),
            TlsError::NoMemory(s) => TlsError::NoMemory(s.clone()),
            TlsError::Unsupported(s) => TlsError::Unsupported(s.clone()),
            TlsError::ProtocolViolation(s) => TlsError::ProtocolViolation(s.clone()),
            TlsError::AlertReceived(s) => TlsError::AlertReceived(s.clone()),
            TlsError::CertVerifyFailed(s) => TlsError::CertVerifyFailed(s.clone()),
            TlsError::NotConnected => TlsError::NotConnected,
            TlsError::ConnectionClosed => TlsError::ConnectionClosed,
            TlsError::IoError(e) => TlsError::IoError(std::io::Error::new(e.kind(), e.to_string())),
            TlsError::CryptoError(e) => match self.kind() {
                ErrorKind::Authentication => TlsError::AuthFailed(e.to_string()),
                ErrorKind::Unsupported => TlsError::Unsupported(e.to_string()),
                _ => TlsError::InvalidMessage(e.to_string()),
            },
        }
    }
}
