//! Handshake signatures: verifying the server's ServerKeyExchange and
//! producing the client's CertificateVerify.
//!
//! Every operation works on a digest computed by the caller's chosen hash.
//! RSA uses PKCS#1 v1.5; the 36-byte MD5‖SHA-1 digest of TLS 1.1 is signed
//! without a DigestInfo prefix. ECDSA signatures are DER encoded.

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

use crate::config::PrivateKey;
use crate::crypt::provider::digest;
use crate::crypt::{SignatureAlgorithm, SignatureScheme};
use crate::handshake::codec12::DigitallySigned;
use nbtls_types::{CryptoError, EccCurveId, HashAlgId, TlsError};

/// A validated peer public key, taken from the leaf certificate's
/// SubjectPublicKeyInfo.
#[derive(Debug, Clone)]
pub enum PeerPublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
    EcdsaP384(p384::ecdsa::VerifyingKey),
}

impl PeerPublicKey {
    /// Parse a DER SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, TlsError> {
        if let Ok(k) = RsaPublicKey::from_public_key_der(der) {
            return Ok(Self::Rsa(k));
        }
        if let Ok(k) = p256::ecdsa::VerifyingKey::from_public_key_der(der) {
            return Ok(Self::EcdsaP256(k));
        }
        if let Ok(k) = p384::ecdsa::VerifyingKey::from_public_key_der(der) {
            return Ok(Self::EcdsaP384(k));
        }
        Err(TlsError::Unsupported(
            "peer public key is neither RSA nor ECDSA P-256/P-384".into(),
        ))
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Rsa(_) => SignatureAlgorithm::Rsa,
            Self::EcdsaP256(_) | Self::EcdsaP384(_) => SignatureAlgorithm::Ecdsa,
        }
    }

    /// Verify `signature` over a precomputed `hashed` value.
    pub fn verify_digest(&self, hash: HashAlgId, hashed: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        match self {
            Self::Rsa(k) => k
                .verify(pkcs1_scheme(hash)?, hashed, signature)
                .map_err(|_| CryptoError::RsaVerifyFail),
            Self::EcdsaP256(k) => {
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| CryptoError::EcdsaVerifyFail)?;
                k.verify_prehash(hashed, &sig)
                    .map_err(|_| CryptoError::EcdsaVerifyFail)
            }
            Self::EcdsaP384(k) => {
                let sig = p384::ecdsa::Signature::from_der(signature)
                    .map_err(|_| CryptoError::EcdsaVerifyFail)?;
                k.verify_prehash(hashed, &sig)
                    .map_err(|_| CryptoError::EcdsaVerifyFail)
            }
        }
    }
}

fn pkcs1_scheme(hash: HashAlgId) -> Result<Pkcs1v15Sign, CryptoError> {
    Ok(match hash {
        HashAlgId::Md5Sha1 => Pkcs1v15Sign::new_unprefixed(),
        HashAlgId::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        HashAlgId::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        HashAlgId::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        HashAlgId::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        HashAlgId::Md5 => return Err(CryptoError::NotSupported),
    })
}

/// Digest implied by a TLS 1.1 signature, which carries no explicit pair.
pub fn legacy_signature_hash(alg: SignatureAlgorithm) -> HashAlgId {
    match alg {
        SignatureAlgorithm::Rsa => HashAlgId::Md5Sha1,
        SignatureAlgorithm::Ecdsa => HashAlgId::Sha1,
    }
}

/// Work out the digest for a received signature and check it is acceptable:
/// an explicit pair must be one we offered and match the key's algorithm.
pub fn signature_hash(
    key_alg: SignatureAlgorithm,
    signed: &DigitallySigned,
    offered: &[SignatureScheme],
) -> Result<HashAlgId, TlsError> {
    let Some(scheme) = signed.scheme else {
        return Ok(legacy_signature_hash(key_alg));
    };
    if !offered.contains(&scheme) {
        return Err(TlsError::Unsupported(format!(
            "signature/hash pair 0x{:04x} was not offered",
            scheme.0
        )));
    }
    let (sig_alg, hash) = scheme.parts()?;
    if sig_alg != key_alg {
        return Err(TlsError::AuthFailed(format!(
            "signature/hash pair 0x{:04x} does not match the server key",
            scheme.0
        )));
    }
    Ok(hash)
}

/// Verify the ServerKeyExchange signature over `signed_data`.
pub fn verify_server_key_exchange(
    key: &PeerPublicKey,
    signed: &DigitallySigned,
    offered: &[SignatureScheme],
    signed_data: &[u8],
) -> Result<(), TlsError> {
    let hash = signature_hash(key.algorithm(), signed, offered)?;
    let hashed = digest(hash, signed_data)?;
    key.verify_digest(hash, &hashed, &signed.signature)
        .map_err(|_| TlsError::AuthFailed("ServerKeyExchange signature verification failed".into()))
}

// ---------------------------------------------------------------------------
// Client key
// ---------------------------------------------------------------------------

pub(crate) fn rsa_private_key(n: &[u8], e: &[u8], d: &[u8], p: &[u8], q: &[u8]) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_components(
        BigUint::from_bytes_be(n),
        BigUint::from_bytes_be(e),
        BigUint::from_bytes_be(d),
        vec![BigUint::from_bytes_be(p), BigUint::from_bytes_be(q)],
    )
    .map_err(|_| CryptoError::InvalidKey)
}

/// Signature algorithm of the client key.
pub fn private_key_algorithm(key: &PrivateKey) -> SignatureAlgorithm {
    match key {
        PrivateKey::Rsa { .. } => SignatureAlgorithm::Rsa,
        PrivateKey::Ecdsa { .. } => SignatureAlgorithm::Ecdsa,
    }
}

/// DER SubjectPublicKeyInfo of the client key, used to look up its chain.
pub fn private_key_spki(key: &PrivateKey) -> Result<Vec<u8>, TlsError> {
    let doc = match key {
        PrivateKey::Rsa { n, e, .. } => {
            RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                .map_err(|_| CryptoError::InvalidKey)?
                .to_public_key_der()
        }
        PrivateKey::Ecdsa {
            curve_id: EccCurveId::NistP256,
            private_key,
        } => p256::ecdsa::SigningKey::from_slice(private_key)
            .map_err(|_| CryptoError::InvalidKey)?
            .verifying_key()
            .to_public_key_der(),
        PrivateKey::Ecdsa {
            curve_id: EccCurveId::NistP384,
            private_key,
        } => p384::ecdsa::SigningKey::from_slice(private_key)
            .map_err(|_| CryptoError::InvalidKey)?
            .verifying_key()
            .to_public_key_der(),
    };
    Ok(doc.map_err(|_| CryptoError::InvalidKey)?.as_bytes().to_vec())
}

/// Sign a precomputed digest with the client key.
pub fn sign_digest(key: &PrivateKey, hash: HashAlgId, hashed: &[u8]) -> Result<Vec<u8>, TlsError> {
    match key {
        PrivateKey::Rsa { n, d, e, p, q } => {
            let k = rsa_private_key(n, e, d, p, q)?;
            let sig = k
                .sign(pkcs1_scheme(hash)?, hashed)
                .map_err(|_| CryptoError::InvalidArg)?;
            Ok(sig)
        }
        PrivateKey::Ecdsa {
            curve_id: EccCurveId::NistP256,
            private_key,
        } => {
            let k = p256::ecdsa::SigningKey::from_slice(private_key)
                .map_err(|_| CryptoError::InvalidKey)?;
            let sig: p256::ecdsa::Signature =
                k.sign_prehash(hashed).map_err(|_| CryptoError::InvalidArg)?;
            Ok(sig.to_der().as_bytes().to_vec())
        }
        PrivateKey::Ecdsa {
            curve_id: EccCurveId::NistP384,
            private_key,
        } => {
            let k = p384::ecdsa::SigningKey::from_slice(private_key)
                .map_err(|_| CryptoError::InvalidKey)?;
            let sig: p384::ecdsa::Signature =
                k.sign_prehash(hashed).map_err(|_| CryptoError::InvalidArg)?;
            Ok(sig.to_der().as_bytes().to_vec())
        }
    }
}

/// Pick the CertificateVerify pair for TLS 1.2: the key algorithm with the
/// handshake digest when the server accepts it, otherwise the first pair
/// the server lists for our key algorithm.
pub fn select_certificate_verify_scheme(
    key_alg: SignatureAlgorithm,
    handshake_hash: HashAlgId,
    server_schemes: &[SignatureScheme],
) -> Result<SignatureScheme, TlsError> {
    let preferred = SignatureScheme::from_parts(key_alg, handshake_hash);
    if let Some(s) = preferred {
        if server_schemes.is_empty() || server_schemes.contains(&s) {
            return Ok(s);
        }
    }
    server_schemes
        .iter()
        .copied()
        .find(|s| matches!(s.parts(), Ok((alg, _)) if alg == key_alg))
        .ok_or_else(|| TlsError::Unsupported("no common CertificateVerify signature pair".into()))
}
