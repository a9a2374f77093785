//! Key exchange: RSA pre-master secret encryption, finite-field DHE and
//! elliptic-curve ECDHE (X25519, P-256, P-384).
//!
//! Each exchange produces the ClientKeyExchange message together with the
//! pre-master secret it implies. The key pair types are also used by the
//! in-crate test server, which sits on the other side of the same exchange.

use num_bigint::BigUint;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use zeroize::Zeroizing;

use crate::config::RandomSource;
use crate::crypt::NamedGroup;
use crate::handshake::codec12::ClientKeyExchange;
use crate::TlsVersion;
use nbtls_types::{CryptoError, TlsError};

/// RSA pre-master secret length.
pub const RSA_PRE_MASTER_SECRET_LEN: usize = 48;

/// Smallest DHE prime accepted from a server, in bits.
pub const MIN_DH_PRIME_BITS: u64 = 512;

/// Inner key exchange state (variant per named group).
enum EcdhInner {
    X25519(x25519_dalek::EphemeralSecret),
    P256(p256::ecdh::EphemeralSecret),
    P384(p384::ecdh::EphemeralSecret),
}

/// Ephemeral elliptic-curve key pair.
pub struct EcdhKeyPair {
    group: NamedGroup,
    inner: EcdhInner,
    public_key_bytes: Vec<u8>,
}

impl EcdhKeyPair {
    /// Generate a new ephemeral key pair for `group`.
    pub fn generate(group: NamedGroup) -> Result<Self, TlsError> {
        let (inner, public_key_bytes) = match group {
            NamedGroup::X25519 => {
                let secret = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                (EcdhInner::X25519(secret), public.as_bytes().to_vec())
            }
            NamedGroup::SECP256R1 => {
                let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
                let public = secret.public_key().to_encoded_point(false);
                (EcdhInner::P256(secret), public.as_bytes().to_vec())
            }
            NamedGroup::SECP384R1 => {
                let secret = p384::ecdh::EphemeralSecret::random(&mut OsRng);
                let public = secret.public_key().to_encoded_point(false);
                (EcdhInner::P384(secret), public.as_bytes().to_vec())
            }
            _ => {
                return Err(TlsError::Unsupported(format!(
                    "named group 0x{:04x}",
                    group.0
                )))
            }
        };
        Ok(Self {
            group,
            inner,
            public_key_bytes,
        })
    }

    pub fn group(&self) -> NamedGroup {
        self.group
    }

    /// Public value as sent on the wire: 32 bytes for X25519, an
    /// uncompressed SEC1 point otherwise.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    /// Compute the shared secret with the peer's public value.
    pub fn compute_shared_secret(self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, TlsError> {
        match self.inner {
            EcdhInner::X25519(secret) => {
                let peer: [u8; 32] = peer_public
                    .try_into()
                    .map_err(|_| CryptoError::EccInvalidPublicKey)?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
                // A low-order peer point yields an all-zero secret.
                if !shared.was_contributory() {
                    return Err(CryptoError::EccInvalidPublicKey.into());
                }
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            }
            EcdhInner::P256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(uncompressed(peer_public)?)
                    .map_err(|_| CryptoError::EccInvalidPublicKey)?;
                let shared = secret.diffie_hellman(&peer);
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            EcdhInner::P384(secret) => {
                let peer = p384::PublicKey::from_sec1_bytes(uncompressed(peer_public)?)
                    .map_err(|_| CryptoError::EccInvalidPublicKey)?;
                let shared = secret.diffie_hellman(&peer);
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
        }
    }
}

// Compressed points need ec_point_formats, which we never negotiate.
fn uncompressed(point: &[u8]) -> Result<&[u8], CryptoError> {
    match point.first() {
        Some(0x04) => Ok(point),
        _ => Err(CryptoError::EccInvalidPublicKey),
    }
}

/// Ephemeral finite-field Diffie-Hellman key pair.
pub struct DhKeyPair {
    p: BigUint,
    x: BigUint,
    public_key_bytes: Vec<u8>,
}

impl DhKeyPair {
    /// Generate a private exponent in `[2, p-2]` and the public value
    /// `g^x mod p`.
    pub fn generate(p: &[u8], g: &[u8], random: &dyn RandomSource) -> Result<Self, TlsError> {
        let p = BigUint::from_bytes_be(p);
        let g = BigUint::from_bytes_be(g);
        if p.bits() < MIN_DH_PRIME_BITS {
            return Err(TlsError::Unsupported(format!(
                "DHE prime of {} bits is too small",
                p.bits()
            )));
        }
        let two = BigUint::from(2u32);
        if g < two || g >= &p - 1u32 {
            return Err(CryptoError::DhInvalidPublicValue.into());
        }

        let mut buf = Zeroizing::new(vec![0u8; p.bits().div_ceil(8) as usize + 8]);
        random.fill(&mut buf)?;
        let x = BigUint::from_bytes_be(&buf) % (&p - 3u32) + &two;

        let public_key_bytes = g.modpow(&x, &p).to_bytes_be();
        Ok(Self {
            p,
            x,
            public_key_bytes,
        })
    }

    /// Public value, big-endian without leading zeros.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    /// Compute `peer^x mod p`, stripped of leading zero bytes.
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, TlsError> {
        let y = check_dh_public(&self.p, peer_public)?;
        Ok(Zeroizing::new(y.modpow(&self.x, &self.p).to_bytes_be()))
    }
}

/// Require `1 < y < p-1`.
fn check_dh_public(p: &BigUint, y: &[u8]) -> Result<BigUint, TlsError> {
    let y = BigUint::from_bytes_be(y);
    if y <= BigUint::from(1u32) || y >= p - 1u32 {
        return Err(CryptoError::DhInvalidPublicValue.into());
    }
    Ok(y)
}

/// ClientKeyExchange plus the pre-master secret it carries or implies.
pub struct ClientKeyExchangeOutput {
    pub message: ClientKeyExchange,
    pub pre_master_secret: Zeroizing<Vec<u8>>,
}

/// RSA: a fresh pre-master secret, prefixed with the version offered in
/// ClientHello, encrypted to the server's key.
pub fn rsa_client_key_exchange(
    server_key: &RsaPublicKey,
    offered_version: TlsVersion,
    random: &dyn RandomSource,
) -> Result<ClientKeyExchangeOutput, TlsError> {
    let mut pms = Zeroizing::new(vec![0u8; RSA_PRE_MASTER_SECRET_LEN]);
    pms[..2].copy_from_slice(&offered_version.wire().to_be_bytes());
    random.fill(&mut pms[2..])?;
    let encrypted = server_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &pms)
        .map_err(|_| CryptoError::InvalidKey)?;
    Ok(ClientKeyExchangeOutput {
        message: ClientKeyExchange::Rsa(encrypted),
        pre_master_secret: pms,
    })
}

/// DHE: answer the server's `(p, g, Ys)` with our own public value.
pub fn dhe_client_key_exchange(
    p: &[u8],
    g: &[u8],
    server_public: &[u8],
    random: &dyn RandomSource,
) -> Result<ClientKeyExchangeOutput, TlsError> {
    let pair = DhKeyPair::generate(p, g, random)?;
    let pre_master_secret = pair.compute_shared_secret(server_public)?;
    Ok(ClientKeyExchangeOutput {
        message: ClientKeyExchange::Dhe(pair.public_key_bytes().to_vec()),
        pre_master_secret,
    })
}

/// ECDHE: generate a key pair on the server's curve.
pub fn ecdhe_client_key_exchange(
    group: NamedGroup,
    server_public: &[u8],
) -> Result<ClientKeyExchangeOutput, TlsError> {
    let pair = EcdhKeyPair::generate(group)?;
    let public = pair.public_key_bytes().to_vec();
    let pre_master_secret = pair.compute_shared_secret(server_public)?;
    Ok(ClientKeyExchangeOutput {
        message: ClientKeyExchange::Ecdhe(public),
        pre_master_secret,
    })
}
