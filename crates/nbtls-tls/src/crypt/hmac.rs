//! HMAC over the hash algorithms used by TLS record MACs and the PRF.

use hmac::{Mac, SimpleHmac};
use nbtls_types::{CryptoError, HashAlgId};

/// A keyed HMAC context for one of the supported digests.
#[derive(Clone)]
pub enum HmacState {
    Md5(SimpleHmac<md5::Md5>),
    Sha1(SimpleHmac<sha1::Sha1>),
    Sha256(SimpleHmac<sha2::Sha256>),
    Sha384(SimpleHmac<sha2::Sha384>),
    Sha512(SimpleHmac<sha2::Sha512>),
}

impl HmacState {
    /// Key a new HMAC context. `Md5Sha1` has no HMAC form.
    pub fn new(alg: HashAlgId, key: &[u8]) -> Result<Self, CryptoError> {
        let bad_key = |_| CryptoError::InvalidKey;
        Ok(match alg {
            HashAlgId::Md5 => Self::Md5(SimpleHmac::new_from_slice(key).map_err(bad_key)?),
            HashAlgId::Sha1 => Self::Sha1(SimpleHmac::new_from_slice(key).map_err(bad_key)?),
            HashAlgId::Sha256 => Self::Sha256(SimpleHmac::new_from_slice(key).map_err(bad_key)?),
            HashAlgId::Sha384 => Self::Sha384(SimpleHmac::new_from_slice(key).map_err(bad_key)?),
            HashAlgId::Sha512 => Self::Sha512(SimpleHmac::new_from_slice(key).map_err(bad_key)?),
            HashAlgId::Md5Sha1 => return Err(CryptoError::NotSupported),
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(m) => m.update(data),
            Self::Sha1(m) => m.update(data),
            Self::Sha256(m) => m.update(data),
            Self::Sha384(m) => m.update(data),
            Self::Sha512(m) => m.update(data),
        }
    }

    /// Consume the context and return the tag.
    pub fn finish(self) -> Vec<u8> {
        match self {
            Self::Md5(m) => m.finalize().into_bytes().to_vec(),
            Self::Sha1(m) => m.finalize().into_bytes().to_vec(),
            Self::Sha256(m) => m.finalize().into_bytes().to_vec(),
            Self::Sha384(m) => m.finalize().into_bytes().to_vec(),
            Self::Sha512(m) => m.finalize().into_bytes().to_vec(),
        }
    }
}

/// One-shot HMAC over a sequence of data fragments.
pub fn hmac_hash(alg: HashAlgId, key: &[u8], data: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
    let mut mac = HmacState::new(alg, key)?;
    for fragment in data {
        mac.update(fragment);
    }
    Ok(mac.finish())
}
