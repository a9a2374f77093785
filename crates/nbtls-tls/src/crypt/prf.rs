//! TLS pseudo-random functions (RFC 5246 §5, RFC 4346 §5).
//!
//! ```text
//! PRF(secret, label, seed) = P_<hash>(secret, label + seed)              TLS 1.2
//! PRF(secret, label, seed) = P_MD5(S1, label + seed) XOR
//!                            P_SHA-1(S2, label + seed)                   TLS 1.1
//!
//! P_hash(secret, seed) = HMAC_hash(secret, A(1) + seed) ||
//!                        HMAC_hash(secret, A(2) + seed) || ...
//! A(0) = seed
//! A(i) = HMAC_hash(secret, A(i-1))
//! ```
//!
//! Seeds are passed as an ordered list of fragments so callers never have to
//! concatenate randoms into a scratch buffer.

use super::hmac::{hmac_hash, HmacState};
use nbtls_types::{HashAlgId, TlsError};
use zeroize::Zeroize;

/// Which PRF construction a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfAlgorithm {
    /// MD5/SHA-1 split-secret PRF used before TLS 1.2.
    Md5Sha1,
    /// Single-hash PRF of TLS 1.2, keyed by the cipher suite's hash.
    Tls12(HashAlgId),
}

/// Derive `output_len` bytes from `secret`, `label` and the seed fragments.
pub fn prf(
    alg: PrfAlgorithm,
    secret: &[u8],
    label: &str,
    seed: &[&[u8]],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut out = vec![0u8; output_len];
    match alg {
        PrfAlgorithm::Tls12(hash) => {
            p_hash_xor(hash, secret, label.as_bytes(), seed, &mut out)?;
        }
        PrfAlgorithm::Md5Sha1 => {
            // The halves overlap by one byte when the secret length is odd.
            let sub_len = (secret.len() + 1) / 2;
            let md5_secret = &secret[..sub_len];
            let sha1_secret = &secret[secret.len() - sub_len..];
            p_hash_xor(HashAlgId::Md5, md5_secret, label.as_bytes(), seed, &mut out)?;
            p_hash_xor(HashAlgId::Sha1, sha1_secret, label.as_bytes(), seed, &mut out)?;
        }
    }
    Ok(out)
}

/// P_hash expansion, XORed into `out`.
fn p_hash_xor(
    hash: HashAlgId,
    secret: &[u8],
    label: &[u8],
    seed: &[&[u8]],
    out: &mut [u8],
) -> Result<(), TlsError> {
    // A(1) = HMAC_hash(secret, label + seed)
    let mut a = {
        let mut mac = HmacState::new(hash, secret)?;
        mac.update(label);
        for fragment in seed {
            mac.update(fragment);
        }
        mac.finish()
    };

    for chunk in out.chunks_mut(hash.output_size()) {
        // HMAC_hash(secret, A(i) + label + seed)
        let mut mac = HmacState::new(hash, secret)?;
        mac.update(&a);
        mac.update(label);
        for fragment in seed {
            mac.update(fragment);
        }
        let mut block = mac.finish();
        for (o, b) in chunk.iter_mut().zip(block.iter()) {
            *o ^= b;
        }
        block.zeroize();

        // A(i+1) = HMAC_hash(secret, A(i))
        let next = hmac_hash(hash, secret, &[&a])?;
        a.zeroize();
        a = next;
    }
    a.zeroize();
    Ok(())
}
