//! TLS 1.1/1.2 key derivation using the PRF (RFC 5246 §6.3, §7.4.9, §8.1).
//!
//! Derives the master secret from the pre-master secret, then expands
//! the master secret into a key block containing per-direction MAC secrets,
//! keys and IVs.

use super::prf::{prf, PrfAlgorithm};
use super::CipherSuiteParams;
use nbtls_types::TlsError;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Master secret length (RFC 5246 §8.1).
pub const MASTER_SECRET_LEN: usize = 48;

/// Finished verify_data length.
pub const VERIFY_DATA_LEN: usize = 12;

/// The 48-byte master secret. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; MASTER_SECRET_LEN]);

impl MasterSecret {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TlsError> {
        let arr: [u8; MASTER_SECRET_LEN] = bytes.try_into().map_err(|_| {
            TlsError::InvalidMessage(format!("master secret length {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

/// Key block: MAC secrets (CBC only), symmetric keys, and IVs.
///
/// For GCM suites, MAC keys are empty (AEAD handles auth) and the IVs are
/// the 4-byte implicit nonce halves. CBC suites carry no key-block IV since
/// every record has an explicit one.
pub struct KeyBlock {
    pub client_write_mac_key: Vec<u8>,
    pub server_write_mac_key: Vec<u8>,
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
}

impl Drop for KeyBlock {
    fn drop(&mut self) {
        self.client_write_mac_key.zeroize();
        self.server_write_mac_key.zeroize();
        self.client_write_key.zeroize();
        self.server_write_key.zeroize();
        self.client_write_iv.zeroize();
        self.server_write_iv.zeroize();
    }
}

/// Derive the 48-byte master secret from the pre-master secret.
///
/// ```text
/// master_secret = PRF(pre_master_secret, "master secret",
///                     ClientHello.random + ServerHello.random)[0..47]
/// ```
pub fn derive_master_secret(
    alg: PrfAlgorithm,
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<MasterSecret, TlsError> {
    let mut out = prf(
        alg,
        pre_master_secret,
        "master secret",
        &[client_random, server_random],
        MASTER_SECRET_LEN,
    )?;
    let ms = MasterSecret::from_bytes(&out);
    out.zeroize();
    ms
}

/// Derive the key block from the master secret.
///
/// ```text
/// key_block = PRF(master_secret, "key expansion",
///                 ServerHello.random + ClientHello.random)
/// ```
///
/// Partitioned in order: client MAC, server MAC, client key, server key,
/// client IV, server IV.
pub fn derive_key_block(
    alg: PrfAlgorithm,
    master_secret: &MasterSecret,
    server_random: &[u8; 32],
    client_random: &[u8; 32],
    params: &CipherSuiteParams,
) -> Result<KeyBlock, TlsError> {
    // Note: key expansion seed is server_random + client_random (reversed from master_secret)
    let mut key_block = prf(
        alg,
        master_secret.as_bytes(),
        "key expansion",
        &[server_random, client_random],
        params.key_block_len(),
    )?;

    let mut offset = 0;
    let mut take = |len: usize| {
        let part = key_block[offset..offset + len].to_vec();
        offset += len;
        part
    };
    let block = KeyBlock {
        client_write_mac_key: take(params.mac_len),
        server_write_mac_key: take(params.mac_len),
        client_write_key: take(params.key_len),
        server_write_key: take(params.key_len),
        client_write_iv: take(params.fixed_iv_len),
        server_write_iv: take(params.fixed_iv_len),
    };
    key_block.zeroize();
    Ok(block)
}

/// Compute the Finished message verify_data (12 bytes).
///
/// ```text
/// verify_data = PRF(master_secret, finished_label,
///                   Hash(handshake_messages))[0..11]
/// ```
///
/// `label` is `"client finished"` or `"server finished"`.
pub fn compute_verify_data(
    alg: PrfAlgorithm,
    master_secret: &MasterSecret,
    label: &str,
    handshake_hash: &[u8],
) -> Result<[u8; VERIFY_DATA_LEN], TlsError> {
    let out = prf(
        alg,
        master_secret.as_bytes(),
        label,
        &[handshake_hash],
        VERIFY_DATA_LEN,
    )?;
    let mut verify = [0u8; VERIFY_DATA_LEN];
    verify.copy_from_slice(&out);
    Ok(verify)
}

/// Compare received verify_data against the expected value over the full
/// length.
pub fn verify_data_matches(expected: &[u8; VERIFY_DATA_LEN], received: &[u8]) -> bool {
    received.len() == VERIFY_DATA_LEN && bool::from(expected.ct_eq(received))
}
