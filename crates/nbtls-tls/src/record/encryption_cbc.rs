//! CBC MAC-then-encrypt record protection (RFC 5246 §6.2.3.2, RFC 4346).
//!
//! Record fragment = explicit_IV(16) || encrypted(plaintext || MAC || padding)
//! MAC = HMAC(mac_key, seq(8) || type(1) || version(2) || length(2) || plaintext)
//! Padding uses TLS scheme: all padding bytes = pad_len, last byte = pad_len.

use crate::crypt::block::{AesCbc, AES_BLOCK_SIZE};
use crate::crypt::hmac::HmacState;
use nbtls_types::{CipherAlgId, HashAlgId, TlsError};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use zeroize::Zeroize;

use super::{MAX_CIPHERTEXT_LENGTH, MAX_PLAINTEXT_LENGTH};

/// Compute the record MAC.
pub(crate) fn compute_cbc_mac(
    mac_alg: HashAlgId,
    mac_key: &[u8],
    seq: u64,
    content_type: u8,
    version: u16,
    fragment: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let mut hmac = HmacState::new(mac_alg, mac_key)?;
    hmac.update(&seq.to_be_bytes());
    hmac.update(&[content_type]);
    hmac.update(&version.to_be_bytes());
    hmac.update(&(fragment.len() as u16).to_be_bytes());
    hmac.update(fragment);
    Ok(hmac.finish())
}

/// Build TLS-style padding for CBC.
///
/// padding_length = (block_size - ((data_len + 1) % block_size)) % block_size
/// Total padding = padding_length + 1 bytes, all set to padding_length.
pub fn build_tls_padding(data_len: usize) -> Vec<u8> {
    let padding_length = (AES_BLOCK_SIZE - ((data_len + 1) % AES_BLOCK_SIZE)) % AES_BLOCK_SIZE;
    vec![padding_length as u8; padding_length + 1]
}

/// Check the trailing padding of a decrypted record.
///
/// Returns the padding length byte `k` and whether the `k` bytes before it
/// all equal `k`. Runs over the same 256-byte window whatever the padding
/// content.
pub fn verify_padding(data: &[u8]) -> (usize, Choice) {
    let Some(&last) = data.last() else {
        return (0, Choice::from(0));
    };
    let pad_len = last as usize;
    let mut ok = Choice::from((pad_len < data.len()) as u8);
    let window = data.len().min(256);
    for i in 1..window {
        let in_pad = Choice::from((i <= pad_len) as u8);
        let matches = data[data.len() - 1 - i].ct_eq(&last);
        ok &= !in_pad | matches;
    }
    (pad_len, ok)
}

/// Keys and cipher for one direction of a CBC suite.
pub struct CbcProtection {
    cipher: AesCbc,
    mac_alg: HashAlgId,
    mac_key: Vec<u8>,
}

impl Drop for CbcProtection {
    fn drop(&mut self) {
        self.mac_key.zeroize();
    }
}

impl CbcProtection {
    pub fn new(
        cipher: CipherAlgId,
        key: &[u8],
        mac_alg: HashAlgId,
        mac_key: &[u8],
    ) -> Result<Self, TlsError> {
        Ok(Self {
            cipher: AesCbc::new(cipher, key)?,
            mac_alg,
            mac_key: mac_key.to_vec(),
        })
    }

    pub fn mac_len(&self) -> usize {
        self.mac_alg.output_size()
    }

    /// Protect one record with MAC-then-encrypt under explicit `iv`.
    pub fn seal(
        &self,
        seq: u64,
        content_type: u8,
        version: u16,
        plaintext: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
    ) -> Result<Vec<u8>, TlsError> {
        if plaintext.len() > MAX_PLAINTEXT_LENGTH {
            return Err(TlsError::InvalidMessage("plaintext exceeds maximum".into()));
        }
        let mac = compute_cbc_mac(
            self.mac_alg,
            &self.mac_key,
            seq,
            content_type,
            version,
            plaintext,
        )?;

        // Reserve the IV up front, then fill and encrypt the body after it.
        let data_len = plaintext.len() + mac.len();
        let padding = build_tls_padding(data_len);
        let mut fragment = Vec::with_capacity(AES_BLOCK_SIZE + data_len + padding.len());
        fragment.extend_from_slice(iv);
        fragment.extend_from_slice(plaintext);
        fragment.extend_from_slice(&mac);
        fragment.extend_from_slice(&padding);
        self.cipher.encrypt(iv, &mut fragment[AES_BLOCK_SIZE..])?;
        Ok(fragment)
    }

    /// Decrypt one record and verify its padding and MAC.
    ///
    /// A bad padding is not reported on its own: the padding length is
    /// taken as zero and the record then fails the MAC check, so both
    /// failures surface as the same authentication error.
    pub fn open(
        &self,
        seq: u64,
        content_type: u8,
        version: u16,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let mac_len = self.mac_len();
        let min_encrypted_len = (mac_len + 1).div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE;
        if fragment.len() < AES_BLOCK_SIZE + min_encrypted_len {
            return Err(TlsError::InvalidMessage("CBC record too short".into()));
        }
        if fragment.len() > MAX_CIPHERTEXT_LENGTH {
            return Err(TlsError::InvalidMessage("record overflow".into()));
        }
        let (iv, encrypted) = fragment.split_at(AES_BLOCK_SIZE);
        if encrypted.len() % AES_BLOCK_SIZE != 0 {
            return Err(TlsError::InvalidMessage(
                "CBC ciphertext not block-aligned".into(),
            ));
        }

        let mut decrypted = encrypted.to_vec();
        self.cipher.decrypt(iv, &mut decrypted)?;

        let (pad_len, pad_ok) = verify_padding(&decrypted);
        let fits = Choice::from((pad_len + 1 + mac_len <= decrypted.len()) as u8);
        let pad_ok = pad_ok & fits;
        let pad_len = u32::conditional_select(&0, &(pad_len as u32), pad_ok) as usize;

        let content_len = decrypted.len() - pad_len - 1 - mac_len;
        let expected_mac = compute_cbc_mac(
            self.mac_alg,
            &self.mac_key,
            seq,
            content_type,
            version,
            &decrypted[..content_len],
        )?;
        let mac_ok = decrypted[content_len..content_len + mac_len].ct_eq(&expected_mac);

        if !bool::from(pad_ok & mac_ok) {
            decrypted.zeroize();
            return Err(TlsError::AuthFailed("bad record MAC".into()));
        }

        decrypted.truncate(content_len);
        if decrypted.len() > MAX_PLAINTEXT_LENGTH {
            return Err(TlsError::InvalidMessage(
                "decrypted plaintext too large".into(),
            ));
        }
        Ok(decrypted)
    }
}
