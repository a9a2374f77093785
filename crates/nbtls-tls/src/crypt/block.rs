//! Raw AES-CBC over the `aes` block cipher.
//!
//! TLS does its own padding and carries an explicit IV per record, so the
//! mode is driven block by block here rather than through a padded CBC API.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use nbtls_types::{CipherAlgId, CryptoError, TlsError};

/// AES block size (16 bytes).
pub const AES_BLOCK_SIZE: usize = 16;

/// A keyed AES block cipher.
pub enum AesCbc {
    Aes128(Box<aes::Aes128>),
    Aes256(Box<aes::Aes256>),
}

impl AesCbc {
    pub fn new(cipher: CipherAlgId, key: &[u8]) -> Result<Self, TlsError> {
        let bad_len = |_| CryptoError::InvalidKeyLength {
            expected: cipher.key_len(),
            got: key.len(),
        };
        match cipher {
            CipherAlgId::Aes128Cbc => Ok(Self::Aes128(Box::new(
                aes::Aes128::new_from_slice(key).map_err(bad_len)?,
            ))),
            CipherAlgId::Aes256Cbc => Ok(Self::Aes256(Box::new(
                aes::Aes256::new_from_slice(key).map_err(bad_len)?,
            ))),
            other => Err(TlsError::Unsupported(format!("{other:?} is not a CBC cipher"))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }

    /// CBC-encrypt in place (data must be block-aligned).
    pub fn encrypt(&self, iv: &[u8], data: &mut [u8]) -> Result<(), TlsError> {
        check_alignment(iv, data)?;
        let mut prev = [0u8; AES_BLOCK_SIZE];
        prev.copy_from_slice(iv);

        for chunk in data.chunks_mut(AES_BLOCK_SIZE) {
            for (c, p) in chunk.iter_mut().zip(prev.iter()) {
                *c ^= p;
            }
            self.encrypt_block(chunk);
            prev.copy_from_slice(chunk);
        }
        Ok(())
    }

    /// CBC-decrypt in place (no padding removal).
    pub fn decrypt(&self, iv: &[u8], data: &mut [u8]) -> Result<(), TlsError> {
        check_alignment(iv, data)?;
        let mut prev = [0u8; AES_BLOCK_SIZE];
        prev.copy_from_slice(iv);

        for chunk in data.chunks_mut(AES_BLOCK_SIZE) {
            let mut ct_copy = [0u8; AES_BLOCK_SIZE];
            ct_copy.copy_from_slice(chunk);
            self.decrypt_block(chunk);
            for (c, p) in chunk.iter_mut().zip(prev.iter()) {
                *c ^= p;
            }
            prev = ct_copy;
        }
        Ok(())
    }
}

fn check_alignment(iv: &[u8], data: &[u8]) -> Result<(), TlsError> {
    if iv.len() != AES_BLOCK_SIZE {
        return Err(CryptoError::InvalidIvLength.into());
    }
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(TlsError::InvalidMessage(
            "CBC ciphertext not block-aligned".into(),
        ));
    }
    Ok(())
}
