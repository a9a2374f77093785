//! Uniform digest interface over the RustCrypto hash implementations.
//!
//! The handshake selects its transcript and signature digests at runtime
//! from wire codes, so everything above this module talks to a boxed
//! [`Digest`] built by a [`HashFactory`].

use digest::core_api::BlockSizeUser;
use digest::{FixedOutputReset, Reset};
use nbtls_types::{CryptoError, HashAlgId};

/// A streaming hash context.
pub trait Digest: Send + Sync {
    /// The output size in bytes.
    fn output_size(&self) -> usize;

    /// The internal block size in bytes.
    fn block_size(&self) -> usize;

    /// Feed data into the hash state.
    fn update(&mut self, data: &[u8]) -> Result<(), CryptoError>;

    /// Finalize the hash and write the digest to `out`.
    /// The length of `out` must be at least `output_size()`.
    fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError>;

    /// Reset the hash state to process a new message.
    fn reset(&mut self);
}

/// A factory closure that creates fresh Digest instances.
pub type HashFactory = Box<dyn Fn() -> Box<dyn Digest> + Send + Sync>;

/// Adapter from any RustCrypto fixed-output hash to [`Digest`].
#[derive(Default)]
pub struct RustCryptoDigest<D> {
    inner: D,
}

impl<D> Digest for RustCryptoDigest<D>
where
    D: digest::Digest + BlockSizeUser + FixedOutputReset + Reset + Default + Send + Sync,
{
    fn output_size(&self) -> usize {
        <D as digest::Digest>::output_size()
    }

    fn block_size(&self) -> usize {
        D::block_size()
    }

    fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        digest::Digest::update(&mut self.inner, data);
        Ok(())
    }

    fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError> {
        let size = <D as digest::Digest>::output_size();
        if out.len() < size {
            return Err(CryptoError::BufferTooSmall {
                need: size,
                got: out.len(),
            });
        }
        let result = digest::Digest::finalize_reset(&mut self.inner);
        out[..size].copy_from_slice(&result);
        Ok(())
    }

    fn reset(&mut self) {
        digest::Digest::reset(&mut self.inner);
    }
}

/// MD5 and SHA-1 run side by side; output is `MD5(m) || SHA1(m)`.
#[derive(Default)]
pub struct Md5Sha1 {
    md5: RustCryptoDigest<md5::Md5>,
    sha1: RustCryptoDigest<sha1::Sha1>,
}

impl Digest for Md5Sha1 {
    fn output_size(&self) -> usize {
        36
    }

    fn block_size(&self) -> usize {
        64
    }

    fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        self.md5.update(data)?;
        self.sha1.update(data)
    }

    fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError> {
        if out.len() < 36 {
            return Err(CryptoError::BufferTooSmall {
                need: 36,
                got: out.len(),
            });
        }
        self.md5.finish(&mut out[..16])?;
        self.sha1.finish(&mut out[16..36])
    }

    fn reset(&mut self) {
        self.md5.reset();
        self.sha1.reset();
    }
}

/// Create a fresh digest context for `alg`.
pub fn new_digest(alg: HashAlgId) -> Box<dyn Digest> {
    match alg {
        HashAlgId::Md5 => Box::<RustCryptoDigest<md5::Md5>>::default(),
        HashAlgId::Sha1 => Box::<RustCryptoDigest<sha1::Sha1>>::default(),
        HashAlgId::Sha256 => Box::<RustCryptoDigest<sha2::Sha256>>::default(),
        HashAlgId::Sha384 => Box::<RustCryptoDigest<sha2::Sha384>>::default(),
        HashAlgId::Sha512 => Box::<RustCryptoDigest<sha2::Sha512>>::default(),
        HashAlgId::Md5Sha1 => Box::<Md5Sha1>::default(),
    }
}

/// Build a [`HashFactory`] for `alg`.
pub fn hash_factory(alg: HashAlgId) -> HashFactory {
    Box::new(move || new_digest(alg))
}

/// One-shot hash.
pub fn digest(alg: HashAlgId, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut ctx = new_digest(alg);
    ctx.update(data)?;
    let mut out = vec![0u8; ctx.output_size()];
    ctx.finish(&mut out)?;
    Ok(out)
}
