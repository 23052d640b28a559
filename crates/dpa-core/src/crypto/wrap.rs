//! Content key wrapping.
//!
//! A capsule header carries a 32-byte slot for the content key encrypted
//! under a device-held master key. Readers get the raw key back through a
//! [`KeyUnwrap`] capability so the master key never has to be a global.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};
use zeroize::Zeroizing;

use crate::crypto::ctr::{BLOCK_LEN, CONTENT_KEY_LEN};
use crate::crypto::CryptoError;

pub const WRAPPED_KEY_LEN: usize = 32;
pub const MASTER_KEY_LEN: usize = 32;

pub type ContentKey = Zeroizing<[u8; CONTENT_KEY_LEN]>;

pub trait KeyUnwrap {
    fn unwrap_key(&self, wrapped: &[u8; WRAPPED_KEY_LEN]) -> Result<ContentKey, CryptoError>;
}

pub trait KeyWrap {
    fn wrap_key(
        &self,
        content_key: &[u8; CONTENT_KEY_LEN],
    ) -> Result<[u8; WRAPPED_KEY_LEN], CryptoError>;
}

/// Stores the content key in the clear. This is what development devices
/// without a provisioned master key do.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughKey;

impl KeyUnwrap for PassthroughKey {
    fn unwrap_key(&self, wrapped: &[u8; WRAPPED_KEY_LEN]) -> Result<ContentKey, CryptoError> {
        Ok(Zeroizing::new(*wrapped))
    }
}

impl KeyWrap for PassthroughKey {
    fn wrap_key(
        &self,
        content_key: &[u8; CONTENT_KEY_LEN],
    ) -> Result<[u8; WRAPPED_KEY_LEN], CryptoError> {
        Ok(*content_key)
    }
}

/// Encrypts the content key as two independent AES-256 blocks under a
/// master key.
///
/// The slot is exactly as wide as the key, so there is no integrity check
/// value: unwrapping with the wrong master key yields a wrong content key
/// rather than an error.
pub struct MasterKey {
    cipher: Aes256,
}

impl MasterKey {
    pub fn new(master_key: &[u8]) -> Result<Self, CryptoError> {
        if master_key.len() != MASTER_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: MASTER_KEY_LEN,
                found: master_key.len(),
            });
        }

        Ok(Self {
            cipher: Aes256::new(GenericArray::from_slice(master_key)),
        })
    }
}

impl KeyUnwrap for MasterKey {
    fn unwrap_key(&self, wrapped: &[u8; WRAPPED_KEY_LEN]) -> Result<ContentKey, CryptoError> {
        let mut key = Zeroizing::new([0u8; CONTENT_KEY_LEN]);
        for (out, chunk) in key
            .chunks_exact_mut(BLOCK_LEN)
            .zip(wrapped.chunks_exact(BLOCK_LEN))
        {
            let mut block = Block::clone_from_slice(chunk);
            self.cipher.decrypt_block(&mut block);
            out.copy_from_slice(&block);
            crate::util::zeroize_bytes(block.as_mut_slice());
        }
        Ok(key)
    }
}

impl KeyWrap for MasterKey {
    fn wrap_key(
        &self,
        content_key: &[u8; CONTENT_KEY_LEN],
    ) -> Result<[u8; WRAPPED_KEY_LEN], CryptoError> {
        let mut wrapped = [0u8; WRAPPED_KEY_LEN];
        for (out, chunk) in wrapped
            .chunks_exact_mut(BLOCK_LEN)
            .zip(content_key.chunks_exact(BLOCK_LEN))
        {
            let mut block = Block::clone_from_slice(chunk);
            self.cipher.encrypt_block(&mut block);
            out.copy_from_slice(&block);
        }
        Ok(wrapped)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
