//! AES-256-CTR keystream with random access.
//!
//! The counter block is the 128-bit IV interpreted big-endian and incremented
//! once per 16-byte block, wrapping at 2^128. Keystream byte `p` of the
//! stream is byte `p % 16` of `AES(key, iv + p / 16)`, so a session can be
//! positioned anywhere before the first call to [`CtrSession::apply_keystream`].

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes256, Block};

use crate::crypto::CryptoError;
use crate::util::zeroize_bytes;

pub const CONTENT_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const BLOCK_LEN: usize = 16;

pub struct CtrSession {
    cipher: Aes256,
    initial_counter: u128,
    position: u64,
    keystream: [u8; BLOCK_LEN],
    loaded_block: Option<u64>,
}

impl CtrSession {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != CONTENT_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: CONTENT_KEY_LEN,
                found: key.len(),
            });
        }
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::InvalidIvLength {
            expected: IV_LEN,
            found: iv.len(),
        })?;

        Ok(Self {
            cipher: Aes256::new(GenericArray::from_slice(key)),
            initial_counter: u128::from_be_bytes(iv),
            position: 0,
            keystream: [0u8; BLOCK_LEN],
            loaded_block: None,
        })
    }

    /// Logical stream position of the next byte to be combined.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Repositions the stream. The counter block becomes `position / 16` and
    /// the first `position % 16` bytes of that block's keystream are skipped.
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// XORs `data` with the keystream in place and advances the position by
    /// `data.len()`. Encryption and decryption are the same operation.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        let mut pos = 0usize;
        while pos < data.len() {
            let block_idx = self.position / BLOCK_LEN as u64;
            let within = (self.position % BLOCK_LEN as u64) as usize;
            self.load_block(block_idx);

            let n = std::cmp::min(BLOCK_LEN - within, data.len() - pos);
            for (byte, key) in data[pos..pos + n]
                .iter_mut()
                .zip(&self.keystream[within..within + n])
            {
                *byte ^= key;
            }

            pos += n;
            self.position = self.position.wrapping_add(n as u64);
        }
    }

    fn load_block(&mut self, block_idx: u64) {
        if self.loaded_block == Some(block_idx) {
            return;
        }

        let counter = self.initial_counter.wrapping_add(block_idx as u128);
        let mut block = Block::clone_from_slice(&counter.to_be_bytes());
        self.cipher.encrypt_block(&mut block);
        self.keystream.copy_from_slice(&block);
        zeroize_bytes(block.as_mut_slice());
        self.loaded_block = Some(block_idx);
    }
}

impl Drop for CtrSession {
    fn drop(&mut self) {
        zeroize_bytes(&mut self.keystream);
    }
}

impl std::fmt::Debug for CtrSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrSession")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
