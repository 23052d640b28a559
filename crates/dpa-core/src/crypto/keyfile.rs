//! Master key files.
//!
//! A key file is a single 40-byte record:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | magic `DPAK` |
//! | 4 | 2 | version (LE) |
//! | 6 | 2 | key length (LE, always 32) |
//! | 8 | 32 | key |
//!
//! Anything after the key is rejected.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::wrap::MASTER_KEY_LEN;
use crate::crypto::CryptoError;

pub const KEYFILE_MAGIC: [u8; 4] = *b"DPAK";
pub const KEYFILE_VERSION: u16 = 1;

const PREAMBLE_LEN: usize = 8;
const KEYFILE_LEN: usize = PREAMBLE_LEN + MASTER_KEY_LEN;

#[derive(Debug)]
pub struct MasterKeyFile {
    pub version: u16,
    pub key: Zeroizing<[u8; MASTER_KEY_LEN]>,
}

/// Fresh key material from the OS RNG.
pub fn generate_key(len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

/// Writes `key_bytes` as a key file. An existing file is only replaced when
/// `force` is set.
pub fn write_master_keyfile<P: AsRef<Path>>(
    path: P,
    key_bytes: &[u8],
    force: bool,
) -> Result<(), CryptoError> {
    if key_bytes.len() != MASTER_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: MASTER_KEY_LEN,
            found: key_bytes.len(),
        });
    }

    let mut record = Zeroizing::new([0u8; KEYFILE_LEN]);
    record[0..4].copy_from_slice(&KEYFILE_MAGIC);
    record[4..6].copy_from_slice(&KEYFILE_VERSION.to_le_bytes());
    record[6..8].copy_from_slice(&(MASTER_KEY_LEN as u16).to_le_bytes());
    record[PREAMBLE_LEN..].copy_from_slice(key_bytes);

    let mut file = if force {
        File::create(path)?
    } else {
        OpenOptions::new().write(true).create_new(true).open(path)?
    };
    file.write_all(record.as_slice())?;
    file.sync_all()?;
    Ok(())
}

pub fn read_master_keyfile<P: AsRef<Path>>(path: P) -> Result<MasterKeyFile, CryptoError> {
    // One byte past the record is enough to detect trailing data.
    let mut record = Zeroizing::new(Vec::with_capacity(KEYFILE_LEN + 1));
    File::open(path)?
        .take(KEYFILE_LEN as u64 + 1)
        .read_to_end(&mut record)?;

    if record.len() < PREAMBLE_LEN {
        return Err(CryptoError::TruncatedKeyFile);
    }

    let magic = [record[0], record[1], record[2], record[3]];
    if magic != KEYFILE_MAGIC {
        return Err(CryptoError::InvalidKeyFileMagic { found: magic });
    }

    let version = u16::from_le_bytes([record[4], record[5]]);
    if version != KEYFILE_VERSION {
        return Err(CryptoError::UnsupportedKeyFileVersion(version));
    }

    let declared = u16::from_le_bytes([record[6], record[7]]);
    if declared as usize != MASTER_KEY_LEN || record.len() > KEYFILE_LEN {
        return Err(CryptoError::InvalidKeyFileLength(declared));
    }
    if record.len() < KEYFILE_LEN {
        return Err(CryptoError::TruncatedKeyFile);
    }

    let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    key.copy_from_slice(&record[PREAMBLE_LEN..]);
    Ok(MasterKeyFile { version, key })
}
