use thiserror::Error;

#[cfg(not(feature = "zeroize"))]
compile_error!("dpa-core crypto requires the `zeroize` feature");

pub mod ctr;
pub mod keyfile;
pub mod wrap;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid key length: expected {expected}, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },
    #[error("invalid IV length: expected {expected}, found {found}")]
    InvalidIvLength { expected: usize, found: usize },
    #[error("content key unwrap failed")]
    KeyUnwrap,
    #[error("invalid master key file magic")]
    InvalidKeyFileMagic { found: [u8; 4] },
    #[error("unsupported master key file version: {0}")]
    UnsupportedKeyFileVersion(u16),
    #[error("invalid master key file length: {0}")]
    InvalidKeyFileLength(u16),
    #[error("master key file is truncated")]
    TruncatedKeyFile,
}
