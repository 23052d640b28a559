//! Content reader.
//!
//! A [`ContentHandle`] owns one storage cursor and one cipher session. It is
//! not safe to share between threads without external serialization; open a
//! separate handle per reader instead. Handles over the same capsule are
//! independent.

use std::io;

use dpa_core::crypto::wrap::KeyUnwrap;
use dpa_core::{CryptoError, CtrSession};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::capsule::{
    decode_header, decode_manifest, find_by_id, CapsuleHeader, FormatError, ManifestEntry,
    DEFAULT_MAX_MANIFEST_ENTRIES, HEADER_LEN,
};
use crate::storage::{CapsuleBlob, CapsuleStore, StorageError};
use crate::validate::{validate_entries, validate_entry, validate_header, validate_layout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Upper bound on `manifest_entry_count`; larger counts are treated as
    /// corruption.
    pub max_manifest_entries: u32,
    /// Reject capsules whose version is not 2 instead of logging a warning.
    pub strict_version: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_manifest_entries: DEFAULT_MAX_MANIFEST_ENTRIES,
            strict_version: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("capsule not found: {capsule_id}")]
    CapsuleNotFound { capsule_id: String },
    #[error("content {content_id:?} not found in capsule {capsule_id:?}")]
    ContentNotFound {
        capsule_id: String,
        content_id: String,
    },
    #[error("key error: {0}")]
    Key(#[from] CryptoError),
    #[error("storage error: {0}")]
    Storage(StorageError),
    #[error("content handle is closed")]
    HandleClosed,
}

impl From<StorageError> for CapsuleError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(capsule_id) => CapsuleError::CapsuleNotFound { capsule_id },
            other => CapsuleError::Storage(other),
        }
    }
}

/// Header and decrypted manifest of a capsule.
#[derive(Debug, Clone)]
pub struct CapsuleManifest {
    pub header: CapsuleHeader,
    pub entries: Vec<ManifestEntry>,
    pub file_len: u64,
}

impl CapsuleManifest {
    pub fn data_len(&self) -> u64 {
        self.file_len - self.header.data_start()
    }
}

struct LoadedCapsule {
    manifest: CapsuleManifest,
    session: CtrSession,
}

fn load_capsule<B: CapsuleBlob>(
    blob: &mut B,
    unwrapper: &dyn KeyUnwrap,
    options: &ReaderOptions,
) -> Result<LoadedCapsule, CapsuleError> {
    let file_len = blob.size()?;

    let mut header_buf = [0u8; HEADER_LEN];
    read_exact_at(blob, 0, &mut header_buf)?;
    let header = decode_header(&header_buf)?;
    validate_header(&header, options)?;
    validate_layout(&header, file_len)?;

    let content_key = unwrapper.unwrap_key(&header.wrapped_key)?;
    let mut session = CtrSession::new(content_key.as_slice(), &header.iv)?;
    drop(content_key);

    // The keystream starts at the first manifest byte.
    let mut manifest_buf = Zeroizing::new(vec![0u8; header.manifest_len() as usize]);
    read_exact_at(blob, HEADER_LEN as u64, manifest_buf.as_mut_slice())?;
    session.apply_keystream(manifest_buf.as_mut_slice());
    let entries = decode_manifest(manifest_buf.as_slice(), header.manifest_entry_count)?;

    debug!(
        version = header.version,
        entries = entries.len(),
        file_len,
        "capsule manifest loaded"
    );

    Ok(LoadedCapsule {
        manifest: CapsuleManifest {
            header,
            entries,
            file_len,
        },
        session,
    })
}

/// Reads and decrypts a capsule's manifest, checking every entry lies inside
/// the data region.
pub fn read_manifest<S: CapsuleStore + ?Sized>(
    store: &S,
    capsule_id: &str,
    unwrapper: &dyn KeyUnwrap,
    options: &ReaderOptions,
) -> Result<CapsuleManifest, CapsuleError> {
    let mut blob = store.open(capsule_id)?;
    let loaded = load_capsule(&mut blob, unwrapper, options)?;
    validate_entries(&loaded.manifest.entries, loaded.manifest.data_len())?;
    Ok(loaded.manifest)
}

/// Opens one content item for sequential, decrypting reads.
///
/// Header and manifest are parsed afresh on every call. On error nothing is
/// left open.
pub fn open_content<S: CapsuleStore + ?Sized>(
    store: &S,
    capsule_id: &str,
    content_id: &str,
    unwrapper: &dyn KeyUnwrap,
    options: &ReaderOptions,
) -> Result<ContentHandle<S::Blob>, CapsuleError> {
    let mut blob = store.open(capsule_id)?;
    let LoadedCapsule {
        manifest,
        mut session,
    } = load_capsule(&mut blob, unwrapper, options)?;

    let (index, entry) = find_by_id(&manifest.entries, content_id.as_bytes()).ok_or_else(|| {
        CapsuleError::ContentNotFound {
            capsule_id: capsule_id.to_string(),
            content_id: content_id.to_string(),
        }
    })?;
    validate_entry(index, entry, manifest.data_len())?;

    let start = manifest.header.data_start() + entry.offset;
    session.seek(start - HEADER_LEN as u64);

    debug!(
        capsule_id,
        content_id,
        content_type = %entry.content_type,
        start,
        size = entry.size,
        "content opened"
    );

    Ok(ContentHandle {
        blob: Some(blob),
        session: Some(session),
        entry: *entry,
        start,
        bytes_read: 0,
    })
}

#[derive(Debug)]
pub struct ContentHandle<B: CapsuleBlob> {
    blob: Option<B>,
    session: Option<CtrSession>,
    entry: ManifestEntry,
    start: u64,
    bytes_read: u64,
}

impl<B: CapsuleBlob> ContentHandle<B> {
    pub fn entry(&self) -> &ManifestEntry {
        &self.entry
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn remaining(&self) -> u64 {
        self.entry.size - self.bytes_read
    }

    pub fn is_closed(&self) -> bool {
        self.blob.is_none()
    }

    /// Reads and decrypts up to `buf.len()` bytes of the content. Returns
    /// `Ok(0)` once the whole entry has been read; never reads past the
    /// entry even when more capsule data follows.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, CapsuleError> {
        let (blob, session) = match (self.blob.as_mut(), self.session.as_mut()) {
            (Some(blob), Some(session)) => (blob, session),
            _ => return Err(CapsuleError::HandleClosed),
        };

        let remaining = self.entry.size - self.bytes_read;
        let want = std::cmp::min(buf.len() as u64, remaining) as usize;
        if want == 0 {
            return Ok(0);
        }

        let read = blob.read_at(self.start + self.bytes_read, &mut buf[..want])?;
        if read == 0 {
            return Err(FormatError::Truncated.into());
        }

        session.apply_keystream(&mut buf[..read]);
        self.bytes_read += read as u64;
        Ok(read)
    }

    /// Drops the cipher session (scrubbing its key schedule) and the storage
    /// blob. Safe to call more than once.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            debug!(
                id = %self.entry.id,
                bytes_read = self.bytes_read,
                "content closed"
            );
        }
        self.blob = None;
    }
}

impl<B: CapsuleBlob> io::Read for ContentHandle<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ContentHandle::read(self, buf).map_err(io::Error::other)
    }
}

fn read_exact_at<B: CapsuleBlob + ?Sized>(
    blob: &mut B,
    mut offset: u64,
    buf: &mut [u8],
) -> Result<(), CapsuleError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let read = blob.read_at(offset, &mut buf[filled..])?;
        if read == 0 {
            return Err(FormatError::Truncated.into());
        }
        filled += read;
        offset += read as u64;
    }
    Ok(())
}
