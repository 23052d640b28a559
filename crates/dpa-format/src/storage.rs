//! Byte-addressable capsule storage.
//!
//! The reader only needs to open a capsule by id, learn its size, and issue
//! positioned reads. Dropping a blob closes it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub const CAPSULE_EXTENSION: &str = "dpa";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("capsule not found: {0}")]
    NotFound(String),
    #[error("invalid capsule id: {0:?}")]
    InvalidCapsuleId(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub trait CapsuleStore {
    type Blob: CapsuleBlob;

    fn open(&self, capsule_id: &str) -> Result<Self::Blob, StorageError>;
}

pub trait CapsuleBlob {
    fn size(&self) -> Result<u64, StorageError>;

    /// Reads up to `buf.len()` bytes starting at `offset`. Returns 0 only at
    /// end of blob.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;
}

/// Rejects ids that could escape the storage root.
pub fn validate_capsule_id(capsule_id: &str) -> Result<(), StorageError> {
    let bad = capsule_id.is_empty()
        || capsule_id == "."
        || capsule_id == ".."
        || capsule_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(StorageError::InvalidCapsuleId(capsule_id.to_string()));
    }
    Ok(())
}

/// Capsules stored as `<root>/<capsule_id>.dpa`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capsule_path(&self, capsule_id: &str) -> Result<PathBuf, StorageError> {
        validate_capsule_id(capsule_id)?;
        Ok(self.root.join(format!("{capsule_id}.{CAPSULE_EXTENSION}")))
    }
}

impl CapsuleStore for DirStore {
    type Blob = FileBlob;

    fn open(&self, capsule_id: &str) -> Result<FileBlob, StorageError> {
        let path = self.capsule_path(capsule_id)?;
        match File::open(&path) {
            Ok(file) => Ok(FileBlob::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(capsule_id.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

#[derive(Debug)]
pub struct FileBlob {
    file: File,
    cursor: Option<u64>,
}

impl FileBlob {
    pub fn new(file: File) -> Self {
        Self { file, cursor: None }
    }
}

impl CapsuleBlob for FileBlob {
    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        // Sequential reads continue from the current position without a seek.
        if self.cursor != Some(offset) {
            self.cursor = None;
            self.file.seek(SeekFrom::Start(offset))?;
        }
        let read = match self.file.read(buf) {
            Ok(read) => read,
            Err(err) => {
                self.cursor = None;
                return Err(StorageError::Io(err));
            }
        };
        self.cursor = Some(offset + read as u64);
        Ok(read)
    }
}

/// In-memory capsules, shared between blobs without copying.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    capsules: HashMap<String, Arc<[u8]>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capsule_id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.capsules.insert(capsule_id.into(), bytes.into());
    }

    pub fn remove(&mut self, capsule_id: &str) -> bool {
        self.capsules.remove(capsule_id).is_some()
    }
}

impl CapsuleStore for MemoryStore {
    type Blob = MemoryBlob;

    fn open(&self, capsule_id: &str) -> Result<MemoryBlob, StorageError> {
        validate_capsule_id(capsule_id)?;
        self.capsules
            .get(capsule_id)
            .map(|data| MemoryBlob { data: data.clone() })
            .ok_or_else(|| StorageError::NotFound(capsule_id.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct MemoryBlob {
    data: Arc<[u8]>,
}

impl CapsuleBlob for MemoryBlob {
    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = std::cmp::min(buf.len(), self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}
