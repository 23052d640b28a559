use std::fmt;
use std::io;
use std::str::FromStr;

use thiserror::Error;

pub const CAPSULE_MAGIC: [u8; 4] = *b"DPA2";
pub const CAPSULE_VERSION: u32 = 2;

pub const HEADER_LEN: usize = 64;
pub const MANIFEST_ENTRY_LEN: usize = 64;
pub const CONTENT_ID_SLOT_LEN: usize = 32;
/// Longest identifier a writer may store; the slot keeps room for a NUL.
pub const MAX_CONTENT_ID_LEN: usize = 31;
pub const DEFAULT_MAX_MANIFEST_ENTRIES: u32 = 100;

pub const IV_LEN: usize = 16;
pub const WRAPPED_KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ContentType {
    Unknown = 0,
    Audio = 1,
    VideoLink = 2,
    TourInfo = 3,
    MerchLink = 4,
    MerchImage = 5,
    Signing = 6,
}

impl ContentType {
    /// Values outside the known range decode as `Unknown` so newer writers
    /// can add kinds without breaking older readers.
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => ContentType::Audio,
            2 => ContentType::VideoLink,
            3 => ContentType::TourInfo,
            4 => ContentType::MerchLink,
            5 => ContentType::MerchImage,
            6 => ContentType::Signing,
            _ => ContentType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Unknown => "unknown",
            ContentType::Audio => "audio",
            ContentType::VideoLink => "video-link",
            ContentType::TourInfo => "tour-info",
            ContentType::MerchLink => "merch-link",
            ContentType::MerchImage => "merch-image",
            ContentType::Signing => "signing",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(ContentType::Unknown),
            "audio" => Ok(ContentType::Audio),
            "video-link" => Ok(ContentType::VideoLink),
            "tour-info" => Ok(ContentType::TourInfo),
            "merch-link" => Ok(ContentType::MerchLink),
            "merch-image" => Ok(ContentType::MerchImage),
            "signing" => Ok(ContentType::Signing),
            other => Err(FormatError::UnknownContentType(other.to_string())),
        }
    }
}

/// Identifier held in a manifest entry's 32-byte slot.
///
/// The logical id is the slot prefix up to the first NUL, or the whole slot
/// when a producer filled all 32 bytes. Length is tracked explicitly so a
/// missing terminator can never cause an overrun.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId {
    slot: [u8; CONTENT_ID_SLOT_LEN],
    len: usize,
}

impl ContentId {
    /// Builds an id for writing. Ids must be 1..=31 bytes with no NUL or
    /// control characters.
    pub fn new(id: &str) -> Result<Self, FormatError> {
        let bytes = id.as_bytes();
        if bytes.is_empty()
            || bytes.len() > MAX_CONTENT_ID_LEN
            || id.chars().any(|c| c.is_control())
        {
            return Err(FormatError::InvalidContentId(id.to_string()));
        }

        let mut slot = [0u8; CONTENT_ID_SLOT_LEN];
        slot[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            slot,
            len: bytes.len(),
        })
    }

    pub fn from_slot(slot: [u8; CONTENT_ID_SLOT_LEN]) -> Self {
        let len = slot
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(CONTENT_ID_SLOT_LEN);
        let mut clean = [0u8; CONTENT_ID_SLOT_LEN];
        clean[..len].copy_from_slice(&slot[..len]);
        Self { slot: clean, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.slot[..self.len]
    }

    /// Zero-padded slot as stored on disk.
    pub fn to_slot(&self) -> [u8; CONTENT_ID_SLOT_LEN] {
        self.slot
    }

    pub fn matches(&self, id: &[u8]) -> bool {
        self.as_bytes() == id
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleHeader {
    pub version: u32,
    pub iv: [u8; IV_LEN],
    pub wrapped_key: [u8; WRAPPED_KEY_LEN],
    pub manifest_entry_count: u32,
    pub reserved: u32,
}

impl CapsuleHeader {
    pub fn new(
        iv: [u8; IV_LEN],
        wrapped_key: [u8; WRAPPED_KEY_LEN],
        manifest_entry_count: u32,
    ) -> Self {
        Self {
            version: CAPSULE_VERSION,
            iv,
            wrapped_key,
            manifest_entry_count,
            reserved: 0,
        }
    }

    pub fn manifest_len(&self) -> u64 {
        self.manifest_entry_count as u64 * MANIFEST_ENTRY_LEN as u64
    }

    /// Absolute file offset of the first data region byte.
    pub fn data_start(&self) -> u64 {
        HEADER_LEN as u64 + self.manifest_len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestEntry {
    pub content_type: ContentType,
    pub flags: u32,
    pub id: ContentId,
    /// Relative to the start of the data region.
    pub offset: u64,
    pub size: u64,
    pub metadata: u64,
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("truncated input")]
    Truncated,
    #[error("invalid magic")]
    InvalidMagic { found: [u8; 4] },
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("invalid manifest entry count: {found} (allowed 1..={max})")]
    InvalidEntryCount { found: u32, max: u32 },
    #[error("invalid manifest length: {found}, expected {expected}")]
    InvalidManifestLength { found: usize, expected: usize },
    #[error("manifest ends at {manifest_end} but capsule is {file_len} bytes")]
    ManifestPastEnd { manifest_end: u64, file_len: u64 },
    #[error("entry {index} ends at {end} but data region is {data_len} bytes")]
    EntryPastEnd { index: u32, end: u64, data_len: u64 },
    #[error("entry {index} offset overflow")]
    EntryOverflow { index: u32 },
    #[error("invalid content id: {0:?}")]
    InvalidContentId(String),
    #[error("duplicate content id: {0:?}")]
    DuplicateContentId(String),
    #[error("unknown content type: {0:?}")]
    UnknownContentType(String),
}

pub fn encode_header(header: &CapsuleHeader) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];

    buf[0..4].copy_from_slice(&CAPSULE_MAGIC);
    buf[4..8].copy_from_slice(&header.version.to_le_bytes());
    buf[8..24].copy_from_slice(&header.iv);
    buf[24..56].copy_from_slice(&header.wrapped_key);
    buf[56..60].copy_from_slice(&header.manifest_entry_count.to_le_bytes());
    // reserved stays zero

    buf
}

/// Decodes the first 64 bytes of `buf`. Only the magic is checked here;
/// version, reserved and entry count are policy for the caller.
pub fn decode_header(buf: &[u8]) -> Result<CapsuleHeader, FormatError> {
    if buf.len() < HEADER_LEN {
        return Err(FormatError::Truncated);
    }

    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != CAPSULE_MAGIC {
        return Err(FormatError::InvalidMagic { found: magic });
    }

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&buf[8..24]);
    let mut wrapped_key = [0u8; WRAPPED_KEY_LEN];
    wrapped_key.copy_from_slice(&buf[24..56]);

    Ok(CapsuleHeader {
        version: le_u32(buf, 4),
        iv,
        wrapped_key,
        manifest_entry_count: le_u32(buf, 56),
        reserved: le_u32(buf, 60),
    })
}

pub fn encode_manifest_entry(entry: &ManifestEntry) -> [u8; MANIFEST_ENTRY_LEN] {
    let mut buf = [0u8; MANIFEST_ENTRY_LEN];

    buf[0..4].copy_from_slice(&(entry.content_type as u32).to_le_bytes());
    buf[4..8].copy_from_slice(&entry.flags.to_le_bytes());
    buf[8..40].copy_from_slice(&entry.id.to_slot());
    buf[40..48].copy_from_slice(&entry.offset.to_le_bytes());
    buf[48..56].copy_from_slice(&entry.size.to_le_bytes());
    buf[56..64].copy_from_slice(&entry.metadata.to_le_bytes());

    buf
}

pub fn decode_manifest_entry(buf: &[u8; MANIFEST_ENTRY_LEN]) -> ManifestEntry {
    let mut slot = [0u8; CONTENT_ID_SLOT_LEN];
    slot.copy_from_slice(&buf[8..40]);

    ManifestEntry {
        content_type: ContentType::from_u32(le_u32(buf, 0)),
        flags: le_u32(buf, 4),
        id: ContentId::from_slot(slot),
        offset: le_u64(buf, 40),
        size: le_u64(buf, 48),
        metadata: le_u64(buf, 56),
    }
}

pub fn encode_manifest(entries: &[ManifestEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * MANIFEST_ENTRY_LEN);
    for entry in entries {
        buf.extend_from_slice(&encode_manifest_entry(entry));
    }
    buf
}

/// Decodes `count` entries from plaintext manifest bytes. `buf` must hold
/// exactly `count * 64` bytes.
pub fn decode_manifest(buf: &[u8], count: u32) -> Result<Vec<ManifestEntry>, FormatError> {
    let expected = (count as usize)
        .checked_mul(MANIFEST_ENTRY_LEN)
        .ok_or(FormatError::InvalidManifestLength {
            found: buf.len(),
            expected: usize::MAX,
        })?;

    if buf.len() < expected {
        return Err(FormatError::Truncated);
    }
    if buf.len() != expected {
        return Err(FormatError::InvalidManifestLength {
            found: buf.len(),
            expected,
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    for chunk in buf.chunks_exact(MANIFEST_ENTRY_LEN) {
        let mut entry_buf = [0u8; MANIFEST_ENTRY_LEN];
        entry_buf.copy_from_slice(chunk);
        entries.push(decode_manifest_entry(&entry_buf));
    }
    Ok(entries)
}

/// Byte-exact, case-sensitive lookup. The first entry wins when ids repeat.
/// Needles longer than a slot can never match.
pub fn find_by_id<'a>(
    entries: &'a [ManifestEntry],
    id: &[u8],
) -> Option<(usize, &'a ManifestEntry)> {
    if id.len() > CONTENT_ID_SLOT_LEN {
        return None;
    }
    entries
        .iter()
        .enumerate()
        .find(|(_, entry)| entry.id.matches(id))
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes([
        buf[at],
        buf[at + 1],
        buf[at + 2],
        buf[at + 3],
        buf[at + 4],
        buf[at + 5],
        buf[at + 6],
        buf[at + 7],
    ])
}
