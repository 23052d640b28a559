use std::collections::HashSet;
use std::io::{self, Read, Write};

use dpa_core::crypto::ctr::{CONTENT_KEY_LEN, IV_LEN};
use dpa_core::crypto::wrap::KeyWrap;
use dpa_core::io_ext::copy_exact_with;
use dpa_core::CtrSession;
use rand_core::{OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::capsule::{
    encode_header, encode_manifest, CapsuleHeader, ContentId, ContentType, FormatError,
    ManifestEntry, DEFAULT_MAX_MANIFEST_ENTRIES,
};
use crate::reader::CapsuleError;

pub struct CapsuleItem {
    pub content_type: ContentType,
    pub id: ContentId,
    pub metadata: u64,
    pub size: u64,
    pub reader: Box<dyn Read>,
}

#[derive(Debug, Clone)]
pub struct WrittenCapsule {
    pub header: CapsuleHeader,
    pub entries: Vec<ManifestEntry>,
}

impl WrittenCapsule {
    pub fn total_len(&self) -> u64 {
        let data_len: u64 = self.entries.iter().map(|entry| entry.size).sum();
        self.header.data_start() + data_len
    }
}

/// Writes header, manifest, then item payloads in order.
///
/// Item offsets are assigned contiguously from the start of the data
/// region. Everything after the header is encrypted as one continuous
/// keystream starting at the first manifest byte.
pub fn write_capsule<W: Write>(
    writer: &mut W,
    items: &mut [CapsuleItem],
    content_key: &[u8; CONTENT_KEY_LEN],
    iv: &[u8; IV_LEN],
    wrapper: &dyn KeyWrap,
) -> Result<WrittenCapsule, CapsuleError> {
    let entries = layout_entries(items)?;
    let wrapped_key = wrapper.wrap_key(content_key)?;
    let header = CapsuleHeader::new(*iv, wrapped_key, entries.len() as u32);

    writer.write_all(&encode_header(&header)).map_err(map_io)?;

    let mut session = CtrSession::new(content_key, iv)?;
    let mut manifest = encode_manifest(&entries);
    session.apply_keystream(&mut manifest);
    writer.write_all(&manifest).map_err(map_io)?;

    for item in items.iter_mut() {
        copy_exact_with(&mut item.reader, &mut *writer, item.size, |buf| {
            session.apply_keystream(buf)
        })
        .map_err(map_io)?;
    }
    writer.flush().map_err(map_io)?;

    debug!(
        entries = entries.len(),
        data_start = header.data_start(),
        "capsule written"
    );

    Ok(WrittenCapsule { header, entries })
}

/// Like [`write_capsule`] with a fresh content key and IV from the OS RNG.
pub fn write_capsule_random<W: Write>(
    writer: &mut W,
    items: &mut [CapsuleItem],
    wrapper: &dyn KeyWrap,
) -> Result<WrittenCapsule, CapsuleError> {
    let mut content_key = Zeroizing::new([0u8; CONTENT_KEY_LEN]);
    OsRng.fill_bytes(content_key.as_mut_slice());
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    write_capsule(writer, items, &content_key, &iv, wrapper)
}

fn layout_entries(items: &[CapsuleItem]) -> Result<Vec<ManifestEntry>, FormatError> {
    if items.is_empty() || items.len() > DEFAULT_MAX_MANIFEST_ENTRIES as usize {
        return Err(FormatError::InvalidEntryCount {
            found: u32::try_from(items.len()).unwrap_or(u32::MAX),
            max: DEFAULT_MAX_MANIFEST_ENTRIES,
        });
    }

    let mut seen = HashSet::with_capacity(items.len());
    let mut entries = Vec::with_capacity(items.len());
    let mut offset = 0u64;

    for (index, item) in items.iter().enumerate() {
        if !seen.insert(item.id) {
            return Err(FormatError::DuplicateContentId(item.id.to_string()));
        }

        let next_offset = offset
            .checked_add(item.size)
            .ok_or(FormatError::EntryOverflow {
                index: index as u32,
            })?;

        entries.push(ManifestEntry {
            content_type: item.content_type,
            flags: 0,
            id: item.id,
            offset,
            size: item.size,
            metadata: item.metadata,
        });

        offset = next_offset;
    }

    Ok(entries)
}

fn map_io(err: io::Error) -> CapsuleError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        FormatError::Truncated.into()
    } else {
        FormatError::Io(err).into()
    }
}
