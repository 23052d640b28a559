use tracing::warn;

use crate::capsule::{CapsuleHeader, FormatError, ManifestEntry, CAPSULE_VERSION};
use crate::reader::ReaderOptions;

pub fn validate_header(header: &CapsuleHeader, options: &ReaderOptions) -> Result<(), FormatError> {
    if header.manifest_entry_count == 0
        || header.manifest_entry_count > options.max_manifest_entries
    {
        return Err(FormatError::InvalidEntryCount {
            found: header.manifest_entry_count,
            max: options.max_manifest_entries,
        });
    }

    if header.version != CAPSULE_VERSION {
        if options.strict_version {
            return Err(FormatError::UnsupportedVersion(header.version));
        }
        warn!(
            version = header.version,
            expected = CAPSULE_VERSION,
            "capsule version mismatch, reading with v2 layout"
        );
    }

    if header.reserved != 0 {
        warn!(
            reserved = header.reserved,
            "capsule header reserved field is non-zero"
        );
    }

    Ok(())
}

/// Checks the manifest fits inside a capsule of `file_len` bytes and returns
/// the data region length.
pub fn validate_layout(header: &CapsuleHeader, file_len: u64) -> Result<u64, FormatError> {
    let manifest_end = header.data_start();
    if manifest_end > file_len {
        return Err(FormatError::ManifestPastEnd {
            manifest_end,
            file_len,
        });
    }

    Ok(file_len - manifest_end)
}

/// Checks one entry lies within the data region and returns its end offset
/// relative to the region.
pub fn validate_entry(
    index: usize,
    entry: &ManifestEntry,
    data_len: u64,
) -> Result<u64, FormatError> {
    let index = index as u32;
    let end = entry
        .offset
        .checked_add(entry.size)
        .ok_or(FormatError::EntryOverflow { index })?;

    if end > data_len {
        return Err(FormatError::EntryPastEnd {
            index,
            end,
            data_len,
        });
    }

    if entry.flags != 0 {
        warn!(
            index,
            id = %entry.id,
            flags = entry.flags,
            "manifest entry flags are non-zero"
        );
    }

    Ok(end)
}

pub fn validate_entries(entries: &[ManifestEntry], data_len: u64) -> Result<(), FormatError> {
    for (index, entry) in entries.iter().enumerate() {
        validate_entry(index, entry, data_len)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::{ContentId, ContentType, HEADER_LEN, MANIFEST_ENTRY_LEN};

    fn header(count: u32) -> CapsuleHeader {
        CapsuleHeader::new([0u8; 16], [0u8; 32], count)
    }

    fn entry(offset: u64, size: u64) -> ManifestEntry {
        ManifestEntry {
            content_type: ContentType::Audio,
            flags: 0,
            id: ContentId::new("track_01").unwrap(),
            offset,
            size,
            metadata: 0,
        }
    }

    #[test]
    fn entry_count_bounds() {
        let options = ReaderOptions::default();
        assert!(matches!(
            validate_header(&header(0), &options),
            Err(FormatError::InvalidEntryCount { found: 0, .. })
        ));
        assert!(matches!(
            validate_header(&header(101), &options),
            Err(FormatError::InvalidEntryCount { found: 101, max: 100 })
        ));
        assert!(validate_header(&header(100), &options).is_ok());
    }

    #[test]
    fn version_mismatch_is_warning_unless_strict() {
        let mut h = header(1);
        h.version = 3;
        assert!(validate_header(&h, &ReaderOptions::default()).is_ok());

        let strict = ReaderOptions {
            strict_version: true,
            ..ReaderOptions::default()
        };
        assert!(matches!(
            validate_header(&h, &strict),
            Err(FormatError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn nonzero_reserved_is_tolerated() {
        let mut h = header(1);
        h.reserved = 0xDEAD_BEEF;
        assert!(validate_header(&h, &ReaderOptions::default()).is_ok());
    }

    #[test]
    fn layout_rejects_manifest_past_end() {
        let h = header(2);
        let needed = (HEADER_LEN + 2 * MANIFEST_ENTRY_LEN) as u64;
        assert_eq!(validate_layout(&h, needed).unwrap(), 0);
        assert_eq!(validate_layout(&h, needed + 5).unwrap(), 5);
        assert!(matches!(
            validate_layout(&h, needed - 1),
            Err(FormatError::ManifestPastEnd { .. })
        ));
    }

    #[test]
    fn entry_bounds() {
        assert_eq!(validate_entry(0, &entry(4, 12), 16).unwrap(), 16);
        assert!(matches!(
            validate_entry(1, &entry(4, 13), 16),
            Err(FormatError::EntryPastEnd { index: 1, end: 17, data_len: 16 })
        ));
        assert!(matches!(
            validate_entry(2, &entry(u64::MAX, 1), u64::MAX),
            Err(FormatError::EntryOverflow { index: 2 })
        ));
    }
}
