#![deny(warnings)]
#![deny(clippy::all)]

pub mod capsule;
pub mod reader;
pub mod storage;
pub mod validate;
pub mod writer;

pub use capsule::{
    decode_header, decode_manifest, decode_manifest_entry, encode_header, encode_manifest,
    encode_manifest_entry, find_by_id, CapsuleHeader, ContentId, ContentType, FormatError,
    ManifestEntry, CAPSULE_MAGIC, CAPSULE_VERSION, CONTENT_ID_SLOT_LEN,
    DEFAULT_MAX_MANIFEST_ENTRIES, HEADER_LEN, MANIFEST_ENTRY_LEN, MAX_CONTENT_ID_LEN,
};
pub use reader::{
    open_content, read_manifest, CapsuleError, CapsuleManifest, ContentHandle, ReaderOptions,
};
pub use storage::{
    validate_capsule_id, CapsuleBlob, CapsuleStore, DirStore, FileBlob, MemoryBlob, MemoryStore,
    StorageError,
};
pub use writer::{write_capsule, write_capsule_random, CapsuleItem, WrittenCapsule};
