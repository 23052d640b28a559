#![deny(warnings)]
#![deny(clippy::all)]

use std::io::Cursor;

use dpa_core::crypto::wrap::PassthroughKey;
use dpa_format::{write_capsule, CapsuleItem, ContentId, ContentType, MemoryStore};

pub const TEST_CONTENT_KEY: [u8; 32] = [0x5Cu8; 32];
pub const TEST_IV: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
    0xF0,
];
pub const TEST_CAPSULE_ID: &str = "ALBUM_883_MIDNIGHT_ECHOES";

pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn flip_byte(buf: &mut [u8], index: usize) {
    if buf.is_empty() {
        return;
    }

    let idx = index % buf.len();
    buf[idx] ^= 0xFF;
}

pub fn item(content_type: ContentType, id: &str, metadata: u64, data: Vec<u8>) -> CapsuleItem {
    CapsuleItem {
        content_type,
        id: ContentId::new(id).expect("valid content id"),
        metadata,
        size: data.len() as u64,
        reader: Box::new(Cursor::new(data)),
    }
}

/// Capsule bytes under the fixed test key and IV, key stored unwrapped.
pub fn build_capsule(mut items: Vec<CapsuleItem>) -> Vec<u8> {
    let mut out = Vec::new();
    write_capsule(
        &mut out,
        &mut items,
        &TEST_CONTENT_KEY,
        &TEST_IV,
        &PassthroughKey,
    )
    .expect("write capsule");
    out
}

/// One 16-byte audio track, `track_01`, sampled at 96 kHz.
pub fn single_track_capsule() -> Vec<u8> {
    build_capsule(vec![item(
        ContentType::Audio,
        "track_01",
        96_000,
        sample_bytes(16),
    )])
}

/// Audio, tour info and a merch image, in that order.
pub fn multi_content_capsule() -> Vec<u8> {
    build_capsule(vec![
        item(ContentType::Audio, "track_01", 96_000, sample_bytes(1000)),
        item(
            ContentType::TourInfo,
            "tour_2025",
            0,
            b"{\"dates\":[\"2025-06-01\"]}".to_vec(),
        ),
        item(ContentType::MerchImage, "merch_tee_1", 2, sample_bytes(333)),
    ])
}

pub fn store_with(capsule_id: &str, bytes: Vec<u8>) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert(capsule_id, bytes);
    store
}
