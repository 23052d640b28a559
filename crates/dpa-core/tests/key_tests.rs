use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use dpa_core::crypto::keyfile::{
    generate_key, read_master_keyfile, write_master_keyfile, KEYFILE_VERSION,
};
use dpa_core::crypto::wrap::{KeyUnwrap, KeyWrap, MasterKey, PassthroughKey, MASTER_KEY_LEN};
use dpa_core::CryptoError;

fn temp_path(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "dpa-core-{}-{}-{}",
        label,
        std::process::id(),
        nanos
    ))
}

#[test]
fn passthrough_returns_slot_verbatim() {
    let slot = [0x9Cu8; 32];
    let key = PassthroughKey.unwrap_key(&slot).expect("unwrap");
    assert_eq!(*key, slot);
    assert_eq!(PassthroughKey.wrap_key(&slot).expect("wrap"), slot);
}

#[test]
fn master_key_wrap_roundtrip() {
    let master = MasterKey::new(&[0x10u8; MASTER_KEY_LEN]).expect("master");
    let content_key: [u8; 32] = std::array::from_fn(|i| i as u8);

    let wrapped = master.wrap_key(&content_key).expect("wrap");
    assert_ne!(wrapped, content_key);
    assert_ne!(wrapped[..16], wrapped[16..]);

    let unwrapped = master.unwrap_key(&wrapped).expect("unwrap");
    assert_eq!(*unwrapped, content_key);
}

#[test]
fn master_key_with_wrong_key_yields_different_content_key() {
    let right = MasterKey::new(&[0x10u8; MASTER_KEY_LEN]).expect("master");
    let wrong = MasterKey::new(&[0x11u8; MASTER_KEY_LEN]).expect("master");
    let content_key = [0xABu8; 32];

    let wrapped = right.wrap_key(&content_key).expect("wrap");
    let unwrapped = wrong.unwrap_key(&wrapped).expect("unwrap");
    assert_ne!(*unwrapped, content_key);
}

#[test]
fn master_key_rejects_short_key() {
    let err = MasterKey::new(&[0u8; 16]).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
}

#[test]
fn master_key_debug_hides_key() {
    let master = MasterKey::new(&[0x7Fu8; MASTER_KEY_LEN]).expect("master");
    assert_eq!(format!("{master:?}"), "MasterKey(..)");
}

#[test]
fn keyfile_roundtrip() {
    let path = temp_path("keyfile");
    let key = generate_key(MASTER_KEY_LEN);
    write_master_keyfile(&path, key.as_slice(), false).expect("write");

    let parsed = read_master_keyfile(&path).expect("read");
    assert_eq!(parsed.version, KEYFILE_VERSION);
    assert_eq!(parsed.key.as_slice(), key.as_slice());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn keyfile_refuses_overwrite_without_force() {
    let path = temp_path("keyfile-overwrite");
    let key = generate_key(MASTER_KEY_LEN);
    write_master_keyfile(&path, key.as_slice(), false).expect("write");

    let err = write_master_keyfile(&path, key.as_slice(), false).unwrap_err();
    assert!(matches!(err, CryptoError::Io(_)));
    write_master_keyfile(&path, key.as_slice(), true).expect("forced write");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn keyfile_rejects_bad_magic_and_trailing_data() {
    let path = temp_path("keyfile-bad");
    let key = generate_key(MASTER_KEY_LEN);
    write_master_keyfile(&path, key.as_slice(), false).expect("write");

    let mut bytes = std::fs::read(&path).expect("read bytes");
    bytes.push(0);
    std::fs::write(&path, &bytes).expect("append");
    let err = read_master_keyfile(&path).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidKeyFileLength(32)));

    bytes[0] = b'X';
    std::fs::write(&path, &bytes).expect("corrupt");
    let err = read_master_keyfile(&path).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidKeyFileMagic { .. }));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn keyfile_rejects_short_record() {
    let path = temp_path("keyfile-short");
    let key = generate_key(MASTER_KEY_LEN);
    write_master_keyfile(&path, key.as_slice(), false).expect("write");

    let bytes = std::fs::read(&path).expect("read bytes");
    assert_eq!(bytes.len(), 40);
    for len in [0usize, 7, 8, 39] {
        std::fs::write(&path, &bytes[..len]).expect("truncate");
        let err = read_master_keyfile(&path).unwrap_err();
        assert!(matches!(err, CryptoError::TruncatedKeyFile), "len {len}");
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn keyfile_rejects_wrong_declared_length() {
    let path = temp_path("keyfile-len");
    let key = generate_key(MASTER_KEY_LEN);
    write_master_keyfile(&path, key.as_slice(), false).expect("write");

    let mut bytes = std::fs::read(&path).expect("read bytes");
    bytes[6..8].copy_from_slice(&16u16.to_le_bytes());
    std::fs::write(&path, &bytes).expect("rewrite");
    let err = read_master_keyfile(&path).unwrap_err();
    assert!(matches!(err, CryptoError::InvalidKeyFileLength(16)));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn generated_keys_differ() {
    let a = generate_key(MASTER_KEY_LEN);
    let b = generate_key(MASTER_KEY_LEN);
    assert_ne!(a.as_slice(), b.as_slice());
}
