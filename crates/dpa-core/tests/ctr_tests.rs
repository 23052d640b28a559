use dpa_core::crypto::ctr::{CtrSession, BLOCK_LEN, CONTENT_KEY_LEN, IV_LEN};
use dpa_core::CryptoError;

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("hex"))
        .collect()
}

fn keystream_input(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[test]
fn nist_sp800_38a_ctr_aes256_vector() {
    let key = hex("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4");
    let iv = hex("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff");
    let mut data = hex(concat!(
        "6bc1bee22e409f96e93d7e117393172a",
        "ae2d8a571e03ac9c9eb76fac45af8e51",
        "30c81c46a35ce411e5fbc1191a0a52ef",
        "f69f2445df4f9b17ad2b417be66c3710",
    ));
    let expected = hex(concat!(
        "601ec313775789a5b7a7f504bbf3d228",
        "f443e3ca4d62b59aca84e990cacaf5c5",
        "2b0930daa23de94ce87017ba2d84988d",
        "dfc9c58db67aada613c2dd08457941a6",
    ));

    let mut session = CtrSession::new(&key, &iv).expect("session");
    session.apply_keystream(&mut data);

    assert_eq!(data, expected);
    assert_eq!(session.position(), 64);
}

#[test]
fn chunked_application_matches_single_pass() {
    let key = [0x42u8; CONTENT_KEY_LEN];
    let iv = [0x07u8; IV_LEN];
    let original = keystream_input(200);

    let mut whole = original.clone();
    CtrSession::new(&key, &iv)
        .expect("session")
        .apply_keystream(&mut whole);

    let mut chunked = original.clone();
    let mut session = CtrSession::new(&key, &iv).expect("session");
    let mut start = 0usize;
    for len in [1usize, 15, 3, 16, 17, 31, 100, 17] {
        let end = std::cmp::min(start + len, chunked.len());
        session.apply_keystream(&mut chunked[start..end]);
        start = end;
    }

    assert_eq!(start, original.len());
    assert_eq!(chunked, whole);
}

#[test]
fn seek_matches_sequential_stream_at_unaligned_offset() {
    let key = [0x5Au8; CONTENT_KEY_LEN];
    let iv = [0xFFu8; IV_LEN];
    let original = keystream_input(96);

    let mut whole = original.clone();
    CtrSession::new(&key, &iv)
        .expect("session")
        .apply_keystream(&mut whole);

    for offset in [0usize, 1, 15, 16, 37, 64] {
        let mut tail = original[offset..].to_vec();
        let mut session = CtrSession::new(&key, &iv).expect("session");
        session.seek(offset as u64);
        session.apply_keystream(&mut tail);
        assert_eq!(tail, whole[offset..], "offset {offset}");
    }
}

#[test]
fn counter_wraps_at_128_bits() {
    let key = [0x01u8; CONTENT_KEY_LEN];
    let iv = [0xFFu8; IV_LEN];

    let mut across = vec![0u8; 2 * BLOCK_LEN];
    CtrSession::new(&key, &iv)
        .expect("session")
        .apply_keystream(&mut across);

    let mut from_zero = vec![0u8; BLOCK_LEN];
    CtrSession::new(&key, &[0u8; IV_LEN])
        .expect("session")
        .apply_keystream(&mut from_zero);

    assert_eq!(across[BLOCK_LEN..], from_zero[..]);
}

#[test]
fn reused_session_does_not_repeat_keystream() {
    let key = [0x33u8; CONTENT_KEY_LEN];
    let iv = [0x44u8; IV_LEN];
    let ciphertext = keystream_input(32);

    let mut session = CtrSession::new(&key, &iv).expect("session");
    let mut first = ciphertext.clone();
    session.apply_keystream(&mut first);
    let mut second = ciphertext.clone();
    session.apply_keystream(&mut second);

    assert_ne!(first, second);
}

#[test]
fn rejects_bad_key_and_iv_lengths() {
    let err = CtrSession::new(&[0u8; 16], &[0u8; IV_LEN]).unwrap_err();
    assert!(matches!(
        err,
        CryptoError::InvalidKeyLength {
            expected: 32,
            found: 16
        }
    ));

    let err = CtrSession::new(&[0u8; CONTENT_KEY_LEN], &[0u8; 12]).unwrap_err();
    assert!(matches!(
        err,
        CryptoError::InvalidIvLength {
            expected: 16,
            found: 12
        }
    ));
}
