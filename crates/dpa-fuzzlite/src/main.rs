use std::env;

use dpa_core::crypto::wrap::{KeyUnwrap, MasterKey, PassthroughKey};
use dpa_core::CtrSession;
use dpa_format::{
    decode_header, decode_manifest, open_content, read_manifest, write_capsule_random, CapsuleError,
    ContentType, MemoryStore, ReaderOptions, CAPSULE_MAGIC, CAPSULE_VERSION, CONTENT_ID_SLOT_LEN,
    HEADER_LEN, MANIFEST_ENTRY_LEN,
};
use dpa_testkit::{build_capsule, item, multi_content_capsule, single_track_capsule};

const DEFAULT_ITERS: u64 = 200;
const DEFAULT_MAX_LEN: usize = 4096;
const DEFAULT_SEED: u64 = 0xD1A5_0883_5EED_0002;
const CAPSULE_ID: &str = "FUZZ";
const MASTER_KEY: [u8; 32] = [0x7Eu8; 32];

const ENTRY_TYPE_OFFSET: usize = 0;
const ENTRY_FLAGS_OFFSET: usize = 4;
const ENTRY_ID_OFFSET: usize = 8;
const ENTRY_OFFSET_OFFSET: usize = 40;
const ENTRY_SIZE_OFFSET: usize = 48;
const ENTRY_METADATA_OFFSET: usize = 56;

fn main() {
    let args: Vec<String> = env::args().collect();
    let iters = parse_arg(&args, "--iters")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_ITERS);
    let max_len = parse_arg(&args, "--max-len")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_LEN);
    let seed = env::var("DPA_FUZZ_SEED")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_SEED);

    let seeds = build_seeds();
    exercise_valid_seeds(&seeds);
    check_random_keys_differ();

    let mut rng = XorShift64::new(seed);
    let mut stats = FuzzStats::default();

    for _ in 0..iters {
        let case = if rng.next_u64() % 100 < 70 {
            mutate_seed(&mut rng, &seeds, max_len)
        } else {
            random_case(&mut rng, max_len)
        };

        run_case(&mut stats, &case);
    }

    println!(
        "fuzz-lite completed: {} iterations (headers ok: {}, manifests ok: {}, opens ok: {}, bytes read: {})",
        iters, stats.header_ok, stats.manifest_ok, stats.open_ok, stats.bytes_read
    );
}

fn parse_arg<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == name)
        .and_then(|idx| args.get(idx + 1))
        .map(|s| s.as_str())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum KeyMode {
    Passthrough,
    Master,
}

struct SeedCase {
    bytes: Vec<u8>,
    mode: KeyMode,
}

#[derive(Default)]
struct FuzzStats {
    header_ok: u64,
    manifest_ok: u64,
    open_ok: u64,
    bytes_read: u64,
}

struct FuzzCase {
    bytes: Vec<u8>,
    mode: KeyMode,
}

fn build_seeds() -> Vec<SeedCase> {
    let mut seeds = vec![
        SeedCase {
            bytes: Vec::new(),
            mode: KeyMode::Passthrough,
        },
        SeedCase {
            bytes: single_track_capsule(),
            mode: KeyMode::Passthrough,
        },
        SeedCase {
            bytes: multi_content_capsule(),
            mode: KeyMode::Passthrough,
        },
        SeedCase {
            bytes: build_capsule(vec![
                item(ContentType::Signing, "sig", 0, Vec::new()),
                item(ContentType::VideoLink, "video", 1, b"https://v".to_vec()),
                item(
                    ContentType::MerchLink,
                    "0123456789012345678901234567890",
                    u64::MAX,
                    vec![0xEEu8; 40],
                ),
            ]),
            mode: KeyMode::Passthrough,
        },
    ];

    if let Ok(bytes) = build_master_capsule() {
        seeds.push(SeedCase {
            bytes,
            mode: KeyMode::Master,
        });
    }

    seeds
}

fn build_master_capsule() -> Result<Vec<u8>, CapsuleError> {
    let master = MasterKey::new(&MASTER_KEY)?;
    let mut items = vec![
        item(ContentType::Audio, "track_01", 44_100, vec![0xABu8; 200]),
        item(ContentType::MerchImage, "tee", 3, vec![0xCDu8; 33]),
    ];
    let mut out = Vec::new();
    write_capsule_random(&mut out, &mut items, &master)?;
    Ok(out)
}

fn exercise_valid_seeds(seeds: &[SeedCase]) {
    let options = ReaderOptions::default();
    for seed in seeds.iter().filter(|seed| !seed.bytes.is_empty()) {
        let store = store_for(&seed.bytes);
        let key = unwrapper(seed.mode);
        let manifest = match read_manifest(&store, CAPSULE_ID, key.as_ref(), &options) {
            Ok(manifest) => manifest,
            Err(err) => fail(&format!("valid seed rejected: {err}")),
        };
        for entry in &manifest.entries {
            let id = entry.id.to_string();
            match open_content(&store, CAPSULE_ID, &id, key.as_ref(), &options) {
                Ok(mut handle) => {
                    let read = drain(&mut handle, 7);
                    if read != entry.size {
                        fail(&format!("seed entry {id} read {read} of {}", entry.size));
                    }
                }
                Err(err) => fail(&format!("seed entry {id} failed to open: {err}")),
            }
        }
    }
}

fn check_random_keys_differ() {
    let mut first = Vec::new();
    let mut second = Vec::new();
    for out in [&mut first, &mut second] {
        let mut items = vec![item(ContentType::Audio, "a", 0, vec![0u8; 16])];
        if let Err(err) = write_capsule_random(out, &mut items, &PassthroughKey) {
            fail(&format!("random capsule write failed: {err}"));
        }
    }

    let (Ok(header_a), Ok(header_b)) = (decode_header(&first), decode_header(&second)) else {
        fail("random capsule header unreadable");
    };
    if header_a.iv == header_b.iv || header_a.wrapped_key == header_b.wrapped_key {
        fail("repeated content key or IV detected");
    }
}

fn mutate_seed(rng: &mut XorShift64, seeds: &[SeedCase], max_len: usize) -> FuzzCase {
    let seed = &seeds[(rng.next_u64() as usize) % seeds.len()];
    let mut bytes = seed.bytes.clone();
    mutate_bytes(rng, &mut bytes, max_len, seed.mode);
    if rng.next_u64() % 100 < 20 {
        splice_with_seed(rng, &mut bytes, seeds, max_len);
    }
    FuzzCase {
        bytes,
        mode: seed.mode,
    }
}

fn random_case(rng: &mut XorShift64, max_len: usize) -> FuzzCase {
    let len = (rng.next_u64() as usize) % (max_len + 1);
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    if bytes.len() >= HEADER_LEN && rng.next_u64() % 2 == 0 {
        bytes[0..4].copy_from_slice(&CAPSULE_MAGIC);
        write_u32(&mut bytes, 4, CAPSULE_VERSION);
        let max_entries = ((bytes.len() - HEADER_LEN) / MANIFEST_ENTRY_LEN) as u64;
        let count = (rng.next_u64() % (max_entries + 2)) as u32;
        write_u32(&mut bytes, 56, count);
    }
    let mode = if rng.next_u64() % 2 == 0 {
        KeyMode::Passthrough
    } else {
        KeyMode::Master
    };
    mutate_bytes(rng, &mut bytes, max_len, mode);
    FuzzCase { bytes, mode }
}

fn run_case(stats: &mut FuzzStats, case: &FuzzCase) {
    let header = match decode_header(&case.bytes) {
        Ok(header) => header,
        Err(_) => {
            // Still drive the reader so error paths are covered end to end.
            let store = store_for(&case.bytes);
            let key = unwrapper(case.mode);
            if open_content(
                &store,
                CAPSULE_ID,
                "track_01",
                key.as_ref(),
                &ReaderOptions::default(),
            )
            .is_ok()
            {
                fail("reader accepted a capsule whose header does not decode");
            }
            return;
        }
    };
    stats.header_ok += 1;

    let manifest_bytes = case.bytes.get(HEADER_LEN..).unwrap_or(&[]);
    let count = header.manifest_entry_count.min(1024);
    let _ = decode_manifest(manifest_bytes, count);

    let store = store_for(&case.bytes);
    let key = unwrapper(case.mode);
    let options = ReaderOptions::default();
    let manifest = read_manifest(&store, CAPSULE_ID, key.as_ref(), &options).ok();
    if manifest.is_some() {
        stats.manifest_ok += 1;
    }

    let ids: Vec<String> = match manifest.as_ref() {
        Some(manifest) => manifest.entries.iter().map(|e| e.id.to_string()).collect(),
        None => vec!["track_01".to_string(), "tour_2025".to_string()],
    };

    let data_len = case.bytes.len() as u64;
    for id in ids {
        let mut handle = match open_content(&store, CAPSULE_ID, &id, key.as_ref(), &options) {
            Ok(handle) => handle,
            Err(_) => continue,
        };
        stats.open_ok += 1;

        let size = handle.entry().size;
        if size > data_len {
            fail(&format!("opened entry {id} larger than capsule ({size} > {data_len})"));
        }
        let chunk = 1 + (header.manifest_entry_count as usize % 61);
        let read = drain(&mut handle, chunk);
        if read > size {
            fail(&format!("read {read} bytes from entry {id} of size {size}"));
        }
        stats.bytes_read += read;

        handle.close();
        let mut buf = [0u8; 4];
        if !matches!(handle.read(&mut buf), Err(CapsuleError::HandleClosed)) {
            fail("read after close did not report a closed handle");
        }
    }
}

fn drain(handle: &mut dpa_format::ContentHandle<dpa_format::MemoryBlob>, chunk: usize) -> u64 {
    let mut buf = vec![0u8; chunk.max(1)];
    let mut total = 0u64;
    while let Ok(read) = handle.read(&mut buf) {
        if read == 0 {
            break;
        }
        total += read as u64;
    }
    total
}

fn store_for(bytes: &[u8]) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert(CAPSULE_ID, bytes.to_vec());
    store
}

fn unwrapper(mode: KeyMode) -> Box<dyn KeyUnwrap> {
    match mode {
        KeyMode::Passthrough => Box::new(PassthroughKey),
        KeyMode::Master => match MasterKey::new(&MASTER_KEY) {
            Ok(key) => Box::new(key),
            Err(err) => fail(&format!("master key rejected: {err}")),
        },
    }
}

fn fail(message: &str) -> ! {
    eprintln!("fuzz-lite: {message}");
    std::process::exit(1);
}

fn mutate_bytes(rng: &mut XorShift64, bytes: &mut Vec<u8>, max_len: usize, mode: KeyMode) {
    if bytes.is_empty() && max_len > 0 {
        bytes.push(0);
    }

    let mutations = 1 + (rng.next_u64() % 6) as usize;
    for _ in 0..mutations {
        match rng.next_u64() % 9 {
            0 => flip_byte(rng, bytes),
            1 => insert_byte(rng, bytes, max_len),
            2 => delete_byte(rng, bytes),
            3 => truncate_bytes(rng, bytes),
            4 => overwrite_range(rng, bytes),
            5 => structured_header_tweak(rng, bytes),
            6 | 7 if mode == KeyMode::Passthrough => structured_manifest_tweak(rng, bytes),
            6 => flip_byte(rng, bytes),
            _ => swap_ranges(rng, bytes),
        }
    }
}

fn flip_byte(rng: &mut XorShift64, bytes: &mut [u8]) {
    if bytes.is_empty() {
        return;
    }
    let idx = (rng.next_u64() as usize) % bytes.len();
    bytes[idx] ^= (rng.next_u64() as u8) | 1;
}

fn insert_byte(rng: &mut XorShift64, bytes: &mut Vec<u8>, max_len: usize) {
    if bytes.len() >= max_len {
        return;
    }
    let idx = (rng.next_u64() as usize) % (bytes.len() + 1);
    let value = rng.next_u64() as u8;
    bytes.insert(idx, value);
}

fn delete_byte(rng: &mut XorShift64, bytes: &mut Vec<u8>) {
    if bytes.is_empty() {
        return;
    }
    let idx = (rng.next_u64() as usize) % bytes.len();
    bytes.remove(idx);
}

fn truncate_bytes(rng: &mut XorShift64, bytes: &mut Vec<u8>) {
    if bytes.is_empty() {
        return;
    }
    let new_len = (rng.next_u64() as usize) % (bytes.len() + 1);
    bytes.truncate(new_len);
}

fn overwrite_range(rng: &mut XorShift64, bytes: &mut [u8]) {
    if bytes.is_empty() {
        return;
    }
    let start = (rng.next_u64() as usize) % bytes.len();
    let len = ((rng.next_u64() as usize) % 8).max(1);
    let end = std::cmp::min(start + len, bytes.len());
    rng.fill_bytes(&mut bytes[start..end]);
}

fn structured_header_tweak(rng: &mut XorShift64, bytes: &mut [u8]) {
    if bytes.len() < HEADER_LEN {
        return;
    }
    match rng.next_u64() % 6 {
        0 => bytes[0..4].copy_from_slice(&CAPSULE_MAGIC),
        1 => {
            let version = match rng.next_u64() % 3 {
                0 => CAPSULE_VERSION,
                1 => CAPSULE_VERSION + 1,
                _ => rng.next_u64() as u32,
            };
            write_u32(bytes, 4, version);
        }
        2 => {
            let count = match rng.next_u64() % 5 {
                0 => 0,
                1 => 1,
                2 => 100,
                3 => 101,
                _ => rng.next_u64() as u32,
            };
            write_u32(bytes, 56, count);
        }
        3 => write_u32(bytes, 60, rng.next_u64() as u32),
        4 => rng.fill_bytes(&mut bytes[8..24]),
        _ => rng.fill_bytes(&mut bytes[24..56]),
    }
}

/// Rewrites one plaintext manifest field and re-encrypts, so the decoded
/// manifest carries hostile offsets, sizes and ids instead of noise.
/// Only valid for capsules whose key slot holds the content key verbatim.
fn structured_manifest_tweak(rng: &mut XorShift64, bytes: &mut [u8]) {
    let Ok(header) = decode_header(bytes) else {
        return;
    };
    let available = (bytes.len().saturating_sub(HEADER_LEN)) / MANIFEST_ENTRY_LEN;
    let entries = std::cmp::min(header.manifest_entry_count as usize, available);
    if entries == 0 {
        return;
    }
    let Ok(mut session) = CtrSession::new(&header.wrapped_key, &header.iv) else {
        return;
    };

    let manifest_end = HEADER_LEN + entries * MANIFEST_ENTRY_LEN;
    let manifest = &mut bytes[HEADER_LEN..manifest_end];
    session.apply_keystream(manifest);

    let base = ((rng.next_u64() as usize) % entries) * MANIFEST_ENTRY_LEN;
    match rng.next_u64() % 7 {
        0 => write_u32(manifest, base + ENTRY_TYPE_OFFSET, rng.next_u64() as u32),
        1 => write_u32(manifest, base + ENTRY_FLAGS_OFFSET, rng.next_u64() as u32),
        2 => {
            let offset = match rng.next_u64() % 3 {
                0 => u64::MAX - (rng.next_u64() % 64),
                1 => read_u64(manifest, base + ENTRY_OFFSET_OFFSET).unwrap_or(0) + 1,
                _ => rng.next_u64() % 8192,
            };
            write_u64(manifest, base + ENTRY_OFFSET_OFFSET, offset);
        }
        3 => {
            let size = match rng.next_u64() % 3 {
                0 => u64::MAX,
                1 => read_u64(manifest, base + ENTRY_SIZE_OFFSET)
                    .unwrap_or(0)
                    .saturating_add(1),
                _ => rng.next_u64() % 8192,
            };
            write_u64(manifest, base + ENTRY_SIZE_OFFSET, size);
        }
        4 => {
            // Fill every byte of the id slot, leaving no terminator.
            let fill = b'A' + (rng.next_u64() % 26) as u8;
            manifest[base + ENTRY_ID_OFFSET..base + ENTRY_ID_OFFSET + CONTENT_ID_SLOT_LEN].fill(fill);
        }
        5 => {
            // Duplicate the first entry's id.
            let first: Vec<u8> =
                manifest[ENTRY_ID_OFFSET..ENTRY_ID_OFFSET + CONTENT_ID_SLOT_LEN].to_vec();
            manifest[base + ENTRY_ID_OFFSET..base + ENTRY_ID_OFFSET + CONTENT_ID_SLOT_LEN]
                .copy_from_slice(&first);
        }
        _ => write_u64(manifest, base + ENTRY_METADATA_OFFSET, rng.next_u64()),
    }

    session.seek(0);
    session.apply_keystream(manifest);
}

fn swap_ranges(rng: &mut XorShift64, bytes: &mut [u8]) {
    if bytes.len() < 2 {
        return;
    }
    let len = ((rng.next_u64() as usize) % 8).max(1);
    let start_a = (rng.next_u64() as usize) % bytes.len();
    let start_b = (rng.next_u64() as usize) % bytes.len();
    for i in 0..len {
        let a = start_a + i;
        let b = start_b + i;
        if a >= bytes.len() || b >= bytes.len() {
            break;
        }
        bytes.swap(a, b);
    }
}

fn splice_with_seed(rng: &mut XorShift64, bytes: &mut Vec<u8>, seeds: &[SeedCase], max_len: usize) {
    if seeds.is_empty() || max_len == 0 {
        return;
    }
    let other = &seeds[(rng.next_u64() as usize) % seeds.len()].bytes;
    if other.is_empty() {
        return;
    }
    let split_self = (rng.next_u64() as usize) % (bytes.len() + 1);
    let split_other = (rng.next_u64() as usize) % (other.len() + 1);
    let mut combined = Vec::with_capacity(std::cmp::min(max_len, split_self + other.len()));
    combined.extend_from_slice(&bytes[..split_self]);
    combined.extend_from_slice(&other[split_other..]);
    combined.truncate(max_len);
    *bytes = combined;
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Some(u64::from_le_bytes(buf))
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    if let Some(dst) = bytes.get_mut(offset..offset + 4) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    if let Some(dst) = bytes.get_mut(offset..offset + 8) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn fill_bytes(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let next = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&next[..chunk.len()]);
        }
    }
}
