#![deny(warnings)]
#![deny(clippy::all)]

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dpa_core::crypto::keyfile::{generate_key, read_master_keyfile, write_master_keyfile};
use dpa_core::crypto::wrap::{KeyUnwrap, KeyWrap, MasterKey, PassthroughKey, MASTER_KEY_LEN};
use dpa_core::CryptoError;
use dpa_format::{
    open_content, read_manifest, write_capsule_random, CapsuleError, CapsuleItem, ContentId,
    ContentType, DirStore, FormatError, ReaderOptions, StorageError,
};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const EXIT_SUCCESS: i32 = 0;
const EXIT_CLI: i32 = 2;
const EXIT_FORMAT: i32 = 3;
const EXIT_IO: i32 = 4;
const EXIT_CRYPTO: i32 = 5;
const EXIT_NOT_FOUND: i32 = 6;

const STORAGE_ENV: &str = "DPA_STORAGE_DIR";
const MASTER_KEY_ENV: &str = "DPA_MASTER_KEY";
const COPY_BUF_LEN: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "dpa", version, about = "Digital Pressing Archive capsule tools")]
struct Cli {
    /// Directory holding `<capsule-id>.dpa` files
    #[arg(long, global = true)]
    storage: Option<PathBuf>,
    /// Master key file used to wrap/unwrap content keys
    #[arg(long, global = true)]
    master_key: Option<PathBuf>,
    /// Reject capsules whose version is not 2
    #[arg(long, global = true)]
    strict: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new master key file
    Keygen {
        output: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Pack files into a new capsule
    Pack {
        output: PathBuf,
        /// TYPE:ID:PATH[:METADATA], repeatable
        #[arg(long = "item", required = true)]
        items: Vec<String>,
        #[arg(long)]
        force: bool,
    },
    /// List a capsule's header and manifest
    Inspect { capsule_id: String },
    /// Decrypt one content item to a file
    Extract {
        capsule_id: String,
        content_id: String,
        output: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Capsule(#[from] CapsuleError),
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Cli(String),
}

/// Key capability selected by `--master-key`; without one the content key is
/// stored unwrapped, as on development devices.
enum KeySource {
    Passthrough(PassthroughKey),
    Master(MasterKey),
}

impl KeySource {
    fn load(path: Option<&Path>) -> Result<Self, CliError> {
        match path {
            Some(path) => {
                let keyfile = read_master_keyfile(path)?;
                Ok(KeySource::Master(MasterKey::new(keyfile.key.as_slice())?))
            }
            None => Ok(KeySource::Passthrough(PassthroughKey)),
        }
    }

    fn unwrapper(&self) -> &dyn KeyUnwrap {
        match self {
            KeySource::Passthrough(key) => key,
            KeySource::Master(key) => key,
        }
    }

    fn wrapper(&self) -> &dyn KeyWrap {
        match self {
            KeySource::Passthrough(key) => key,
            KeySource::Master(key) => key,
        }
    }
}

fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                EXIT_CLI
            } else {
                EXIT_SUCCESS
            };
        }
    };

    let storage = cli
        .storage
        .or_else(|| std::env::var_os(STORAGE_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let master_key = cli
        .master_key
        .or_else(|| std::env::var_os(MASTER_KEY_ENV).map(PathBuf::from));
    let options = ReaderOptions {
        strict_version: cli.strict,
        ..ReaderOptions::default()
    };

    let result = match cli.command {
        Commands::Keygen { output, force } => cmd_keygen(&output, force),
        Commands::Pack {
            output,
            items,
            force,
        } => cmd_pack(&output, &items, master_key.as_deref(), force),
        Commands::Inspect { capsule_id } => {
            cmd_inspect(&storage, &capsule_id, master_key.as_deref(), &options)
        }
        Commands::Extract {
            capsule_id,
            content_id,
            output,
            force,
        } => cmd_extract(
            &storage,
            &capsule_id,
            &content_id,
            &output,
            master_key.as_deref(),
            &options,
            force,
        ),
    };

    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => {
            report_error(&err);
            map_exit_code(&err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn report_error(err: &CliError) {
    error!(error = %err, "command failed");
    eprintln!("error: {err}");
}

fn map_exit_code(err: &CliError) -> i32 {
    match err {
        CliError::Capsule(err) => match err {
            CapsuleError::CapsuleNotFound { .. } | CapsuleError::ContentNotFound { .. } => {
                EXIT_NOT_FOUND
            }
            CapsuleError::Format(err) => format_exit_code(err),
            CapsuleError::Key(_) => EXIT_CRYPTO,
            CapsuleError::Storage(StorageError::InvalidCapsuleId(_)) => EXIT_CLI,
            CapsuleError::Storage(_) => EXIT_IO,
            CapsuleError::HandleClosed => EXIT_IO,
        },
        CliError::Format(err) => format_exit_code(err),
        CliError::Crypto(CryptoError::Io(_)) => EXIT_IO,
        CliError::Crypto(_) => EXIT_CRYPTO,
        CliError::Io(_) => EXIT_IO,
        CliError::Cli(_) => EXIT_CLI,
    }
}

fn format_exit_code(err: &FormatError) -> i32 {
    match err {
        FormatError::Io(_) => EXIT_IO,
        FormatError::InvalidContentId(_)
        | FormatError::DuplicateContentId(_)
        | FormatError::UnknownContentType(_) => EXIT_CLI,
        _ => EXIT_FORMAT,
    }
}

fn cmd_keygen(output: &Path, force: bool) -> Result<(), CliError> {
    refuse_existing(output, force)?;
    info!(output = %output.display(), "generating master key file");

    let key = generate_key(MASTER_KEY_LEN);
    write_master_keyfile(output, key.as_slice(), force)?;

    Ok(())
}

fn cmd_pack(
    output: &Path,
    item_specs: &[String],
    master_key: Option<&Path>,
    force: bool,
) -> Result<(), CliError> {
    refuse_existing(output, force)?;

    let keys = KeySource::load(master_key)?;
    let mut items = item_specs
        .iter()
        .map(String::as_str)
        .map(open_item)
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        output = %output.display(),
        items = items.len(),
        "packing capsule"
    );

    let tmp_path = temp_path_for(output)?;
    write_to_temp(&tmp_path, |file| {
        let written = write_capsule_random(file, &mut items, keys.wrapper())?;
        info!(bytes = written.total_len(), "capsule written");
        Ok(())
    })?;

    finalize_output(&tmp_path, output)
}

/// Parses `TYPE:ID:PATH[:METADATA]` and opens the payload file.
fn open_item(spec: &str) -> Result<CapsuleItem, CliError> {
    let bad = || {
        CliError::Cli(format!(
            "invalid --item {spec:?}, expected TYPE:ID:PATH[:METADATA]"
        ))
    };

    let mut parts = spec.splitn(3, ':');
    let type_part = parts.next().ok_or_else(bad)?;
    let id_part = parts.next().ok_or_else(bad)?;
    let rest = parts.next().ok_or_else(bad)?;

    let (path_part, metadata) = match rest.rsplit_once(':') {
        Some((path, meta)) if !meta.is_empty() && meta.bytes().all(|b| b.is_ascii_digit()) => {
            let metadata = meta
                .parse::<u64>()
                .map_err(|_| CliError::Cli(format!("invalid metadata in --item {spec:?}")))?;
            (path, metadata)
        }
        _ => (rest, 0),
    };
    if path_part.is_empty() {
        return Err(bad());
    }

    let content_type: ContentType = type_part.parse()?;
    let id = ContentId::new(id_part)?;
    let size = std::fs::metadata(path_part)?.len();
    let file = File::open(path_part)?;

    Ok(CapsuleItem {
        content_type,
        id,
        metadata,
        size,
        reader: Box::new(file),
    })
}

fn cmd_inspect(
    storage: &Path,
    capsule_id: &str,
    master_key: Option<&Path>,
    options: &ReaderOptions,
) -> Result<(), CliError> {
    info!(storage = %storage.display(), capsule_id, "reading capsule");

    let store = DirStore::new(storage);
    let keys = KeySource::load(master_key)?;
    let manifest = read_manifest(&store, capsule_id, keys.unwrapper(), options)?;

    println!("DPA capsule");
    println!("  Capsule: {capsule_id}");
    println!("  Version: {}", manifest.header.version);
    println!("  Size: {} bytes", manifest.file_len);
    println!("  Entries: {}", manifest.header.manifest_entry_count);
    println!("  Data start: {} bytes", manifest.header.data_start());
    println!("Contents:");
    for entry in &manifest.entries {
        println!(
            "  - id: {} type: {} flags: 0x{:08X} offset: {} size: {} metadata: {}",
            entry.id, entry.content_type, entry.flags, entry.offset, entry.size, entry.metadata
        );
    }

    Ok(())
}

fn cmd_extract(
    storage: &Path,
    capsule_id: &str,
    content_id: &str,
    output: &Path,
    master_key: Option<&Path>,
    options: &ReaderOptions,
    force: bool,
) -> Result<(), CliError> {
    refuse_existing(output, force)?;

    info!(
        storage = %storage.display(),
        capsule_id,
        content_id,
        output = %output.display(),
        "extracting content"
    );

    let keys = KeySource::load(master_key)?;
    let store = DirStore::new(storage);
    let mut handle = open_content(&store, capsule_id, content_id, keys.unwrapper(), options)?;

    let tmp_path = temp_path_for(output)?;
    let result = write_to_temp(&tmp_path, |file| {
        let mut buf = Zeroizing::new(vec![0u8; COPY_BUF_LEN]);
        loop {
            let read = handle.read(buf.as_mut_slice())?;
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read])?;
        }
        Ok(())
    });
    handle.close();
    result?;

    finalize_output(&tmp_path, output)
}

/// Writes through a freshly created temp file. The file is removed again if
/// writing fails; an existing file at `tmp_path` is never opened or removed.
fn write_to_temp<F>(tmp_path: &Path, write: F) -> Result<(), CliError>
where
    F: FnOnce(&mut File) -> Result<(), CliError>,
{
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)?;
    let result = write(&mut file).and_then(|()| file.sync_all().map_err(CliError::from));
    if result.is_err() {
        drop(file);
        let _ = std::fs::remove_file(tmp_path);
    }
    result
}

fn refuse_existing(output: &Path, force: bool) -> Result<(), CliError> {
    if output.exists() && !force {
        return Err(CliError::Cli(format!(
            "output exists: {} (use --force to overwrite)",
            output.display()
        )));
    }
    Ok(())
}

/// `<output file name>.<pid>.tmp` next to the output, so the rename stays on
/// one filesystem and never lands on the output or a sibling like `<stem>.tmp`.
fn temp_path_for(output: &Path) -> Result<PathBuf, CliError> {
    let name = output
        .file_name()
        .ok_or_else(|| CliError::Cli(format!("output has no file name: {}", output.display())))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = output.with_file_name(tmp_name);
    if tmp_path == output {
        return Err(CliError::Cli(format!(
            "temp path collides with output: {}",
            output.display()
        )));
    }
    Ok(tmp_path)
}

fn finalize_output(tmp_path: &Path, output: &Path) -> Result<(), CliError> {
    let result = if output.exists() {
        std::fs::remove_file(output).and_then(|()| std::fs::rename(tmp_path, output))
    } else {
        std::fs::rename(tmp_path, output)
    };
    if result.is_err() {
        let _ = std::fs::remove_file(tmp_path);
    }
    result.map_err(CliError::from)
}
