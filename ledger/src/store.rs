//! Durable backends for the generation ledger.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use patchworld_core::BlockPos;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FILE_PREFIX: &str = "generated-cells-";
const FILE_EXTENSION: &str = "toml";
const UNKNOWN_TARGET: &str = "unknown";

/// Raw persisted form of the ledger.
///
/// Cell keys stay textual here so a single malformed entry can be skipped on
/// load instead of rejecting the whole record. A zero cell dimension means no
/// size has been stored yet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerRecord {
    /// Identity of the target world the completed cells belong to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_identity: Option<String>,
    /// Cell width the completed cells were recorded under.
    pub cell_width: i32,
    /// Cell length the completed cells were recorded under.
    pub cell_length: i32,
    /// Completed cells as `"x,z"` keys.
    pub generated: Vec<String>,
    /// Set-once location consumed by the progression collaborator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progression_marker: Option<BlockPos>,
}

/// Errors raised while reading or writing a ledger record.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The backing file could not be accessed.
    #[error("ledger I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The persisted document is not valid TOML for a ledger record.
    #[error("ledger record could not be decoded: {0}")]
    Decode(#[from] toml::de::Error),
    /// The in-memory record could not be encoded.
    #[error("ledger record could not be encoded: {0}")]
    Encode(#[from] toml::ser::Error),
    /// The backend refused the operation.
    #[error("ledger backend unavailable: {detail}")]
    Unavailable {
        /// Human readable description supplied by the backend.
        detail: String,
    },
}

/// Key-value shaped reader/writer that persists the ledger record.
pub trait LedgerStore: Send + Sync {
    /// Reads the stored record, returning `None` when nothing was persisted yet.
    fn read(&self) -> Result<Option<LedgerRecord>, LedgerError>;

    /// Replaces the stored record.
    fn write(&self, record: &LedgerRecord) -> Result<(), LedgerError>;
}

/// Ledger backend that keeps one TOML document per target world.
#[derive(Clone, Debug)]
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    /// Creates a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates the store for `target_name` inside `data_dir`.
    ///
    /// The file is named `generated-cells-<target>.toml` with every character
    /// outside `[A-Za-z0-9._-]` replaced by `_`.
    #[must_use]
    pub fn for_target(data_dir: impl AsRef<Path>, target_name: &str) -> Self {
        let file_name = format!(
            "{FILE_PREFIX}{}.{FILE_EXTENSION}",
            sanitize_file_part(target_name)
        );
        Self::new(data_dir.as_ref().join(file_name))
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_directory(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }
}

impl LedgerStore for FileLedgerStore {
    fn read(&self) -> Result<Option<LedgerRecord>, LedgerError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                self.ensure_parent_directory()?;
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        Ok(Some(toml::from_str(&contents)?))
    }

    fn write(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        self.ensure_parent_directory()?;
        let encoded = toml::to_string(record)?;
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, encoded)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

/// Volatile ledger backend used by tests and ephemeral engines.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    record: Mutex<Option<LedgerRecord>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `record`.
    #[must_use]
    pub fn with_record(record: LedgerRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    /// Snapshot of the most recently written record.
    #[must_use]
    pub fn record(&self) -> Option<LedgerRecord> {
        self.record.lock().clone()
    }

    /// Number of successful writes performed so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes subsequent writes fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn read(&self) -> Result<Option<LedgerRecord>, LedgerError> {
        Ok(self.record.lock().clone())
    }

    fn write(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable {
                detail: "writes disabled".to_owned(),
            });
        }
        *self.record.lock() = Some(record.clone());
        let _ = self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn sanitize_file_part(value: &str) -> String {
    if value.trim().is_empty() {
        return UNKNOWN_TARGET.to_owned();
    }
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
