//! Durable key-value storage for sessions and persisted page maps.

use core::fmt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;
const RECORD_EXTENSION: &str = "rec";
static RECORD_WRITE_NONCE: AtomicUsize = AtomicUsize::new(0);

/// Storage failures.
#[derive(Debug)]
pub enum StoreError {
    /// The key has an empty, `.` or `..` segment.
    InvalidKey(String),
    /// The record exceeds the configured size cap.
    TooLarge { key: String, len: usize, max: usize },
    /// The store's lock was poisoned by a panicking writer.
    Poisoned,
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "invalid storage key: {:?}", key),
            Self::TooLarge { key, len, max } => {
                write!(f, "record {} is {} bytes (max {})", key, len, max)
            }
            Self::Poisoned => write!(f, "storage lock poisoned"),
            Self::Io(err) => write!(f, "storage I/O failed: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Byte-oriented durable storage.
///
/// Keys are `/`-separated paths. A successful `put` is all-or-nothing: a
/// crash mid-write leaves either the previous value or the new one.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// File-backed store writing one file per key.
///
/// Key `a/b` maps to `<root>/a/b.rec`. Writes go to a uniquely named temp
/// file which is fsynced and renamed over the record, then the directory is
/// synced. Leftover temp files from interrupted writes are never read.
#[derive(Clone, Debug)]
pub struct FileKeyValueStore {
    root: PathBuf,
    max_record_bytes: usize,
}

impl FileKeyValueStore {
    /// Create a store rooted at `root`; directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }

    /// Set the maximum record size in bytes.
    ///
    /// Values of `0` are treated as `1` to keep the cap explicit.
    pub fn with_max_record_bytes(mut self, max_record_bytes: usize) -> Self {
        self.max_record_bytes = max_record_bytes.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }

    /// Deterministic file path for `key`.
    pub fn record_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.root.clone();
        let mut segments = key.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
            let mut name = escape_segment(segment);
            if segments.peek().is_none() {
                name.push('.');
                name.push_str(RECORD_EXTENSION);
            }
            path.push(name);
        }
        Ok(path)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.record_path(key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let max = self.max_record_bytes;
        let mut reader = file.take(max as u64 + 1);
        let mut payload = Vec::with_capacity(256);
        reader.read_to_end(&mut payload)?;
        if payload.len() > max {
            return Err(StoreError::TooLarge {
                key: key.to_string(),
                len: payload.len(),
                max,
            });
        }
        Ok(Some(payload))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if value.len() > self.max_record_bytes {
            return Err(StoreError::TooLarge {
                key: key.to_string(),
                len: value.len(),
                max: self.max_record_bytes,
            });
        }
        let final_path = self.record_path(key)?;
        let parent = final_path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent)?;

        let file_name = final_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let nonce = RECORD_WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        let temp_path = parent.join(format!(
            ".{}.tmp-{}-{}",
            file_name,
            std::process::id(),
            nonce
        ));

        if let Err(err) = write_synced(&temp_path, value) {
            remove_file_quiet(&temp_path);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&temp_path, &final_path) {
            remove_file_quiet(&temp_path);
            return Err(err.into());
        }
        sync_directory(parent);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.record_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    sync_directory(parent);
                }
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_synced(path: &Path, value: &[u8]) -> io::Result<()> {
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(value)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()
}

fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn remove_file_quiet(path: &Path) {
    let _ = fs::remove_file(path);
}

fn sync_directory(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

/// In-memory store. Clones share the same entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}
