//! External collaborator interfaces: container parsing and resource fetch.
//!
//! EPUB container/OPF/XHTML parsing happens outside this crate. A
//! [`ContainerParser`] turns a [`PublicationIdentity`] into an open
//! [`Publication`] exposing its reading order, metadata, navigation and raw
//! resource bytes. [`MemoryContainer`] is an in-process implementation for
//! hosts that already hold decoded content, and for tests.

use core::fmt;
use std::collections::HashMap;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::digest::{digest32, to_hex};
use crate::locator::ReadingProgression;
use crate::navigation::Navigation;

/// One entry of the reading order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Container-relative href.
    pub href: String,
    /// Resource media type.
    pub media_type: String,
    /// Uncompressed resource size in bytes.
    pub byte_len: u64,
}

impl ResourceRef {
    pub fn new(href: impl Into<String>, media_type: impl Into<String>, byte_len: u64) -> Self {
        Self {
            href: href.into(),
            media_type: media_type.into(),
            byte_len,
        }
    }
}

/// Descriptive publication metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationMetadata {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    /// Progression declared by the publication itself.
    #[serde(default)]
    pub progression: ReadingProgression,
}

/// Errors reported by container parsers and resource fetches.
#[derive(Debug)]
pub enum ContainerError {
    /// The file or named publication does not exist.
    NotFound(String),
    /// The container is not a format the parser handles.
    UnsupportedFormat(String),
    /// The container or one of its documents failed to parse.
    Malformed(String),
    Io(io::Error),
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "publication not found: {}", what),
            Self::UnsupportedFormat(what) => write!(f, "unsupported publication format: {}", what),
            Self::Malformed(reason) => write!(f, "malformed publication: {}", reason),
            Self::Io(err) => write!(f, "publication I/O failed: {}", err),
        }
    }
}

impl std::error::Error for ContainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ContainerError {
    fn from(value: io::Error) -> Self {
        if value.kind() == io::ErrorKind::NotFound {
            return Self::NotFound(value.to_string());
        }
        Self::Io(value)
    }
}

/// An open publication owned by a parser.
///
/// Implementations release underlying resources (file handles, archive
/// readers) in [`Publication::release`], which [`PublicationHandle`] calls
/// exactly once.
pub trait Publication: Send + Sync {
    /// Resources in reading order.
    fn reading_order(&self) -> &[ResourceRef];

    fn metadata(&self) -> &PublicationMetadata;

    fn navigation(&self) -> &Navigation;

    /// Fetch raw bytes of a reading-order resource.
    fn fetch_resource(&self, href: &str) -> Result<Vec<u8>, ContainerError>;

    /// Release parser-held resources.
    fn release(&mut self) {}
}

/// Parser opening publications from an identity.
pub trait ContainerParser: Send + Sync {
    fn open_publication(
        &self,
        identity: &PublicationIdentity,
    ) -> Result<Box<dyn Publication>, ContainerError>;
}

/// Owning guard over an open publication.
///
/// Dropping the handle releases the publication on every exit path.
pub struct PublicationHandle {
    inner: Box<dyn Publication>,
}

impl PublicationHandle {
    pub fn new(publication: Box<dyn Publication>) -> Self {
        Self { inner: publication }
    }
}

impl Deref for PublicationHandle {
    type Target = dyn Publication;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for PublicationHandle {
    fn drop(&mut self) {
        log::debug!("Releasing publication '{}'", self.inner.metadata().title);
        self.inner.release();
    }
}

impl fmt::Debug for PublicationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicationHandle")
            .field("title", &self.metadata().title)
            .field("resources", &self.reading_order().len())
            .finish()
    }
}

/// Stable publication identity key used for sessions and caches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicationId(String);

impl PublicationId {
    /// Identity from file path, size and modification time.
    pub fn from_file_fingerprint(path: &Path, byte_len: u64, modified_ms: u64) -> Self {
        let payload = format!("file|{}|{}|{}", path.display(), byte_len, modified_ms);
        Self(to_hex(&digest32(payload.as_bytes())))
    }

    /// Identity from the full file content.
    pub fn from_content(bytes: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(bytes.len() + 8);
        payload.extend_from_slice(b"content|");
        payload.extend_from_slice(bytes);
        Self(to_hex(&digest32(&payload)))
    }

    /// Identity from a caller-chosen key.
    pub fn from_name(name: &str) -> Self {
        let payload = format!("name|{}", name);
        Self(to_hex(&digest32(payload.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the host asks to open.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PublicationIdentity {
    /// A publication file on disk.
    File(PathBuf),
    /// A publication known to the parser under a caller-chosen key.
    Named(String),
}

impl PublicationIdentity {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn named(key: impl Into<String>) -> Self {
        Self::Named(key.into())
    }

    /// Derive the persistent id for this identity.
    ///
    /// File identities are fingerprinted by path, size and mtime, so a
    /// replaced file starts a fresh session.
    pub fn publication_id(&self) -> Result<PublicationId, ContainerError> {
        match self {
            Self::File(path) => {
                let meta = std::fs::metadata(path)?;
                if !meta.is_file() {
                    return Err(ContainerError::NotFound(path.display().to_string()));
                }
                let modified_ms = meta
                    .modified()
                    .ok()
                    .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                    .map(|elapsed| elapsed.as_millis() as u64);
                if modified_ms.is_none() {
                    log::warn!(
                        "No modification time for {}; fingerprinting by path and size only",
                        path.display()
                    );
                }
                let modified_ms = modified_ms.unwrap_or(0);
                Ok(PublicationId::from_file_fingerprint(
                    path,
                    meta.len(),
                    modified_ms,
                ))
            }
            Self::Named(name) => Ok(PublicationId::from_name(name)),
        }
    }

    /// Key used by [`MemoryContainer`] and in log lines.
    pub fn key(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Named(name) => name.clone(),
        }
    }
}

/// In-memory publication built from already-decoded resources.
#[derive(Clone, Debug, Default)]
pub struct MemoryPublication {
    reading_order: Vec<ResourceRef>,
    contents: HashMap<String, Arc<[u8]>>,
    metadata: PublicationMetadata,
    navigation: Navigation,
}

impl MemoryPublication {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            metadata: PublicationMetadata {
                title: title.into(),
                ..PublicationMetadata::default()
            },
            ..Self::default()
        }
    }

    /// Append a resource to the reading order.
    pub fn with_resource(
        mut self,
        href: impl Into<String>,
        media_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        let href = href.into();
        let content: Vec<u8> = content.into();
        self.reading_order.push(ResourceRef::new(
            href.clone(),
            media_type,
            content.len() as u64,
        ));
        self.contents.insert(href, Arc::from(content));
        self
    }

    /// Append a reading-order entry with no fetchable content.
    pub fn with_missing_resource(mut self, href: impl Into<String>, byte_len: u64) -> Self {
        self.reading_order.push(ResourceRef::new(
            href,
            "application/xhtml+xml",
            byte_len,
        ));
        self
    }

    pub fn with_metadata(mut self, metadata: PublicationMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_navigation(mut self, navigation: Navigation) -> Self {
        self.navigation = navigation;
        self
    }
}

struct OpenMemoryPublication {
    publication: MemoryPublication,
    open_handles: Arc<AtomicUsize>,
    released: bool,
}

impl Publication for OpenMemoryPublication {
    fn reading_order(&self) -> &[ResourceRef] {
        &self.publication.reading_order
    }

    fn metadata(&self) -> &PublicationMetadata {
        &self.publication.metadata
    }

    fn navigation(&self) -> &Navigation {
        &self.publication.navigation
    }

    fn fetch_resource(&self, href: &str) -> Result<Vec<u8>, ContainerError> {
        self.publication
            .contents
            .get(href)
            .map(|content| content.to_vec())
            .ok_or_else(|| ContainerError::NotFound(href.to_string()))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Container parser serving [`MemoryPublication`]s by identity key.
#[derive(Clone, Debug, Default)]
pub struct MemoryContainer {
    publications: HashMap<String, MemoryPublication>,
    open_handles: Arc<AtomicUsize>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `publication` under `key` (a name, or a file path's display form).
    pub fn insert(&mut self, key: impl Into<String>, publication: MemoryPublication) {
        self.publications.insert(key.into(), publication);
    }

    pub fn with_publication(mut self, key: impl Into<String>, publication: MemoryPublication) -> Self {
        self.insert(key, publication);
        self
    }

    /// Publications opened and not yet released.
    pub fn open_handle_count(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

impl ContainerParser for MemoryContainer {
    fn open_publication(
        &self,
        identity: &PublicationIdentity,
    ) -> Result<Box<dyn Publication>, ContainerError> {
        let key = identity.key();
        let publication = self
            .publications
            .get(&key)
            .cloned()
            .ok_or(ContainerError::NotFound(key))?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(OpenMemoryPublication {
            publication,
            open_handles: Arc::clone(&self.open_handles),
            released: false,
        }))
    }
}
