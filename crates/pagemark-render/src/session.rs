//! Reading-session persistence.
//!
//! Session records are framed as `PMS1` magic, a little-endian CRC32 of the
//! payload, then a versioned JSON payload. Records that fail any check are
//! reported as "no session" so a torn or foreign file never blocks opening a
//! book.

use core::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pagemark::{LayoutProfileId, Locator, PublicationId, ViewportConfig};
use serde::{Deserialize, Serialize};

use crate::pagination::{PageMap, PageMapStore};
use crate::store::{KeyValueStore, StoreError};

const SESSION_MAGIC: [u8; 4] = *b"PMS1";
const SESSION_HEADER_LEN: usize = 8;
const SESSION_SCHEMA_VERSION: u32 = 1;
const PAGE_MAP_SCHEMA_VERSION: u8 = 1;

/// Milliseconds since the Unix epoch, `0` if the clock is before it.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// Persisted reading state of one publication.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub publication_id: PublicationId,
    pub last_locator: Locator,
    pub viewport: ViewportConfig,
    pub last_updated_at_ms: u64,
}

impl Session {
    /// Session stamped with the current time.
    pub fn new(publication_id: PublicationId, last_locator: Locator, viewport: ViewportConfig) -> Self {
        Self {
            publication_id,
            last_locator,
            viewport,
            last_updated_at_ms: now_ms(),
        }
    }
}

/// Session store failures.
#[derive(Debug)]
pub enum SessionStoreError {
    Store(StoreError),
    Encode(String),
}

impl fmt::Display for SessionStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "session storage failed: {}", err),
            Self::Encode(reason) => write!(f, "session encoding failed: {}", reason),
        }
    }
}

impl std::error::Error for SessionStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Encode(_) => None,
        }
    }
}

impl From<StoreError> for SessionStoreError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Why a stored session record was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionRecordError {
    Truncated,
    BadMagic,
    ChecksumMismatch,
    Malformed(String),
    UnsupportedVersion(u32),
    WrongPublication,
}

impl fmt::Display for SessionRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "record truncated"),
            Self::BadMagic => write!(f, "record magic mismatch"),
            Self::ChecksumMismatch => write!(f, "record checksum mismatch"),
            Self::Malformed(reason) => write!(f, "record payload malformed: {}", reason),
            Self::UnsupportedVersion(version) => {
                write!(f, "record schema version {} not supported", version)
            }
            Self::WrongPublication => write!(f, "record belongs to another publication"),
        }
    }
}

impl std::error::Error for SessionRecordError {}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecordWire {
    version: u32,
    publication_id: PublicationId,
    last_locator: Locator,
    viewport: ViewportConfig,
    last_updated_at_ms: u64,
}

/// Frame `session` as a `PMS1` record.
pub fn encode_session_record(session: &Session) -> Result<Vec<u8>, SessionStoreError> {
    let wire = SessionRecordWire {
        version: SESSION_SCHEMA_VERSION,
        publication_id: session.publication_id.clone(),
        last_locator: session.last_locator.clone(),
        viewport: session.viewport,
        last_updated_at_ms: session.last_updated_at_ms,
    };
    let payload =
        serde_json::to_vec(&wire).map_err(|err| SessionStoreError::Encode(err.to_string()))?;
    let mut record = Vec::with_capacity(SESSION_HEADER_LEN + payload.len());
    record.extend_from_slice(&SESSION_MAGIC);
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Parse a `PMS1` record.
///
/// Only the current schema version is accepted. Any other version fails with
/// [`SessionRecordError::UnsupportedVersion`].
pub fn decode_session_record(record: &[u8]) -> Result<Session, SessionRecordError> {
    if record.len() < SESSION_HEADER_LEN {
        return Err(SessionRecordError::Truncated);
    }
    let (header, payload) = record.split_at(SESSION_HEADER_LEN);
    if header[..4] != SESSION_MAGIC {
        return Err(SessionRecordError::BadMagic);
    }
    let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if crc32fast::hash(payload) != expected {
        return Err(SessionRecordError::ChecksumMismatch);
    }
    let wire: SessionRecordWire = serde_json::from_slice(payload)
        .map_err(|err| SessionRecordError::Malformed(err.to_string()))?;
    session_from_wire(wire)
}

fn session_from_wire(wire: SessionRecordWire) -> Result<Session, SessionRecordError> {
    match wire.version {
        SESSION_SCHEMA_VERSION => Ok(Session {
            publication_id: wire.publication_id,
            last_locator: wire.last_locator,
            viewport: wire.viewport,
            last_updated_at_ms: wire.last_updated_at_ms,
        }),
        other => Err(SessionRecordError::UnsupportedVersion(other)),
    }
}

/// Per-publication session persistence over a [`KeyValueStore`].
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn session_key(publication_id: &PublicationId) -> String {
        format!("session/{}", publication_id)
    }

    /// Underlying storage, for sharing with a [`KvPageMapStore`].
    pub fn backing_store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    /// Load the saved session, or `None` when absent or unreadable.
    pub fn load(&self, publication_id: &PublicationId) -> Result<Option<Session>, SessionStoreError> {
        let key = Self::session_key(publication_id);
        let Some(record) = self.store.get(&key)? else {
            return Ok(None);
        };
        let session = match decode_session_record(&record) {
            Ok(session) if &session.publication_id == publication_id => session,
            Ok(_) => {
                log::warn!(
                    "Ignoring session {}: {}",
                    key,
                    SessionRecordError::WrongPublication
                );
                return Ok(None);
            }
            Err(err) => {
                log::warn!("Ignoring session {}: {}", key, err);
                return Ok(None);
            }
        };
        if session.viewport.validate().is_err() {
            log::warn!("Ignoring session {}: invalid viewport", key);
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Replace the stored session atomically.
    pub fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let record = encode_session_record(session)?;
        self.store
            .put(&Self::session_key(&session.publication_id), &record)?;
        Ok(())
    }

    pub fn delete(&self, publication_id: &PublicationId) -> Result<(), SessionStoreError> {
        self.store.delete(&Self::session_key(publication_id))?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedPageMap {
    version: u8,
    href: String,
    content_len: u64,
    breaks: Vec<u64>,
}

/// [`PageMapStore`] persisting postcard-encoded page maps in a [`KeyValueStore`].
///
/// Keys: `pagemap/<publication>/<profile-hex>/<resource-index>`. Failures are
/// logged and treated as cache misses.
#[derive(Clone)]
pub struct KvPageMapStore {
    store: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for KvPageMapStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvPageMapStore").finish_non_exhaustive()
    }
}

impl KvPageMapStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn page_map_key(
        publication: &PublicationId,
        profile: LayoutProfileId,
        resource_index: usize,
    ) -> String {
        format!(
            "pagemap/{}/{}/{}",
            publication,
            profile.to_hex(),
            resource_index
        )
    }
}

impl PageMapStore for KvPageMapStore {
    fn load_page_map(
        &self,
        publication: &PublicationId,
        profile: LayoutProfileId,
        resource_index: usize,
        href: &str,
    ) -> Option<PageMap> {
        let key = Self::page_map_key(publication, profile, resource_index);
        let bytes = match self.store.get(&key) {
            Ok(bytes) => bytes?,
            Err(err) => {
                log::debug!("Page map {} unreadable: {}", key, err);
                return None;
            }
        };
        let persisted: PersistedPageMap = postcard::from_bytes(&bytes).ok()?;
        if persisted.version != PAGE_MAP_SCHEMA_VERSION || persisted.href != href {
            return None;
        }
        let breaks = persisted
            .breaks
            .into_iter()
            .map(|offset| usize::try_from(offset).ok())
            .collect::<Option<Vec<usize>>>()?;
        let content_len = usize::try_from(persisted.content_len).ok()?;
        PageMap::from_breaks(persisted.href, profile, content_len, breaks).ok()
    }

    fn store_page_map(&self, publication: &PublicationId, resource_index: usize, map: &PageMap) {
        let key = Self::page_map_key(publication, map.profile(), resource_index);
        let persisted = PersistedPageMap {
            version: PAGE_MAP_SCHEMA_VERSION,
            href: map.href().to_string(),
            content_len: map.content_len() as u64,
            breaks: map.breaks().iter().map(|offset| *offset as u64).collect(),
        };
        let bytes = match postcard::to_allocvec(&persisted) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("Page map {} not encoded: {}", key, err);
                return;
            }
        };
        if let Err(err) = self.store.put(&key, &bytes) {
            log::debug!("Page map {} not stored: {}", key, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyValueStore;

    fn sample_session() -> Session {
        Session {
            publication_id: PublicationId::from_name("book"),
            last_locator: Locator::new("text/ch2.xhtml", "application/xhtml+xml")
                .with_chapter_progression(0.5)
                .with_total_progression(0.625)
                .with_page_index(Some(3)),
            viewport: ViewportConfig::for_display(600, 800).with_font_scale(1.25),
            last_updated_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn record_framing_roundtrips() {
        let session = sample_session();
        let record = encode_session_record(&session).expect("encode");
        assert_eq!(&record[..4], b"PMS1");
        let payload: serde_json::Value =
            serde_json::from_slice(&record[8..]).expect("payload is JSON");
        assert_eq!(payload["version"], 1);
        assert_eq!(payload["lastLocator"]["href"], "text/ch2.xhtml");
        assert_eq!(decode_session_record(&record), Ok(session));
    }

    #[test]
    fn damaged_records_are_rejected() {
        let record = encode_session_record(&sample_session()).expect("encode");

        assert_eq!(
            decode_session_record(&record[..5]),
            Err(SessionRecordError::Truncated)
        );

        let mut bad_magic = record.clone();
        bad_magic[0] = b'X';
        assert_eq!(
            decode_session_record(&bad_magic),
            Err(SessionRecordError::BadMagic)
        );

        let mut flipped = record.clone();
        let last = flipped.len() - 2;
        flipped[last] ^= 0x20;
        assert_eq!(
            decode_session_record(&flipped),
            Err(SessionRecordError::ChecksumMismatch)
        );

        let torn = &record[..record.len() - 10];
        assert_eq!(
            decode_session_record(torn),
            Err(SessionRecordError::ChecksumMismatch)
        );
    }

    fn record_with_version(version: u32) -> Vec<u8> {
        let payload = format!(
            r#"{{"version":{version},"publicationId":"x","lastLocator":{{"href":"a","mediaType":"","chapterProgression":0.0,"totalProgression":0.0}},"viewport":{{"widthPx":1,"heightPx":1,"fontScale":1.0,"lineHeightScale":1.0}},"lastUpdatedAtMs":0}}"#
        );
        let mut record = Vec::new();
        record.extend_from_slice(b"PMS1");
        record.extend_from_slice(&crc32fast::hash(payload.as_bytes()).to_le_bytes());
        record.extend_from_slice(payload.as_bytes());
        record
    }

    #[test]
    fn only_the_current_schema_version_is_accepted() {
        assert_eq!(
            decode_session_record(&record_with_version(9)),
            Err(SessionRecordError::UnsupportedVersion(9))
        );
        assert_eq!(
            decode_session_record(&record_with_version(0)),
            Err(SessionRecordError::UnsupportedVersion(0))
        );
        let current = decode_session_record(&record_with_version(SESSION_SCHEMA_VERSION))
            .expect("current version");
        assert_eq!(current.publication_id.as_str(), "x");
    }

    #[test]
    fn store_treats_corrupt_records_as_absent() {
        let kv = MemoryKeyValueStore::new();
        let sessions = SessionStore::new(Arc::new(kv.clone()));
        let session = sample_session();
        sessions.save(&session).expect("save");
        assert_eq!(
            sessions.load(&session.publication_id).expect("load"),
            Some(session.clone())
        );

        let key = SessionStore::session_key(&session.publication_id);
        kv.put(&key, b"PMS1garbage").expect("corrupt");
        assert_eq!(sessions.load(&session.publication_id).expect("load"), None);

        sessions.delete(&session.publication_id).expect("delete");
        assert!(kv.is_empty());
    }

    #[test]
    fn store_ignores_records_of_other_publications() {
        let kv = MemoryKeyValueStore::new();
        let sessions = SessionStore::new(Arc::new(kv.clone()));
        let session = sample_session();
        let other = PublicationId::from_name("other");
        let record = encode_session_record(&session).expect("encode");
        kv.put(&SessionStore::session_key(&other), &record)
            .expect("put");
        assert_eq!(sessions.load(&other).expect("load"), None);
    }

    #[test]
    fn page_maps_persist_through_postcard() {
        let kv = MemoryKeyValueStore::new();
        let store = KvPageMapStore::new(Arc::new(kv.clone()));
        let id = PublicationId::from_name("book");
        let profile = LayoutProfileId::from_bytes(b"profile");
        let map = PageMap::from_breaks("text/ch1.xhtml", profile, 1200, vec![0, 400, 800])
            .expect("map");

        store.store_page_map(&id, 2, &map);
        assert_eq!(
            kv.keys(),
            vec![KvPageMapStore::page_map_key(&id, profile, 2)]
        );
        assert_eq!(
            store.load_page_map(&id, profile, 2, "text/ch1.xhtml"),
            Some(map)
        );
        assert_eq!(store.load_page_map(&id, profile, 2, "text/other.xhtml"), None);
        let other_profile = LayoutProfileId::from_bytes(b"other");
        assert_eq!(
            store.load_page_map(&id, other_profile, 2, "text/ch1.xhtml"),
            None
        );
    }
}
