//! Host-facing façade owning at most one open publication.
//!
//! Mutating calls take a ticket and run strictly in submission order.
//! `current_locator` reads under a shared lock and only joins the queue when
//! the current resource must be re-measured first. Opening a publication
//! cancels any open still in flight at its next checkpoint.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};

use pagemark::href::split_href_fragment;
use pagemark::{
    ContainerError, ContainerParser, Direction, Locator, Navigation, PositionIndex,
    PositionIndexError, PublicationHandle, PublicationId, PublicationIdentity,
    PublicationMetadata, ReadingProgression, ScreenEdge, Theme, ViewportConfig, ViewportError,
    ViewportPosition,
};

use crate::measure::LayoutMeasurer;
use crate::pagination::{
    CancelToken, NoPageMapStore, PageMapCache, PageMapStore, PaginationDiagnostic,
    PaginationEngine, PaginationError,
};
use crate::session::{KvPageMapStore, Session, SessionStore};
use crate::store::KeyValueStore;

/// Why an `open` failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpenErrorReason {
    FileMissing,
    UnsupportedFormat,
    Parse,
    EmptyPublication,
    /// No resource in the reading order could be laid out.
    Layout,
    /// A newer `open` was submitted before this one finished.
    Superseded,
}

impl fmt::Display for OpenErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FileMissing => "file missing",
            Self::UnsupportedFormat => "unsupported format",
            Self::Parse => "parse failure",
            Self::EmptyPublication => "empty publication",
            Self::Layout => "layout failure",
            Self::Superseded => "superseded",
        };
        f.write_str(name)
    }
}

/// Typed `open` failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenError {
    pub reason: OpenErrorReason,
    pub detail: String,
}

impl OpenError {
    pub fn new(reason: OpenErrorReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    fn superseded() -> Self {
        Self::new(OpenErrorReason::Superseded, "a newer open was submitted")
    }
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "open failed ({}): {}", self.reason, self.detail)
    }
}

impl std::error::Error for OpenError {}

impl From<ContainerError> for OpenError {
    fn from(value: ContainerError) -> Self {
        let reason = match &value {
            ContainerError::NotFound(_) => OpenErrorReason::FileMissing,
            ContainerError::UnsupportedFormat(_) => OpenErrorReason::UnsupportedFormat,
            ContainerError::Malformed(_) | ContainerError::Io(_) => OpenErrorReason::Parse,
        };
        Self::new(reason, value.to_string())
    }
}

/// Errors surfaced to the host.
#[derive(Debug)]
pub enum BridgeError {
    NoPublicationOpen,
    Open(OpenError),
    EndOfPublication,
    ResourceNotFound(String),
    Layout { href: String, reason: String },
    InvalidViewport(ViewportError),
    /// A host-supplied setting name could not be parsed.
    UnknownSetting { setting: &'static str, value: String },
    /// Explicit session deletion failed.
    Storage(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPublicationOpen => write!(f, "no publication open"),
            Self::Open(err) => write!(f, "{}", err),
            Self::EndOfPublication => write!(f, "end of publication"),
            Self::ResourceNotFound(href) => write!(f, "resource not in reading order: {}", href),
            Self::Layout { href, reason } => write!(f, "layout of {} failed: {}", href, reason),
            Self::InvalidViewport(err) => write!(f, "invalid viewport: {}", err),
            Self::UnknownSetting { setting, value } => {
                write!(f, "unknown {} value: {:?}", setting, value)
            }
            Self::Storage(reason) => write!(f, "session storage failed: {}", reason),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(err) => Some(err),
            Self::InvalidViewport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<OpenError> for BridgeError {
    fn from(value: OpenError) -> Self {
        Self::Open(value)
    }
}

impl From<ViewportError> for BridgeError {
    fn from(value: ViewportError) -> Self {
        Self::InvalidViewport(value)
    }
}

impl From<PaginationError> for BridgeError {
    fn from(value: PaginationError) -> Self {
        match value {
            PaginationError::NotPositioned => Self::NoPublicationOpen,
            PaginationError::EndOfPublication => Self::EndOfPublication,
            PaginationError::ResourceNotFound(href) => Self::ResourceNotFound(href),
            PaginationError::Layout { href, reason } => Self::Layout { href, reason },
            PaginationError::Cancelled => Self::Open(OpenError::superseded()),
        }
    }
}

/// Bridge construction options.
#[derive(Clone)]
pub struct BridgeOptions {
    /// Where measured page maps are persisted. Overrides `persist_page_maps`.
    pub page_map_store: Option<Arc<dyn PageMapStore>>,
    /// Persist page maps in the session key-value store.
    pub persist_page_maps: bool,
    /// In-process page map cache; share one across bridges to share measurements.
    pub page_map_cache: PageMapCache,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            page_map_store: None,
            persist_page_maps: false,
            page_map_cache: PageMapCache::new(),
        }
    }
}

impl fmt::Debug for BridgeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeOptions")
            .field("page_map_store", &self.page_map_store.is_some())
            .field("persist_page_maps", &self.persist_page_maps)
            .finish_non_exhaustive()
    }
}

/// FIFO ticket queue serializing mutating operations.
#[derive(Debug, Default)]
struct OperationQueue {
    next_ticket: AtomicU64,
    serving: Mutex<u64>,
    turn: Condvar,
}

impl OperationQueue {
    fn enter(&self) -> QueueTurn<'_> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let mut serving = self.serving.lock().unwrap_or_else(PoisonError::into_inner);
        while *serving != ticket {
            serving = self
                .turn
                .wait(serving)
                .unwrap_or_else(PoisonError::into_inner);
        }
        QueueTurn { queue: self }
    }

    fn pending(&self) -> u64 {
        let serving = *self.serving.lock().unwrap_or_else(PoisonError::into_inner);
        self.next_ticket.load(Ordering::SeqCst).saturating_sub(serving)
    }
}

/// Holding a turn means every earlier operation has finished.
struct QueueTurn<'a> {
    queue: &'a OperationQueue,
}

impl Drop for QueueTurn<'_> {
    fn drop(&mut self) {
        let mut serving = self
            .queue
            .serving
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *serving += 1;
        self.queue.turn.notify_all();
    }
}

/// Cancels an open once a newer open has been submitted.
struct OpenCancel<'a> {
    generation: &'a AtomicU64,
    mine: u64,
}

impl CancelToken for OpenCancel<'_> {
    fn is_cancelled(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.mine
    }
}

impl OpenCancel<'_> {
    fn checkpoint(&self) -> Result<(), OpenError> {
        if self.is_cancelled() {
            return Err(OpenError::superseded());
        }
        Ok(())
    }
}

struct OpenPublication {
    handle: PublicationHandle,
    engine: PaginationEngine,
    session: Session,
}

impl OpenPublication {
    /// Record a stable position and persist it; failures only log.
    fn record(&mut self, sessions: &SessionStore, locator: Locator) {
        self.session = Session::new(
            self.session.publication_id.clone(),
            locator,
            *self.engine.viewport(),
        );
        if let Err(err) = sessions.save(&self.session) {
            log::warn!(
                "Failed to persist session {}: {}",
                self.session.publication_id,
                err
            );
        }
    }

    fn advance(
        &mut self,
        sessions: &SessionStore,
        direction: Direction,
    ) -> Result<Locator, BridgeError> {
        let locator = self.engine.advance(&*self.handle, direction)?;
        self.record(sessions, locator.clone());
        Ok(locator)
    }

    fn apply_viewport(&mut self, viewport: ViewportConfig) {
        if self.engine.set_viewport(viewport) {
            log::debug!(
                "Viewport changed to {}x{} (font {}, line {}); pages now stale",
                viewport.width_px,
                viewport.height_px,
                viewport.font_scale,
                viewport.line_height_scale
            );
        }
        self.session.viewport = viewport;
    }

    fn locate(
        &mut self,
        sessions: &SessionStore,
        locator: &Locator,
    ) -> Result<ViewportPosition, BridgeError> {
        let position = self.engine.locate(&*self.handle, locator)?;
        if let Some(current) = self.engine.current_locator() {
            self.record(sessions, current);
        }
        Ok(position)
    }
}

type DiagnosticCallback = Arc<Mutex<Box<dyn FnMut(PaginationDiagnostic) + Send + 'static>>>;

/// Single entry point for the host UI.
pub struct Bridge {
    parser: Arc<dyn ContainerParser>,
    measurer: Arc<dyn LayoutMeasurer>,
    sessions: SessionStore,
    page_maps: Arc<dyn PageMapStore>,
    cache: PageMapCache,
    queue: OperationQueue,
    open_generation: AtomicU64,
    state: RwLock<Option<OpenPublication>>,
    diagnostic_sink: Option<DiagnosticCallback>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("open", &self.publication_id())
            .field("pending", &self.queue.pending())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    pub fn new(
        parser: Arc<dyn ContainerParser>,
        measurer: Arc<dyn LayoutMeasurer>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_options(parser, measurer, store, BridgeOptions::default())
    }

    pub fn with_options(
        parser: Arc<dyn ContainerParser>,
        measurer: Arc<dyn LayoutMeasurer>,
        store: Arc<dyn KeyValueStore>,
        options: BridgeOptions,
    ) -> Self {
        let page_maps: Arc<dyn PageMapStore> = match options.page_map_store {
            Some(page_maps) => page_maps,
            None if options.persist_page_maps => {
                Arc::new(KvPageMapStore::new(Arc::clone(&store)))
            }
            None => Arc::new(NoPageMapStore),
        };
        Self {
            parser,
            measurer,
            sessions: SessionStore::new(store),
            page_maps,
            cache: options.page_map_cache,
            queue: OperationQueue::default(),
            open_generation: AtomicU64::new(0),
            state: RwLock::new(None),
            diagnostic_sink: None,
        }
    }

    /// Register or replace the diagnostics sink for engines created by later opens.
    pub fn set_diagnostic_sink<F>(&mut self, sink: F)
    where
        F: FnMut(PaginationDiagnostic) + Send + 'static,
    {
        self.diagnostic_sink = Some(Arc::new(Mutex::new(Box::new(sink))));
    }

    /// Mutating operations submitted and not yet finished.
    pub fn pending_operations(&self) -> u64 {
        self.queue.pending()
    }

    /// Id of the open publication.
    pub fn publication_id(&self) -> Option<PublicationId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .as_ref()
            .map(|open| open.session.publication_id.clone())
    }

    pub fn is_open(&self) -> bool {
        self.publication_id().is_some()
    }

    /// Close any open publication, then open `identity`.
    ///
    /// On failure nothing of the new publication is retained. A newer `open`
    /// submitted while this one runs makes it fail with
    /// [`OpenErrorReason::Superseded`].
    pub fn open(
        &self,
        identity: &PublicationIdentity,
        viewport: ViewportConfig,
    ) -> Result<(), BridgeError> {
        let mine = self.open_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _turn = self.queue.enter();
        let cancel = OpenCancel {
            generation: &self.open_generation,
            mine,
        };

        self.close_locked();
        viewport.validate()?;
        cancel.checkpoint()?;

        let opened = self.assemble(identity, viewport, &cancel)?;
        log::debug!(
            "Opened {} as {} ({} resources)",
            identity.key(),
            opened.session.publication_id,
            opened.engine.resource_count()
        );
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = Some(opened);
        Ok(())
    }

    fn assemble(
        &self,
        identity: &PublicationIdentity,
        viewport: ViewportConfig,
        cancel: &OpenCancel<'_>,
    ) -> Result<OpenPublication, OpenError> {
        let publication_id = identity.publication_id()?;
        let handle = PublicationHandle::new(self.parser.open_publication(identity)?);
        cancel.checkpoint()?;

        let reading_order = handle.reading_order().to_vec();
        let index = PositionIndex::build(&reading_order).map_err(|err| match err {
            PositionIndexError::EmptyPublication => {
                OpenError::new(OpenErrorReason::EmptyPublication, err.to_string())
            }
            PositionIndexError::UnknownResource(_) => {
                OpenError::new(OpenErrorReason::Parse, err.to_string())
            }
        })?;

        let saved = match self.sessions.load(&publication_id) {
            Ok(saved) => saved,
            Err(err) => {
                log::warn!("Failed to load session {}: {}", publication_id, err);
                None
            }
        };
        cancel.checkpoint()?;

        let mut engine = PaginationEngine::new(
            publication_id.clone(),
            index,
            &reading_order,
            viewport,
            Arc::clone(&self.measurer),
        )
        .with_cache(self.cache.clone())
        .with_page_map_store(Arc::clone(&self.page_maps));
        if let Some(sink) = &self.diagnostic_sink {
            let sink = Arc::clone(sink);
            engine.set_diagnostic_sink(move |diagnostic| {
                if let Ok(mut sink) = sink.lock() {
                    sink(diagnostic);
                }
            });
        }

        let restored = saved.as_ref().and_then(|session| {
            match engine.locate(&*handle, &session.last_locator) {
                Ok(_) => engine.current_locator(),
                Err(err) => {
                    log::warn!(
                        "Saved position {} no longer resolves: {}",
                        session.last_locator.href(),
                        err
                    );
                    None
                }
            }
        });
        let locator = match restored {
            Some(locator) => locator,
            None => engine.open_at_start(&*handle, cancel).map_err(|err| match err {
                PaginationError::Cancelled => OpenError::superseded(),
                other => OpenError::new(OpenErrorReason::Layout, other.to_string()),
            })?,
        };
        cancel.checkpoint()?;

        let mut opened = OpenPublication {
            handle,
            engine,
            session: Session::new(publication_id, locator.clone(), viewport),
        };
        opened.record(&self.sessions, locator);
        Ok(opened)
    }

    /// Close the open publication, persisting its session best-effort.
    pub fn close(&self) {
        let _turn = self.queue.enter();
        self.close_locked();
    }

    fn close_locked(&self) {
        let previous = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut previous) = previous {
            let locator = previous
                .engine
                .current_locator()
                .unwrap_or_else(|| previous.session.last_locator.clone());
            previous.record(&self.sessions, locator);
            log::debug!("Closed {}", previous.session.publication_id);
        }
    }

    fn with_open<T>(
        &self,
        op: impl FnOnce(&mut OpenPublication, &SessionStore) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let _turn = self.queue.enter();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let open = state.as_mut().ok_or(BridgeError::NoPublicationOpen)?;
        op(open, &self.sessions)
    }

    fn with_open_read<T>(
        &self,
        op: impl FnOnce(&OpenPublication) -> T,
    ) -> Result<T, BridgeError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .as_ref()
            .map(op)
            .ok_or(BridgeError::NoPublicationOpen)
    }

    /// Move one page in reading order.
    pub fn advance(&self, direction: Direction) -> Result<Locator, BridgeError> {
        self.with_open(|open, sessions| open.advance(sessions, direction))
    }

    /// Turn the page for a tap on `edge`; `None` when the edge does not turn
    /// pages in the current reading progression.
    pub fn turn_page(&self, edge: ScreenEdge) -> Result<Option<Locator>, BridgeError> {
        self.with_open(|open, sessions| {
            let direction = open.engine.viewport().progression.direction_for_edge(edge);
            match direction {
                Some(direction) => open.advance(sessions, direction).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Jump to an externally supplied locator.
    pub fn locate(&self, locator: &Locator) -> Result<ViewportPosition, BridgeError> {
        self.with_open(|open, sessions| open.locate(sessions, locator))
    }

    /// Jump to a table-of-contents href, honouring its fragment.
    pub fn locate_href(&self, href: &str) -> Result<ViewportPosition, BridgeError> {
        let (base, fragment) = split_href_fragment(href);
        let locator =
            Locator::new(base, "").with_fragment_anchor(fragment.map(ToOwned::to_owned));
        self.locate(&locator)
    }

    /// Jump to a publication-wide progression in `[0, 1]`.
    pub fn go_to_progression(&self, total_progression: f64) -> Result<ViewportPosition, BridgeError> {
        self.with_open(|open, sessions| {
            let position = open
                .engine
                .go_to_progression(&*open.handle, total_progression)?;
            if let Some(current) = open.engine.current_locator() {
                open.record(sessions, current);
            }
            Ok(position)
        })
    }

    /// Apply a new viewport. Layout-affecting changes re-measure lazily.
    pub fn set_viewport(&self, viewport: ViewportConfig) -> Result<(), BridgeError> {
        viewport.validate()?;
        self.with_open(|open, _| {
            open.apply_viewport(viewport);
            Ok(())
        })
    }

    /// Change one setting of the viewport in effect when this call's turn comes.
    fn update_viewport(
        &self,
        derive: impl FnOnce(ViewportConfig) -> ViewportConfig,
    ) -> Result<(), BridgeError> {
        self.with_open(|open, _| {
            let viewport = derive(*open.engine.viewport());
            viewport.validate()?;
            open.apply_viewport(viewport);
            Ok(())
        })
    }

    pub fn set_font_scale(&self, font_scale: f32) -> Result<(), BridgeError> {
        self.update_viewport(|viewport| viewport.with_font_scale(font_scale))
    }

    pub fn set_line_height_scale(&self, line_height_scale: f32) -> Result<(), BridgeError> {
        self.update_viewport(|viewport| viewport.with_line_height_scale(line_height_scale))
    }

    /// Set the theme by name (`light`, `dark`, `sepia`).
    pub fn set_theme(&self, theme: &str) -> Result<(), BridgeError> {
        let theme = Theme::parse(theme).ok_or_else(|| BridgeError::UnknownSetting {
            setting: "theme",
            value: theme.to_string(),
        })?;
        self.update_viewport(|viewport| viewport.with_theme(theme))
    }

    /// Set the reading progression by name (`ltr`, `rtl`, `ttb`, `btt`).
    pub fn set_reading_progression(&self, progression: &str) -> Result<(), BridgeError> {
        let progression =
            ReadingProgression::parse(progression).ok_or_else(|| BridgeError::UnknownSetting {
                setting: "reading progression",
                value: progression.to_string(),
            })?;
        self.update_viewport(|viewport| viewport.with_progression(progression))
    }

    /// Locator of the page on screen.
    ///
    /// Fails only when no publication is open. If the page on screen cannot
    /// be re-derived, the last recorded locator is returned.
    pub fn current_locator(&self) -> Result<Locator, BridgeError> {
        let fresh = self.with_open_read(|open| {
            if open.engine.needs_refresh() {
                None
            } else {
                open.engine.current_locator()
            }
        })?;
        if let Some(locator) = fresh {
            return Ok(locator);
        }
        self.with_open(|open, _| match open.engine.refresh(&*open.handle) {
            Ok(locator) => Ok(locator),
            Err(err) => {
                log::warn!(
                    "Could not refresh position in {}: {}",
                    open.session.publication_id,
                    err
                );
                Ok(open.session.last_locator.clone())
            }
        })
    }

    /// Concrete page under the current viewport.
    pub fn current_position(&self) -> Result<ViewportPosition, BridgeError> {
        self.current_locator()?;
        self.with_open_read(|open| open.engine.current_position())?
            .ok_or(BridgeError::NoPublicationOpen)
    }

    pub fn viewport(&self) -> Result<ViewportConfig, BridgeError> {
        self.with_open_read(|open| *open.engine.viewport())
    }

    pub fn metadata(&self) -> Result<PublicationMetadata, BridgeError> {
        self.with_open_read(|open| open.handle.metadata().clone())
    }

    pub fn table_of_contents(&self) -> Result<Navigation, BridgeError> {
        self.with_open_read(|open| open.handle.navigation().clone())
    }

    /// In-memory session of the open publication.
    pub fn session(&self) -> Result<Session, BridgeError> {
        self.with_open_read(|open| open.session.clone())
    }

    /// Delete the stored session and cached page maps of `publication_id`.
    ///
    /// The open publication, if it is the one forgotten, keeps its in-memory
    /// position and writes a fresh session on its next page turn.
    pub fn forget_session(&self, publication_id: &PublicationId) -> Result<(), BridgeError> {
        let _turn = self.queue.enter();
        self.cache.remove_publication(publication_id);
        self.sessions
            .delete(publication_id)
            .map_err(|err| BridgeError::Storage(err.to_string()))
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut open) = state {
            if let Some(locator) = open.engine.current_locator() {
                open.record(&self.sessions, locator);
            }
        }
    }
}
