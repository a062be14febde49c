//! Lazy per-resource pagination.
//!
//! Each reading-order resource moves through
//! `Unloaded -> Measuring -> Paginated`, and a layout-changing viewport turns
//! every `Paginated` resource `Stale`; stale resources are re-measured on
//! next access. Page maps are shared across engines through
//! [`PageMapCache`], keyed by publication, resource and layout profile, and
//! may be persisted through a [`PageMapStore`].

use core::fmt;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use pagemark::{
    Direction, LayoutProfileId, Locator, PositionIndex, Publication, PublicationId, ResourceRef,
    ViewportConfig, ViewportPosition,
};

use crate::measure::{LayoutError, LayoutMeasurer};

/// Tolerance when mapping a progression onto a page grid, so that
/// `k / n` maps back to page `k` despite rounding.
const PAGE_SNAP_EPSILON: f64 = 1e-9;
const DEFAULT_CACHE_ENTRY_LIMIT: usize = 4096;

/// Cancellation hook for long-running pagination.
pub trait CancelToken {
    fn is_cancelled(&self) -> bool;
}

/// No-op cancellation token.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Runtime diagnostics from pagination.
#[derive(Clone, Debug, PartialEq)]
pub enum PaginationDiagnostic {
    MeasureTimeMs { resource_index: usize, ms: u32 },
    CacheHit { resource_index: usize, page_count: usize },
    CacheMiss { resource_index: usize },
    LayoutFailed { resource_index: usize, reason: String },
    ResourceSkipped { resource_index: usize },
}

type DiagnosticCallback = Arc<Mutex<Box<dyn FnMut(PaginationDiagnostic) + Send + 'static>>>;
type DiagnosticSink = Option<DiagnosticCallback>;

/// Pagination failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaginationError {
    /// No reading position has been established yet.
    NotPositioned,
    /// No further page in the requested direction.
    EndOfPublication,
    /// The href is not part of the reading order.
    ResourceNotFound(String),
    /// The resource could not be measured and is unusable under the current layout.
    Layout { href: String, reason: String },
    Cancelled,
}

impl fmt::Display for PaginationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPositioned => write!(f, "no reading position established"),
            Self::EndOfPublication => write!(f, "end of publication"),
            Self::ResourceNotFound(href) => write!(f, "resource not in reading order: {}", href),
            Self::Layout { href, reason } => write!(f, "layout of {} failed: {}", href, reason),
            Self::Cancelled => write!(f, "pagination cancelled"),
        }
    }
}

impl std::error::Error for PaginationError {}

/// Page boundaries of one resource under one layout profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageMap {
    href: String,
    profile: LayoutProfileId,
    content_len: usize,
    breaks: Vec<usize>,
}

impl PageMap {
    /// Build a page map from measured page-start offsets.
    ///
    /// An empty list means a single page. A missing leading `0` is inserted;
    /// offsets that decrease, repeat, or fall outside the content are rejected.
    pub fn from_breaks(
        href: impl Into<String>,
        profile: LayoutProfileId,
        content_len: usize,
        mut breaks: Vec<usize>,
    ) -> Result<Self, LayoutError> {
        if breaks.first() != Some(&0) {
            breaks.insert(0, 0);
        }
        for pair in breaks.windows(2) {
            if pair[1] <= pair[0] {
                return Err(LayoutError::new(format!(
                    "page breaks not strictly increasing at offset {}",
                    pair[1]
                )));
            }
        }
        if let Some(last) = breaks.last() {
            if *last > 0 && *last >= content_len {
                return Err(LayoutError::new(format!(
                    "page break {} beyond content length {}",
                    last, content_len
                )));
            }
        }
        Ok(Self {
            href: href.into(),
            profile,
            content_len,
            breaks,
        })
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn profile(&self) -> LayoutProfileId {
        self.profile
    }

    pub fn content_len(&self) -> usize {
        self.content_len
    }

    /// Page-start byte offsets; the first is always `0`.
    pub fn breaks(&self) -> &[usize] {
        &self.breaks
    }

    /// Always at least one.
    pub fn page_count(&self) -> usize {
        self.breaks.len()
    }

    pub fn page_start(&self, page_index: usize) -> Option<usize> {
        self.breaks.get(page_index).copied()
    }

    /// Byte range covered by `page_index`.
    pub fn page_range(&self, page_index: usize) -> Option<Range<usize>> {
        let start = self.page_start(page_index)?;
        let end = self
            .breaks
            .get(page_index + 1)
            .copied()
            .unwrap_or(self.content_len.max(start));
        Some(start..end)
    }

    /// Page containing byte `offset`; offsets past the end land on the last page.
    pub fn page_for_offset(&self, offset: usize) -> usize {
        self.breaks
            .partition_point(|start| *start <= offset)
            .saturating_sub(1)
    }

    /// `page_index / page_count`, so the first page is `0.0` and the last is
    /// strictly below `1.0` unless the resource has a single page.
    pub fn chapter_progression(&self, page_index: usize) -> f64 {
        let count = self.page_count();
        if count <= 1 {
            return 0.0;
        }
        page_index.min(count - 1) as f64 / count as f64
    }

    /// Page whose progression band contains `progression`.
    pub fn page_for_progression(&self, progression: f64) -> usize {
        let count = self.page_count();
        let progression = pagemark::normalize_progression(progression);
        let page = (progression * count as f64 + PAGE_SNAP_EPSILON).floor() as usize;
        page.min(count - 1)
    }
}

/// Key of a shared page map.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageMapKey {
    pub publication: PublicationId,
    pub resource_index: usize,
    pub profile: LayoutProfileId,
}

/// Process-wide page map cache shared by pagination engines.
///
/// Entries are written only by the engine that measured them and read by
/// anyone. When the entry limit is reached, entries for other layout
/// profiles are evicted first.
#[derive(Clone, Debug)]
pub struct PageMapCache {
    inner: Arc<RwLock<HashMap<PageMapKey, Arc<PageMap>>>>,
    max_entries: usize,
}

impl Default for PageMapCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PageMapCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            max_entries: DEFAULT_CACHE_ENTRY_LIMIT,
        }
    }

    /// Values of `0` are treated as `1`.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn get(&self, key: &PageMapKey) -> Option<Arc<PageMap>> {
        self.inner.read().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: PageMapKey, map: Arc<PageMap>) {
        let Ok(mut entries) = self.inner.write() else {
            return;
        };
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let profile = key.profile;
            entries.retain(|existing, _| existing.profile == profile);
            if entries.len() >= self.max_entries {
                entries.clear();
            }
        }
        entries.insert(key, map);
    }

    /// Drop every entry of `publication`.
    pub fn remove_publication(&self, publication: &PublicationId) {
        if let Ok(mut entries) = self.inner.write() {
            entries.retain(|key, _| &key.publication != publication);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage hooks for persisted page maps.
pub trait PageMapStore: Send + Sync {
    /// Load the page map of `resource_index` under `profile`, if available.
    fn load_page_map(
        &self,
        _publication: &PublicationId,
        _profile: LayoutProfileId,
        _resource_index: usize,
        _href: &str,
    ) -> Option<PageMap> {
        None
    }

    /// Persist a measured page map.
    fn store_page_map(&self, _publication: &PublicationId, _resource_index: usize, _map: &PageMap) {}
}

/// Page map store that persists nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPageMapStore;

impl PageMapStore for NoPageMapStore {}

/// Layout phase of a reading-order resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceLayoutState {
    Unloaded,
    Measuring,
    Paginated(Arc<PageMap>),
    /// Measured under a previous viewport; re-measured on next access.
    Stale(Arc<PageMap>),
}

impl ResourceLayoutState {
    pub fn is_paginated(&self) -> bool {
        matches!(self, Self::Paginated(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

#[derive(Clone, Debug)]
struct ResourceSlot {
    resource: ResourceRef,
    state: ResourceLayoutState,
    /// Layout profile under which measuring last failed.
    failed_under: Option<LayoutProfileId>,
}

/// Current page, plus the byte offset that keeps it stable across reflows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ReadingCursor {
    resource_index: usize,
    page_index: usize,
    /// Start offset of the page the reader last navigated to. A reflow lands
    /// on whichever page contains it.
    anchor_offset: usize,
}

/// Per-publication pagination state.
pub struct PaginationEngine {
    publication_id: PublicationId,
    index: PositionIndex,
    slots: Vec<ResourceSlot>,
    viewport: ViewportConfig,
    profile: LayoutProfileId,
    measurer: Arc<dyn LayoutMeasurer>,
    cache: PageMapCache,
    store: Arc<dyn PageMapStore>,
    cursor: Option<ReadingCursor>,
    diagnostic_sink: DiagnosticSink,
}

impl fmt::Debug for PaginationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationEngine")
            .field("publication_id", &self.publication_id)
            .field("resources", &self.slots.len())
            .field("viewport", &self.viewport)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl PaginationEngine {
    /// Engine for `reading_order`, which must match the order `index` was built from.
    pub fn new(
        publication_id: PublicationId,
        index: PositionIndex,
        reading_order: &[ResourceRef],
        viewport: ViewportConfig,
        measurer: Arc<dyn LayoutMeasurer>,
    ) -> Self {
        let slots = reading_order
            .iter()
            .map(|resource| ResourceSlot {
                resource: resource.clone(),
                state: ResourceLayoutState::Unloaded,
                failed_under: None,
            })
            .collect();
        Self {
            publication_id,
            index,
            slots,
            profile: viewport.layout_profile_id(),
            viewport,
            measurer,
            cache: PageMapCache::new(),
            store: Arc::new(NoPageMapStore),
            cursor: None,
            diagnostic_sink: None,
        }
    }

    /// Share page maps with other engines through `cache`.
    pub fn with_cache(mut self, cache: PageMapCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_page_map_store(mut self, store: Arc<dyn PageMapStore>) -> Self {
        self.store = store;
        self
    }

    /// Register or replace the diagnostics sink.
    pub fn set_diagnostic_sink<F>(&mut self, sink: F)
    where
        F: FnMut(PaginationDiagnostic) + Send + 'static,
    {
        self.diagnostic_sink = Some(Arc::new(Mutex::new(Box::new(sink))));
    }

    fn emit_diagnostic(&self, diagnostic: PaginationDiagnostic) {
        let Some(sink) = &self.diagnostic_sink else {
            return;
        };
        if let Ok(mut sink) = sink.lock() {
            sink(diagnostic);
        }
    }

    pub fn publication_id(&self) -> &PublicationId {
        &self.publication_id
    }

    pub fn position_index(&self) -> &PositionIndex {
        &self.index
    }

    pub fn viewport(&self) -> &ViewportConfig {
        &self.viewport
    }

    pub fn resource_count(&self) -> usize {
        self.slots.len()
    }

    pub fn resource_state(&self, resource_index: usize) -> Option<&ResourceLayoutState> {
        self.slots.get(resource_index).map(|slot| &slot.state)
    }

    /// Whether `resource_index` failed to measure under the current layout.
    ///
    /// Unusable resources are skipped until the next layout change.
    pub fn is_unusable(&self, resource_index: usize) -> bool {
        self.slots
            .get(resource_index)
            .is_some_and(|slot| slot.failed_under == Some(self.profile))
    }

    /// Whether the current resource must be re-measured before its locator is exact.
    pub fn needs_refresh(&self) -> bool {
        let Some(cursor) = self.cursor else {
            return false;
        };
        self.slots
            .get(cursor.resource_index)
            .is_some_and(|slot| !slot.state.is_paginated())
    }

    /// Locator of the current page, or `None` before the engine is positioned.
    ///
    /// Computed from the resource's current page map, which may be stale
    /// until [`PaginationEngine::refresh`] runs.
    pub fn current_locator(&self) -> Option<Locator> {
        let cursor = self.cursor?;
        let map = self.slot_map(cursor.resource_index)?;
        Some(self.locator_for(cursor.resource_index, cursor.page_index, &map))
    }

    /// Current page under the current viewport.
    pub fn current_position(&self) -> Option<ViewportPosition> {
        let cursor = self.cursor?;
        let map = self.slot_map(cursor.resource_index)?;
        Some(ViewportPosition {
            resource_index: cursor.resource_index,
            href: self.slots[cursor.resource_index].resource.href.clone(),
            page_index: cursor.page_index,
            page_count: map.page_count(),
        })
    }

    fn slot_map(&self, resource_index: usize) -> Option<Arc<PageMap>> {
        match &self.slots.get(resource_index)?.state {
            ResourceLayoutState::Paginated(map) | ResourceLayoutState::Stale(map) => {
                Some(Arc::clone(map))
            }
            ResourceLayoutState::Unloaded | ResourceLayoutState::Measuring => None,
        }
    }

    fn locator_for(&self, resource_index: usize, page_index: usize, map: &PageMap) -> Locator {
        let resource = &self.slots[resource_index].resource;
        let chapter = map.chapter_progression(page_index);
        let total = self
            .index
            .progression_for_index(resource_index, chapter)
            .unwrap_or(0.0);
        Locator::new(resource.href.clone(), resource.media_type.clone())
            .with_chapter_progression(chapter)
            .with_total_progression(total)
            .with_page_index(Some(page_index))
    }

    /// Measure `resource_index` unless it already has a fresh page map.
    pub fn ensure_paginated(
        &mut self,
        publication: &dyn Publication,
        resource_index: usize,
    ) -> Result<Arc<PageMap>, PaginationError> {
        let slot = self
            .slots
            .get(resource_index)
            .ok_or_else(|| PaginationError::ResourceNotFound(resource_index.to_string()))?;
        let href = slot.resource.href.clone();
        if let ResourceLayoutState::Paginated(map) = &slot.state {
            return Ok(Arc::clone(map));
        }
        if slot.failed_under == Some(self.profile) {
            return Err(PaginationError::Layout {
                href,
                reason: "resource previously failed to lay out".to_string(),
            });
        }

        let profile = self.profile;
        let key = PageMapKey {
            publication: self.publication_id.clone(),
            resource_index,
            profile,
        };
        let shared = self.cache.get(&key).or_else(|| {
            self.store
                .load_page_map(&self.publication_id, profile, resource_index, &href)
                .filter(|map| map.href() == href && map.profile() == profile)
                .map(Arc::new)
                .inspect(|map| self.cache.insert(key.clone(), Arc::clone(map)))
        });
        if let Some(map) = shared {
            self.emit_diagnostic(PaginationDiagnostic::CacheHit {
                resource_index,
                page_count: map.page_count(),
            });
            self.slots[resource_index].state = ResourceLayoutState::Paginated(Arc::clone(&map));
            return Ok(map);
        }
        self.emit_diagnostic(PaginationDiagnostic::CacheMiss { resource_index });

        let previous = self.slot_map(resource_index);
        self.slots[resource_index].state = ResourceLayoutState::Measuring;
        let started = Instant::now();
        let measured = publication
            .fetch_resource(&href)
            .map_err(|err| LayoutError::new(err.to_string()))
            .and_then(|content| {
                let breaks = self.measurer.measure(&content, &self.viewport)?;
                PageMap::from_breaks(href.clone(), profile, content.len(), breaks)
            });
        let map = match measured {
            Ok(map) => Arc::new(map),
            Err(err) => {
                log::warn!(
                    "Layout failed for resource {} ({}): {}",
                    resource_index,
                    href,
                    err.reason
                );
                let slot = &mut self.slots[resource_index];
                slot.state = previous
                    .map_or(ResourceLayoutState::Unloaded, ResourceLayoutState::Stale);
                slot.failed_under = Some(profile);
                self.emit_diagnostic(PaginationDiagnostic::LayoutFailed {
                    resource_index,
                    reason: err.reason.clone(),
                });
                return Err(PaginationError::Layout {
                    href,
                    reason: err.reason,
                });
            }
        };
        let elapsed = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
        self.emit_diagnostic(PaginationDiagnostic::MeasureTimeMs {
            resource_index,
            ms: elapsed,
        });
        log::debug!(
            "Measured resource {} ({}) into {} pages in {}ms",
            resource_index,
            href,
            map.page_count(),
            elapsed
        );

        self.cache.insert(key, Arc::clone(&map));
        self.store
            .store_page_map(&self.publication_id, resource_index, &map);
        let slot = &mut self.slots[resource_index];
        slot.state = ResourceLayoutState::Paginated(Arc::clone(&map));
        slot.failed_under = None;
        Ok(map)
    }

    /// Position on the first page of the first resource that lays out.
    pub fn open_at_start(
        &mut self,
        publication: &dyn Publication,
        cancel: &dyn CancelToken,
    ) -> Result<Locator, PaginationError> {
        let mut last_error = None;
        for resource_index in 0..self.slots.len() {
            if cancel.is_cancelled() {
                return Err(PaginationError::Cancelled);
            }
            match self.ensure_paginated(publication, resource_index) {
                Ok(map) => {
                    self.set_cursor(resource_index, 0, &map);
                    return Ok(self.locator_for(resource_index, 0, &map));
                }
                Err(err @ PaginationError::Layout { .. }) => {
                    self.emit_diagnostic(PaginationDiagnostic::ResourceSkipped { resource_index });
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(PaginationError::NotPositioned))
    }

    /// Re-measure the current resource if stale and re-derive the current page
    /// from the reading anchor.
    ///
    /// If the current resource no longer lays out, the position is kept and
    /// the locator of its last laid-out page is returned. The resource is
    /// measured again after the next layout change.
    pub fn refresh(&mut self, publication: &dyn Publication) -> Result<Locator, PaginationError> {
        let cursor = self.cursor.ok_or(PaginationError::NotPositioned)?;
        let map = match self.ensure_paginated(publication, cursor.resource_index) {
            Ok(map) => map,
            Err(err @ PaginationError::Layout { .. }) => {
                let kept = self.current_locator().ok_or(err)?;
                log::debug!(
                    "Resource {} does not lay out under the current viewport; keeping page {}",
                    cursor.resource_index,
                    cursor.page_index
                );
                return Ok(kept);
            }
            Err(err) => return Err(err),
        };
        let page_index = map.page_for_offset(cursor.anchor_offset);
        self.cursor = Some(ReadingCursor {
            page_index,
            ..cursor
        });
        Ok(self.locator_for(cursor.resource_index, page_index, &map))
    }

    /// Move one page in `direction`, crossing resource boundaries.
    ///
    /// Resources that fail to lay out are skipped. At either end of the
    /// publication the position is left unchanged and
    /// [`PaginationError::EndOfPublication`] is returned.
    pub fn advance(
        &mut self,
        publication: &dyn Publication,
        direction: Direction,
    ) -> Result<Locator, PaginationError> {
        let cursor = self.cursor.ok_or(PaginationError::NotPositioned)?;
        let map = match self.ensure_paginated(publication, cursor.resource_index) {
            Ok(map) => {
                let page_index = map.page_for_offset(cursor.anchor_offset);
                Some((map, page_index))
            }
            Err(PaginationError::Layout { .. }) => None,
            Err(err) => return Err(err),
        };

        if let Some((map, page_index)) = &map {
            let next_page = match direction {
                Direction::Forward if page_index + 1 < map.page_count() => Some(page_index + 1),
                Direction::Backward if *page_index > 0 => Some(page_index - 1),
                _ => None,
            };
            if let Some(next_page) = next_page {
                self.set_cursor(cursor.resource_index, next_page, map);
                return Ok(self.locator_for(cursor.resource_index, next_page, map));
            }
        }

        let candidates: Vec<usize> = match direction {
            Direction::Forward => (cursor.resource_index + 1..self.slots.len()).collect(),
            Direction::Backward => (0..cursor.resource_index).rev().collect(),
        };
        for resource_index in candidates {
            if self.is_unusable(resource_index) {
                self.emit_diagnostic(PaginationDiagnostic::ResourceSkipped { resource_index });
                continue;
            }
            match self.ensure_paginated(publication, resource_index) {
                Ok(next_map) => {
                    let page_index = match direction {
                        Direction::Forward => 0,
                        Direction::Backward => next_map.page_count() - 1,
                    };
                    self.set_cursor(resource_index, page_index, &next_map);
                    return Ok(self.locator_for(resource_index, page_index, &next_map));
                }
                Err(PaginationError::Layout { .. }) => {
                    self.emit_diagnostic(PaginationDiagnostic::ResourceSkipped { resource_index });
                }
                Err(err) => return Err(err),
            }
        }

        // Keep the page the reader sees in sync with a reflowed current resource.
        if let Some((_, page_index)) = map {
            self.cursor = Some(ReadingCursor {
                page_index,
                ..cursor
            });
        }
        Err(PaginationError::EndOfPublication)
    }

    /// Resolve `locator` to a concrete page under the current viewport.
    ///
    /// A fragment anchor present in the resource content wins over the
    /// locator's chapter progression.
    pub fn locate(
        &mut self,
        publication: &dyn Publication,
        locator: &Locator,
    ) -> Result<ViewportPosition, PaginationError> {
        let resource_index = self
            .index
            .resource_index(locator.href())
            .ok_or_else(|| PaginationError::ResourceNotFound(locator.href().to_string()))?;
        let map = self.ensure_paginated(publication, resource_index)?;

        let href = self.slots[resource_index].resource.href.clone();
        let anchor_offset = locator.fragment_anchor().and_then(|anchor| {
            publication
                .fetch_resource(&href)
                .ok()
                .and_then(|content| crate::markup::anchor_offset(&content, anchor))
        });
        let page_index = match anchor_offset {
            Some(offset) => map.page_for_offset(offset),
            None => map.page_for_progression(locator.chapter_progression()),
        };
        self.set_cursor(resource_index, page_index, &map);
        Ok(ViewportPosition {
            resource_index,
            href,
            page_index,
            page_count: map.page_count(),
        })
    }

    /// Resolve a publication-wide progression and position there.
    pub fn go_to_progression(
        &mut self,
        publication: &dyn Publication,
        total_progression: f64,
    ) -> Result<ViewportPosition, PaginationError> {
        let (resource_index, chapter) = self.index.resource_index_for(total_progression);
        let resource = &self.slots[resource_index].resource;
        let locator = Locator::new(resource.href.clone(), resource.media_type.clone())
            .with_chapter_progression(chapter);
        self.locate(publication, &locator)
    }

    /// Apply a new viewport.
    ///
    /// Returns `true` when the layout changed and paginated resources went
    /// stale. Theme and reading-progression-only changes keep every page map.
    pub fn set_viewport(&mut self, viewport: ViewportConfig) -> bool {
        if viewport == self.viewport {
            return false;
        }
        let layout_changed = !self.viewport.same_layout(&viewport);
        self.viewport = viewport;
        if !layout_changed {
            return false;
        }
        self.profile = viewport.layout_profile_id();
        for slot in &mut self.slots {
            let state = core::mem::replace(&mut slot.state, ResourceLayoutState::Unloaded);
            slot.state = match state {
                ResourceLayoutState::Paginated(map) | ResourceLayoutState::Stale(map) => {
                    ResourceLayoutState::Stale(map)
                }
                other => other,
            };
        }
        true
    }

    fn set_cursor(&mut self, resource_index: usize, page_index: usize, map: &PageMap) {
        self.cursor = Some(ReadingCursor {
            resource_index,
            page_index,
            anchor_offset: map.page_start(page_index).unwrap_or(0),
        });
    }
}
