use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use pagemark::{
    ContainerError, ContainerParser, MemoryContainer, MemoryPublication, NavPoint, Navigation,
    Publication, PublicationIdentity, ViewportConfig,
};
use pagemark_render::{
    Bridge, BridgeOptions, KeyValueStore, LayoutError, LayoutMeasurer, MemoryKeyValueStore,
    StoreError,
};

pub const XHTML: &str = "application/xhtml+xml";
/// Content starting with this marker fails to measure.
pub const BROKEN_MARKER: &[u8] = b"<!-- broken -->";

static TEMP_NONCE: AtomicUsize = AtomicUsize::new(0);

pub fn temp_dir(label: &str) -> PathBuf {
    let nonce = TEMP_NONCE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "pagemark-render-{label}-{}-{nonce}",
        std::process::id()
    ))
}

pub fn viewport() -> ViewportConfig {
    ViewportConfig::for_display(480, 800)
}

/// One page per `bytes_per_page / font_scale` bytes. Counts calls.
#[derive(Debug)]
pub struct StrideMeasurer {
    bytes_per_page: usize,
    max_font_scale: Option<f32>,
    calls: AtomicUsize,
}

impl StrideMeasurer {
    pub fn new(bytes_per_page: usize) -> Self {
        Self {
            bytes_per_page,
            max_font_scale: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every measurement above `max` font scale.
    pub fn with_max_font_scale(mut self, max: f32) -> Self {
        self.max_font_scale = Some(max);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LayoutMeasurer for StrideMeasurer {
    fn measure(&self, content: &[u8], viewport: &ViewportConfig) -> Result<Vec<usize>, LayoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if content.starts_with(BROKEN_MARKER) {
            return Err(LayoutError::new("unrenderable markup"));
        }
        if self
            .max_font_scale
            .is_some_and(|max| viewport.font_scale > max)
        {
            return Err(LayoutError::new("font too large for layout"));
        }
        let stride = (self.bytes_per_page as f32 / viewport.font_scale).round().max(1.0) as usize;
        Ok((0..content.len().max(1)).step_by(stride).collect())
    }
}

/// `[ch1 (1000 bytes), ch2 (3000 bytes)]`; 2 and 6 pages at 500 bytes per page.
pub fn two_chapter_publication(title: &str) -> MemoryPublication {
    let navigation = Navigation {
        toc: vec![
            NavPoint::new("Chapter 1", "text/ch1.xhtml"),
            NavPoint::new("Chapter 2", "text/ch2.xhtml").with_children(vec![NavPoint::new(
                "Second half",
                "text/ch2.xhtml#second-half",
            )]),
        ],
        ..Navigation::default()
    };
    let mut ch2 = vec![b'b'; 1600];
    ch2.extend_from_slice(b"<p id=\"second-half\">");
    ch2.resize(3000, b'c');
    MemoryPublication::new(title)
        .with_resource("text/ch1.xhtml", XHTML, vec![b'a'; 1000])
        .with_resource("text/ch2.xhtml", XHTML, ch2)
        .with_navigation(navigation)
}

pub fn library() -> MemoryContainer {
    let mut broken = BROKEN_MARKER.to_vec();
    broken.resize(800, b'x');
    MemoryContainer::new()
        .with_publication("book-a", two_chapter_publication("Book A"))
        .with_publication("book-b", two_chapter_publication("Book B"))
        .with_publication(
            "gappy",
            MemoryPublication::new("Gappy")
                .with_resource("text/ch1.xhtml", XHTML, vec![b'a'; 600])
                .with_resource("text/ch2.xhtml", XHTML, broken)
                .with_resource("text/ch3.xhtml", XHTML, vec![b'c'; 600]),
        )
        .with_publication("empty", MemoryPublication::new("Empty"))
}

pub struct Harness {
    pub bridge: Bridge,
    pub container: Arc<MemoryContainer>,
    pub measurer: Arc<StrideMeasurer>,
    pub store: MemoryKeyValueStore,
}

pub fn harness() -> Harness {
    harness_with(MemoryKeyValueStore::new(), BridgeOptions::default())
}

pub fn harness_with(store: MemoryKeyValueStore, options: BridgeOptions) -> Harness {
    let container = Arc::new(library());
    let measurer = Arc::new(StrideMeasurer::new(500));
    let bridge = Bridge::with_options(
        Arc::clone(&container) as Arc<dyn ContainerParser>,
        Arc::clone(&measurer) as Arc<dyn LayoutMeasurer>,
        Arc::new(store.clone()),
        options,
    );
    Harness {
        bridge,
        container,
        measurer,
        store,
    }
}

/// Container whose `open_publication` for one key blocks until released.
pub struct GatedContainer {
    inner: MemoryContainer,
    gated_key: String,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedContainer {
    /// Returns the container, a receiver signalled when the gated open starts,
    /// and a sender that lets it continue.
    pub fn new(
        inner: MemoryContainer,
        gated_key: &str,
    ) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let container = Self {
            inner,
            gated_key: gated_key.to_string(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (container, entered_rx, release_tx)
    }

    pub fn open_handle_count(&self) -> usize {
        self.inner.open_handle_count()
    }
}

impl ContainerParser for GatedContainer {
    fn open_publication(
        &self,
        identity: &PublicationIdentity,
    ) -> Result<Box<dyn Publication>, ContainerError> {
        if identity.key() == self.gated_key {
            if let Ok(entered) = self.entered.lock() {
                let _ = entered.send(());
            }
            if let Ok(release) = self.release.lock() {
                let _ = release.recv_timeout(Duration::from_secs(10));
            }
        }
        self.inner.open_publication(identity)
    }
}

/// Store whose writes always fail.
#[derive(Debug, Default)]
pub struct ReadOnlyStore;

impl KeyValueStore for ReadOnlyStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "read-only store",
        )))
    }

    fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "read-only store",
        )))
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 10s");
        std::thread::sleep(Duration::from_millis(2));
    }
}
