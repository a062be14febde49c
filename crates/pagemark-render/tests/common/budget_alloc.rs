use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Global allocator wrapper tracking live bytes, the high-water mark since the
/// last [`BudgetAlloc::reset`], and allocation calls.
pub struct BudgetAlloc {
    live: AtomicUsize,
    high_water: AtomicUsize,
    calls: AtomicUsize,
}

/// Snapshot taken after a measured closure.
#[derive(Clone, Copy, Debug)]
pub struct HeapUsage {
    pub peak_bytes: usize,
    pub retained_bytes: usize,
    pub allocations: usize,
}

impl BudgetAlloc {
    pub const fn new() -> Self {
        Self {
            live: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Restart peak tracking from the current live size.
    pub fn reset(&self) {
        let live = self.live.load(Ordering::SeqCst);
        self.high_water.store(live, Ordering::SeqCst);
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Run `f` and report heap growth relative to the bytes live before it.
    pub fn measure<T>(&self, f: impl FnOnce() -> T) -> (T, HeapUsage) {
        self.reset();
        let baseline = self.live.load(Ordering::SeqCst);
        let value = f();
        let usage = HeapUsage {
            peak_bytes: self.high_water.load(Ordering::SeqCst).saturating_sub(baseline),
            retained_bytes: self.live.load(Ordering::SeqCst).saturating_sub(baseline),
            allocations: self.calls.load(Ordering::SeqCst),
        };
        (value, usage)
    }

    fn grow(&self, bytes: usize) {
        let now = self.live.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn shrink(&self, bytes: usize) {
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                Some(live.saturating_sub(bytes))
            });
    }
}

unsafe impl GlobalAlloc for BudgetAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            self.grow(layout.size());
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        self.shrink(layout.size());
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            self.grow(layout.size());
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            if new_size >= layout.size() {
                self.grow(new_size - layout.size());
            } else {
                self.shrink(layout.size() - new_size);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        new_ptr
    }
}
