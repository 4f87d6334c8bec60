//! Mirror index cycling for public URLs

use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of mirrored asset hosts
pub const DEFAULT_MIRRORS: usize = 4;

/// Rolling counter yielding 1, 2, ..., N, 1, ... for URL templates
///
/// One instance is shared by every backend that renders the same URL
/// template. Under contention the sequence may interleave; each call still
/// gets a value in range.
#[derive(Debug)]
pub struct UrlCycler {
    counter: AtomicUsize,
    mirrors: usize,
}

impl Default for UrlCycler {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlCycler {
    pub fn new() -> Self {
        Self::with_mirrors(DEFAULT_MIRRORS)
    }

    pub fn with_mirrors(mirrors: usize) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            mirrors: mirrors.max(1),
        }
    }

    pub fn mirrors(&self) -> usize {
        self.mirrors
    }

    /// Next mirror index, in `1..=mirrors`
    pub fn next_index(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % self.mirrors + 1
    }

    /// Restart the cycle at 1
    pub fn reset(&self) {
        self.seed(0);
    }

    /// Position the cycle so the next call returns `position % mirrors + 1`
    pub fn seed(&self, position: usize) {
        self.counter.store(position, Ordering::Relaxed);
    }
}
