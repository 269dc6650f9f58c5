pub use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

pub static DEBUG: DebugMetrics = DebugMetrics::new();

pub struct DebugMetrics {
    scrape_count: AtomicUsize,
    scrape_errors: AtomicUsize,
    series_count: AtomicUsize,
    derived_count: AtomicUsize,
    skipped_count: AtomicUsize,
    publish_count: AtomicUsize,
}

impl DebugMetrics {
    pub const fn new() -> Self {
        DebugMetrics {
            scrape_count: AtomicUsize::new(0),
            scrape_errors: AtomicUsize::new(0),
            series_count: AtomicUsize::new(0),
            derived_count: AtomicUsize::new(0),
            skipped_count: AtomicUsize::new(0),
            publish_count: AtomicUsize::new(0),
        }
    }

    pub fn scrape_succeeded(&self) {
        self.scrape_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scrape_failed(&self) {
        self.scrape_count.fetch_add(1, Ordering::Relaxed);
        self.scrape_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn series_scraped(&self, n: usize) {
        self.series_count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn series_derived(&self, n: usize) {
        self.derived_count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn series_skipped(&self) {
        self.skipped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published(&self) {
        self.publish_count.fetch_add(1, Ordering::Relaxed);
    }

    // Log the current metrics and reset the counters
    pub fn publish(&self) {
        let scrape_count = self.scrape_count.swap(0, Ordering::Relaxed);
        let scrape_errors = self.scrape_errors.swap(0, Ordering::Relaxed);
        let series_count = self.series_count.swap(0, Ordering::Relaxed);
        let derived_count = self.derived_count.swap(0, Ordering::Relaxed);
        let skipped_count = self.skipped_count.swap(0, Ordering::Relaxed);
        let publish_count = self.publish_count.swap(0, Ordering::Relaxed);
        info!(
            scraped = scrape_count,
            scrape_errors,
            series = series_count,
            derived = derived_count,
            skipped = skipped_count,
            published = publish_count,
            "debug counters"
        );
    }
}
