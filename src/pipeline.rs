//! Page-by-page, listing-by-listing scrape run
//!
//! Listings accumulate in a [`Batch`] that is handed to a [`BatchSink`] when
//! it reaches the configured size, at every page boundary, on interrupt and
//! at the end of the run. If the run panics, the batch is flushed while
//! unwinding so only the in-flight listing is lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use crate::config::ScraperConfig;
use crate::dom::{HtmlDocument, SelectorSet};
use crate::error::ListingError;
use crate::export::SnapshotExporter;
use crate::extract::Extractor;
use crate::fetch::PageSource;
use crate::listings::Paginator;
use crate::store::{CarStore, FlushReport};
use crate::types::ListingRecord;

/// Where flushed batches go
pub trait BatchSink {
    fn flush(&mut self, batch: &[ListingRecord]) -> FlushReport;
}

/// SQLite upsert plus a best-effort CSV snapshot of the same batch
pub struct PersistenceSink {
    store: CarStore,
    exporter: SnapshotExporter,
}

impl PersistenceSink {
    pub fn new(store: CarStore, exporter: SnapshotExporter) -> Self {
        Self { store, exporter }
    }

    pub fn into_store(self) -> CarStore {
        self.store
    }
}

impl BatchSink for PersistenceSink {
    fn flush(&mut self, batch: &[ListingRecord]) -> FlushReport {
        let report = self.store.save_batch(batch);
        if let Err(e) = self.exporter.export(batch) {
            warn!(error = %e, "CSV snapshot failed");
        }
        report
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub total_pages: u32,
    pub pages_processed: u32,
    pub listings_found: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub saved: FlushReport,
    pub flushes: usize,
    /// Total page count could not be determined
    pub aborted: bool,
    pub interrupted: bool,
}

/// Pending records; flushes whatever is left when dropped
struct Batch<'k, K: BatchSink> {
    records: Vec<ListingRecord>,
    sink: &'k mut K,
    saved: FlushReport,
    flushes: usize,
}

impl<'k, K: BatchSink> Batch<'k, K> {
    fn new(sink: &'k mut K, capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            sink,
            saved: FlushReport::default(),
            flushes: 0,
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn push(&mut self, record: ListingRecord) {
        self.records.push(record);
    }

    fn flush(&mut self) {
        if self.records.is_empty() {
            return;
        }
        let report = self.sink.flush(&self.records);
        self.saved.add(&report);
        self.flushes += 1;
        info!(
            batch = self.records.len(),
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            total_saved = self.saved.saved(),
            "Flushed batch"
        );
        self.records.clear();
    }

    fn finish(mut self) -> (FlushReport, usize) {
        self.flush();
        (self.saved, self.flushes)
    }
}

impl<K: BatchSink> Drop for Batch<'_, K> {
    fn drop(&mut self) {
        if self.records.is_empty() {
            return;
        }
        if thread::panicking() {
            error!(fatal = true, pending = self.records.len(), "Unexpected error, flushing pending listings");
        }
        self.flush();
    }
}

pub struct Pipeline<'a, S: PageSource> {
    source: &'a S,
    config: &'a ScraperConfig,
    selectors: &'a SelectorSet,
    shutdown: Arc<AtomicBool>,
}

impl<'a, S: PageSource> Pipeline<'a, S> {
    pub fn new(
        source: &'a S,
        config: &'a ScraperConfig,
        selectors: &'a SelectorSet,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            config,
            selectors,
            shutdown,
        }
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn scrape_listing(
        &self,
        paginator: &Paginator<'_, S>,
        extractor: &Extractor<'_>,
        listing_id: &str,
    ) -> Result<ListingRecord, ListingError> {
        let url = paginator.listing_url(listing_id);
        info!(listing_id, url = %url, "Scraping listing");
        let html = self.source.fetch(&url)?;
        let doc = HtmlDocument::parse(&html, self.selectors);
        extractor
            .extract(&doc, listing_id, &url)
            .map_err(|source| ListingError::Extract {
                listing_id: listing_id.to_string(),
                source,
            })
    }

    pub fn run<K: BatchSink>(&self, sink: &mut K) -> RunStats {
        let mut stats = RunStats::default();
        let paginator = Paginator::new(self.source, self.selectors, &self.config.base_url);
        let extractor = Extractor::new(self.config);
        let batch_size = self.config.batch_size.max(1);

        info!(base_url = %self.config.base_url, "Starting the car scraper");
        stats.total_pages = paginator.total_pages();
        info!(total_pages = stats.total_pages, "Total pages to scrape");
        if stats.total_pages == 0 {
            error!("Could not determine total pages. Exiting.");
            stats.aborted = true;
            return stats;
        }

        let last_page = match self.config.max_pages {
            Some(cap) => stats.total_pages.min(cap),
            None => stats.total_pages,
        };

        let mut batch = Batch::new(sink, batch_size);

        'pages: for page in 1..=last_page {
            if self.interrupted() {
                stats.interrupted = true;
                break;
            }
            info!(page, last_page, "Processing page");

            let listing_ids = paginator.listing_ids(page);
            stats.listings_found += listing_ids.len();

            for listing_id in &listing_ids {
                if self.interrupted() {
                    stats.interrupted = true;
                    break 'pages;
                }

                match self.scrape_listing(&paginator, &extractor, listing_id) {
                    Ok(record) => {
                        batch.push(record);
                        stats.extracted += 1;
                        info!(collected = stats.extracted, "Cars collected");
                    }
                    Err(e) => {
                        stats.skipped += 1;
                        warn!(listing_id = %listing_id, error = %e, "Skipping listing");
                    }
                }

                thread::sleep(self.config.delay());

                if batch.len() >= batch_size {
                    batch.flush();
                }
            }

            batch.flush();
            stats.pages_processed += 1;
        }

        if stats.interrupted {
            warn!(pending = batch.len(), "Interrupted, saving pending listings before exit");
        }
        let (saved, flushes) = batch.finish();
        stats.saved = saved;
        stats.flushes = flushes;

        info!(
            pages = stats.pages_processed,
            extracted = stats.extracted,
            skipped = stats.skipped,
            saved = stats.saved.saved(),
            failed = stats.saved.failed,
            "Scraping completed"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Selectors;
    use crate::fetch::testing::StaticPages;
    use std::panic::{self, AssertUnwindSafe};

    const BASE: &str = "https://turbo.az/autos";

    /// Records every flushed batch
    #[derive(Default)]
    struct RecordingSink {
        batches: Vec<Vec<ListingRecord>>,
    }

    impl BatchSink for RecordingSink {
        fn flush(&mut self, batch: &[ListingRecord]) -> FlushReport {
            self.batches.push(batch.to_vec());
            FlushReport {
                inserted: batch.len(),
                ..Default::default()
            }
        }
    }

    fn listing_html(title: &str, brand: &str) -> String {
        format!(
            r#"<h1 class="product-title">{title}</h1>
               <div class="product-price__i">12 500 ₼</div>
               <div class="product-properties__i">
                 <label class="product-properties__i-name">Marka</label>
                 <span class="product-properties__i-value">{brand}</span>
               </div>"#
        )
    }

    fn index_html(ids: &[&str]) -> String {
        ids.iter()
            .map(|id| format!(r#"<a class="products-i__link" href="/autos/{id}-car">car</a>"#))
            .collect()
    }

    fn test_config() -> ScraperConfig {
        ScraperConfig {
            delay_ms: 0,
            ..Default::default()
        }
    }

    fn selectors() -> SelectorSet {
        SelectorSet::compile(&Selectors::default()).unwrap()
    }

    #[test]
    fn test_single_page_run_flushes_once() {
        let pages = StaticPages::default()
            .with_page(BASE, "<html>no pagination</html>")
            .with_page(&format!("{BASE}?page=1"), &index_html(&["123", "456"]))
            .with_page(&format!("{BASE}/123"), &listing_html("BMW X5", "BMW"))
            .with_page(&format!("{BASE}/456"), &listing_html("Kia Rio", "Kia"));
        let config = test_config();
        let set = selectors();
        let mut sink = RecordingSink::default();

        let stats = Pipeline::new(&pages, &config, &set, Arc::default()).run(&mut sink);

        assert_eq!(sink.batches.len(), 1);
        let batch = &sink.batches[0];
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].listing_id, "123");
        assert_eq!(batch[0].brand.as_deref(), Some("BMW"));
        assert_eq!(batch[0].price, 12500.0);
        assert_eq!(batch[0].url, "https://turbo.az/autos/123");
        assert_eq!(batch[1].listing_id, "456");
        assert_eq!(batch[1].title, "Kia Rio");

        assert_eq!(stats.total_pages, 1);
        assert_eq!(stats.pages_processed, 1);
        assert_eq!(stats.extracted, 2);
        assert_eq!(stats.saved.inserted, 2);
        assert_eq!(stats.flushes, 1);
        assert!(!stats.aborted);
    }

    #[test]
    fn test_unreachable_index_aborts() {
        let pages = StaticPages::default();
        let config = test_config();
        let set = selectors();
        let mut sink = RecordingSink::default();

        let stats = Pipeline::new(&pages, &config, &set, Arc::default()).run(&mut sink);

        assert!(stats.aborted);
        assert!(sink.batches.is_empty());
        assert_eq!(pages.requested.borrow().len(), 1);
    }

    #[test]
    fn test_failed_listings_are_skipped() {
        let pages = StaticPages::default()
            .with_page(BASE, "<html></html>")
            .with_page(&format!("{BASE}?page=1"), &index_html(&["1", "2", "3"]))
            .with_page(&format!("{BASE}/1"), &listing_html("Opel Astra", "Opel"))
            // 2 is unreachable, 3 has no title
            .with_page(&format!("{BASE}/3"), "<div>removed</div>");
        let config = test_config();
        let set = selectors();
        let mut sink = RecordingSink::default();

        let stats = Pipeline::new(&pages, &config, &set, Arc::default()).run(&mut sink);

        assert_eq!(stats.listings_found, 3);
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(sink.batches.len(), 1);
        assert_eq!(sink.batches[0][0].listing_id, "1");
    }

    #[test]
    fn test_batch_size_and_page_boundary_flushes() {
        let mut pages = StaticPages::default().with_page(
            BASE,
            r#"<div class="pagination"><a>1</a><a>2</a><a>3</a><a>Sonrakı</a></div>"#,
        );
        pages = pages
            .with_page(&format!("{BASE}?page=1"), &index_html(&["1", "2", "3"]))
            .with_page(&format!("{BASE}?page=2"), &index_html(&["4"]));
        for id in ["1", "2", "3", "4"] {
            pages = pages.with_page(&format!("{BASE}/{id}"), &listing_html("Car", "Lada"));
        }
        let config = ScraperConfig {
            batch_size: 2,
            max_pages: Some(2),
            ..test_config()
        };
        let set = selectors();
        let mut sink = RecordingSink::default();

        let stats = Pipeline::new(&pages, &config, &set, Arc::default()).run(&mut sink);

        let sizes: Vec<usize> = sink.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
        assert_eq!(stats.total_pages, 3);
        assert_eq!(stats.pages_processed, 2);
        assert!(!pages
            .requested
            .borrow()
            .contains(&format!("{BASE}?page=3")));
    }

    #[test]
    fn test_interrupt_before_start_stops_without_fetching_listings() {
        let pages = StaticPages::default()
            .with_page(BASE, "<html></html>")
            .with_page(&format!("{BASE}?page=1"), &index_html(&["1"]));
        let config = test_config();
        let set = selectors();
        let mut sink = RecordingSink::default();
        let shutdown = Arc::new(AtomicBool::new(true));

        let stats = Pipeline::new(&pages, &config, &set, shutdown).run(&mut sink);

        assert!(stats.interrupted);
        assert_eq!(stats.pages_processed, 0);
        assert!(sink.batches.is_empty());
    }

    /// Raises the interrupt flag the first time a listing page is requested
    struct InterruptingPages {
        inner: StaticPages,
        shutdown: Arc<AtomicBool>,
    }

    impl PageSource for InterruptingPages {
        fn fetch(&self, url: &str) -> Result<String, crate::error::FetchError> {
            if url.ends_with("/1") {
                self.shutdown.store(true, Ordering::SeqCst);
            }
            self.inner.fetch(url)
        }
    }

    #[test]
    fn test_interrupt_mid_page_flushes_held_batch() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let pages = InterruptingPages {
            inner: StaticPages::default()
                .with_page(BASE, "<html></html>")
                .with_page(&format!("{BASE}?page=1"), &index_html(&["1", "2"]))
                .with_page(&format!("{BASE}/1"), &listing_html("Car 1", "Lada"))
                .with_page(&format!("{BASE}/2"), &listing_html("Car 2", "Lada")),
            shutdown: shutdown.clone(),
        };
        let config = test_config();
        let set = selectors();
        let mut sink = RecordingSink::default();

        let stats = Pipeline::new(&pages, &config, &set, shutdown).run(&mut sink);

        assert!(stats.interrupted);
        assert_eq!(stats.extracted, 1);
        assert_eq!(sink.batches.len(), 1);
        assert_eq!(sink.batches[0][0].listing_id, "1");
        assert!(!pages
            .inner
            .requested
            .borrow()
            .contains(&format!("{BASE}/2")));
    }

    /// Panics on one listing page to simulate an unexpected failure
    struct PanickingPages {
        inner: StaticPages,
    }

    impl PageSource for PanickingPages {
        fn fetch(&self, url: &str) -> Result<String, crate::error::FetchError> {
            if url.ends_with("/boom") {
                panic!("unexpected failure");
            }
            self.inner.fetch(url)
        }
    }

    #[test]
    fn test_panic_flushes_pending_batch() {
        let pages = PanickingPages {
            inner: StaticPages::default()
                .with_page(BASE, "<html></html>")
                .with_page(&format!("{BASE}?page=1"), &index_html(&["1", "boom"]))
                .with_page(&format!("{BASE}/1"), &listing_html("Car 1", "Lada")),
        };
        let config = test_config();
        let set = selectors();
        let mut sink = RecordingSink::default();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            Pipeline::new(&pages, &config, &set, Arc::default()).run(&mut sink)
        }));

        assert!(result.is_err());
        assert_eq!(sink.batches.len(), 1);
        assert_eq!(sink.batches[0][0].listing_id, "1");
    }

    #[test]
    fn test_failed_export_keeps_database_result() {
        let dir = tempfile::TempDir::new().unwrap();
        let not_a_dir = dir.path().join("occupied");
        std::fs::write(&not_a_dir, b"plain file").unwrap();
        let config = ScraperConfig {
            output_dir: not_a_dir.clone(),
            ..test_config()
        };
        let mut sink = PersistenceSink::new(
            CarStore::open_in_memory().unwrap(),
            SnapshotExporter::new(&config),
        );

        let report = sink.flush(&[crate::types::fixtures::record("42")]);

        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed, 0);
        assert!(not_a_dir.is_file());
        let store = sink.into_store();
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get("42").unwrap().is_some());
    }

    #[test]
    fn test_persistence_sink_saves_and_exports() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ScraperConfig {
            output_dir: dir.path().to_path_buf(),
            export_mode: crate::config::ExportMode::Overwrite,
            ..test_config()
        };
        let mut sink = PersistenceSink::new(
            CarStore::open_in_memory().unwrap(),
            SnapshotExporter::new(&config),
        );

        let report = sink.flush(&[crate::types::fixtures::record("1")]);
        assert_eq!(report.inserted, 1);
        assert!(dir.path().join(&config.csv_filename).exists());
        assert_eq!(sink.into_store().count().unwrap(), 1);
    }
}
