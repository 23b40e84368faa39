// Test doubles for the watcher seams.
//
// Four mocks matching the four trait boundaries:
// - MockFetcher (PageFetcher) - URL-keyed pages, byte bodies, failures
// - MemoryWatcherStore (WatcherStore) - in-memory records and media links
// - MockIngestor (MediaIngestor) - records ingested sources for dedup
// - RecordingNotifier (Notifier) - keeps every published event
//
// Plus builders for thread pages, listing JSON and watcher records.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Result, WatcherError};
use crate::traits::{Fetched, IngestRequest, MediaIngestor, Notifier, PageFetcher, WatcherStore};
use crate::types::{SourceType, WatcherEvent, WatcherRecord, WatcherSettings};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Settings with a long interval and timeout, five items per cycle.
pub fn settings() -> WatcherSettings {
    WatcherSettings {
        description: None,
        request_interval: 60_000,
        items_per_request: 5,
        inactivity_timeout: 3_600_000,
    }
}

pub fn board_record(url: &str) -> WatcherRecord {
    WatcherRecord::new(url, SourceType::BoardThread, settings())
}

pub fn listing_record(url: &str) -> WatcherRecord {
    WatcherRecord::new(url, SourceType::ListingFeed, settings())
}

/// A thread page with one `fileThumb` anchor per file name.
pub fn thread_html(board: &str, files: &[&str], closed: bool) -> String {
    let mut html = String::from("<html><body><div class=\"thread\">");
    if closed {
        html.push_str(
            r#"<img src="//s.4cdn.org/image/closed.gif" alt="Closed" title="Closed" class="retina">"#,
        );
    }
    for file in files {
        html.push_str(&format!(
            r#"<div class="file"><a class="fileThumb" href="//i.4cdn.org/{board}/{file}" target="_blank"><img src="//i.4cdn.org/{board}/s{file}"></a></div>"#
        ));
    }
    html.push_str("</div></body></html>");
    html
}

/// A listing page whose posts each link to one URL.
pub fn listing_json(after: Option<&str>, post_urls: &[&str]) -> String {
    let children: Vec<serde_json::Value> = post_urls
        .iter()
        .map(|url| serde_json::json!({"kind": "t3", "data": {"url": url}}))
        .collect();
    serde_json::json!({
        "kind": "Listing",
        "data": {"after": after, "children": children}
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// URL-keyed fetcher. Unregistered pages are an error; unregistered byte URLs
/// return the URL's own bytes unless marked failing.
/// Builder pattern: `.on_page()`, `.on_not_found()`, `.on_bytes()`, `.failing()`.
/// Pages can also be swapped between cycles with `set_page()`.
pub struct MockFetcher {
    pages: Mutex<HashMap<String, Fetched>>,
    bytes: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    text_delay: Duration,
    text_fetches: Mutex<HashMap<String, usize>>,
    byte_fetches: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            bytes: HashMap::new(),
            failing: HashSet::new(),
            text_delay: Duration::ZERO,
            text_fetches: Mutex::new(HashMap::new()),
            byte_fetches: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn on_page(self, url: &str, body: impl Into<String>) -> Self {
        self.set_page(url, body);
        self
    }

    pub fn on_not_found(self, url: &str) -> Self {
        self.set_not_found(url);
        self
    }

    pub fn on_bytes(mut self, url: &str, bytes: &[u8]) -> Self {
        self.bytes.insert(url.to_string(), bytes.to_vec());
        self
    }

    /// Make `fetch_bytes` fail for this URL.
    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// Hold every `fetch_text` call for `delay` before answering.
    pub fn with_text_delay(mut self, delay: Duration) -> Self {
        self.text_delay = delay;
        self
    }

    pub fn set_page(&self, url: &str, body: impl Into<String>) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Fetched::Found(body.into()));
    }

    pub fn set_not_found(&self, url: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Fetched::NotFound);
    }

    pub fn text_fetches(&self, url: &str) -> usize {
        self.text_fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_text_fetches(&self) -> usize {
        self.text_fetches.lock().unwrap().values().sum()
    }

    /// Every `fetch_bytes` URL, in call order.
    pub fn byte_fetches(&self) -> Vec<String> {
        self.byte_fetches.lock().unwrap().clone()
    }

    /// Highest number of `fetch_text` calls observed in flight at once.
    pub fn max_concurrent_text_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_text(&self, url: &str) -> Result<Fetched> {
        *self
            .text_fetches
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.text_delay.is_zero() {
            tokio::time::sleep(self.text_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| WatcherError::SourceUnreachable(format!("MockFetcher: no page registered for {url}")))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.byte_fetches.lock().unwrap().push(url.to_string());
        if self.failing.contains(url) {
            return Err(WatcherError::SourceUnreachable(format!(
                "MockFetcher: {url} returned 503 Service Unavailable"
            )));
        }
        Ok(self
            .bytes
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.as_bytes().to_vec()))
    }
}

// ---------------------------------------------------------------------------
// MemoryWatcherStore
// ---------------------------------------------------------------------------

struct MemoryStoreInner {
    records: HashMap<Uuid, WatcherRecord>,
    links: Vec<(Uuid, Uuid)>,
    saves: usize,
}

/// In-memory watcher table plus the media link table. Thread-safe via
/// interior Mutex. `save` of an unknown id is a no-op, like an UPDATE.
pub struct MemoryWatcherStore {
    inner: Mutex<MemoryStoreInner>,
    fail_deletes: AtomicBool,
    fail_links: AtomicBool,
}

impl Default for MemoryWatcherStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWatcherStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner {
                records: HashMap::new(),
                links: Vec::new(),
                saves: 0,
            }),
            fail_deletes: AtomicBool::new(false),
            fail_links: AtomicBool::new(false),
        }
    }

    /// Make `delete` fail until switched off again.
    pub fn set_failing_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    /// Make `link_media` fail until switched off again.
    pub fn set_failing_links(&self, on: bool) {
        self.fail_links.store(on, Ordering::SeqCst);
    }

    /// Pre-populate persisted records, as if left by a previous process.
    pub fn with_records(self, records: Vec<WatcherRecord>) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            for r in records {
                inner.records.insert(r.id, r);
            }
        }
        self
    }

    pub fn get(&self, id: Uuid) -> Option<WatcherRecord> {
        self.inner.lock().unwrap().records.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Media item ids linked to a watcher, in link order.
    pub fn links_for(&self, watcher_id: Uuid) -> Vec<Uuid> {
        self.inner
            .lock()
            .unwrap()
            .links
            .iter()
            .filter(|(w, _)| *w == watcher_id)
            .map(|(_, m)| *m)
            .collect()
    }

    pub fn save_count(&self) -> usize {
        self.inner.lock().unwrap().saves
    }
}

#[async_trait]
impl WatcherStore for MemoryWatcherStore {
    async fn load_all(&self) -> Result<Vec<WatcherRecord>> {
        let mut records: Vec<WatcherRecord> =
            self.inner.lock().unwrap().records.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn insert(&self, record: &WatcherRecord) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .records
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn save(&self, record: &WatcherRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.saves += 1;
        if let Some(existing) = inner.records.get_mut(&record.id) {
            *existing = record.clone();
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(WatcherError::Other(anyhow::anyhow!(
                "MemoryWatcherStore: delete failed"
            )));
        }
        self.inner.lock().unwrap().records.remove(&id);
        Ok(())
    }

    async fn link_media(&self, watcher_id: Uuid, media_item_id: Uuid) -> Result<()> {
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(WatcherError::Other(anyhow::anyhow!(
                "MemoryWatcherStore: link failed"
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.links.contains(&(watcher_id, media_item_id)) {
            inner.links.push((watcher_id, media_item_id));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockIngestor
// ---------------------------------------------------------------------------

/// Media storage double. Remembers every ingested source URL so
/// `has_item_with_source` behaves like the real lookup.
pub struct MockIngestor {
    items: Mutex<Vec<(Uuid, IngestRequest)>>,
    known_sources: Mutex<HashSet<String>>,
    fail_all: bool,
}

impl Default for MockIngestor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIngestor {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            known_sources: Mutex::new(HashSet::new()),
            fail_all: false,
        }
    }

    /// Pretend this source URL was ingested before.
    pub fn with_existing_source(self, source: &str) -> Self {
        self.known_sources.lock().unwrap().insert(source.to_string());
        self
    }

    /// Make every `ingest` call fail.
    pub fn failing_ingests(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Source URLs ingested through this double, in order.
    pub fn ingested_sources(&self) -> Vec<String> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, r)| r.source.clone())
            .collect()
    }

    pub fn ingested_ids(&self) -> Vec<Uuid> {
        self.items.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn extensions(&self) -> Vec<String> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.extension.clone())
            .collect()
    }
}

#[async_trait]
impl MediaIngestor for MockIngestor {
    async fn ingest(&self, request: IngestRequest) -> Result<Uuid> {
        if self.fail_all {
            return Err(WatcherError::Other(anyhow::anyhow!(
                "MockIngestor: ingest failed"
            )));
        }
        let id = Uuid::new_v4();
        if let Some(source) = &request.source {
            self.known_sources.lock().unwrap().insert(source.clone());
        }
        self.items.lock().unwrap().push((id, request));
        Ok(id)
    }

    async fn has_item_with_source(&self, source: &str) -> Result<bool> {
        Ok(self.known_sources.lock().unwrap().contains(source))
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<WatcherEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WatcherEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_for(&self, id: Uuid) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.watcher_id() == id)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, event: WatcherEvent) {
        self.events.lock().unwrap().push(event);
    }
}
