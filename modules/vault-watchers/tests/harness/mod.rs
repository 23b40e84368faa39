//! Shared wiring for watcher integration tests: in-memory doubles behind the
//! real factory, state machine and service.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use vault_watchers::testing::{MemoryWatcherStore, MockFetcher, MockIngestor, RecordingNotifier};
use vault_watchers::{ActiveWatcher, ParserFactory, WatcherRecord, WatcherService};

pub const THREAD_URL: &str = "https://boards.4chan.org/wg/thread/7891234";
pub const LISTING_URL: &str = "https://www.reddit.com/r/wallpapers/";
pub const LISTING_REQUEST: &str = "https://old.reddit.com/r/wallpapers/new.json?limit=100";

pub fn media_url(file: &str) -> String {
    format!("https://i.4cdn.org/wg/{file}")
}

pub struct Harness {
    pub fetcher: Arc<MockFetcher>,
    pub store: Arc<MemoryWatcherStore>,
    pub ingestor: Arc<MockIngestor>,
    pub notifier: Arc<RecordingNotifier>,
    pub courtesy_delay: Duration,
}

impl Harness {
    pub fn new(fetcher: MockFetcher) -> Self {
        Self::with_parts(fetcher, MockIngestor::new(), MemoryWatcherStore::new())
    }

    pub fn with_parts(fetcher: MockFetcher, ingestor: MockIngestor, store: MemoryWatcherStore) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            store: Arc::new(store),
            ingestor: Arc::new(ingestor),
            notifier: Arc::new(RecordingNotifier::new()),
            courtesy_delay: Duration::ZERO,
        }
    }

    pub fn courtesy_delay(mut self, delay: Duration) -> Self {
        self.courtesy_delay = delay;
        self
    }

    pub fn factory(&self) -> ParserFactory {
        ParserFactory::new(self.fetcher.clone(), self.ingestor.clone())
            .with_courtesy_delay(self.courtesy_delay)
    }

    /// A live watcher for `record`, with the record already persisted.
    pub async fn watcher(&self, record: WatcherRecord) -> ActiveWatcher {
        use vault_watchers::WatcherStore;
        self.store.insert(&record).await.unwrap();
        let parser = self.factory().create(record.source_type, &record).unwrap();
        ActiveWatcher::new(record, parser, self.store.clone(), self.notifier.clone())
    }

    pub fn service(&self) -> WatcherService {
        WatcherService::new(
            "vault-test",
            self.store.clone(),
            self.notifier.clone(),
            self.factory(),
        )
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Move the watcher's last request into the past, as if `ms` had elapsed.
pub fn age_last_request(watcher: &ActiveWatcher, ms: i64) {
    watcher
        .state()
        .update(|r| r.last_requested_at -= chrono::Duration::milliseconds(ms));
}
