pub mod cursor;
pub mod error;
pub mod factory;
pub mod fetch;
pub mod notify;
pub mod service;
pub mod sources;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod types;
pub mod watcher;

pub use error::{Result, WatcherError};
pub use factory::ParserFactory;
pub use fetch::{FetcherConfig, HttpFetcher};
pub use notify::{BroadcastNotifier, NoopNotifier};
pub use service::WatcherService;
pub use sources::{SourceDeps, SourceParser};
pub use store::PgWatcherStore;
pub use traits::{Fetched, IngestRequest, MediaIngestor, Notifier, PageFetcher, WatcherStore};
pub use types::{
    CycleOutcome, SourceType, WatcherEvent, WatcherRecord, WatcherSettings, WatcherStatus,
};
pub use watcher::{ActiveWatcher, WatcherState};
