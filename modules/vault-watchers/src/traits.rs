// Trait seams for everything a watcher touches outside its own memory.
//
// WatcherStore  - the persisted watcher records and their media links.
// MediaIngestor - the vault's media storage (external collaborator).
// Notifier      - fire-and-forget fan-out to connected listeners.
// PageFetcher   - network access to the content sources.
//
// Production wiring uses PgWatcherStore, HttpFetcher and BroadcastNotifier;
// `testing` provides in-memory doubles for each.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{WatcherEvent, WatcherRecord};

// ---------------------------------------------------------------------------
// WatcherStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WatcherStore: Send + Sync {
    /// Every persisted watcher for the vault.
    async fn load_all(&self) -> Result<Vec<WatcherRecord>>;

    /// Insert a new record.
    async fn insert(&self, record: &WatcherRecord) -> Result<()>;

    /// Overwrite the full record keyed by `record.id`.
    async fn save(&self, record: &WatcherRecord) -> Result<()>;

    /// Delete the record. Media links are kept as provenance.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Record that `media_item_id` originated from `watcher_id`. Append-only.
    async fn link_media(&self, watcher_id: Uuid, media_item_id: Uuid) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MediaIngestor
// ---------------------------------------------------------------------------

/// Raw bytes handed to media storage.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub bytes: Vec<u8>,
    /// File extension without the dot, e.g. "jpg".
    pub extension: String,
    /// Remote URL the bytes came from.
    pub source: Option<String>,
}

#[async_trait]
pub trait MediaIngestor: Send + Sync {
    /// Store the bytes as a media item. Returns the stored item id.
    async fn ingest(&self, request: IngestRequest) -> Result<Uuid>;

    /// Whether a media item with this source URL was already ingested.
    async fn has_item_with_source(&self, source: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

pub trait Notifier: Send + Sync {
    /// Publish without waiting for delivery. Never fails the caller.
    fn publish(&self, event: WatcherEvent);
}

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// A fetched text resource, or the source reporting that it doesn't exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Found(String),
    NotFound,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET a page or JSON document as text.
    async fn fetch_text(&self, url: &str) -> Result<Fetched>;

    /// GET raw bytes of a media file.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}
