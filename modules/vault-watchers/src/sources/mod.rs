// Source parsers. Each knows how to run one polling cycle against one kind of
// content source: fetch, find new items, download them, update counters.

pub mod board_thread;
pub mod listing_feed;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::traits::{IngestRequest, MediaIngestor, PageFetcher};
use crate::types::{CycleOutcome, SourceType, WatcherStatus};
use crate::watcher::WatcherState;

pub use board_thread::{BoardThreadCursor, BoardThreadParser};
pub use listing_feed::{ListingFeedCursor, ListingFeedParser};

/// Pause between consecutive downloads within a cycle.
pub const DEFAULT_COURTESY_DELAY: Duration = Duration::from_millis(1500);

#[async_trait]
pub trait SourceParser: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Run one cycle. Mutates counters and cursor through `watcher` and
    /// persists as it goes. Page fetch/parse errors abort the cycle and leave
    /// the status unchanged; per-item download errors are skipped.
    async fn query_page(&mut self, watcher: &WatcherState) -> Result<CycleOutcome>;
}

/// Collaborators every parser needs, injected by the factory.
#[derive(Clone)]
pub struct SourceDeps {
    pub fetcher: Arc<dyn PageFetcher>,
    pub ingestor: Arc<dyn MediaIngestor>,
    pub courtesy_delay: Duration,
}

// ---------------------------------------------------------------------------
// Shared cycle steps
// ---------------------------------------------------------------------------

/// Extension of a remote file name, without the dot.
pub(crate) fn file_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Download one candidate, hand it to media storage, and record provenance.
/// Once storage has accepted the item it counts as downloaded; a failed
/// provenance link is only logged, so the item is never ingested twice.
pub(crate) async fn ingest_candidate(
    deps: &SourceDeps,
    watcher: &WatcherState,
    url: &str,
    file_name: &str,
) -> Result<Uuid> {
    let bytes = deps.fetcher.fetch_bytes(url).await?;
    let media_item_id = deps
        .ingestor
        .ingest(IngestRequest {
            bytes,
            extension: file_extension(file_name),
            source: Some(url.to_string()),
        })
        .await?;
    if let Err(e) = watcher.link_media(media_item_id).await {
        warn!(watcher_id = %watcher.id(), %media_item_id, url, error = %e, "Failed to link media item");
    }
    watcher.update(|r| r.items_downloaded += 1);
    Ok(media_item_id)
}

/// Sleep the courtesy delay. Returns whether the watcher is still running.
pub(crate) async fn courtesy_pause(deps: &SourceDeps, watcher: &WatcherState) -> bool {
    if !deps.courtesy_delay.is_zero() {
        tokio::time::sleep(deps.courtesy_delay).await;
    }
    watcher.is_running()
}

/// The source reported it no longer exists.
pub(crate) async fn mark_dead(watcher: &WatcherState) -> Result<CycleOutcome> {
    if watcher.terminate(WatcherStatus::Dead) {
        watcher.update(|r| r.total_items = Some(0));
        watcher.persist().await?;
        return Ok(CycleOutcome::Dead);
    }
    Ok(CycleOutcome::NoNewItems)
}

/// Close out a cycle: inactivity accounting, `last_requested_at = now`, and
/// an unconditional persist. `drained` means the source signalled closure and
/// every observed item is already downloaded.
pub(crate) async fn finish_cycle(
    watcher: &WatcherState,
    ingested: u32,
    drained: bool,
) -> Result<CycleOutcome> {
    let now = Utc::now();
    let inactive = watcher.update(|r| {
        if ingested == 0 {
            let elapsed = (now - r.last_requested_at).num_milliseconds().max(0);
            r.time_since_new_items += elapsed;
        } else {
            r.time_since_new_items = 0;
        }
        r.last_requested_at = now;
        ingested == 0 && r.time_since_new_items >= r.inactivity_timeout
    });

    let exhausted = (inactive || drained) && watcher.terminate(WatcherStatus::Finished);
    watcher.persist().await?;

    Ok(if exhausted {
        CycleOutcome::Exhausted
    } else if ingested > 0 {
        CycleOutcome::Ingested(ingested)
    } else {
        CycleOutcome::NoNewItems
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_file_name() {
        assert_eq!(file_extension("1699999999123.jpg"), "jpg");
        assert_eq!(file_extension("abc.def.PNG"), "png");
        assert_eq!(file_extension("noext"), "");
    }
}
