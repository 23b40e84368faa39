// Link-aggregator listing parser (reddit, newest first).
//
// Walks the listing JSON 100 posts at a time. The cursor remembers the token the
// current page was requested with, the token of the page after it, and the
// position within the page. A page is re-requested until it has been walked
// to the end; then the next request asks for the following page, or for the
// newest page once the listing runs out. Dedup is delegated to media storage
// by source URL, so it survives cursor loss.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{courtesy_pause, finish_cycle, ingest_candidate, mark_dead, SourceDeps, SourceParser};
use crate::cursor;
use crate::error::{Result, WatcherError};
use crate::traits::Fetched;
use crate::types::{CycleOutcome, SourceType, WatcherRecord};
use crate::watcher::WatcherState;

/// Posts requested per listing page.
pub const PAGE_SIZE: usize = 100;

const LISTING_BASE_URL: &str = "https://old.reddit.com";
const MEDIA_HOST: &str = "i.redd.it";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingFeedCursor {
    /// File name of the last item downloaded.
    pub last_requested_item_id: String,
    /// Token of the page after the one being walked.
    pub last_requested_listing_id: Option<String>,
    /// Token the page being walked was requested with. `None` is the newest page.
    pub page_listing_id: Option<String>,
    /// Position within the page being walked.
    pub listing_item_index: usize,
    pub duplicates_skipped: u64,
}

// ---------------------------------------------------------------------------
// Listing JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingResponse {
    Page(ListingPage),
    Error(ErrorBody),
}

#[derive(Debug, Deserialize)]
struct ListingPage {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    after: Option<String>,
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: PostData,
}

#[derive(Debug, Default, Deserialize)]
struct PostData {
    url: Option<String>,
    gallery_data: Option<GalleryData>,
    media_metadata: Option<HashMap<String, MediaMetadata>>,
}

#[derive(Debug, Deserialize)]
struct GalleryData {
    #[serde(default)]
    items: Vec<GalleryItem>,
}

#[derive(Debug, Deserialize)]
struct GalleryItem {
    media_id: String,
}

#[derive(Debug, Deserialize)]
struct MediaMetadata {
    /// Mime type, e.g. "image/jpg".
    m: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<u16>,
    reason: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    /// A removed or never-existing community, as opposed to a transient refusal.
    fn is_gone(&self) -> bool {
        self.error == Some(404) || self.reason.as_deref() == Some("banned")
    }

    fn describe(&self) -> String {
        format!(
            "listing error {} ({})",
            self.error.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
            self.reason
                .as_deref()
                .or(self.message.as_deref())
                .unwrap_or("no reason")
        )
    }
}

/// One downloadable item derived from a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub url: String,
    pub file_name: String,
}

impl PostData {
    fn is_gallery(&self) -> bool {
        self.gallery_data.is_some()
    }

    /// Gallery posts expand to one candidate per gallery item; anything else
    /// is its own URL.
    fn candidates(&self) -> Vec<Candidate> {
        if let Some(gallery) = &self.gallery_data {
            let metadata = self.media_metadata.as_ref();
            return gallery
                .items
                .iter()
                .filter_map(|item| {
                    let mime = metadata?.get(&item.media_id)?.m.as_deref()?;
                    let ext = mime.split_once('/')?.1;
                    let file_name = format!("{}.{}", item.media_id, ext);
                    Some(Candidate {
                        url: format!("https://{MEDIA_HOST}/{file_name}"),
                        file_name,
                    })
                })
                .collect();
        }

        self.url
            .as_deref()
            .and_then(|url| {
                let file_name = url.trim_end_matches('/').rsplit('/').next()?;
                Some(Candidate {
                    url: url.to_string(),
                    file_name: file_name.to_string(),
                })
            })
            .into_iter()
            .collect()
    }
}

fn is_media_url(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == MEDIA_HOST))
        .unwrap_or(false)
}

/// Community name from a listing URL: "https://www.reddit.com/r/EarthPorn/" → "EarthPorn".
pub(crate) fn subreddit_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.trim().split_once("/r/")?;
    rest.split(['/', '?', '#'])
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl ListingFeedCursor {
    fn restart_from_newest(&mut self) {
        self.last_requested_listing_id = None;
        self.page_listing_id = None;
        self.listing_item_index = 0;
    }
}

/// The listing request for the next cycle. Asks for the following page once
/// the walk has reached the last post of the current one; otherwise asks for
/// the current page again. The flag is true when moving to a new page.
pub(crate) fn format_listing_url(subreddit: &str, cursor: &ListingFeedCursor) -> (String, bool) {
    let base = format!("{LISTING_BASE_URL}/r/{subreddit}/new.json?limit={PAGE_SIZE}");
    if cursor.listing_item_index >= PAGE_SIZE - 1 {
        if let Some(after) = &cursor.last_requested_listing_id {
            return (format!("{base}&after={after}"), true);
        }
    }
    match &cursor.page_listing_id {
        Some(after) => (format!("{base}&after={after}"), false),
        None => (base, false),
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

pub struct ListingFeedParser {
    deps: SourceDeps,
    cursor: ListingFeedCursor,
}

impl ListingFeedParser {
    pub fn new(deps: SourceDeps, record: &WatcherRecord) -> Result<Self> {
        Ok(Self {
            deps,
            cursor: cursor::decode(record.cursor_data.as_deref())?,
        })
    }

    pub fn cursor(&self) -> &ListingFeedCursor {
        &self.cursor
    }

    fn store_cursor(&self, watcher: &WatcherState) -> Result<()> {
        let data = cursor::encode(&self.cursor)?;
        watcher.update(|r| r.cursor_data = Some(data));
        Ok(())
    }
}

#[async_trait]
impl SourceParser for ListingFeedParser {
    fn source_type(&self) -> SourceType {
        SourceType::ListingFeed
    }

    async fn query_page(&mut self, watcher: &WatcherState) -> Result<CycleOutcome> {
        let record = watcher.snapshot();
        let budget = record.items_per_request.max(0) as u32;
        let subreddit = subreddit_from_url(&record.url)
            .ok_or_else(|| WatcherError::InvalidSource(record.url.clone()))?;
        let (request_url, next_page) = format_listing_url(&subreddit, &self.cursor);
        info!(watcher_id = %record.id, url = request_url.as_str(), "Querying listing");

        let body = match self.deps.fetcher.fetch_text(&request_url).await? {
            Fetched::Found(body) => body,
            Fetched::NotFound => {
                info!(watcher_id = %record.id, subreddit, "Listing not found, marking dead");
                return mark_dead(watcher).await;
            }
        };

        let response: ListingResponse = serde_json::from_str(&body).map_err(|e| {
            WatcherError::SourceUnreachable(format!("unreadable listing from {request_url}: {e}"))
        })?;
        let page = match response {
            ListingResponse::Page(page) => page.data,
            ListingResponse::Error(err) if err.is_gone() => {
                info!(watcher_id = %record.id, subreddit, reason = err.describe(), "Listing gone, marking dead");
                return mark_dead(watcher).await;
            }
            ListingResponse::Error(err) => {
                return Err(WatcherError::SourceUnreachable(err.describe()));
            }
        };

        if next_page {
            self.cursor.page_listing_id = self.cursor.last_requested_listing_id.take();
            self.cursor.listing_item_index = 0;
        }
        // Each page is counted once, when the walk first reaches it.
        if next_page || record.total_items.is_none() {
            let gallery_items: usize = page
                .children
                .iter()
                .filter(|c| c.data.is_gallery())
                .map(|c| c.data.candidates().len())
                .sum();
            let added = (page.children.len() + gallery_items) as i64;
            watcher.update(|r| r.total_items = Some(r.total_items.unwrap_or(0) + added));
        }
        self.cursor.last_requested_listing_id = page.after.clone();

        let mut ingested = 0u32;
        let mut stopped = false;
        'posts: for (index, child) in page.children.iter().enumerate() {
            self.cursor.listing_item_index = index;

            for candidate in child.data.candidates() {
                if !is_media_url(&candidate.url) {
                    continue;
                }
                match self.deps.ingestor.has_item_with_source(&candidate.url).await {
                    Ok(true) => {
                        self.cursor.duplicates_skipped += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(watcher_id = %record.id, url = candidate.url.as_str(), error = %e, "Dedup lookup failed, skipping");
                        continue;
                    }
                }
                if !watcher.is_running() {
                    stopped = true;
                    break 'posts;
                }

                match ingest_candidate(&self.deps, watcher, &candidate.url, &candidate.file_name)
                    .await
                {
                    Ok(media_item_id) => {
                        self.cursor.last_requested_item_id = candidate.file_name.clone();
                        self.store_cursor(watcher)?;
                        watcher.persist().await?;
                        ingested += 1;
                        debug!(watcher_id = %record.id, file_name = candidate.file_name.as_str(), %media_item_id, "Ingested listing item");
                    }
                    Err(e) => {
                        warn!(watcher_id = %record.id, url = candidate.url.as_str(), error = %e, "Skipping listing item");
                    }
                }

                if ingested >= budget || !courtesy_pause(&self.deps, watcher).await {
                    stopped = true;
                    break 'posts;
                }
            }
        }

        if page.children.is_empty() || (!stopped && page.after.is_none()) {
            // End of the listing: back to the newest page next cycle.
            self.cursor.restart_from_newest();
        } else if !stopped {
            // Walked to the end of the page, short or not; move on next cycle.
            self.cursor.listing_item_index = PAGE_SIZE - 1;
        }
        debug!(
            watcher_id = %record.id,
            index = self.cursor.listing_item_index,
            duplicates_skipped = self.cursor.duplicates_skipped,
            "Listing walk position"
        );
        self.store_cursor(watcher)?;
        finish_cycle(watcher, ingested, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(json: serde_json::Value) -> PostData {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn subreddit_from_listing_urls() {
        assert_eq!(
            subreddit_from_url("https://www.reddit.com/r/EarthPorn/"),
            Some("EarthPorn".into())
        );
        assert_eq!(
            subreddit_from_url("https://old.reddit.com/r/wallpapers/new?sort=new"),
            Some("wallpapers".into())
        );
        assert_eq!(subreddit_from_url("https://www.reddit.com/r/"), None);
    }

    #[test]
    fn first_request_has_no_page_token() {
        let (url, next) = format_listing_url("pics", &ListingFeedCursor::default());
        assert_eq!(url, "https://old.reddit.com/r/pics/new.json?limit=100");
        assert!(!next);
    }

    #[test]
    fn next_page_token_only_used_at_end_of_page() {
        let mut cursor = ListingFeedCursor {
            last_requested_listing_id: Some("t3_abc".into()),
            listing_item_index: 42,
            ..Default::default()
        };
        let (url, next) = format_listing_url("pics", &cursor);
        assert!(!url.contains("after="));
        assert!(!next);

        cursor.listing_item_index = 99;
        let (url, next) = format_listing_url("pics", &cursor);
        assert_eq!(url, "https://old.reddit.com/r/pics/new.json?limit=100&after=t3_abc");
        assert!(next);
    }

    #[test]
    fn part_walked_page_is_requested_again() {
        let mut cursor = ListingFeedCursor {
            last_requested_listing_id: Some("t3_p3".into()),
            page_listing_id: Some("t3_p2".into()),
            listing_item_index: 10,
            ..Default::default()
        };
        let (url, next) = format_listing_url("pics", &cursor);
        assert_eq!(url, "https://old.reddit.com/r/pics/new.json?limit=100&after=t3_p2");
        assert!(!next);

        // Last page of the listing: no following token, stay put.
        cursor.last_requested_listing_id = None;
        cursor.listing_item_index = 99;
        let (url, next) = format_listing_url("pics", &cursor);
        assert_eq!(url, "https://old.reddit.com/r/pics/new.json?limit=100&after=t3_p2");
        assert!(!next);
    }

    #[test]
    fn gallery_expands_to_media_items() {
        let p = post(serde_json::json!({
            "url": "https://www.reddit.com/gallery/xyz",
            "gallery_data": {"items": [{"media_id": "aaa"}, {"media_id": "bbb"}, {"media_id": "ccc"}]},
            "media_metadata": {
                "aaa": {"m": "image/jpg"},
                "bbb": {"m": "image/png"}
            }
        }));
        let candidates = p.candidates();
        assert_eq!(
            candidates,
            vec![
                Candidate { url: "https://i.redd.it/aaa.jpg".into(), file_name: "aaa.jpg".into() },
                Candidate { url: "https://i.redd.it/bbb.png".into(), file_name: "bbb.png".into() },
            ]
        );
    }

    #[test]
    fn plain_post_is_its_own_url() {
        let p = post(serde_json::json!({"url": "https://i.redd.it/q1w2e3.jpeg"}));
        assert_eq!(
            p.candidates(),
            vec![Candidate { url: "https://i.redd.it/q1w2e3.jpeg".into(), file_name: "q1w2e3.jpeg".into() }]
        );
        assert!(post(serde_json::json!({})).candidates().is_empty());
    }

    #[test]
    fn only_media_host_is_downloadable() {
        assert!(is_media_url("https://i.redd.it/abc.jpg"));
        assert!(!is_media_url("https://i.imgur.com/abc.jpg"));
        assert!(!is_media_url("https://www.reddit.com/r/pics/comments/1"));
    }

    #[test]
    fn error_bodies_classify() {
        let gone: ListingResponse =
            serde_json::from_str(r#"{"message": "Not Found", "error": 404}"#).unwrap();
        assert!(matches!(gone, ListingResponse::Error(ref e) if e.is_gone()));

        let banned: ListingResponse =
            serde_json::from_str(r#"{"reason": "banned", "message": "Not Found", "error": 404}"#).unwrap();
        assert!(matches!(banned, ListingResponse::Error(ref e) if e.is_gone()));

        let private: ListingResponse =
            serde_json::from_str(r#"{"reason": "private", "message": "Forbidden", "error": 403}"#).unwrap();
        assert!(matches!(private, ListingResponse::Error(ref e) if !e.is_gone()));
    }

    #[test]
    fn cursor_without_page_token_decodes_to_newest_page() {
        let c: ListingFeedCursor = serde_json::from_str(
            r#"{"lastRequestedItemId": "a.jpg", "lastRequestedListingId": "t3_x", "listingItemIndex": 4}"#,
        )
        .unwrap();
        assert_eq!(c.page_listing_id, None);
        assert_eq!(c.duplicates_skipped, 0);
        let (url, next) = format_listing_url("pics", &c);
        assert_eq!(url, "https://old.reddit.com/r/pics/new.json?limit=100");
        assert!(!next);
    }

    #[test]
    fn cursor_field_names() {
        let c = ListingFeedCursor {
            last_requested_item_id: "abc.jpg".into(),
            last_requested_listing_id: Some("t3_x".into()),
            page_listing_id: None,
            listing_item_index: 7,
            duplicates_skipped: 2,
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "lastRequestedItemId": "abc.jpg",
                "lastRequestedListingId": "t3_x",
                "pageListingId": null,
                "listingItemIndex": 7,
                "duplicatesSkipped": 2
            })
        );
    }
}
