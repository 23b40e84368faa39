// Image-board thread parser (4chan).
//
// Single page per cycle. The dedup set is the list of file names already
// downloaded, carried in the cursor. A 404 thread is dead; a closed or
// archived thread that is fully downloaded is finished.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{courtesy_pause, finish_cycle, ingest_candidate, mark_dead, SourceDeps, SourceParser};
use crate::cursor;
use crate::error::{Result, WatcherError};
use crate::traits::Fetched;
use crate::types::{CycleOutcome, SourceType, WatcherRecord};
use crate::watcher::WatcherState;

const MEDIA_BASE_URL: &str = "https://i.4cdn.org";

static RE_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\s[^>]*>").expect("Invalid anchor regex"));
static RE_FILE_THUMB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class\s*=\s*["'][^"']*\bfileThumb\b"#).expect("Invalid fileThumb regex")
});
static RE_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("Invalid href regex"));
static RE_CLOSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)title\s*=\s*["'](closed|archived)["']|class\s*=\s*["'][^"']*\barchivedIcon\b"#)
        .expect("Invalid closed-marker regex")
});
static RE_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title>[^<]*\b404 Not Found\b[^<]*</title>").expect("Invalid 404 regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardThreadCursor {
    #[serde(default)]
    pub files_downloaded: Vec<String>,
}

/// What a thread page tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ThreadPage {
    /// File names of every posted file, in page order, without duplicates.
    pub files: Vec<String>,
    pub closed: bool,
    pub not_found: bool,
}

pub(crate) fn parse_thread(html: &str) -> ThreadPage {
    let mut seen = HashSet::new();
    let files = RE_ANCHOR
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| RE_FILE_THUMB.is_match(tag))
        .filter_map(|tag| RE_HREF.captures(tag)?.get(1))
        .filter_map(|href| href.as_str().rsplit('/').next())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect();

    ThreadPage {
        files,
        closed: RE_CLOSED.is_match(html),
        not_found: RE_NOT_FOUND.is_match(html),
    }
}

/// Board name from a thread URL: "https://boards.4chan.org/wg/thread/123" → "wg".
pub(crate) fn board_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    parsed
        .path_segments()?
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct BoardThreadParser {
    deps: SourceDeps,
    cursor: BoardThreadCursor,
}

impl BoardThreadParser {
    pub fn new(deps: SourceDeps, record: &WatcherRecord) -> Result<Self> {
        Ok(Self {
            deps,
            cursor: cursor::decode(record.cursor_data.as_deref())?,
        })
    }

    pub fn cursor(&self) -> &BoardThreadCursor {
        &self.cursor
    }

    fn store_cursor(&self, watcher: &WatcherState) -> Result<()> {
        let data = cursor::encode(&self.cursor)?;
        watcher.update(|r| r.cursor_data = Some(data));
        Ok(())
    }

    fn is_downloaded(&self, file_name: &str) -> bool {
        self.cursor.files_downloaded.iter().any(|f| f == file_name)
    }
}

#[async_trait]
impl SourceParser for BoardThreadParser {
    fn source_type(&self) -> SourceType {
        SourceType::BoardThread
    }

    async fn query_page(&mut self, watcher: &WatcherState) -> Result<CycleOutcome> {
        let record = watcher.snapshot();
        let budget = record.items_per_request.max(0) as u32;
        info!(watcher_id = %record.id, url = record.url.as_str(), "Querying board thread");

        let html = match self.deps.fetcher.fetch_text(&record.url).await? {
            Fetched::Found(body) => body,
            Fetched::NotFound => {
                info!(watcher_id = %record.id, "Thread not found, marking dead");
                return mark_dead(watcher).await;
            }
        };

        let page = parse_thread(&html);
        if page.not_found {
            info!(watcher_id = %record.id, "Thread page reports 404, marking dead");
            return mark_dead(watcher).await;
        }

        let board = board_from_url(&record.url)
            .ok_or_else(|| WatcherError::InvalidSource(record.url.clone()))?;
        watcher.update(|r| r.total_items = Some(page.files.len() as i64));

        let mut ingested = 0u32;
        for file_name in &page.files {
            if self.is_downloaded(file_name) {
                continue;
            }
            if !watcher.is_running() {
                break;
            }

            let item_url = format!("{MEDIA_BASE_URL}/{board}/{file_name}");
            match ingest_candidate(&self.deps, watcher, &item_url, file_name).await {
                Ok(media_item_id) => {
                    self.cursor.files_downloaded.push(file_name.clone());
                    self.store_cursor(watcher)?;
                    watcher.persist().await?;
                    ingested += 1;
                    debug!(watcher_id = %record.id, file_name, %media_item_id, "Ingested thread file");
                }
                Err(e) => {
                    warn!(watcher_id = %record.id, url = item_url.as_str(), error = %e, "Skipping thread file");
                }
            }

            if ingested >= budget {
                break;
            }
            if !courtesy_pause(&self.deps, watcher).await {
                break;
            }
        }

        let drained = page.closed && page.files.iter().all(|f| self.is_downloaded(f));
        if drained {
            info!(watcher_id = %record.id, "Thread closed and fully downloaded");
        }
        finish_cycle(watcher, ingested, drained).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREAD_HTML: &str = r#"
        <div class="file" id="f1"><div class="fileText">File: <a href="//i.4cdn.org/wg/1700000000001.jpg" target="_blank">a.jpg</a></div>
        <a class="fileThumb" href="//i.4cdn.org/wg/1700000000001.jpg" target="_blank"><img src="//i.4cdn.org/wg/1700000000001s.jpg"></a></div>
        <div class="file" id="f2">
        <a class="fileThumb imgspoiler" href="//i.4cdn.org/wg/1700000000002.png" target="_blank"><img src="x"></a></div>
        <a target="_blank" class="fileThumb" href="//i.4cdn.org/wg/1700000000003.webm"><img src="y"></a>
        <a href="//i.4cdn.org/wg/1700000000002.png" class="fileThumb"></a>
    "#;

    #[test]
    fn finds_file_thumbs_in_page_order() {
        let page = parse_thread(THREAD_HTML);
        assert_eq!(
            page.files,
            vec![
                "1700000000001.jpg".to_string(),
                "1700000000002.png".to_string(),
                "1700000000003.webm".to_string(),
            ]
        );
        assert!(!page.closed);
        assert!(!page.not_found);
    }

    #[test]
    fn plain_file_links_are_not_candidates() {
        let page = parse_thread(
            r#"<a href="//i.4cdn.org/wg/1.jpg" target="_blank">1.jpg</a>"#,
        );
        assert!(page.files.is_empty());
    }

    #[test]
    fn detects_closed_and_archived_markers() {
        let closed = format!(
            r#"{THREAD_HTML}<img src="//s.4cdn.org/image/closed.gif" alt="Closed" title="Closed" class="retina">"#
        );
        assert!(parse_thread(&closed).closed);

        let archived = r#"<img src="//s.4cdn.org/image/archived.gif" alt="Archived" title="Archived" class="archivedIcon retina">"#;
        assert!(parse_thread(archived).closed);
    }

    #[test]
    fn detects_not_found_page() {
        let page = parse_thread("<html><head><title>4chan - 404 Not Found</title></head></html>");
        assert!(page.not_found);
        assert!(page.files.is_empty());
    }

    #[test]
    fn not_found_phrase_in_a_post_is_not_a_404_page() {
        let html = format!(
            "<html><head><title>/wg/ - Wallpapers/General - 4chan</title></head>{THREAD_HTML}\
             <blockquote class=\"postMessage\">got 404 Not Found on the old link</blockquote></html>"
        );
        let page = parse_thread(&html);
        assert!(!page.not_found);
        assert_eq!(page.files.len(), 3);
    }

    #[test]
    fn board_is_first_path_segment() {
        assert_eq!(
            board_from_url("https://boards.4chan.org/wg/thread/7891234"),
            Some("wg".to_string())
        );
        assert_eq!(board_from_url("https://boards.4chan.org/"), None);
    }

    #[test]
    fn cursor_keeps_legacy_field_name() {
        let c: BoardThreadCursor =
            cursor::decode(Some(r#"{"filesDownloaded":["1.jpg","2.png"]}"#)).unwrap();
        assert_eq!(c.files_downloaded, vec!["1.jpg", "2.png"]);
    }
}
