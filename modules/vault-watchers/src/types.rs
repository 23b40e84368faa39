use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WatcherError};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a watcher. `Finished` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherStatus {
    Running,
    Paused,
    Finished,
    Dead,
}

impl WatcherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherStatus::Running => "running",
            WatcherStatus::Paused => "paused",
            WatcherStatus::Finished => "finished",
            WatcherStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WatcherStatus::Finished | WatcherStatus::Dead)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `running -> running` is allowed so a record persisted as running (fresh
    /// insert, or loaded at startup) can be armed without a detour through paused.
    pub fn can_transition_to(&self, next: WatcherStatus) -> bool {
        use WatcherStatus::*;
        match (self, next) {
            (Paused, Running) => true,
            (Running, Running | Paused | Finished | Dead) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WatcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatcherStatus {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(WatcherStatus::Running),
            "paused" => Ok(WatcherStatus::Paused),
            "finished" => Ok(WatcherStatus::Finished),
            "dead" => Ok(WatcherStatus::Dead),
            other => Err(WatcherError::Other(anyhow::anyhow!(
                "unknown watcher status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Source type
// ---------------------------------------------------------------------------

/// The closed set of content sources a watcher can poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Image-board thread (4chan).
    BoardThread,
    /// Link-aggregator listing (reddit subreddit, newest first).
    ListingFeed,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::BoardThread => "board-thread",
            SourceType::ListingFeed => "listing-feed",
        }
    }

    /// Resolve the source from a watcher URL. Pure URL matching, no HTTP.
    /// Board threads need a board segment, listings need `/r/<name>`.
    pub fn from_url(url: &str) -> Result<Self> {
        let invalid = || WatcherError::InvalidSource(url.to_string());
        let parsed = url::Url::parse(url.trim()).map_err(|_| invalid())?;
        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        let mut segments = parsed
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty());

        if host_matches(&host, "4chan.org") || host_matches(&host, "4channel.org") {
            return match segments.next() {
                Some(_) => Ok(SourceType::BoardThread),
                None => Err(invalid()),
            };
        }
        if host_matches(&host, "reddit.com")
            && segments.next().is_some_and(|s| s.eq_ignore_ascii_case("r"))
            && segments.next().is_some()
        {
            return Ok(SourceType::ListingFeed);
        }
        Err(invalid())
    }
}

/// `host` is `domain` itself or one of its subdomains.
fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|rest| rest.ends_with('.'))
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "board-thread" => Ok(SourceType::BoardThread),
            "listing-feed" => Ok(SourceType::ListingFeed),
            other => Err(WatcherError::UnsupportedSource(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The mutable knobs of a watcher, shared by create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherSettings {
    pub description: Option<String>,
    /// Milliseconds between polling cycles.
    pub request_interval: i64,
    /// Max new items downloaded per cycle.
    pub items_per_request: i32,
    /// Milliseconds without new items before the watcher finishes itself.
    pub inactivity_timeout: i64,
}

impl WatcherSettings {
    pub fn validate(&self) -> Result<()> {
        if self.request_interval <= 0 {
            return Err(WatcherError::InvalidSettings(
                "No request interval provided".into(),
            ));
        }
        if self.items_per_request <= 0 {
            return Err(WatcherError::InvalidSettings(
                "No items per request provided".into(),
            ));
        }
        if self.inactivity_timeout <= 0 {
            return Err(WatcherError::InvalidSettings(
                "No inactivity timeout provided".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// The persisted shape of a watcher. One row per watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherRecord {
    pub id: Uuid,
    pub url: String,
    pub source_type: SourceType,
    pub description: Option<String>,
    pub status: WatcherStatus,
    /// Milliseconds.
    pub request_interval: i64,
    pub items_per_request: i32,
    /// Milliseconds.
    pub inactivity_timeout: i64,
    pub items_downloaded: i64,
    pub total_items: Option<i64>,
    pub last_requested_at: DateTime<Utc>,
    /// Milliseconds accumulated across cycles that produced nothing new.
    pub time_since_new_items: i64,
    /// Source-specific serialized cursor. Only the owning parser reads it.
    pub cursor_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WatcherRecord {
    /// A fresh `running` record with empty cursor data.
    pub fn new(url: &str, source_type: SourceType, settings: WatcherSettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.trim().to_string(),
            source_type,
            description: settings.description,
            status: WatcherStatus::Running,
            request_interval: settings.request_interval,
            items_per_request: settings.items_per_request,
            inactivity_timeout: settings.inactivity_timeout,
            items_downloaded: 0,
            total_items: None,
            last_requested_at: now,
            time_since_new_items: 0,
            cursor_data: None,
            created_at: now,
        }
    }

    pub fn apply_settings(&mut self, settings: WatcherSettings) {
        self.description = settings.description;
        self.request_interval = settings.request_interval;
        self.items_per_request = settings.items_per_request;
        self.inactivity_timeout = settings.inactivity_timeout;
    }
}

// ---------------------------------------------------------------------------
// Events and outcomes
// ---------------------------------------------------------------------------

/// Notification published to vault listeners. Carries only the id; listeners re-fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WatcherEvent {
    #[serde(rename = "watcher-update")]
    WatcherUpdate { id: Uuid },
}

impl WatcherEvent {
    pub fn update(id: Uuid) -> Self {
        WatcherEvent::WatcherUpdate { id }
    }

    pub fn watcher_id(&self) -> Uuid {
        match self {
            WatcherEvent::WatcherUpdate { id } => *id,
        }
    }
}

/// What a single polling cycle ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// At least one new item was ingested.
    Ingested(u32),
    /// Nothing new this cycle.
    NoNewItems,
    /// The source is drained or closed; the watcher is now `finished`.
    Exhausted,
    /// The source reported it no longer exists; the watcher is now `dead`.
    Dead,
    /// Another cycle was already in flight, so this one did not run.
    Skipped,
}
