// Watcher state machine: a persisted record, its source parser, and one timer.
//
// The record sits behind a std Mutex that is never held across an await, so
// `pause()` can flip the status while a cycle is suspended in a fetch or a
// courtesy delay. The parser sits behind a tokio Mutex; a cycle only runs if
// it can take that lock without waiting, so two cycles never overlap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, WatcherError};
use crate::sources::SourceParser;
use crate::traits::{Notifier, WatcherStore};
use crate::types::{CycleOutcome, WatcherEvent, WatcherRecord, WatcherSettings, WatcherStatus};

// ---------------------------------------------------------------------------
// WatcherState: the record plus its persistence
// ---------------------------------------------------------------------------

/// The live record of one watcher and the collaborators that persist and
/// announce it. Source parsers mutate counters and cursor through this.
pub struct WatcherState {
    record: Mutex<WatcherRecord>,
    store: Arc<dyn WatcherStore>,
    notifier: Arc<dyn Notifier>,
    /// Serializes persist calls so a later save never writes an older snapshot.
    persist_lock: tokio::sync::Mutex<()>,
}

impl WatcherState {
    pub fn new(
        record: WatcherRecord,
        store: Arc<dyn WatcherStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            record: Mutex::new(record),
            store,
            notifier,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatcherRecord> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.lock().id
    }

    pub fn snapshot(&self) -> WatcherRecord {
        self.lock().clone()
    }

    pub fn status(&self) -> WatcherStatus {
        self.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == WatcherStatus::Running
    }

    /// Mutate the record in place. The closure must not block.
    pub fn update<R>(&self, f: impl FnOnce(&mut WatcherRecord) -> R) -> R {
        f(&mut self.lock())
    }

    /// Apply a legal status transition. Does not persist.
    pub fn transition(&self, to: WatcherStatus) -> Result<()> {
        let mut record = self.lock();
        if !record.status.can_transition_to(to) {
            return Err(WatcherError::IllegalTransition {
                from: record.status,
                to,
            });
        }
        record.status = to;
        Ok(())
    }

    /// Move a running watcher to `finished` or `dead`. Returns false when the
    /// watcher was paused or stopped in the meantime, leaving it untouched.
    pub fn terminate(&self, to: WatcherStatus) -> bool {
        debug_assert!(to.is_terminal());
        let mut record = self.lock();
        if record.status != WatcherStatus::Running {
            return false;
        }
        record.status = to;
        true
    }

    /// Save the full record, then announce it. Persist completes before notify.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        self.store.save(&snapshot).await?;
        self.notifier.publish(WatcherEvent::update(snapshot.id));
        Ok(())
    }

    /// Record provenance of an ingested media item.
    pub async fn link_media(&self, media_item_id: Uuid) -> Result<()> {
        let id = self.id();
        self.store.link_media(id, media_item_id).await
    }
}

// ---------------------------------------------------------------------------
// ActiveWatcher: lifecycle and scheduling
// ---------------------------------------------------------------------------

struct Timer {
    generation: u64,
    token: CancellationToken,
}

struct WatcherInner {
    state: WatcherState,
    parser: tokio::sync::Mutex<Box<dyn SourceParser>>,
    timer: Mutex<Option<Timer>>,
    generations: AtomicU64,
    halted: AtomicBool,
}

/// A live watcher. Cheap to clone; all clones drive the same instance.
#[derive(Clone)]
pub struct ActiveWatcher {
    inner: Arc<WatcherInner>,
}

impl ActiveWatcher {
    pub fn new(
        record: WatcherRecord,
        parser: Box<dyn SourceParser>,
        store: Arc<dyn WatcherStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                state: WatcherState::new(record, store, notifier),
                parser: tokio::sync::Mutex::new(parser),
                timer: Mutex::new(None),
                generations: AtomicU64::new(0),
                halted: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> &WatcherState {
        &self.inner.state
    }

    pub fn id(&self) -> Uuid {
        self.state().id()
    }

    pub fn snapshot(&self) -> WatcherRecord {
        self.state().snapshot()
    }

    pub fn status(&self) -> WatcherStatus {
        self.state().status()
    }

    /// Whether a repeating timer is currently armed for this watcher.
    pub fn has_timer(&self) -> bool {
        self.lock_timer().is_some()
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark running and claim the timer slot in one step, so a concurrent
    /// `pause()` sees either the old state or the new one, never half of it.
    fn arm(&self) -> Result<Option<(u64, CancellationToken)>> {
        let mut timer = self.lock_timer();
        let status = self.status();
        if status.is_terminal() {
            return Err(WatcherError::TerminalWatcher {
                id: self.id(),
                status,
            });
        }
        if timer.is_some() || self.inner.halted.load(Ordering::Acquire) {
            return Ok(None);
        }
        self.state().transition(WatcherStatus::Running)?;

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *timer = Some(Timer {
            generation,
            token: token.clone(),
        });
        Ok(Some((generation, token)))
    }

    /// Clear the timer slot if it still belongs to `generation`.
    fn disarm(&self, generation: u64) {
        let mut timer = self.lock_timer();
        if timer.as_ref().is_some_and(|t| t.generation == generation) {
            *timer = None;
        }
    }

    /// `paused -> running`: persist, run one cycle before returning, then arm
    /// the repeating timer. Already-started or halted watchers are left alone.
    pub async fn start(&self) -> Result<()> {
        let Some((generation, token)) = self.arm()? else {
            debug!(watcher_id = %self.id(), "Watcher already started");
            return Ok(());
        };

        if let Err(e) = self.state().persist().await {
            self.disarm(generation);
            return Err(e);
        }
        info!(watcher_id = %self.id(), "Watcher started");

        if let Err(e) = self.run_cycle().await {
            warn!(watcher_id = %self.id(), error = %e, "Watcher cycle failed");
        }

        if token.is_cancelled() || !self.state().is_running() {
            self.disarm(generation);
            return Ok(());
        }

        let this = self.clone();
        tokio::spawn(async move { this.tick_loop(generation, token).await });
        Ok(())
    }

    /// `running -> paused`. Cancels the timer; an in-flight cycle notices the
    /// status change at its next download boundary.
    pub async fn pause(&self) -> Result<()> {
        let changed = {
            let mut timer = self.lock_timer();
            if let Some(t) = timer.take() {
                t.token.cancel();
            }
            if self.status() == WatcherStatus::Running {
                self.state().transition(WatcherStatus::Paused)?;
                true
            } else {
                false
            }
        };

        if changed {
            self.state().persist().await?;
            info!(watcher_id = %self.id(), "Watcher paused");
        }
        Ok(())
    }

    /// Retire this instance: cancel the timer and refuse further starts,
    /// without touching the persisted status. A running watcher resumes on the
    /// next process start.
    pub fn halt(&self) {
        let mut timer = self.lock_timer();
        self.inner.halted.store(true, Ordering::Release);
        if let Some(t) = timer.take() {
            t.token.cancel();
        }
    }

    /// Replace the mutable knobs and persist. A new interval applies from the
    /// next re-arm of the timer.
    pub async fn update_settings(&self, settings: WatcherSettings) -> Result<()> {
        settings.validate()?;
        self.state().update(|r| r.apply_settings(settings));
        self.state().persist().await
    }

    /// Run one polling cycle unless another is in flight or the watcher is not running.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Ok(mut parser) = self.inner.parser.try_lock() else {
            debug!(watcher_id = %self.id(), "Cycle already in flight, skipping");
            return Ok(CycleOutcome::Skipped);
        };
        if !self.state().is_running() {
            return Ok(CycleOutcome::Skipped);
        }

        let source = parser.source_type();
        let outcome = parser.query_page(self.state()).await;
        match &outcome {
            Ok(o) => debug!(watcher_id = %self.id(), %source, outcome = ?o, "Cycle complete"),
            Err(e) => warn!(watcher_id = %self.id(), %source, error = %e, "Cycle aborted"),
        }

        self.state().persist().await?;
        outcome
    }

    async fn tick_loop(self, generation: u64, token: CancellationToken) {
        loop {
            let interval_ms = self.snapshot().request_interval.max(1) as u64;
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            }

            if !self.state().is_running() {
                break;
            }
            if let Err(e) = self.run_cycle().await {
                warn!(watcher_id = %self.id(), error = %e, "Watcher cycle failed");
            }
            if !self.state().is_running() {
                info!(watcher_id = %self.id(), status = %self.status(), "Watcher stopped");
                break;
            }
        }
        self.disarm(generation);
    }
}

impl std::fmt::Debug for ActiveWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.snapshot();
        f.debug_struct("ActiveWatcher")
            .field("id", &record.id)
            .field("url", &record.url)
            .field("status", &record.status)
            .finish()
    }
}
