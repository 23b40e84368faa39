// Per-vault registry of active watchers and the operations the UI drives.
//
// Two structures: the store holds every persisted record, and `active` holds
// the live ActiveWatcher for each of them. Every operation goes through the
// live instance so status changes, timers and persistence stay in one place.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, WatcherError};
use crate::factory::ParserFactory;
use crate::traits::{Notifier, WatcherStore};
use crate::types::{SourceType, WatcherEvent, WatcherRecord, WatcherSettings, WatcherStatus};
use crate::watcher::ActiveWatcher;

pub struct WatcherService {
    vault_id: String,
    store: Arc<dyn WatcherStore>,
    notifier: Arc<dyn Notifier>,
    factory: ParserFactory,
    active: RwLock<HashMap<Uuid, ActiveWatcher>>,
}

impl WatcherService {
    pub fn new(
        vault_id: impl Into<String>,
        store: Arc<dyn WatcherStore>,
        notifier: Arc<dyn Notifier>,
        factory: ParserFactory,
    ) -> Self {
        Self {
            vault_id: vault_id.into(),
            store,
            notifier,
            factory,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn vault_id(&self) -> &str {
        &self.vault_id
    }

    fn activate(&self, record: WatcherRecord) -> Result<ActiveWatcher> {
        let parser = self.factory.create(record.source_type, &record)?;
        Ok(ActiveWatcher::new(
            record,
            parser,
            self.store.clone(),
            self.notifier.clone(),
        ))
    }

    async fn lookup(&self, id: Uuid) -> Result<ActiveWatcher> {
        self.find(id).await.ok_or(WatcherError::NotFound(id))
    }

    /// Load every persisted watcher and start the ones recorded as running.
    /// A record whose parser can't be built is logged and left inactive.
    pub async fn init(&self) -> Result<()> {
        let records = self.store.load_all().await?;
        let mut to_start = Vec::new();
        {
            let mut active = self.active.write().await;
            for record in records {
                let id = record.id;
                let status = record.status;
                match self.activate(record) {
                    Ok(watcher) => {
                        if status == WatcherStatus::Running {
                            to_start.push(watcher.clone());
                        }
                        active.insert(id, watcher);
                    }
                    Err(e) => {
                        error!(vault_id = self.vault_id.as_str(), watcher_id = %id, error = %e, "Failed to restore watcher");
                    }
                }
            }
        }

        info!(
            vault_id = self.vault_id.as_str(),
            resuming = to_start.len(),
            "Watchers loaded"
        );
        for watcher in to_start {
            tokio::spawn(async move {
                if let Err(e) = watcher.start().await {
                    warn!(watcher_id = %watcher.id(), error = %e, "Failed to resume watcher");
                }
            });
        }
        Ok(())
    }

    /// Validate, persist and start a new watcher. Returns the persisted record;
    /// the first cycle runs in the background.
    pub async fn create_watcher(&self, url: &str, settings: WatcherSettings) -> Result<WatcherRecord> {
        settings.validate()?;
        let url = url.trim();
        let source_type = SourceType::from_url(url)?;

        let watcher = {
            let mut active = self.active.write().await;
            if active.values().any(|w| w.snapshot().url == url) {
                return Err(WatcherError::DuplicateWatcher(url.to_string()));
            }

            let record = WatcherRecord::new(url, source_type, settings);
            self.store.insert(&record).await?;
            let watcher = self.activate(record)?;
            active.insert(watcher.id(), watcher.clone());
            watcher
        };

        let record = watcher.snapshot();
        info!(
            vault_id = self.vault_id.as_str(),
            watcher_id = %record.id,
            url = record.url.as_str(),
            source = %record.source_type,
            "Watcher created"
        );
        self.notifier.publish(WatcherEvent::update(record.id));

        tokio::spawn(async move {
            if let Err(e) = watcher.start().await {
                warn!(watcher_id = %watcher.id(), error = %e, "Failed to start watcher");
            }
        });
        Ok(record)
    }

    async fn find(&self, id: Uuid) -> Option<ActiveWatcher> {
        self.active.read().await.get(&id).cloned()
    }

    /// Unknown ids are a no-op and yield `None`.
    pub async fn pause_watcher(&self, id: Uuid) -> Result<Option<WatcherRecord>> {
        let Some(watcher) = self.find(id).await else {
            return Ok(None);
        };
        watcher.pause().await?;
        Ok(Some(watcher.snapshot()))
    }

    /// `paused -> running`, waiting for the first cycle to complete.
    /// Unknown ids are a no-op and yield `None`.
    pub async fn resume_watcher(&self, id: Uuid) -> Result<Option<WatcherRecord>> {
        let Some(watcher) = self.find(id).await else {
            return Ok(None);
        };
        watcher.start().await?;
        Ok(Some(watcher.snapshot()))
    }

    /// Same as `resume_watcher`, but returns once the state check passed and
    /// runs the first cycle in the background.
    pub async fn resume_watcher_detached(&self, id: Uuid) -> Result<Option<WatcherRecord>> {
        let Some(watcher) = self.find(id).await else {
            return Ok(None);
        };
        let status = watcher.status();
        if status.is_terminal() {
            return Err(WatcherError::TerminalWatcher { id, status });
        }

        let record = watcher.snapshot();
        tokio::spawn(async move {
            if let Err(e) = watcher.start().await {
                warn!(watcher_id = %watcher.id(), error = %e, "Failed to resume watcher");
            }
        });
        Ok(Some(record))
    }

    pub async fn update_watcher(&self, id: Uuid, settings: WatcherSettings) -> Result<WatcherRecord> {
        let watcher = self.lookup(id).await?;
        watcher.update_settings(settings).await?;
        info!(watcher_id = %id, "Watcher updated");
        Ok(watcher.snapshot())
    }

    /// Stop and remove a watcher. Unknown ids are a no-op. The watcher stays
    /// registered until its row is gone, so a failed delete leaves it visible.
    pub async fn delete_watcher(&self, id: Uuid) -> Result<()> {
        let Some(watcher) = self.find(id).await else {
            return Ok(());
        };
        if watcher.status() == WatcherStatus::Running {
            watcher.pause().await?;
        }
        self.store.delete(id).await?;
        watcher.halt();
        self.active.write().await.remove(&id);

        info!(vault_id = self.vault_id.as_str(), watcher_id = %id, "Watcher deleted");
        self.notifier.publish(WatcherEvent::update(id));
        Ok(())
    }

    /// Every watcher, newest first.
    pub async fn get_watchers(&self) -> Vec<WatcherRecord> {
        let mut records: Vec<WatcherRecord> = self
            .active
            .read()
            .await
            .values()
            .map(ActiveWatcher::snapshot)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub async fn get_watcher(&self, id: Uuid) -> Result<WatcherRecord> {
        Ok(self.lookup(id).await?.snapshot())
    }

    /// Stop every timer without changing persisted status, so running
    /// watchers pick up again on the next `init`.
    pub async fn shutdown(&self) {
        let active = self.active.read().await;
        for watcher in active.values() {
            watcher.halt();
        }
        info!(vault_id = self.vault_id.as_str(), stopped = active.len(), "Watchers halted");
    }
}
