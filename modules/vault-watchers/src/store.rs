// Postgres persistence for watcher records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, WatcherError};
use crate::traits::WatcherStore;
use crate::types::WatcherRecord;

/// Watcher rows for one vault. Every query is scoped by `vault_id`.
pub struct PgWatcherStore {
    pool: PgPool,
    vault_id: String,
}

/// A row from the watchers table. Tags are plain text at the storage boundary.
#[derive(Debug, Clone, sqlx::FromRow)]
struct WatcherRow {
    id: Uuid,
    url: String,
    source_type: String,
    description: Option<String>,
    status: String,
    request_interval: i64,
    items_per_request: i32,
    inactivity_timeout: i64,
    items_downloaded: i64,
    total_items: Option<i64>,
    last_requested_at: DateTime<Utc>,
    time_since_new_items: i64,
    cursor_data: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<WatcherRow> for WatcherRecord {
    type Error = WatcherError;

    fn try_from(row: WatcherRow) -> Result<Self> {
        Ok(WatcherRecord {
            id: row.id,
            url: row.url,
            source_type: row.source_type.parse()?,
            description: row.description,
            status: row.status.parse()?,
            request_interval: row.request_interval,
            items_per_request: row.items_per_request,
            inactivity_timeout: row.inactivity_timeout,
            items_downloaded: row.items_downloaded,
            total_items: row.total_items,
            last_requested_at: row.last_requested_at,
            time_since_new_items: row.time_since_new_items,
            cursor_data: row.cursor_data,
            created_at: row.created_at,
        })
    }
}

impl PgWatcherStore {
    pub fn new(pool: PgPool, vault_id: impl Into<String>) -> Self {
        Self {
            pool,
            vault_id: vault_id.into(),
        }
    }
}

#[async_trait]
impl WatcherStore for PgWatcherStore {
    async fn load_all(&self) -> Result<Vec<WatcherRecord>> {
        let rows = sqlx::query_as::<_, WatcherRow>(
            r#"
            SELECT id, url, source_type, description, status,
                   request_interval, items_per_request, inactivity_timeout,
                   items_downloaded, total_items, last_requested_at,
                   time_since_new_items, cursor_data, created_at
            FROM watchers
            WHERE vault_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(&self.vault_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WatcherRecord::try_from).collect()
    }

    async fn insert(&self, r: &WatcherRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watchers
                (id, url, source_type, description, status,
                 request_interval, items_per_request, inactivity_timeout,
                 items_downloaded, total_items, last_requested_at,
                 time_since_new_items, cursor_data, created_at, vault_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(r.id)
        .bind(&r.url)
        .bind(r.source_type.as_str())
        .bind(&r.description)
        .bind(r.status.as_str())
        .bind(r.request_interval)
        .bind(r.items_per_request)
        .bind(r.inactivity_timeout)
        .bind(r.items_downloaded)
        .bind(r.total_items)
        .bind(r.last_requested_at)
        .bind(r.time_since_new_items)
        .bind(&r.cursor_data)
        .bind(r.created_at)
        .bind(&self.vault_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(&self, r: &WatcherRecord) -> Result<()> {
        // url, source_type and created_at are fixed at creation.
        sqlx::query(
            r#"
            UPDATE watchers SET
                description = $2,
                status = $3,
                request_interval = $4,
                items_per_request = $5,
                inactivity_timeout = $6,
                items_downloaded = $7,
                total_items = $8,
                last_requested_at = $9,
                time_since_new_items = $10,
                cursor_data = $11
            WHERE id = $1 AND vault_id = $12
            "#,
        )
        .bind(r.id)
        .bind(&r.description)
        .bind(r.status.as_str())
        .bind(r.request_interval)
        .bind(r.items_per_request)
        .bind(r.inactivity_timeout)
        .bind(r.items_downloaded)
        .bind(r.total_items)
        .bind(r.last_requested_at)
        .bind(r.time_since_new_items)
        .bind(&r.cursor_data)
        .bind(&self.vault_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM watchers WHERE id = $1 AND vault_id = $2")
            .bind(id)
            .bind(&self.vault_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn link_media(&self, watcher_id: Uuid, media_item_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watchers_media_items (watcher_id, media_item_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(watcher_id)
        .bind(media_item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
