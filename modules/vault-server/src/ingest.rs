// Filesystem media storage. Bytes go to `{dir}/{id}.{ext}`; a media_items row
// records where each file came from so listing watchers can dedup by source.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use vault_watchers::{IngestRequest, MediaIngestor};

pub struct FsMediaIngestor {
    pool: PgPool,
    dir: PathBuf,
}

impl FsMediaIngestor {
    pub fn new(pool: PgPool, dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            dir: dir.into(),
        }
    }
}

/// `{id}.{ext}`, or just `{id}` when the extension is unknown.
pub fn media_file_name(id: Uuid, extension: &str) -> String {
    if extension.is_empty() {
        id.to_string()
    } else {
        format!("{id}.{extension}")
    }
}

#[async_trait]
impl MediaIngestor for FsMediaIngestor {
    async fn ingest(&self, request: IngestRequest) -> vault_watchers::Result<Uuid> {
        let id = Uuid::new_v4();
        let file_name = media_file_name(id, &request.extension);
        let path = self.dir.join(&file_name);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create media dir {}", self.dir.display()))?;
        tokio::fs::write(&path, &request.bytes)
            .await
            .with_context(|| format!("Failed to write media file {}", path.display()))?;

        sqlx::query(
            r#"
            INSERT INTO media_items (id, file_name, extension, source)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(&file_name)
        .bind(&request.extension)
        .bind(&request.source)
        .execute(&self.pool)
        .await?;

        debug!(media_item_id = %id, file_name, bytes = request.bytes.len(), "Media item stored");
        Ok(id)
    }

    async fn has_item_with_source(&self, source: &str) -> vault_watchers::Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM media_items WHERE source = $1)")
                .bind(source)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}
