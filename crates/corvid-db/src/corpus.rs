//! SQLite corpus repository: sources, versions, chunks, sync scopes.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use corvid_core::defaults;
use corvid_core::{
    new_v7, ActiveChunk, Chunk, ConnectorType, CorpusRepository, Error, NewChunk, NewSource,
    Result, Source, SourceMeta, SourceVersion, SyncMode, SyncScope, Visibility,
};

pub struct SqliteCorpusRepository {
    pool: SqlitePool,
}

impl SqliteCorpusRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SOURCE_COLUMNS: &str = "id, workspace_id, external_id, connector, title, content_hash, \
     content, visibility, created_by, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, source_id, version_number, content_hash, content, char_count, \
     token_estimate, is_active, created_at";

const CHUNK_COLUMNS: &str = "id, source_id, source_version_id, chunk_index, char_start, \
     char_end, text, token_estimate, created_at";

fn parse_connector(raw: &str) -> Result<ConnectorType> {
    ConnectorType::from_str_loose(raw)
        .ok_or_else(|| Error::Internal(format!("unknown connector in storage: {raw}")))
}

fn parse_source(row: &SqliteRow) -> Result<Source> {
    let connector_raw: String = row.try_get("connector")?;
    let visibility_raw: String = row.try_get("visibility")?;
    let visibility = Visibility::from_str_loose(&visibility_raw).ok_or_else(|| {
        Error::Internal(format!("unknown visibility in storage: {visibility_raw}"))
    })?;

    Ok(Source {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        external_id: row.try_get("external_id")?,
        connector: parse_connector(&connector_raw)?,
        title: row.try_get("title")?,
        content_hash: row.try_get("content_hash")?,
        content: row.try_get("content")?,
        visibility,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_version(row: &SqliteRow) -> Result<SourceVersion> {
    Ok(SourceVersion {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        version_number: row.try_get("version_number")?,
        content_hash: row.try_get("content_hash")?,
        content: row.try_get("content")?,
        char_count: row.try_get("char_count")?,
        token_estimate: row.try_get("token_estimate")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_chunk(row: &SqliteRow) -> Result<Chunk> {
    Ok(Chunk {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        source_version_id: row.try_get("source_version_id")?,
        chunk_index: row.try_get("chunk_index")?,
        char_start: row.try_get("char_start")?,
        char_end: row.try_get("char_end")?,
        text: row.try_get("text")?,
        token_estimate: row.try_get("token_estimate")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CorpusRepository for SqliteCorpusRepository {
    async fn upsert_source(&self, new: NewSource) -> Result<Source> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sources (id, workspace_id, external_id, connector, title, content_hash,
                                 content, visibility, created_by, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ON CONFLICT (workspace_id, external_id, connector) DO UPDATE SET
                title = excluded.title,
                content_hash = excluded.content_hash,
                content = excluded.content,
                visibility = excluded.visibility,
                updated_at = excluded.updated_at
            RETURNING {SOURCE_COLUMNS}
            "#
        ))
        .bind(new_v7())
        .bind(new.workspace_id)
        .bind(&new.external_id)
        .bind(new.connector.as_str())
        .bind(&new.title)
        .bind(&new.content_hash)
        .bind(&new.content)
        .bind(new.visibility.as_str())
        .bind(new.created_by)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        parse_source(&row)
    }

    async fn get_source(&self, source_id: Uuid) -> Result<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"))
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_source).transpose()
    }

    async fn find_source(
        &self,
        workspace_id: Uuid,
        external_id: &str,
        connector: ConnectorType,
    ) -> Result<Option<Source>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SOURCE_COLUMNS} FROM sources
            WHERE workspace_id = ?1 AND external_id = ?2 AND connector = ?3
            "#
        ))
        .bind(workspace_id)
        .bind(external_id)
        .bind(connector.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_source).transpose()
    }

    async fn list_sources_for_user(
        &self,
        user_id: Uuid,
        connector: ConnectorType,
    ) -> Result<Vec<Source>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SOURCE_COLUMNS} FROM sources
            WHERE created_by = ?1 AND connector = ?2
            ORDER BY created_at ASC
            "#
        ))
        .bind(user_id)
        .bind(connector.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_source).collect()
    }

    async fn delete_source(&self, source_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sources WHERE id = ?1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_version(
        &self,
        source_id: Uuid,
        content: &str,
        content_hash: &str,
    ) -> Result<SourceVersion> {
        let mut tx = self.pool.begin().await?;

        let next_number: i32 = sqlx::query(
            "SELECT COALESCE(MAX(version_number), 0) + 1 AS n FROM source_versions WHERE source_id = ?1",
        )
        .bind(source_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("n")?;

        let char_count = content.len() as i64;
        let token_estimate = (char_count as u64).div_ceil(defaults::CHARS_PER_TOKEN as u64) as i64;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO source_versions (id, source_id, version_number, content_hash, content,
                                         char_count, token_estimate, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            RETURNING {VERSION_COLUMNS}
            "#
        ))
        .bind(new_v7())
        .bind(source_id)
        .bind(next_number)
        .bind(content_hash)
        .bind(content)
        .bind(char_count)
        .bind(token_estimate)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
        let version = parse_version(&row)?;

        tx.commit().await?;
        Ok(version)
    }

    async fn activate_version(&self, version_id: Uuid) -> Result<()> {
        // One statement flips the whole source's active flags, so readers
        // never see zero or two active versions.
        let result = sqlx::query(
            r#"
            UPDATE source_versions
            SET is_active = CASE WHEN id = ?1 THEN 1 ELSE 0 END
            WHERE source_id = (SELECT source_id FROM source_versions WHERE id = ?1)
            "#,
        )
        .bind(version_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("source version {version_id}")));
        }
        Ok(())
    }

    async fn active_version(&self, source_id: Uuid) -> Result<Option<SourceVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM source_versions WHERE source_id = ?1 AND is_active = 1"
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_version).transpose()
    }

    async fn versions_for_source(&self, source_id: Uuid) -> Result<Vec<SourceVersion>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {VERSION_COLUMNS} FROM source_versions
            WHERE source_id = ?1
            ORDER BY version_number ASC
            "#
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_version).collect()
    }

    async fn insert_chunks(&self, chunks: &[NewChunk]) -> Result<Vec<Chunk>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(chunks.len());
        let now = Utc::now();

        for chunk in chunks {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO chunks (id, source_id, source_version_id, chunk_index, char_start,
                                    char_end, text, token_estimate, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                RETURNING {CHUNK_COLUMNS}
                "#
            ))
            .bind(new_v7())
            .bind(chunk.source_id)
            .bind(chunk.source_version_id)
            .bind(chunk.chunk_index)
            .bind(chunk.char_start)
            .bind(chunk.char_end)
            .bind(&chunk.text)
            .bind(chunk.token_estimate)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(parse_chunk(&row)?);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn chunks_for_version(&self, version_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CHUNK_COLUMNS} FROM chunks
            WHERE source_version_id = ?1
            ORDER BY chunk_index ASC
            "#
        ))
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_chunk).collect()
    }

    async fn active_chunks(&self, workspace_id: Uuid) -> Result<Vec<ActiveChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source_id, c.source_version_id, c.chunk_index, c.char_start,
                   c.char_end, c.text, c.token_estimate, c.created_at,
                   s.external_id AS src_external_id, s.title AS src_title,
                   s.connector AS src_connector, s.visibility AS src_visibility,
                   s.created_by AS src_created_by
            FROM chunks c
            JOIN source_versions v ON v.id = c.source_version_id AND v.is_active = 1
            JOIN sources s ON s.id = c.source_id
            WHERE s.workspace_id = ?1
            ORDER BY c.source_id, c.chunk_index
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let connector_raw: String = row.try_get("src_connector")?;
                let visibility_raw: String = row.try_get("src_visibility")?;
                let visibility = Visibility::from_str_loose(&visibility_raw).ok_or_else(|| {
                    Error::Internal(format!("unknown visibility in storage: {visibility_raw}"))
                })?;
                Ok(ActiveChunk {
                    chunk: parse_chunk(row)?,
                    source: SourceMeta {
                        id: row.try_get("source_id")?,
                        external_id: row.try_get("src_external_id")?,
                        title: row.try_get("src_title")?,
                        connector: parse_connector(&connector_raw)?,
                        visibility,
                        created_by: row.try_get("src_created_by")?,
                    },
                })
            })
            .collect()
    }

    async fn get_scope(
        &self,
        user_id: Uuid,
        connector: ConnectorType,
    ) -> Result<Option<SyncScope>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, connector, mode, content_strategy, excluded_ids
            FROM sync_scopes
            WHERE user_id = ?1 AND connector = ?2
            "#,
        )
        .bind(user_id)
        .bind(connector.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let connector_raw: String = row.try_get("connector")?;
            let mode_raw: String = row.try_get("mode")?;
            let mode = SyncMode::from_str_loose(&mode_raw)
                .ok_or_else(|| Error::Internal(format!("unknown sync mode in storage: {mode_raw}")))?;
            let excluded_raw: String = row.try_get("excluded_ids")?;
            let excluded_ids: Vec<String> = serde_json::from_str(&excluded_raw)?;
            Ok(SyncScope {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                connector: parse_connector(&connector_raw)?,
                mode,
                content_strategy: row.try_get("content_strategy")?,
                excluded_ids,
            })
        })
        .transpose()
    }

    async fn save_scope(&self, scope: &SyncScope) -> Result<()> {
        let excluded_json = serde_json::to_string(&scope.excluded_ids)?;
        sqlx::query(
            r#"
            INSERT INTO sync_scopes (id, user_id, connector, mode, content_strategy, excluded_ids)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id, connector) DO UPDATE SET
                mode = excluded.mode,
                content_strategy = excluded.content_strategy,
                excluded_ids = excluded.excluded_ids
            "#,
        )
        .bind(scope.id)
        .bind(scope.user_id)
        .bind(scope.connector.as_str())
        .bind(scope.mode.as_str())
        .bind(&scope.content_strategy)
        .bind(&excluded_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
