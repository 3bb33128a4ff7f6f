//! SQLite sync audit repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use corvid_core::{
    new_v7, AuditRepository, ConnectorType, Error, NewSyncAudit, Result, SyncAudit,
};

pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const AUDIT_COLUMNS: &str = "id, user_id, connector, account_id, discovered, processed, deleted, \
     chunks_created, success, errors, created_at";

fn parse_audit(row: &SqliteRow) -> Result<SyncAudit> {
    let connector_raw: String = row.try_get("connector")?;
    let connector = ConnectorType::from_str_loose(&connector_raw)
        .ok_or_else(|| Error::Internal(format!("unknown connector in storage: {connector_raw}")))?;
    let errors_raw: String = row.try_get("errors")?;
    let errors: Vec<String> = serde_json::from_str(&errors_raw)?;

    Ok(SyncAudit {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        connector,
        account_id: row.try_get("account_id")?,
        discovered: row.try_get("discovered")?,
        processed: row.try_get("processed")?,
        deleted: row.try_get("deleted")?,
        chunks_created: row.try_get("chunks_created")?,
        success: row.try_get("success")?,
        errors,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn record_sync(&self, audit: NewSyncAudit) -> Result<SyncAudit> {
        let errors_json = serde_json::to_string(&audit.errors)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sync_audits (id, user_id, connector, account_id, discovered, processed,
                                     deleted, chunks_created, success, errors, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            RETURNING {AUDIT_COLUMNS}
            "#
        ))
        .bind(new_v7())
        .bind(audit.user_id)
        .bind(audit.connector.as_str())
        .bind(&audit.account_id)
        .bind(audit.discovered)
        .bind(audit.processed)
        .bind(audit.deleted)
        .bind(audit.chunks_created)
        .bind(audit.success)
        .bind(&errors_json)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        parse_audit(&row)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<SyncAudit>> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM sync_audits ORDER BY created_at DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_audit).collect()
    }
}
