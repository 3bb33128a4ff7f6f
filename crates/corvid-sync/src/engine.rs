//! Sync engine contract and per-pass context.
//!
//! A sync engine wraps one connector API behind a two-call contract: list
//! candidate items cheaply, then fetch full content for one item. Engines own
//! their network timeouts; the orchestrator owns everything after the fetch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use corvid_core::{ConnectorType, Result, SyncScope};

use crate::progress::{NullProgressSink, ProgressSink};

/// A candidate item discovered by `fetch_metadata`. Cheap to produce; no
/// full text yet.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    pub external_id: String,
    pub title: String,
    pub url: Option<String>,
    pub mime_type: Option<String>,
    /// Upstream-reported content hash, when the connector provides one.
    pub content_hash: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteItem {
    pub fn new(external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            url: None,
            mime_type: None,
            content_hash: None,
            modified_at: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

/// Full content for one item.
#[derive(Debug, Clone)]
pub struct RemoteContent {
    pub item: RemoteItem,
    pub text: String,
    pub metadata: JsonValue,
}

impl RemoteContent {
    pub fn new(item: RemoteItem, text: impl Into<String>) -> Self {
        Self {
            item,
            text: text.into(),
            metadata: JsonValue::Null,
        }
    }
}

/// Everything one sync pass needs: the acting user, the target account, the
/// user's scope configuration, an access credential, and a progress sink.
#[derive(Clone)]
pub struct SyncContext {
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub account_id: String,
    pub credential: Option<String>,
    pub scope: SyncScope,
    pub progress: Arc<dyn ProgressSink>,
}

impl SyncContext {
    pub fn new(
        user_id: Uuid,
        workspace_id: Uuid,
        account_id: impl Into<String>,
        scope: SyncScope,
    ) -> Self {
        Self {
            user_id,
            workspace_id,
            account_id: account_id.into(),
            credential: None,
            scope,
            progress: Arc::new(NullProgressSink),
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn connector(&self) -> ConnectorType {
        self.scope.connector
    }
}

/// One implementation per connector type.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    fn connector(&self) -> ConnectorType;

    /// List candidate items. Metadata only; must not fetch full content.
    async fn fetch_metadata(&self, ctx: &SyncContext) -> Result<Vec<RemoteItem>>;

    /// Fetch full content for one item. `None` means the item has no
    /// fetchable text (binary attachment, tombstone) and is skipped.
    async fn fetch_content(&self, ctx: &SyncContext, item: &RemoteItem)
        -> Result<Option<RemoteContent>>;
}
