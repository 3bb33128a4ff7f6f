//! Built-in handlers for the queue's job types.

mod ingest;
mod sync;
mod transcript;

pub use ingest::IngestHandler;
pub use sync::SyncHandler;
pub use transcript::TranscriptHandler;

use async_trait::async_trait;
use uuid::Uuid;

use corvid_core::{ConnectorType, Result};

/// Source of upstream access credentials for sync engines.
///
/// `None` means the connector needs no credential (or the engine resolves
/// its own); an `Err` fails the attempt and is resolved like any other
/// handler error.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential_for(
        &self,
        user_id: Uuid,
        connector: ConnectorType,
        account_id: &str,
    ) -> Result<Option<String>>;
}

/// Credential source for connectors that authenticate out of band.
pub struct NoCredentials;

#[async_trait]
impl CredentialSource for NoCredentials {
    async fn credential_for(
        &self,
        _user_id: Uuid,
        _connector: ConnectorType,
        _account_id: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }
}
