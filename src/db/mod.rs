//! Session archival sink.

mod connection;
pub mod helpers;
mod migrations;
mod repositories;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ReconciliationRecord, SessionRecord};

pub use connection::Database;

/// Receives finalized sessions and the reconciliation diagnostic log.
#[async_trait]
pub trait SessionArchive: Send + Sync {
    /// Store `record`, replacing an earlier archive of the same session.
    async fn archive_session(&self, record: &SessionRecord) -> Result<()>;

    async fn record_reconciliation(&self, record: &ReconciliationRecord) -> Result<()>;
}

#[async_trait]
impl SessionArchive for Database {
    async fn archive_session(&self, record: &SessionRecord) -> Result<()> {
        self.upsert_session(record).await
    }

    async fn record_reconciliation(&self, record: &ReconciliationRecord) -> Result<()> {
        self.insert_reconciliation(record).await
    }
}
