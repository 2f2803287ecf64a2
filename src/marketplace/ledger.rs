//! Sync run ledger.
//!
//! Each run is written exactly twice: once when it opens and once when it is
//! finalized. [`SyncLedger::finish`] consumes the ledger handle, so a run
//! cannot be finalized twice through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::string_enum;
use crate::marketplace::SyncType;
use crate::store::SyncStore;
use crate::{MarketplaceError, Result};

string_enum!(SyncRunStatus {
    Running => "running",
    Success => "success",
    Failed => "failed",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncRun {
    pub id: Uuid,
    pub integration_id: Option<Uuid>,
    pub channel: String,
    #[sqlx(try_from = "String")]
    pub sync_type: SyncType,
    #[sqlx(try_from = "String")]
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: i32,
    pub errors: i32,
    pub error_message: Option<String>,
}

impl SyncRun {
    pub fn start(integration_id: Option<Uuid>, channel: &str, sync_type: SyncType) -> Self {
        Self {
            id: Uuid::now_v7(), integration_id, channel: channel.to_string(), sync_type, status: SyncRunStatus::Running,
            started_at: Utc::now(), finished_at: None, processed: 0, errors: 0, error_message: None,
        }
    }

    pub fn is_finished(&self) -> bool { self.finished_at.is_some() }

    pub fn finalize(&mut self, status: SyncRunStatus, tally: Tally, error_message: Option<String>) -> Result<()> {
        if self.is_finished() {
            return Err(MarketplaceError::InvalidTransition { from: self.status.to_string(), to: status.to_string() });
        }
        if status == SyncRunStatus::Running {
            return Err(MarketplaceError::Validation("a run cannot be finalized as running".into()));
        }
        self.status = status;
        self.processed = tally.processed;
        self.errors = tally.errors;
        self.error_message = error_message;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Running counters of a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub processed: i32,
    pub errors: i32,
}

impl Tally {
    pub fn record_written(&mut self, n: usize) { self.processed = self.processed.saturating_add(clamp(n)); }
    pub fn record_failed(&mut self, n: usize) { self.errors = self.errors.saturating_add(clamp(n)); }
}

fn clamp(n: usize) -> i32 { i32::try_from(n).unwrap_or(i32::MAX) }

pub struct SyncLedger<'a> {
    store: &'a dyn SyncStore,
    run: SyncRun,
}

impl<'a> SyncLedger<'a> {
    pub async fn open(store: &'a dyn SyncStore, integration_id: Option<Uuid>, channel: &str, sync_type: SyncType) -> Result<Self> {
        let run = SyncRun::start(integration_id, channel, sync_type);
        store.insert_sync_run(&run).await?;
        Ok(Self { store, run })
    }

    pub fn run(&self) -> &SyncRun { &self.run }

    pub async fn finish(mut self, status: SyncRunStatus, tally: Tally, error_message: Option<String>) -> Result<SyncRun> {
        self.run.finalize(status, tally, error_message)?;
        self.store.finish_sync_run(&self.run).await?;
        Ok(self.run)
    }
}
