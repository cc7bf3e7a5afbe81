//! Datastore access for the authoritative CRM store.
//!
//! The reconciler only ever talks to [`Datastore`]; [`MemoryStore`] backs tests and
//! dry local runs, [`PgStore`] backs production.

use async_trait::async_trait;
use recon_core::{
    AuditLogEntry, IdentityMapping, InternalRecord, MigrationRun, NewRecord, ObjectType,
    OrphanedRecord, RecordPatch,
};
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "recon-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{object_type} record {id} not found")]
    NotFound { object_type: ObjectType, id: Uuid },
    #[error("migration run {0} not found")]
    RunNotFound(Uuid),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("decoding stored row: {0}")]
    Decode(String),
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Generic data-access surface consumed by reconcilers, the orchestrator and the validator.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// All records of a type in stable store order. `projection` limits the
    /// business fields returned; `None` loads every field.
    async fn list_records(
        &self,
        object_type: ObjectType,
        projection: Option<&[String]>,
    ) -> Result<Vec<InternalRecord>, StoreError>;

    async fn get_record(
        &self,
        object_type: ObjectType,
        id: Uuid,
    ) -> Result<Option<InternalRecord>, StoreError>;

    async fn create_record(
        &self,
        object_type: ObjectType,
        record: &NewRecord,
    ) -> Result<InternalRecord, StoreError>;

    /// Merge `patch` into the stored row. Fields not in the patch are untouched.
    async fn update_record(
        &self,
        object_type: ObjectType,
        id: Uuid,
        patch: &RecordPatch,
    ) -> Result<InternalRecord, StoreError>;

    async fn list_identity_mappings(
        &self,
        object_type: ObjectType,
    ) -> Result<Vec<IdentityMapping>, StoreError>;

    /// Idempotent on `(object_type, external_id)`.
    async fn upsert_identity_mapping(&self, mapping: &IdentityMapping) -> Result<(), StoreError>;

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;

    async fn list_audit(&self, run_id: Uuid) -> Result<Vec<AuditLogEntry>, StoreError>;

    async fn create_run(&self, run: &MigrationRun) -> Result<(), StoreError>;

    /// Writes the terminal state of a run. Fails with [`StoreError::Conflict`] if the
    /// run was already finalized.
    async fn finalize_run(&self, run: &MigrationRun) -> Result<(), StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<MigrationRun>, StoreError>;

    async fn record_orphan(&self, orphan: &OrphanedRecord) -> Result<(), StoreError>;

    async fn list_orphans(&self, run_id: Option<Uuid>) -> Result<Vec<OrphanedRecord>, StoreError>;
}
