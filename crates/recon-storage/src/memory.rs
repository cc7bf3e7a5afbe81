use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use recon_core::{
    AuditLogEntry, IdentityMapping, InternalRecord, MigrationRun, NewRecord, ObjectType,
    OrphanedRecord, RecordPatch, RunStatus,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Datastore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<InternalRecord>,
    mappings: BTreeMap<(ObjectType, String), IdentityMapping>,
    audit: Vec<AuditLogEntry>,
    runs: Vec<MigrationRun>,
    orphans: Vec<OrphanedRecord>,
}

/// Insertion-ordered in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record as if it already lived in the store (fixtures, tests).
    pub async fn insert(&self, record: InternalRecord) {
        self.state.lock().await.records.push(record);
    }

    pub async fn record_count(&self, object_type: ObjectType) -> usize {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.object_type == object_type)
            .count()
    }

    pub async fn runs(&self) -> Vec<MigrationRun> {
        self.state.lock().await.runs.clone()
    }
}

fn project(record: &InternalRecord, projection: Option<&[String]>) -> InternalRecord {
    let mut out = record.clone();
    if let Some(fields) = projection {
        out.fields.retain(|k, _| fields.iter().any(|f| f == k));
    }
    out
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn list_records(
        &self,
        object_type: ObjectType,
        projection: Option<&[String]>,
    ) -> Result<Vec<InternalRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.object_type == object_type)
            .map(|r| project(r, projection))
            .collect())
    }

    async fn get_record(
        &self,
        object_type: ObjectType,
        id: Uuid,
    ) -> Result<Option<InternalRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .find(|r| r.object_type == object_type && r.id == id)
            .cloned())
    }

    async fn create_record(
        &self,
        object_type: ObjectType,
        record: &NewRecord,
    ) -> Result<InternalRecord, StoreError> {
        let now = Utc::now();
        let created = InternalRecord {
            id: Uuid::new_v4(),
            object_type,
            external_id: record.external_id.clone(),
            fields: record.fields.clone(),
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.records.push(created.clone());
        Ok(created)
    }

    async fn update_record(
        &self,
        object_type: ObjectType,
        id: Uuid,
        patch: &RecordPatch,
    ) -> Result<InternalRecord, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.object_type == object_type && r.id == id)
            .ok_or(StoreError::NotFound { object_type, id })?;
        if let Some(external_id) = &patch.external_id {
            record.external_id = Some(external_id.clone());
        }
        for (key, value) in &patch.fields {
            record.fields.insert(key.clone(), value.clone());
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list_identity_mappings(
        &self,
        object_type: ObjectType,
    ) -> Result<Vec<IdentityMapping>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .mappings
            .values()
            .filter(|m| m.object_type == object_type)
            .cloned()
            .collect())
    }

    async fn upsert_identity_mapping(&self, mapping: &IdentityMapping) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.mappings.insert(
            (mapping.object_type, mapping.external_id.clone()),
            mapping.clone(),
        );
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.state.lock().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, run_id: Uuid) -> Result<Vec<AuditLogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn create_run(&self, run: &MigrationRun) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.runs.iter().any(|r| r.id == run.id) {
            return Err(StoreError::Conflict(format!("run {} already exists", run.id)));
        }
        state.runs.push(run.clone());
        Ok(())
    }

    async fn finalize_run(&self, run: &MigrationRun) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or(StoreError::RunNotFound(run.id))?;
        if stored.status != RunStatus::Running {
            return Err(StoreError::Conflict(format!(
                "run {} already finalized as {}",
                run.id,
                stored.status.as_str()
            )));
        }
        *stored = run.clone();
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<MigrationRun>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn record_orphan(&self, orphan: &OrphanedRecord) -> Result<(), StoreError> {
        self.state.lock().await.orphans.push(orphan.clone());
        Ok(())
    }

    async fn list_orphans(&self, run_id: Option<Uuid>) -> Result<Vec<OrphanedRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orphans
            .iter()
            .filter(|o| run_id.map_or(true, |id| o.run_id == id))
            .cloned()
            .collect())
    }
}
