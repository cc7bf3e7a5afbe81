use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recon_core::{
    AuditAction, AuditLogEntry, FieldMap, IdentityMapping, InternalRecord, MatchMethod,
    MigrationRun, NewRecord, ObjectType, OrphanedRecord, RecordPatch, RunStatus, RunTotals,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::{Datastore, StoreError};

const RECORD_COLUMNS: &str = "id, object_type, external_id, fields, created_at, updated_at";

const RUN_COLUMNS: &str = "\
    id, dry_run, object_types, status, started_at, finished_at, \
    matched, created, updated, skipped, errors, error_message";

const AUDIT_COLUMNS: &str = "\
    id, run_id, object_type, external_id, internal_id, action, match_method, \
    confidence, changed_fields, before, after, message, created_at";

/// Postgres-backed store. Business fields live in a `jsonb` column keyed by
/// snake_case field name.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("datastore migrations applied");
        Ok(())
    }
}

fn parse_object_type(raw: &str) -> Result<ObjectType, StoreError> {
    raw.parse().map_err(|e| StoreError::Decode(format!("{e}")))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn record_from_row(row: &PgRow) -> Result<InternalRecord, StoreError> {
    let object_type: String = row.try_get("object_type")?;
    let Json(fields): Json<FieldMap> = row.try_get("fields")?;
    Ok(InternalRecord {
        id: row.try_get("id")?,
        object_type: parse_object_type(&object_type)?,
        external_id: row.try_get("external_id")?,
        fields,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn mapping_from_row(row: &PgRow) -> Result<IdentityMapping, StoreError> {
    let object_type: String = row.try_get("object_type")?;
    let method: String = row.try_get("match_method")?;
    Ok(IdentityMapping {
        object_type: parse_object_type(&object_type)?,
        external_id: row.try_get("external_id")?,
        internal_id: row.try_get("internal_id")?,
        run_id: row.try_get("run_id")?,
        match_method: method.parse().map_err(StoreError::Decode)?,
        confidence: row.try_get("confidence")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<MigrationRun, StoreError> {
    let object_types: Vec<String> = row.try_get("object_types")?;
    let status: String = row.try_get("status")?;
    Ok(MigrationRun {
        id: row.try_get("id")?,
        dry_run: row.try_get("dry_run")?,
        object_types: object_types
            .iter()
            .map(|t| parse_object_type(t))
            .collect::<Result<_, _>>()?,
        status: status.parse::<RunStatus>().map_err(StoreError::Decode)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        totals: RunTotals {
            matched: to_u64(row.try_get("matched")?),
            created: to_u64(row.try_get("created")?),
            updated: to_u64(row.try_get("updated")?),
            skipped: to_u64(row.try_get("skipped")?),
            errors: to_u64(row.try_get("errors")?),
        },
        error_message: row.try_get("error_message")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditLogEntry, StoreError> {
    let object_type: String = row.try_get("object_type")?;
    let action: String = row.try_get("action")?;
    let method: String = row.try_get("match_method")?;
    let Json(before): Json<FieldMap> = row.try_get("before")?;
    let Json(after): Json<FieldMap> = row.try_get("after")?;
    Ok(AuditLogEntry {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        object_type: parse_object_type(&object_type)?,
        external_id: row.try_get("external_id")?,
        internal_id: row.try_get("internal_id")?,
        action: action.parse::<AuditAction>().map_err(StoreError::Decode)?,
        match_method: method.parse::<MatchMethod>().map_err(StoreError::Decode)?,
        confidence: row.try_get("confidence")?,
        changed_fields: row.try_get("changed_fields")?,
        before,
        after,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Datastore for PgStore {
    async fn list_records(
        &self,
        object_type: ObjectType,
        projection: Option<&[String]>,
    ) -> Result<Vec<InternalRecord>, StoreError> {
        let rows = match projection {
            Some(fields) => {
                sqlx::query(
                    r#"
                    SELECT id, object_type, external_id,
                           COALESCE(
                             (SELECT jsonb_object_agg(key, value)
                                FROM jsonb_each(fields)
                               WHERE key = ANY($2)),
                             '{}'::jsonb
                           ) AS fields,
                           created_at, updated_at
                      FROM crm_records
                     WHERE object_type = $1
                     ORDER BY created_at, id
                    "#,
                )
                .bind(object_type.key())
                .bind(fields)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                let query = format!(
                    "SELECT {RECORD_COLUMNS} FROM crm_records \
                     WHERE object_type = $1 ORDER BY created_at, id"
                );
                sqlx::query(&query)
                    .bind(object_type.key())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(record_from_row).collect()
    }

    async fn get_record(
        &self,
        object_type: ObjectType,
        id: Uuid,
    ) -> Result<Option<InternalRecord>, StoreError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM crm_records WHERE object_type = $1 AND id = $2"
        );
        let row = sqlx::query(&query)
            .bind(object_type.key())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn create_record(
        &self,
        object_type: ObjectType,
        record: &NewRecord,
    ) -> Result<InternalRecord, StoreError> {
        let query = format!(
            "INSERT INTO crm_records (id, object_type, external_id, fields) \
             VALUES ($1, $2, $3, $4) RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(object_type.key())
            .bind(record.external_id.as_deref())
            .bind(Json(&record.fields))
            .fetch_one(&self.pool)
            .await?;
        record_from_row(&row)
    }

    async fn update_record(
        &self,
        object_type: ObjectType,
        id: Uuid,
        patch: &RecordPatch,
    ) -> Result<InternalRecord, StoreError> {
        let query = format!(
            "UPDATE crm_records \
                SET fields = fields || $3, \
                    external_id = COALESCE($4, external_id), \
                    updated_at = now() \
              WHERE object_type = $1 AND id = $2 \
              RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(object_type.key())
            .bind(id)
            .bind(Json(&patch.fields))
            .bind(patch.external_id.as_deref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { object_type, id })?;
        record_from_row(&row)
    }

    async fn list_identity_mappings(
        &self,
        object_type: ObjectType,
    ) -> Result<Vec<IdentityMapping>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT object_type, external_id, internal_id, run_id, match_method, confidence, updated_at
              FROM identity_mappings
             WHERE object_type = $1
             ORDER BY external_id
            "#,
        )
        .bind(object_type.key())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(mapping_from_row).collect()
    }

    async fn upsert_identity_mapping(&self, mapping: &IdentityMapping) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO identity_mappings
                (object_type, external_id, internal_id, run_id, match_method, confidence, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (object_type, external_id) DO UPDATE
               SET internal_id = EXCLUDED.internal_id,
                   run_id = EXCLUDED.run_id,
                   match_method = EXCLUDED.match_method,
                   confidence = EXCLUDED.confidence,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(mapping.object_type.key())
        .bind(&mapping.external_id)
        .bind(mapping.internal_id)
        .bind(mapping.run_id)
        .bind(mapping.match_method.as_str())
        .bind(mapping.confidence)
        .bind(mapping.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO audit_log ({AUDIT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&query)
            .bind(entry.id)
            .bind(entry.run_id)
            .bind(entry.object_type.key())
            .bind(&entry.external_id)
            .bind(entry.internal_id)
            .bind(entry.action.as_str())
            .bind(entry.match_method.as_str())
            .bind(entry.confidence)
            .bind(&entry.changed_fields)
            .bind(Json(&entry.before))
            .bind(Json(&entry.after))
            .bind(entry.message.as_deref())
            .bind(entry.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_audit(&self, run_id: Uuid) -> Result<Vec<AuditLogEntry>, StoreError> {
        let query = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE run_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn create_run(&self, run: &MigrationRun) -> Result<(), StoreError> {
        let object_types: Vec<&str> = run.object_types.iter().map(|t| t.key()).collect();
        sqlx::query(
            r#"
            INSERT INTO migration_runs (id, dry_run, object_types, status, started_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run.id)
        .bind(run.dry_run)
        .bind(&object_types)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_run(&self, run: &MigrationRun) -> Result<(), StoreError> {
        let finished_at: DateTime<Utc> = run.finished_at.unwrap_or_else(Utc::now);
        let result = sqlx::query(
            r#"
            UPDATE migration_runs
               SET status = $2,
                   finished_at = $3,
                   matched = $4,
                   created = $5,
                   updated = $6,
                   skipped = $7,
                   errors = $8,
                   error_message = $9
             WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(finished_at)
        .bind(to_i64(run.totals.matched))
        .bind(to_i64(run.totals.created))
        .bind(to_i64(run.totals.updated))
        .bind(to_i64(run.totals.skipped))
        .bind(to_i64(run.totals.errors))
        .bind(run.error_message.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_run(run.id).await? {
                Some(_) => Err(StoreError::Conflict(format!(
                    "run {} already finalized",
                    run.id
                ))),
                None => Err(StoreError::RunNotFound(run.id)),
            };
        }
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<MigrationRun>, StoreError> {
        let query = format!("SELECT {RUN_COLUMNS} FROM migration_runs WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn record_orphan(&self, orphan: &OrphanedRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orphaned_records
                (id, run_id, object_type, external_id, reason_code, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(orphan.id)
        .bind(orphan.run_id)
        .bind(orphan.object_type.key())
        .bind(&orphan.external_id)
        .bind(&orphan.reason_code)
        .bind(Json(&orphan.details))
        .bind(orphan.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_orphans(&self, run_id: Option<Uuid>) -> Result<Vec<OrphanedRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, object_type, external_id, reason_code, details, created_at
              FROM orphaned_records
             WHERE ($1::uuid IS NULL OR run_id = $1)
             ORDER BY created_at, id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let object_type: String = row.try_get("object_type")?;
            let Json(details): Json<FieldMap> = row.try_get("details")?;
            out.push(OrphanedRecord {
                id: row.try_get("id")?,
                run_id: row.try_get("run_id")?,
                object_type: parse_object_type(&object_type)?,
                external_id: row.try_get("external_id")?,
                reason_code: row.try_get("reason_code")?,
                details,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }
}
