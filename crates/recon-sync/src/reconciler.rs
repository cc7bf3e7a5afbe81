//! The per-object pipeline: load candidates, fetch the source export, then
//! resolve, merge and persist one record at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use recon_adapters::{fetch_all, SourceReader};
use recon_core::{
    is_empty_value, AuditAction, AuditLogEntry, ExternalRecord, FieldMap, IdentityMapping,
    InternalRecord, MatchMethod, MatchResult, NewRecord, ObjectStats, ObjectType, OrphanReason,
    OrphanedRecord,
};
use recon_storage::Datastore;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ReconcileSettings;
use crate::entities::*;
use crate::merge::build_patch;
use crate::profile::{EntityProfile, Relationship};
use crate::resolver::{CandidatePool, IdentityResolver};
use crate::status::StatusGuard;
use crate::SyncError;

/// Run-scoped collaborators handed to every reconciler.
pub struct ReconcileContext<'a> {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub store: &'a dyn Datastore,
    pub source: &'a dyn SourceReader,
}

/// A match accepted below the review threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub object_type: ObjectType,
    pub source_id: String,
    pub display_name: String,
    pub internal_id: Uuid,
    pub confidence: f64,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectOutcome {
    pub stats: ObjectStats,
    pub review: Vec<ReviewItem>,
}

impl ObjectOutcome {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            stats: ObjectStats::new(object_type),
            review: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    fn object_type(&self) -> ObjectType;

    /// Counts accumulate into `out` as records are processed, so a fatal error
    /// leaves the partial totals in place.
    async fn reconcile(&self, ctx: &ReconcileContext<'_>, out: &mut ObjectOutcome) -> Result<(), SyncError>;
}

/// `external id → internal id` per relationship target.
#[derive(Debug, Default)]
struct ForeignKeys {
    by_target: HashMap<ObjectType, HashMap<String, Uuid>>,
}

enum Resolution {
    Resolved(Uuid),
    Missing(OrphanReason),
}

impl ForeignKeys {
    async fn load(store: &dyn Datastore, relationships: &[Relationship]) -> Result<Self, SyncError> {
        let mut by_target: HashMap<ObjectType, HashMap<String, Uuid>> = HashMap::new();
        for rel in relationships {
            if by_target.contains_key(&rel.target) {
                continue;
            }
            let ids_only: &[String] = &[];
            let mut keys = HashMap::new();
            for record in store.list_records(rel.target, Some(ids_only)).await? {
                if let Some(ext) = record.external_id.filter(|e| !e.is_empty()) {
                    keys.entry(ext).or_insert(record.id);
                }
            }
            for mapping in store.list_identity_mappings(rel.target).await? {
                keys.insert(mapping.external_id, mapping.internal_id);
            }
            by_target.insert(rel.target, keys);
        }
        Ok(Self { by_target })
    }

    fn resolve(&self, rel: &Relationship, record: &ExternalRecord) -> Resolution {
        let Some(reference) = record.text(rel.external_field) else {
            return Resolution::Missing(OrphanReason::NullReference);
        };
        match self.by_target.get(&rel.target).and_then(|keys| keys.get(&reference)) {
            Some(id) => Resolution::Resolved(*id),
            None => Resolution::Missing(OrphanReason::InvalidReference),
        }
    }
}

/// The one generic reconciler; `P` supplies everything type-specific.
pub struct EntityReconciler<P> {
    profile: P,
    resolver: Arc<IdentityResolver>,
    guard: StatusGuard,
    batch_size: usize,
}

impl<P: EntityProfile> EntityReconciler<P> {
    pub fn new(profile: P, resolver: Arc<IdentityResolver>, batch_size: usize) -> Self {
        Self {
            profile,
            resolver,
            guard: StatusGuard,
            batch_size: batch_size.max(1),
        }
    }

    async fn run(&self, ctx: &ReconcileContext<'_>, out: &mut ObjectOutcome) -> Result<(), SyncError> {
        let object_type = self.profile.object_type();
        let projection = self.profile.projection();
        let pool = CandidatePool::new(
            ctx.store
                .list_records(object_type, Some(projection.as_slice()))
                .await?,
            ctx.store.list_identity_mappings(object_type).await?,
        );
        let foreign_keys = ForeignKeys::load(ctx.store, self.profile.relationships()).await?;

        let query = self.profile.source_query();
        let records = fetch_all(ctx.source, &query).await?;
        out.stats.fetched = records.len() as u64;
        info!(
            source = ctx.source.name(),
            fetched = records.len(),
            candidates = pool.len(),
            "source export loaded"
        );

        for (batch_no, batch) in records.chunks(self.batch_size).enumerate() {
            for record in batch {
                if let Err(err) = self.process(ctx, &pool, &foreign_keys, record, out).await {
                    self.record_failure(ctx, record, &err, out).await?;
                }
            }
            info!(
                batch = batch_no + 1,
                processed = out.stats.processed(),
                total = records.len(),
                "batch complete"
            );
        }
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ReconcileContext<'_>,
        pool: &CandidatePool,
        foreign_keys: &ForeignKeys,
        record: &ExternalRecord,
        out: &mut ObjectOutcome,
    ) -> Result<(), SyncError> {
        let result = self
            .resolver
            .find_match(record, &self.profile.match_profile(), pool);
        let mut incoming = self.profile.map_fields(record);

        match result.matched.clone() {
            Some(current) => {
                for rel in self.profile.relationships() {
                    if let Resolution::Resolved(id) = foreign_keys.resolve(rel, record) {
                        incoming.insert(rel.internal_field.to_string(), Value::String(id.to_string()));
                    }
                }
                self.apply_match(ctx, record, &current, &result, incoming, out).await
            }
            None => self.create(ctx, foreign_keys, record, incoming, out).await,
        }
    }

    async fn apply_match(
        &self,
        ctx: &ReconcileContext<'_>,
        record: &ExternalRecord,
        current: &InternalRecord,
        result: &MatchResult,
        incoming: FieldMap,
        out: &mut ObjectOutcome,
    ) -> Result<(), SyncError> {
        let object_type = self.profile.object_type();
        let mut plan = build_patch(self.profile.precedence(), current, &record.source_id, &incoming);

        if let Some(status) = self.profile.status_field() {
            if let Some(Value::String(new_status)) = incoming.get(status.internal) {
                let current_status = current.text(status.internal).unwrap_or_default();
                if current_status != *new_status
                    && self.guard.should_transition(object_type, &current_status, new_status)
                {
                    plan.push_field(
                        status.internal,
                        current.get(status.internal),
                        Value::String(new_status.clone()),
                    );
                } else if current_status != *new_status {
                    debug!(
                        source_id = %record.source_id,
                        current = %current_status,
                        incoming = %new_status,
                        "status regression ignored"
                    );
                }
            }
        }

        let changed = !plan.is_empty();
        if changed && !ctx.dry_run {
            ctx.store.update_record(object_type, current.id, &plan.patch).await?;
        }
        self.upsert_mapping(ctx, record, current.id, result.method, result.confidence)
            .await?;

        let action = match (result.requires_review, changed) {
            (true, _) => AuditAction::FlaggedForReview,
            (false, true) => AuditAction::Updated,
            (false, false) => AuditAction::Matched,
        };
        let mut entry = AuditLogEntry::new(ctx.run_id, object_type, &record.source_id, action);
        entry.internal_id = Some(current.id);
        entry.match_method = result.method;
        entry.confidence = result.confidence;
        entry.changed_fields = plan.changed;
        entry.before = plan.before;
        entry.after = plan.after;
        if result.requires_review {
            entry.message = Some("low-confidence fuzzy match".to_string());
        }
        ctx.store.append_audit(&entry).await?;

        out.stats.matched += 1;
        if changed {
            out.stats.updated += 1;
        } else {
            out.stats.skipped += 1;
        }
        if result.requires_review {
            out.stats.flagged_for_review += 1;
            out.review.push(ReviewItem {
                object_type,
                source_id: record.source_id.clone(),
                display_name: self.profile.display_name(record),
                internal_id: current.id,
                confidence: result.confidence,
                method: result.method,
            });
        }
        Ok(())
    }

    async fn create(
        &self,
        ctx: &ReconcileContext<'_>,
        foreign_keys: &ForeignKeys,
        record: &ExternalRecord,
        mut fields: FieldMap,
        out: &mut ObjectOutcome,
    ) -> Result<(), SyncError> {
        let object_type = self.profile.object_type();

        for rel in self.profile.relationships() {
            match foreign_keys.resolve(rel, record) {
                Resolution::Resolved(id) => {
                    fields.insert(rel.internal_field.to_string(), Value::String(id.to_string()));
                }
                Resolution::Missing(reason) if rel.required => {
                    return self.orphan(ctx, record, rel, reason, fields, out).await;
                }
                Resolution::Missing(_) => {}
            }
        }

        let missing: Vec<&str> = self
            .profile
            .required_fields()
            .iter()
            .copied()
            .filter(|f| is_empty_value(fields.get(*f)))
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::record(
                object_type,
                &record.source_id,
                format!("missing required fields: {}", missing.join(", ")),
            ));
        }

        let internal_id = if ctx.dry_run {
            None
        } else {
            let payload = NewRecord {
                external_id: Some(record.source_id.clone()),
                fields: fields.clone(),
            };
            let created = ctx.store.create_record(object_type, &payload).await?;
            self.upsert_mapping(ctx, record, created.id, MatchMethod::ExternalId, 1.0)
                .await?;
            Some(created.id)
        };

        let mut entry = AuditLogEntry::new(ctx.run_id, object_type, &record.source_id, AuditAction::Created);
        entry.internal_id = internal_id;
        entry.changed_fields = fields.keys().cloned().collect();
        entry.after = fields;
        ctx.store.append_audit(&entry).await?;
        out.stats.created += 1;
        Ok(())
    }

    async fn orphan(
        &self,
        ctx: &ReconcileContext<'_>,
        record: &ExternalRecord,
        rel: &Relationship,
        reason: OrphanReason,
        mut details: FieldMap,
        out: &mut ObjectOutcome,
    ) -> Result<(), SyncError> {
        let object_type = self.profile.object_type();
        let reason_code = reason.code(rel.code);
        details.insert(
            rel.external_field.to_string(),
            record.get(rel.external_field).cloned().unwrap_or(Value::Null),
        );
        warn!(source_id = %record.source_id, reason = %reason_code, "orphaned record held back");

        if !ctx.dry_run {
            let orphan = OrphanedRecord {
                id: Uuid::new_v4(),
                run_id: ctx.run_id,
                object_type,
                external_id: record.source_id.clone(),
                reason_code: reason_code.clone(),
                details: details.clone(),
                created_at: Utc::now(),
            };
            ctx.store.record_orphan(&orphan).await?;
        }

        let mut entry = AuditLogEntry::new(ctx.run_id, object_type, &record.source_id, AuditAction::Skipped);
        entry.message = Some(reason_code);
        entry.after = details;
        ctx.store.append_audit(&entry).await?;
        out.stats.skipped += 1;
        out.stats.orphaned += 1;
        Ok(())
    }

    async fn upsert_mapping(
        &self,
        ctx: &ReconcileContext<'_>,
        record: &ExternalRecord,
        internal_id: Uuid,
        match_method: MatchMethod,
        confidence: f64,
    ) -> Result<(), SyncError> {
        if ctx.dry_run {
            return Ok(());
        }
        let mapping = IdentityMapping {
            object_type: self.profile.object_type(),
            external_id: record.source_id.clone(),
            internal_id,
            run_id: ctx.run_id,
            match_method,
            confidence,
            updated_at: Utc::now(),
        };
        ctx.store.upsert_identity_mapping(&mapping).await?;
        Ok(())
    }

    /// Audit the failure and keep going; losing the audit sink is fatal.
    async fn record_failure(
        &self,
        ctx: &ReconcileContext<'_>,
        record: &ExternalRecord,
        err: &SyncError,
        out: &mut ObjectOutcome,
    ) -> Result<(), SyncError> {
        warn!(source_id = %record.source_id, error = %err, "record failed");
        out.stats.errors += 1;
        let mut entry = AuditLogEntry::new(
            ctx.run_id,
            self.profile.object_type(),
            &record.source_id,
            AuditAction::Error,
        );
        entry.message = Some(err.to_string());
        ctx.store.append_audit(&entry).await?;
        Ok(())
    }
}

#[async_trait]
impl<P: EntityProfile> Reconciler for EntityReconciler<P> {
    fn object_type(&self) -> ObjectType {
        self.profile.object_type()
    }

    async fn reconcile(&self, ctx: &ReconcileContext<'_>, out: &mut ObjectOutcome) -> Result<(), SyncError> {
        let span = info_span!("reconcile", object_type = %self.profile.object_type());
        self.run(ctx, out).instrument(span).await
    }
}

/// Object type → reconciler.
#[derive(Default)]
pub struct ReconcilerRegistry {
    reconcilers: BTreeMap<ObjectType, Box<dyn Reconciler>>,
}

impl ReconcilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All thirteen entity reconcilers sharing one resolver.
    pub fn standard(settings: &ReconcileSettings) -> Result<Self, SyncError> {
        let resolver = Arc::new(IdentityResolver::new(&settings.matching)?);
        let batch = settings.batch_size;
        let mut registry = Self::new();
        registry.register(EntityReconciler::new(AccountProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(ContactProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(LeadProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(OpportunityProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(QuoteProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(ContractProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(WorkOrderProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(ServiceAppointmentProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(InvoiceProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(CommissionProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(CaseProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(TaskProfile, resolver.clone(), batch));
        registry.register(EntityReconciler::new(EventProfile, resolver, batch));
        Ok(registry)
    }

    /// Replaces any reconciler already registered for the same type.
    pub fn register<R: Reconciler + 'static>(&mut self, reconciler: R) {
        self.reconcilers.insert(reconciler.object_type(), Box::new(reconciler));
    }

    pub fn get(&self, object_type: ObjectType) -> Option<&dyn Reconciler> {
        self.reconcilers.get(&object_type).map(|r| r.as_ref())
    }

    pub fn object_types(&self) -> Vec<ObjectType> {
        self.reconcilers.keys().copied().collect()
    }
}
