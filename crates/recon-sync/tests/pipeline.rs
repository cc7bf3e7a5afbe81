use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use recon_adapters::MemorySource;
use recon_core::{
    AuditAction, AuditLogEntry, IdentityMapping, InternalRecord, MatchMethod, MigrationRun,
    NewRecord, ObjectStats, ObjectType, OrphanedRecord, RecordPatch, RunStatus,
};
use recon_storage::{Datastore, MemoryStore, StoreError};
use recon_sync::{
    MigrationOrchestrator, ReconcileSettings, ReconcilerRegistry, RunFailed, RunOptions, RunOutcome,
    SyncError,
};
use serde_json::{json, Value};
use uuid::Uuid;

fn seeded(object_type: ObjectType, external_id: Option<&str>, fields: Value) -> InternalRecord {
    InternalRecord {
        id: Uuid::new_v4(),
        object_type,
        external_id: external_id.map(str::to_string),
        fields: serde_json::from_value(fields).unwrap(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

async fn run_with(
    store: Arc<dyn Datastore>,
    source: MemorySource,
    settings: ReconcileSettings,
    dry_run: bool,
    object_types: &[ObjectType],
) -> Result<RunOutcome, RunFailed> {
    let registry = ReconcilerRegistry::standard(&settings).unwrap();
    let orchestrator = MigrationOrchestrator::new(store, Arc::new(source), registry, settings);
    orchestrator
        .run(&RunOptions {
            dry_run,
            object_types: object_types.to_vec(),
        })
        .await
}

async fn run(
    store: &Arc<MemoryStore>,
    source: MemorySource,
    object_types: &[ObjectType],
) -> RunOutcome {
    run_with(store.clone(), source, ReconcileSettings::default(), false, object_types)
        .await
        .unwrap()
}

fn stats(outcome: &RunOutcome, object_type: ObjectType) -> &ObjectStats {
    &outcome
        .objects
        .iter()
        .find(|o| o.stats.object_type == object_type)
        .unwrap()
        .stats
}

fn crm_export() -> MemorySource {
    MemorySource::new(2)
        .with_records(
            ObjectType::Account,
            vec![
                json!({"Id": "001A", "Name": "Acme Roofing", "BillingStreet": "1 Main St",
                       "BillingCity": "Springfield", "Phone": "555-111-2222"}),
                json!({"Id": "001B", "Name": "Birch Homes"}),
            ],
        )
        .with_records(
            ObjectType::Contact,
            vec![json!({"Id": "003A", "FirstName": "Jane", "LastName": "Doe",
                        "Email": "jane@acme.test", "AccountId": "001A"})],
        )
        .with_records(
            ObjectType::Opportunity,
            vec![json!({"Id": "006A", "Name": "Doe reroof 2025-0142", "AccountId": "001A",
                        "StageName": "Scheduled", "Amount": 12500})],
        )
}

const CRM_TYPES: [ObjectType; 3] = [ObjectType::Account, ObjectType::Contact, ObjectType::Opportunity];

#[tokio::test]
async fn second_run_over_unchanged_source_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());

    let first = run(&store, crm_export(), &CRM_TYPES).await;
    assert_eq!(first.run.status, RunStatus::Completed);
    assert_eq!(stats(&first, ObjectType::Account).created, 2);
    assert_eq!(stats(&first, ObjectType::Contact).created, 1);
    assert_eq!(stats(&first, ObjectType::Opportunity).created, 1);

    let second = run(&store, crm_export(), &CRM_TYPES).await;
    assert_eq!(second.run.totals.created, 0);
    assert_eq!(second.run.totals.updated, 0);
    assert_eq!(second.run.totals.matched, 4);
    assert_eq!(second.run.totals.skipped, 4);
    assert_eq!(store.record_count(ObjectType::Account).await, 2);

    let audit = store.list_audit(second.run.id).await.unwrap();
    assert_eq!(audit.len(), 4);
    assert!(audit
        .iter()
        .all(|e| e.action == AuditAction::Matched && e.match_method == MatchMethod::ExternalId));
}

#[tokio::test]
async fn created_dependents_carry_resolved_foreign_keys() {
    let store = Arc::new(MemoryStore::new());
    run(&store, crm_export(), &CRM_TYPES).await;

    let accounts = store.list_records(ObjectType::Account, None).await.unwrap();
    let acme = accounts
        .iter()
        .find(|a| a.external_id.as_deref() == Some("001A"))
        .unwrap();
    let opportunity = &store.list_records(ObjectType::Opportunity, None).await.unwrap()[0];
    assert_eq!(opportunity.fields["account_id"], json!(acme.id.to_string()));
    assert_eq!(opportunity.fields["stage"], json!("SCHEDULED"));
    assert_eq!(acme.fields["phone"], json!("(555) 111-2222"));

    let mappings = store.list_identity_mappings(ObjectType::Contact).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].external_id, "003A");
}

#[tokio::test]
async fn dry_run_writes_nothing_but_audit_and_run_row() {
    let store = Arc::new(MemoryStore::new());
    let source = MemorySource::new(10)
        .with_records(ObjectType::Account, vec![json!({"Id": "001A", "Name": "Acme"})])
        .with_records(
            ObjectType::WorkOrder,
            vec![json!({"Id": "0WO1", "Subject": "Tear-off", "AccountId": "001A", "Status": "New"})],
        );

    let outcome = run_with(
        store.clone(),
        source,
        ReconcileSettings::default(),
        true,
        &[ObjectType::WorkOrder, ObjectType::Account],
    )
    .await
    .unwrap();

    assert_eq!(stats(&outcome, ObjectType::Account).created, 1);
    let work_orders = stats(&outcome, ObjectType::WorkOrder);
    assert_eq!((work_orders.skipped, work_orders.orphaned), (1, 1));

    assert_eq!(store.record_count(ObjectType::Account).await, 0);
    assert_eq!(store.record_count(ObjectType::WorkOrder).await, 0);
    assert!(store.list_identity_mappings(ObjectType::Account).await.unwrap().is_empty());
    assert!(store.list_orphans(None).await.unwrap().is_empty());

    let audit = store.list_audit(outcome.run.id).await.unwrap();
    let actions: Vec<_> = audit.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Created, AuditAction::Skipped]);
    assert_eq!(audit[1].message.as_deref(), Some("INVALID_ACCOUNT_ID"));

    let runs = store.runs().await;
    assert_eq!(runs.len(), 1);
    assert!(runs[0].dry_run);
    assert_eq!(runs[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn work_orders_without_resolvable_account_are_orphaned() {
    let store = Arc::new(MemoryStore::new());
    let source = MemorySource::new(10)
        .with_records(ObjectType::Account, vec![json!({"Id": "001A", "Name": "Acme"})])
        .with_records(
            ObjectType::WorkOrder,
            vec![
                json!({"Id": "0WO1", "Subject": "Tear-off", "AccountId": "001A"}),
                json!({"Id": "0WO2", "Subject": "Gutters"}),
                json!({"Id": "0WO3", "Subject": "Skylight", "AccountId": "001ZZZ"}),
            ],
        )
        .with_records(
            ObjectType::ServiceAppointment,
            vec![json!({"Id": "08pA", "AppointmentNumber": "SA-1", "ParentRecordId": "0WO1"})],
        );

    let outcome = run(
        &store,
        source,
        &[ObjectType::Account, ObjectType::WorkOrder, ObjectType::ServiceAppointment],
    )
    .await;

    let work_orders = stats(&outcome, ObjectType::WorkOrder);
    assert_eq!(work_orders.created, 1);
    assert_eq!(work_orders.skipped, 2);
    assert_eq!(work_orders.orphaned, 2);
    assert_eq!(stats(&outcome, ObjectType::ServiceAppointment).created, 1);

    let mut codes: Vec<_> = store
        .list_orphans(Some(outcome.run.id))
        .await
        .unwrap()
        .into_iter()
        .map(|o| (o.external_id, o.reason_code))
        .collect();
    codes.sort();
    assert_eq!(
        codes,
        vec![
            ("0WO2".to_string(), "NULL_ACCOUNT_ID".to_string()),
            ("0WO3".to_string(), "INVALID_ACCOUNT_ID".to_string()),
        ]
    );
    assert_eq!(store.record_count(ObjectType::WorkOrder).await, 1);
}

#[tokio::test]
async fn a_bad_record_does_not_stop_its_batch() {
    let store = Arc::new(MemoryStore::new());
    let source = MemorySource::new(10).with_records(
        ObjectType::Contact,
        vec![
            json!({"Id": "003A", "LastName": "Doe"}),
            json!({"Id": "003B", "FirstName": "Nolast"}),
            json!({"Id": "003C", "LastName": "Roe"}),
        ],
    );

    let outcome = run(&store, source, &[ObjectType::Contact]).await;
    let contacts = stats(&outcome, ObjectType::Contact);
    assert_eq!(contacts.created, 2);
    assert_eq!(contacts.errors, 1);
    assert_eq!(outcome.run.status, RunStatus::Completed);

    let audit = store.list_audit(outcome.run.id).await.unwrap();
    let failed = audit.iter().find(|e| e.action == AuditAction::Error).unwrap();
    assert_eq!(failed.external_id, "003B");
    assert!(failed.message.as_deref().unwrap().contains("last_name"));
}

#[tokio::test]
async fn lead_statuses_never_regress_unless_terminal() {
    let store = Arc::new(MemoryStore::new());
    let qualified = seeded(ObjectType::Lead, Some("00Q1"), json!({"last_name": "Alpha", "status": "QUALIFIED"}));
    let converted = seeded(ObjectType::Lead, Some("00Q2"), json!({"last_name": "Beta", "status": "CONVERTED"}));
    store.insert(qualified.clone()).await;
    store.insert(converted.clone()).await;

    let source = MemorySource::new(10).with_records(
        ObjectType::Lead,
        vec![
            json!({"Id": "00Q1", "LastName": "Alpha", "Status": "Open - Not Contacted"}),
            json!({"Id": "00Q2", "LastName": "Beta", "Status": "Working - Contacted"}),
            json!({"Id": "00Q3", "LastName": "Gamma", "Status": "Nurturing"}),
        ],
    );
    let outcome = run(&store, source, &[ObjectType::Lead]).await;
    let leads = stats(&outcome, ObjectType::Lead);
    assert_eq!((leads.matched, leads.updated, leads.created), (2, 1, 1));

    let status_of = |record: Option<InternalRecord>| record.unwrap().fields["status"].clone();
    assert_eq!(
        status_of(store.get_record(ObjectType::Lead, qualified.id).await.unwrap()),
        json!("QUALIFIED")
    );
    assert_eq!(
        status_of(store.get_record(ObjectType::Lead, converted.id).await.unwrap()),
        json!("CONTACTED")
    );
}

#[tokio::test]
async fn natural_key_match_adopts_the_external_id() {
    let store = Arc::new(MemoryStore::new());
    let existing = seeded(
        ObjectType::Contact,
        None,
        json!({"first_name": "Jane", "last_name": "Doe", "email": "jane@example.com", "title": ""}),
    );
    store.insert(existing.clone()).await;
    let export = || {
        MemorySource::new(10).with_records(
            ObjectType::Contact,
            vec![json!({"Id": "003A", "FirstName": "Jane", "LastName": "Doe",
                        "Email": "JANE@EXAMPLE.COM", "Title": "Owner"})],
        )
    };

    let first = run(&store, export(), &[ObjectType::Contact]).await;
    let audit = store.list_audit(first.run.id).await.unwrap();
    assert_eq!(audit[0].action, AuditAction::Updated);
    assert_eq!(audit[0].match_method, MatchMethod::Email);
    assert_eq!(audit[0].changed_fields, vec!["external_id", "title"]);

    let second = run(&store, export(), &[ObjectType::Contact]).await;
    let audit = store.list_audit(second.run.id).await.unwrap();
    assert_eq!(audit[0].action, AuditAction::Matched);
    assert_eq!(audit[0].match_method, MatchMethod::ExternalId);
    assert_eq!(store.record_count(ObjectType::Contact).await, 1);
}

#[tokio::test]
async fn protected_fields_survive_updates() {
    let store = Arc::new(MemoryStore::new());
    let account = seeded(
        ObjectType::Account,
        Some("001A"),
        json!({"name": "Acme Roofing LLC", "website": "acme.test", "industry": "Construction"}),
    );
    store.insert(account.clone()).await;
    let source = MemorySource::new(10).with_records(
        ObjectType::Account,
        vec![json!({"Id": "001A", "Name": "ACME ROOFING", "Website": "acme-new.test",
                    "Industry": "Roofing", "Phone": "555 222 3333"})],
    );

    run(&store, source, &[ObjectType::Account]).await;
    let stored = store.get_record(ObjectType::Account, account.id).await.unwrap().unwrap();
    assert_eq!(stored.fields["name"], json!("Acme Roofing LLC"));
    assert_eq!(stored.fields["website"], json!("acme.test"));
    assert_eq!(stored.fields["industry"], json!("Roofing"));
    assert_eq!(stored.fields["phone"], json!("(555) 222-3333"));
}

#[tokio::test]
async fn low_confidence_fuzzy_matches_land_in_the_review_queue() {
    let store = Arc::new(MemoryStore::new());
    let existing = seeded(ObjectType::Contact, None, json!({"first_name": "Maria", "last_name": "Gonzalez"}));
    store.insert(existing.clone()).await;
    let source = MemorySource::new(10).with_records(
        ObjectType::Contact,
        vec![json!({"Id": "003A", "FirstName": "Mario", "LastName": "Gomez"})],
    );
    let mut settings = ReconcileSettings::default();
    settings.matching.fuzzy_accept_threshold = 0.5;

    let outcome = run_with(store.clone(), source, settings, false, &[ObjectType::Contact])
        .await
        .unwrap();
    let contacts = stats(&outcome, ObjectType::Contact);
    assert_eq!(contacts.flagged_for_review, 1);
    assert_eq!(contacts.matched, 1);

    let review: Vec<_> = outcome.review_items().collect();
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].internal_id, existing.id);
    assert_eq!(review[0].display_name, "Mario Gomez");

    let audit = store.list_audit(outcome.run.id).await.unwrap();
    assert_eq!(audit[0].action, AuditAction::FlaggedForReview);
}

#[tokio::test]
async fn source_failure_fails_the_run_and_keeps_earlier_counts() {
    let store = Arc::new(MemoryStore::new());
    let source = MemorySource::new(10)
        .with_records(ObjectType::Account, vec![json!({"Id": "001A", "Name": "Acme"})])
        .with_records(ObjectType::Lead, vec![json!({"Id": "00Q1", "LastName": "Never"})])
        .failing_on(ObjectType::Contact);

    let failed = run_with(
        store.clone(),
        source,
        ReconcileSettings::default(),
        false,
        &[ObjectType::Lead, ObjectType::Contact, ObjectType::Account],
    )
    .await
    .unwrap_err();

    assert!(matches!(failed.source, SyncError::Source(_)));
    let outcome = &failed.outcome;
    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.objects.len(), 2);
    assert_eq!(stats(outcome, ObjectType::Account).created, 1);
    assert_eq!(store.record_count(ObjectType::Lead).await, 0);

    let stored = store.get_run(failed.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored.error_message.unwrap().contains("connection reset"));
    assert_eq!(stored.totals.created, 1);
}

/// Delegates to a [`MemoryStore`] with injectable write failures.
struct FaultyStore {
    inner: MemoryStore,
    reject_create: Option<&'static str>,
    audit_down: bool,
}

#[async_trait]
impl Datastore for FaultyStore {
    async fn list_records(
        &self,
        object_type: ObjectType,
        projection: Option<&[String]>,
    ) -> Result<Vec<InternalRecord>, StoreError> {
        self.inner.list_records(object_type, projection).await
    }

    async fn get_record(&self, object_type: ObjectType, id: Uuid) -> Result<Option<InternalRecord>, StoreError> {
        self.inner.get_record(object_type, id).await
    }

    async fn create_record(&self, object_type: ObjectType, record: &NewRecord) -> Result<InternalRecord, StoreError> {
        if record.external_id.as_deref() == self.reject_create {
            return Err(StoreError::Unavailable("insert rejected".into()));
        }
        self.inner.create_record(object_type, record).await
    }

    async fn update_record(
        &self,
        object_type: ObjectType,
        id: Uuid,
        patch: &RecordPatch,
    ) -> Result<InternalRecord, StoreError> {
        self.inner.update_record(object_type, id, patch).await
    }

    async fn list_identity_mappings(&self, object_type: ObjectType) -> Result<Vec<IdentityMapping>, StoreError> {
        self.inner.list_identity_mappings(object_type).await
    }

    async fn upsert_identity_mapping(&self, mapping: &IdentityMapping) -> Result<(), StoreError> {
        self.inner.upsert_identity_mapping(mapping).await
    }

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        if self.audit_down {
            return Err(StoreError::Unavailable("audit sink offline".into()));
        }
        self.inner.append_audit(entry).await
    }

    async fn list_audit(&self, run_id: Uuid) -> Result<Vec<AuditLogEntry>, StoreError> {
        self.inner.list_audit(run_id).await
    }

    async fn create_run(&self, run: &MigrationRun) -> Result<(), StoreError> {
        self.inner.create_run(run).await
    }

    async fn finalize_run(&self, run: &MigrationRun) -> Result<(), StoreError> {
        self.inner.finalize_run(run).await
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<MigrationRun>, StoreError> {
        self.inner.get_run(id).await
    }

    async fn record_orphan(&self, orphan: &OrphanedRecord) -> Result<(), StoreError> {
        self.inner.record_orphan(orphan).await
    }

    async fn list_orphans(&self, run_id: Option<Uuid>) -> Result<Vec<OrphanedRecord>, StoreError> {
        self.inner.list_orphans(run_id).await
    }
}

fn two_accounts() -> MemorySource {
    MemorySource::new(10).with_records(
        ObjectType::Account,
        vec![
            json!({"Id": "001A", "Name": "Acme"}),
            json!({"Id": "001B", "Name": "Birch"}),
        ],
    )
}

#[tokio::test]
async fn store_write_failures_are_counted_per_record() {
    let store = Arc::new(FaultyStore {
        inner: MemoryStore::new(),
        reject_create: Some("001A"),
        audit_down: false,
    });
    let outcome = run_with(store.clone(), two_accounts(), ReconcileSettings::default(), false, &[ObjectType::Account])
        .await
        .unwrap();
    let accounts = stats(&outcome, ObjectType::Account);
    assert_eq!((accounts.created, accounts.errors), (1, 1));

    let audit = store.list_audit(outcome.run.id).await.unwrap();
    assert_eq!(audit[0].action, AuditAction::Error);
    assert!(audit[0].message.as_deref().unwrap().contains("insert rejected"));
}

#[tokio::test]
async fn losing_the_audit_sink_is_fatal() {
    let store = Arc::new(FaultyStore {
        inner: MemoryStore::new(),
        reject_create: None,
        audit_down: true,
    });
    let failed = run_with(store.clone(), two_accounts(), ReconcileSettings::default(), false, &[ObjectType::Account])
        .await
        .unwrap_err();

    assert!(matches!(failed.source, SyncError::Store(StoreError::Unavailable(_))));
    assert_eq!(stats(&failed.outcome, ObjectType::Account).errors, 1);
    let stored = store.get_run(failed.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
}
