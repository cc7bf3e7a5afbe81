//! Read-only integrity checks over the store.

use std::collections::{BTreeMap, HashMap, HashSet};

use recon_core::{value_as_text, InternalRecord, ObjectType};
use recon_storage::{Datastore, StoreError};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::profile_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    DuplicateExternalId,
    /// Required relationship field is empty.
    OrphanedForeignKey,
    /// Required relationship points at an internal id that does not exist.
    DanglingForeignKey,
    StoreUnavailable,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueKind::DuplicateExternalId => "DUPLICATE_EXTERNAL_ID",
            IssueKind::OrphanedForeignKey => "ORPHANED_FOREIGN_KEY",
            IssueKind::DanglingForeignKey => "DANGLING_FOREIGN_KEY",
            IssueKind::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub object_type: ObjectType,
    pub external_id: Option<String>,
    pub record_ids: Vec<Uuid>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coverage {
    pub object_type: ObjectType,
    pub total: u64,
    pub with_external_ref: u64,
    pub ratio: f64,
}

impl Coverage {
    fn of(object_type: ObjectType, records: &[InternalRecord]) -> Self {
        let total = records.len() as u64;
        let with_external_ref = records
            .iter()
            .filter(|r| r.external_id.as_deref().is_some_and(|e| !e.is_empty()))
            .count() as u64;
        let ratio = if total == 0 {
            0.0
        } else {
            with_external_ref as f64 / total as f64
        };
        Self {
            object_type,
            total,
            with_external_ref,
            ratio,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub coverage: Vec<Coverage>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn to_markdown(&self) -> String {
        let mut lines = vec!["# Reconciliation Validation".to_string(), String::new()];
        lines.push("## Coverage".to_string());
        lines.push("| object | total | with external ref | coverage |".to_string());
        lines.push("|---|---:|---:|---:|".to_string());
        for c in &self.coverage {
            lines.push(format!(
                "| {} | {} | {} | {:.1}% |",
                c.object_type,
                c.total,
                c.with_external_ref,
                c.ratio * 100.0
            ));
        }
        lines.push(String::new());
        lines.push(format!("## Issues ({})", self.issues.len()));
        if self.issues.is_empty() {
            lines.push("- none".to_string());
        }
        for issue in &self.issues {
            lines.push(format!(
                "- `{}` {} {}: {}",
                issue.kind.as_str(),
                issue.object_type,
                issue.external_id.as_deref().unwrap_or("-"),
                issue.detail
            ));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    /// Never fails; store errors surface as `StoreUnavailable` issues.
    pub async fn run(store: &dyn Datastore, object_types: &[ObjectType]) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut id_cache: HashMap<ObjectType, HashSet<Uuid>> = HashMap::new();

        for &object_type in object_types {
            let records = match store.list_records(object_type, None).await {
                Ok(records) => records,
                Err(err) => {
                    report.issues.push(unavailable(object_type, &err));
                    continue;
                }
            };
            report.coverage.push(Coverage::of(object_type, &records));
            duplicate_external_ids(object_type, &records, &mut report);

            for rel in profile_for(object_type).relationships().iter().filter(|r| r.required) {
                let targets = match target_ids(store, rel.target, &mut id_cache).await {
                    Ok(ids) => ids,
                    Err(err) => {
                        report.issues.push(unavailable(rel.target, &err));
                        continue;
                    }
                };
                for record in records.iter().filter(|r| r.external_id.is_some()) {
                    let reference = value_as_text(record.get(rel.internal_field));
                    let issue = match reference {
                        None => Some((
                            IssueKind::OrphanedForeignKey,
                            format!("{} is empty", rel.internal_field),
                        )),
                        Some(raw) => match Uuid::parse_str(&raw) {
                            Ok(id) if targets.contains(&id) => None,
                            _ => Some((
                                IssueKind::DanglingForeignKey,
                                format!("{} = {raw} has no {} record", rel.internal_field, rel.target),
                            )),
                        },
                    };
                    if let Some((kind, detail)) = issue {
                        report.issues.push(ValidationIssue {
                            kind,
                            object_type,
                            external_id: record.external_id.clone(),
                            record_ids: vec![record.id],
                            detail,
                        });
                    }
                }
            }
        }

        info!(
            issues = report.issues.len(),
            object_types = object_types.len(),
            "validation finished"
        );
        report
    }

    /// Coverage only, for reporting runs.
    pub async fn coverage(store: &dyn Datastore, object_types: &[ObjectType]) -> ValidationReport {
        let ids_only: &[String] = &[];
        let mut report = ValidationReport::default();
        for &object_type in object_types {
            match store.list_records(object_type, Some(ids_only)).await {
                Ok(records) => report.coverage.push(Coverage::of(object_type, &records)),
                Err(err) => report.issues.push(unavailable(object_type, &err)),
            }
        }
        report
    }
}

fn unavailable(object_type: ObjectType, err: &StoreError) -> ValidationIssue {
    warn!(%object_type, error = %err, "validation could not read store");
    ValidationIssue {
        kind: IssueKind::StoreUnavailable,
        object_type,
        external_id: None,
        record_ids: Vec::new(),
        detail: err.to_string(),
    }
}

fn duplicate_external_ids(object_type: ObjectType, records: &[InternalRecord], report: &mut ValidationReport) {
    let mut groups: BTreeMap<&str, Vec<Uuid>> = BTreeMap::new();
    for record in records {
        if let Some(ext) = record.external_id.as_deref().filter(|e| !e.is_empty()) {
            groups.entry(ext).or_default().push(record.id);
        }
    }
    for (ext, ids) in groups.into_iter().filter(|(_, ids)| ids.len() > 1) {
        report.issues.push(ValidationIssue {
            kind: IssueKind::DuplicateExternalId,
            object_type,
            external_id: Some(ext.to_string()),
            detail: format!("{} records share external id {ext}", ids.len()),
            record_ids: ids,
        });
    }
}

async fn target_ids<'c>(
    store: &dyn Datastore,
    object_type: ObjectType,
    cache: &'c mut HashMap<ObjectType, HashSet<Uuid>>,
) -> Result<&'c HashSet<Uuid>, StoreError> {
    if !cache.contains_key(&object_type) {
        let ids_only: &[String] = &[];
        let ids = store
            .list_records(object_type, Some(ids_only))
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        cache.insert(object_type, ids);
    }
    Ok(&*cache.entry(object_type).or_default())
}
