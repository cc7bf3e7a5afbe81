//! Core domain model for CRM reconciliation runs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "recon-core";

/// Field name → raw value. Ordered so audit payloads serialize stably.
pub type FieldMap = BTreeMap<String, Value>;

/// Reconciled entity types, declared in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Account,
    Contact,
    Lead,
    Opportunity,
    Quote,
    Contract,
    WorkOrder,
    ServiceAppointment,
    Invoice,
    Commission,
    Case,
    Task,
    Event,
}

impl ObjectType {
    pub const ALL: [ObjectType; 13] = [
        ObjectType::Account,
        ObjectType::Contact,
        ObjectType::Lead,
        ObjectType::Opportunity,
        ObjectType::Quote,
        ObjectType::Contract,
        ObjectType::WorkOrder,
        ObjectType::ServiceAppointment,
        ObjectType::Invoice,
        ObjectType::Commission,
        ObjectType::Case,
        ObjectType::Task,
        ObjectType::Event,
    ];

    /// Storage and CLI key.
    pub fn key(self) -> &'static str {
        match self {
            ObjectType::Account => "account",
            ObjectType::Contact => "contact",
            ObjectType::Lead => "lead",
            ObjectType::Opportunity => "opportunity",
            ObjectType::Quote => "quote",
            ObjectType::Contract => "contract",
            ObjectType::WorkOrder => "work_order",
            ObjectType::ServiceAppointment => "service_appointment",
            ObjectType::Invoice => "invoice",
            ObjectType::Commission => "commission",
            ObjectType::Case => "case",
            ObjectType::Task => "task",
            ObjectType::Event => "event",
        }
    }

    /// Salesforce sObject API name.
    pub fn sobject(self) -> &'static str {
        match self {
            ObjectType::Account => "Account",
            ObjectType::Contact => "Contact",
            ObjectType::Lead => "Lead",
            ObjectType::Opportunity => "Opportunity",
            ObjectType::Quote => "Quote",
            ObjectType::Contract => "Contract",
            ObjectType::WorkOrder => "WorkOrder",
            ObjectType::ServiceAppointment => "ServiceAppointment",
            ObjectType::Invoice => "Invoice__c",
            ObjectType::Commission => "Commission__c",
            ObjectType::Case => "Case",
            ObjectType::Task => "Task",
            ObjectType::Event => "Event",
        }
    }

    /// Position in [`ObjectType::ALL`]; used to sort allow-lists into dependency order.
    pub fn dependency_rank(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown object type: {0}")]
pub struct UnknownObjectType(pub String);

impl FromStr for ObjectType {
    type Err = UnknownObjectType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        let folded = wanted.to_ascii_lowercase().replace('-', "_");
        ObjectType::ALL
            .into_iter()
            .find(|t| t.key() == folded || t.sobject().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownObjectType(s.to_string()))
    }
}

/// Parse a comma-separated allow-list such as `account,contact,work_order`.
pub fn parse_object_list(input: &str) -> Result<Vec<ObjectType>, UnknownObjectType> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ObjectType::from_str)
        .collect()
}

/// `null`, missing and blank strings are all "empty".
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Render a scalar as trimmed text; empty values and containers yield `None`.
pub fn value_as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Immutable snapshot of one source-system record, raw field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub object_type: ObjectType,
    pub source_id: String,
    pub fields: FieldMap,
}

impl ExternalRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<String> {
        value_as_text(self.fields.get(field))
    }
}

/// Row in the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalRecord {
    pub id: Uuid,
    pub object_type: ObjectType,
    pub external_id: Option<String>,
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InternalRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<String> {
        value_as_text(self.fields.get(field))
    }
}

/// Creation payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub external_id: Option<String>,
    pub fields: FieldMap,
}

/// Update payload. Only carries fields the merge policy allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub external_id: Option<String>,
    pub fields: FieldMap,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none() && self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMethod {
    ExternalId,
    Email,
    Phone,
    NameAccount,
    NameAddress,
    JobNumber,
    Fuzzy,
    None,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::ExternalId => "EXTERNAL_ID",
            MatchMethod::Email => "EMAIL",
            MatchMethod::Phone => "PHONE",
            MatchMethod::NameAccount => "NAME_ACCOUNT",
            MatchMethod::NameAddress => "NAME_ADDRESS",
            MatchMethod::JobNumber => "JOB_NUMBER",
            MatchMethod::Fuzzy => "FUZZY",
            MatchMethod::None => "NONE",
        }
    }
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            MatchMethod::ExternalId,
            MatchMethod::Email,
            MatchMethod::Phone,
            MatchMethod::NameAccount,
            MatchMethod::NameAddress,
            MatchMethod::JobNumber,
            MatchMethod::Fuzzy,
            MatchMethod::None,
        ]
        .into_iter()
        .find(|m| m.as_str() == s)
        .ok_or_else(|| format!("unknown match method: {s}"))
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of identity resolution for one external record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: Option<InternalRecord>,
    pub confidence: f64,
    pub method: MatchMethod,
    pub requires_review: bool,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            matched: None,
            confidence: 0.0,
            method: MatchMethod::None,
            requires_review: false,
        }
    }

    pub fn matched(record: InternalRecord, method: MatchMethod, confidence: f64) -> Self {
        Self {
            matched: Some(record),
            confidence: confidence.clamp(0.0, 1.0),
            method,
            requires_review: false,
        }
    }

    pub fn flagged(mut self, requires_review: bool) -> Self {
        self.requires_review = requires_review;
        self
    }

    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

/// How an incoming field value is allowed to overwrite the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldClass {
    System,
    UserEdited,
    Calculated,
    Status,
    UpdateIfEmpty,
    AlwaysUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Per-type counters for one reconciler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStats {
    pub object_type: ObjectType,
    pub fetched: u64,
    pub matched: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub orphaned: u64,
    pub errors: u64,
    pub flagged_for_review: u64,
}

impl ObjectStats {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            fetched: 0,
            matched: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            orphaned: 0,
            errors: 0,
            flagged_for_review: 0,
        }
    }

    /// Records that reached a terminal outcome (created, updated, skipped or errored).
    pub fn processed(&self) -> u64 {
        self.created + self.updated + self.skipped + self.errors
    }
}

/// Aggregate counts stored on the run row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub matched: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl RunTotals {
    pub fn absorb(&mut self, stats: &ObjectStats) {
        self.matched += stats.matched;
        self.created += stats.created;
        self.updated += stats.updated;
        self.skipped += stats.skipped;
        self.errors += stats.errors;
    }
}

/// One row per orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRun {
    pub id: Uuid,
    pub dry_run: bool,
    pub object_types: Vec<ObjectType>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub totals: RunTotals,
    pub error_message: Option<String>,
}

impl MigrationRun {
    pub fn start(dry_run: bool, object_types: Vec<ObjectType>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dry_run,
            object_types,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            totals: RunTotals::default(),
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Updated,
    Matched,
    Skipped,
    Error,
    FlaggedForReview,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "CREATED",
            AuditAction::Updated => "UPDATED",
            AuditAction::Matched => "MATCHED",
            AuditAction::Skipped => "SKIPPED",
            AuditAction::Error => "ERROR",
            AuditAction::FlaggedForReview => "FLAGGED_FOR_REVIEW",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(AuditAction::Created),
            "UPDATED" => Ok(AuditAction::Updated),
            "MATCHED" => Ok(AuditAction::Matched),
            "SKIPPED" => Ok(AuditAction::Skipped),
            "ERROR" => Ok(AuditAction::Error),
            "FLAGGED_FOR_REVIEW" => Ok(AuditAction::FlaggedForReview),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// Append-only decision record; exactly one per processed external record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub run_id: Uuid,
    pub object_type: ObjectType,
    pub external_id: String,
    pub internal_id: Option<Uuid>,
    pub action: AuditAction,
    pub match_method: MatchMethod,
    pub confidence: f64,
    pub changed_fields: Vec<String>,
    pub before: FieldMap,
    pub after: FieldMap,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(run_id: Uuid, object_type: ObjectType, external_id: &str, action: AuditAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            object_type,
            external_id: external_id.to_string(),
            internal_id: None,
            action,
            match_method: MatchMethod::None,
            confidence: 0.0,
            changed_fields: Vec::new(),
            before: FieldMap::new(),
            after: FieldMap::new(),
            message: None,
            created_at: Utc::now(),
        }
    }
}

/// Durable `(object_type, external_id) → internal_id` cross-reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMapping {
    pub object_type: ObjectType,
    pub external_id: String,
    pub internal_id: Uuid,
    pub run_id: Uuid,
    pub match_method: MatchMethod,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

/// Would-be-created record held back because a required relationship is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub object_type: ObjectType,
    pub external_id: String,
    pub reason_code: String,
    pub details: FieldMap,
    pub created_at: DateTime<Utc>,
}

/// Why a required relationship could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrphanReason {
    /// The source record carries no reference at all.
    NullReference,
    /// The reference is present but does not resolve to an internal record.
    InvalidReference,
}

impl OrphanReason {
    /// `NULL_ACCOUNT_ID` / `INVALID_ACCOUNT_ID` style reason code.
    pub fn code(self, relationship: &str) -> String {
        let rel = relationship.to_ascii_uppercase();
        match self {
            OrphanReason::NullReference => format!("NULL_{rel}_ID"),
            OrphanReason::InvalidReference => format!("INVALID_{rel}_ID"),
        }
    }
}

/// Projection the source reader must fetch for one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuery {
    pub object_type: ObjectType,
    pub sobject: String,
    pub fields: Vec<String>,
}

impl SourceQuery {
    /// Always includes `Id`, deduplicated, in declaration order.
    pub fn new(object_type: ObjectType, fields: &[&str]) -> Self {
        let mut out: Vec<String> = vec!["Id".to_string()];
        for field in fields {
            if !out.iter().any(|f| f == field) {
                out.push((*field).to_string());
            }
        }
        Self {
            object_type,
            sobject: object_type.sobject().to_string(),
            fields: out,
        }
    }
}
