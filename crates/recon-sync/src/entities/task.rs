use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{FieldPair, MatchProfile};

// WhoId/WhatId are polymorphic; they are kept as raw source references.
const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("Subject", "subject"),
    FieldMapping::text("Priority", "priority"),
    FieldMapping::new("ActivityDate", "due_date", ValueKind::Date),
    FieldMapping::text("WhoId", "who_external_id"),
    FieldMapping::text("WhatId", "what_external_id"),
    FieldMapping::text("Description", "description"),
];

const RELATIONSHIPS: &[Relationship] = &[Relationship {
    external_field: "AccountId",
    internal_field: "account_id",
    target: ObjectType::Account,
    required: false,
    code: "account",
}];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("status", FieldClass::Status),
    ("description", FieldClass::UserEdited),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskProfile;

impl EntityProfile for TaskProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Task
    }

    fn fields(&self) -> &'static [FieldMapping] {
        FIELDS
    }

    fn relationships(&self) -> &'static [Relationship] {
        RELATIONSHIPS
    }

    fn status_field(&self) -> Option<FieldPair> {
        Some(FieldPair::new("Status", "status"))
    }

    fn match_profile(&self) -> MatchProfile {
        MatchProfile::default()
    }

    fn precedence(&self) -> &'static FieldPrecedence {
        &PRECEDENCE
    }
}
