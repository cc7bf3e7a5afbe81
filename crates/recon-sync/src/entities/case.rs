use recon_core::{ExternalRecord, FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship};
use crate::resolver::{FieldPair, MatchProfile};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("CaseNumber", "case_number"),
    FieldMapping::text("Subject", "subject"),
    FieldMapping::text("Priority", "priority"),
    FieldMapping::text("Origin", "origin"),
    FieldMapping::text("Type", "case_type"),
    FieldMapping::text("Description", "description"),
];

const RELATIONSHIPS: &[Relationship] = &[
    Relationship {
        external_field: "AccountId",
        internal_field: "account_id",
        target: ObjectType::Account,
        required: false,
        code: "account",
    },
    Relationship {
        external_field: "ContactId",
        internal_field: "contact_id",
        target: ObjectType::Contact,
        required: false,
        code: "contact",
    },
];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("status", FieldClass::Status),
    ("case_number", FieldClass::UpdateIfEmpty),
    ("resolution", FieldClass::UserEdited),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct CaseProfile;

impl EntityProfile for CaseProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Case
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

    fn display_name(&self, record: &ExternalRecord) -> String {
        match (record.text("CaseNumber"), record.text("Subject")) {
            (Some(number), Some(subject)) => format!("{number}: {subject}"),
            (Some(one), None) | (None, Some(one)) => one,
            (None, None) => record.source_id.clone(),
        }
    }
}
