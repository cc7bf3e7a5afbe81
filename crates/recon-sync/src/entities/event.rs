use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::MatchProfile;

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("Subject", "subject"),
    FieldMapping::new("StartDateTime", "start_at", ValueKind::Date),
    FieldMapping::new("EndDateTime", "end_at", ValueKind::Date),
    FieldMapping::new("IsAllDayEvent", "all_day", ValueKind::Bool),
    FieldMapping::text("Location", "location"),
    FieldMapping::text("WhoId", "who_external_id"),
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
    ("location", FieldClass::UserEdited),
    ("description", FieldClass::UserEdited),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct EventProfile;

impl EntityProfile for EventProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Event
    }

    fn fields(&self) -> &'static [FieldMapping] {
        FIELDS
    }

    fn relationships(&self) -> &'static [Relationship] {
        RELATIONSHIPS
    }

    fn match_profile(&self) -> MatchProfile {
        MatchProfile::default()
    }

    fn precedence(&self) -> &'static FieldPrecedence {
        &PRECEDENCE
    }
}
