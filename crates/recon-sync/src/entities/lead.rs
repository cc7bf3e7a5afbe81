use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, ValueKind};
use crate::resolver::{FieldPair, MatchProfile, NameKey};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("FirstName", "first_name"),
    FieldMapping::text("LastName", "last_name"),
    FieldMapping::text("Company", "company"),
    FieldMapping::new("Email", "email", ValueKind::Email),
    FieldMapping::new("Phone", "phone", ValueKind::Phone),
    FieldMapping::text("Street", "street"),
    FieldMapping::text("City", "city"),
    FieldMapping::text("State", "state"),
    FieldMapping::text("PostalCode", "postal_code"),
    FieldMapping::text("LeadSource", "lead_source"),
    FieldMapping::text("Rating", "rating"),
];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("status", FieldClass::Status),
    ("first_name", FieldClass::UserEdited),
    ("last_name", FieldClass::UserEdited),
    ("lead_source", FieldClass::UpdateIfEmpty),
    ("email", FieldClass::UpdateIfEmpty),
    ("score", FieldClass::Calculated),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct LeadProfile;

impl EntityProfile for LeadProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Lead
    }

    fn fields(&self) -> &'static [FieldMapping] {
        FIELDS
    }

    fn status_field(&self) -> Option<FieldPair> {
        Some(FieldPair::new("Status", "status"))
    }

    fn match_profile(&self) -> MatchProfile {
        MatchProfile {
            email: Some(FieldPair::new("Email", "email")),
            phone: Some(FieldPair::new("Phone", "phone")),
            composite: None,
            fuzzy: Some(NameKey::Person {
                first: FieldPair::new("FirstName", "first_name"),
                last: FieldPair::new("LastName", "last_name"),
            }),
        }
    }

    fn precedence(&self) -> &'static FieldPrecedence {
        &PRECEDENCE
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["last_name"]
    }
}
