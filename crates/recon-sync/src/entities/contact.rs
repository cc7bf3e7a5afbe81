use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{CompositeKey, FieldPair, MatchProfile, NameKey};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("FirstName", "first_name"),
    FieldMapping::text("LastName", "last_name"),
    FieldMapping::new("Email", "email", ValueKind::Email),
    FieldMapping::new("Phone", "phone", ValueKind::Phone),
    FieldMapping::new("MobilePhone", "mobile_phone", ValueKind::Phone),
    FieldMapping::text("Title", "title"),
    FieldMapping::text("MailingStreet", "mailing_street"),
    FieldMapping::text("MailingCity", "mailing_city"),
    FieldMapping::text("MailingState", "mailing_state"),
    FieldMapping::text("MailingPostalCode", "mailing_postal_code"),
    FieldMapping::new("HasOptedOutOfEmail", "email_opt_out", ValueKind::Bool),
];

const RELATIONSHIPS: &[Relationship] = &[Relationship {
    external_field: "AccountId",
    internal_field: "account_id",
    target: ObjectType::Account,
    required: false,
    code: "account",
}];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("first_name", FieldClass::UserEdited),
    ("last_name", FieldClass::UserEdited),
    ("email", FieldClass::UpdateIfEmpty),
    ("phone", FieldClass::UpdateIfEmpty),
    ("mobile_phone", FieldClass::UpdateIfEmpty),
]);

const PERSON: NameKey = NameKey::Person {
    first: FieldPair::new("FirstName", "first_name"),
    last: FieldPair::new("LastName", "last_name"),
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ContactProfile;

impl EntityProfile for ContactProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Contact
    }

    fn fields(&self) -> &'static [FieldMapping] {
        FIELDS
    }

    fn relationships(&self) -> &'static [Relationship] {
        RELATIONSHIPS
    }

    fn match_profile(&self) -> MatchProfile {
        MatchProfile {
            email: Some(FieldPair::new("Email", "email")),
            phone: Some(FieldPair::new("Phone", "phone")),
            composite: Some(CompositeKey::NameAccount {
                name: PERSON,
                account: FieldPair::new("AccountId", "account_id"),
            }),
            fuzzy: Some(PERSON),
        }
    }

    fn precedence(&self) -> &'static FieldPrecedence {
        &PRECEDENCE
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["last_name"]
    }
}
