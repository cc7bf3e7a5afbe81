use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{FieldPair, MatchProfile};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("Name", "name"),
    FieldMapping::text("QuoteNumber", "quote_number"),
    FieldMapping::new("ExpirationDate", "expiration_date", ValueKind::Date),
    FieldMapping::new("Subtotal", "subtotal", ValueKind::Number),
    FieldMapping::new("Discount", "discount", ValueKind::Number),
    FieldMapping::new("GrandTotal", "grand_total", ValueKind::Number),
];

const RELATIONSHIPS: &[Relationship] = &[
    Relationship {
        external_field: "OpportunityId",
        internal_field: "opportunity_id",
        target: ObjectType::Opportunity,
        required: true,
        code: "opportunity",
    },
    Relationship {
        external_field: "AccountId",
        internal_field: "account_id",
        target: ObjectType::Account,
        required: false,
        code: "account",
    },
];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("status", FieldClass::Status),
    ("quote_number", FieldClass::UpdateIfEmpty),
    ("grand_total", FieldClass::Calculated),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteProfile;

impl EntityProfile for QuoteProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Quote
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
