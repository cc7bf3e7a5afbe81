use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{FieldPair, MatchProfile};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("Name", "name"),
    FieldMapping::text("Sales_Rep__c", "sales_rep"),
    FieldMapping::new("Commission_Rate__c", "rate", ValueKind::Number),
    FieldMapping::new("Commission_Amount__c", "amount", ValueKind::Number),
    FieldMapping::new("Paid_Date__c", "paid_date", ValueKind::Date),
];

const RELATIONSHIPS: &[Relationship] = &[Relationship {
    external_field: "Opportunity__c",
    internal_field: "opportunity_id",
    target: ObjectType::Opportunity,
    required: true,
    code: "opportunity",
}];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("status", FieldClass::Status),
    ("rate", FieldClass::UserEdited),
    ("amount", FieldClass::Calculated),
    ("paid_date", FieldClass::UpdateIfEmpty),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct CommissionProfile;

impl EntityProfile for CommissionProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Commission
    }

    fn fields(&self) -> &'static [FieldMapping] {
        FIELDS
    }

    fn relationships(&self) -> &'static [Relationship] {
        RELATIONSHIPS
    }

    fn status_field(&self) -> Option<FieldPair> {
        Some(FieldPair::new("Status__c", "status"))
    }

    fn match_profile(&self) -> MatchProfile {
        MatchProfile::default()
    }

    fn precedence(&self) -> &'static FieldPrecedence {
        &PRECEDENCE
    }
}
