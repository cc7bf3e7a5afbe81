use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{CompositeKey, FieldPair, MatchProfile, NameKey};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("Name", "name"),
    FieldMapping::new("Amount", "amount", ValueKind::Number),
    FieldMapping::new("CloseDate", "close_date", ValueKind::Date),
    FieldMapping::text("Type", "opportunity_type"),
    FieldMapping::text("LeadSource", "lead_source"),
    FieldMapping::text("Job_Number__c", "job_number"),
    FieldMapping::text("Claim_Number__c", "claim_number"),
    FieldMapping::text("Description", "description"),
];

const RELATIONSHIPS: &[Relationship] = &[Relationship {
    external_field: "AccountId",
    internal_field: "account_id",
    target: ObjectType::Account,
    required: true,
    code: "account",
}];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("stage", FieldClass::Status),
    ("name", FieldClass::UserEdited),
    ("description", FieldClass::UserEdited),
    ("job_number", FieldClass::UpdateIfEmpty),
    ("claim_number", FieldClass::UpdateIfEmpty),
    ("commission_total", FieldClass::Calculated),
    ("gross_margin", FieldClass::Calculated),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct OpportunityProfile;

impl EntityProfile for OpportunityProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Opportunity
    }

    fn fields(&self) -> &'static [FieldMapping] {
        FIELDS
    }

    fn relationships(&self) -> &'static [Relationship] {
        RELATIONSHIPS
    }

    fn status_field(&self) -> Option<FieldPair> {
        Some(FieldPair::new("StageName", "stage"))
    }

    fn match_profile(&self) -> MatchProfile {
        MatchProfile {
            email: None,
            phone: None,
            composite: Some(CompositeKey::JobNumber {
                name: FieldPair::new("Name", "name"),
                job_number_field: Some("job_number"),
            }),
            fuzzy: Some(NameKey::Single(FieldPair::new("Name", "name"))),
        }
    }

    fn precedence(&self) -> &'static FieldPrecedence {
        &PRECEDENCE
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["name"]
    }
}
