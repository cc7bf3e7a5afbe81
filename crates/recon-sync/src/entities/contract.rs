use recon_core::{ExternalRecord, FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{FieldPair, MatchProfile};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("ContractNumber", "contract_number"),
    FieldMapping::new("StartDate", "start_date", ValueKind::Date),
    FieldMapping::new("EndDate", "end_date", ValueKind::Date),
    FieldMapping::new("ContractTerm", "term_months", ValueKind::Number),
    FieldMapping::new("CustomerSignedDate", "customer_signed_date", ValueKind::Date),
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
    ("status", FieldClass::Status),
    ("contract_number", FieldClass::UpdateIfEmpty),
    ("customer_signed_date", FieldClass::UpdateIfEmpty),
    ("description", FieldClass::UserEdited),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct ContractProfile;

impl EntityProfile for ContractProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Contract
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
        record
            .text("ContractNumber")
            .unwrap_or_else(|| record.source_id.clone())
    }
}
