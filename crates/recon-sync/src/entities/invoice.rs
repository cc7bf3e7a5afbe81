use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{FieldPair, MatchProfile};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("Name", "invoice_number"),
    FieldMapping::new("Invoice_Date__c", "invoice_date", ValueKind::Date),
    FieldMapping::new("Due_Date__c", "due_date", ValueKind::Date),
    FieldMapping::new("Total__c", "total", ValueKind::Number),
    FieldMapping::new("Amount_Paid__c", "amount_paid", ValueKind::Number),
    FieldMapping::new("Balance_Due__c", "balance_due", ValueKind::Number),
];

const RELATIONSHIPS: &[Relationship] = &[
    Relationship {
        external_field: "Account__c",
        internal_field: "account_id",
        target: ObjectType::Account,
        required: true,
        code: "account",
    },
    Relationship {
        external_field: "Opportunity__c",
        internal_field: "opportunity_id",
        target: ObjectType::Opportunity,
        required: false,
        code: "opportunity",
    },
];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("status", FieldClass::Status),
    ("invoice_number", FieldClass::UpdateIfEmpty),
    ("balance_due", FieldClass::Calculated),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct InvoiceProfile;

impl EntityProfile for InvoiceProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Invoice
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
