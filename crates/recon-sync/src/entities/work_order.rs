use recon_core::{ExternalRecord, FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{CompositeKey, FieldPair, MatchProfile};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("WorkOrderNumber", "work_order_number"),
    FieldMapping::text("Subject", "subject"),
    FieldMapping::text("Priority", "priority"),
    FieldMapping::new("StartDate", "start_date", ValueKind::Date),
    FieldMapping::new("EndDate", "end_date", ValueKind::Date),
    FieldMapping::text("Street", "street"),
    FieldMapping::text("City", "city"),
    FieldMapping::text("Description", "description"),
];

const RELATIONSHIPS: &[Relationship] = &[
    Relationship {
        external_field: "AccountId",
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
    ("work_order_number", FieldClass::UpdateIfEmpty),
    ("crew_id", FieldClass::UserEdited),
    ("material_cost", FieldClass::Calculated),
    ("labor_cost", FieldClass::Calculated),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkOrderProfile;

impl EntityProfile for WorkOrderProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::WorkOrder
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

    // Job numbers are carried in the subject line.
    fn match_profile(&self) -> MatchProfile {
        MatchProfile {
            composite: Some(CompositeKey::JobNumber {
                name: FieldPair::new("Subject", "subject"),
                job_number_field: None,
            }),
            ..MatchProfile::default()
        }
    }

    fn precedence(&self) -> &'static FieldPrecedence {
        &PRECEDENCE
    }

    fn display_name(&self, record: &ExternalRecord) -> String {
        record
            .text("Subject")
            .or_else(|| record.text("WorkOrderNumber"))
            .unwrap_or_else(|| record.source_id.clone())
    }
}
