use recon_core::{ExternalRecord, FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
use crate::resolver::{FieldPair, MatchProfile};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("AppointmentNumber", "appointment_number"),
    FieldMapping::text("Subject", "subject"),
    FieldMapping::new("SchedStartTime", "scheduled_start", ValueKind::Date),
    FieldMapping::new("SchedEndTime", "scheduled_end", ValueKind::Date),
    FieldMapping::new("ActualStartTime", "actual_start", ValueKind::Date),
    FieldMapping::new("ActualEndTime", "actual_end", ValueKind::Date),
    FieldMapping::text("Street", "street"),
    FieldMapping::text("City", "city"),
];

const RELATIONSHIPS: &[Relationship] = &[Relationship {
    external_field: "ParentRecordId",
    internal_field: "work_order_id",
    target: ObjectType::WorkOrder,
    required: true,
    code: "work_order",
}];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("status", FieldClass::Status),
    ("appointment_number", FieldClass::UpdateIfEmpty),
    ("actual_start", FieldClass::UpdateIfEmpty),
    ("actual_end", FieldClass::UpdateIfEmpty),
    ("assigned_crew", FieldClass::UserEdited),
]);

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceAppointmentProfile;

impl EntityProfile for ServiceAppointmentProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::ServiceAppointment
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
            .text("AppointmentNumber")
            .or_else(|| record.text("Subject"))
            .unwrap_or_else(|| record.source_id.clone())
    }
}
