//! Field precedence and patch construction.

use recon_core::{is_empty_value, FieldClass, FieldMap, InternalRecord, ObjectType, RecordPatch};
use serde_json::Value;

/// Name under which the source cross-reference participates in precedence.
pub const EXTERNAL_ID_FIELD: &str = "external_id";

const COMMON: &[(&str, FieldClass)] = &[
    ("id", FieldClass::System),
    ("created_at", FieldClass::System),
    ("updated_at", FieldClass::System),
    ("created_by", FieldClass::System),
    ("owner_id", FieldClass::System),
    (EXTERNAL_ID_FIELD, FieldClass::UpdateIfEmpty),
];

/// Static per-type classification table. Unlisted fields are `AlwaysUpdate`.
#[derive(Debug, Clone, Copy)]
pub struct FieldPrecedence {
    entries: &'static [(&'static str, FieldClass)],
}

impl FieldPrecedence {
    pub const fn new(entries: &'static [(&'static str, FieldClass)]) -> Self {
        Self { entries }
    }

    pub fn classify(&self, field: &str) -> FieldClass {
        self.entries
            .iter()
            .chain(COMMON)
            .find(|(name, _)| *name == field)
            .map(|(_, class)| *class)
            .unwrap_or(FieldClass::AlwaysUpdate)
    }
}

pub fn precedence_for(object_type: ObjectType) -> &'static FieldPrecedence {
    crate::entities::profile_for(object_type).precedence()
}

pub fn should_apply_field(class: FieldClass, current: Option<&Value>, incoming: Option<&Value>) -> bool {
    match class {
        FieldClass::System | FieldClass::Calculated | FieldClass::Status => false,
        FieldClass::UserEdited => is_empty_value(current),
        FieldClass::UpdateIfEmpty => is_empty_value(current) && !is_empty_value(incoming),
        FieldClass::AlwaysUpdate => !matches!(incoming, None | Some(Value::Null)),
    }
}

pub fn should_apply(
    field: &str,
    object_type: ObjectType,
    current: Option<&Value>,
    incoming: Option<&Value>,
) -> bool {
    should_apply_field(precedence_for(object_type).classify(field), current, incoming)
}

/// Patch plus the audit view of what it changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchPlan {
    pub patch: RecordPatch,
    pub changed: Vec<String>,
    pub before: FieldMap,
    pub after: FieldMap,
}

impl PatchPlan {
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty()
    }

    /// Add a field change decided outside the precedence table (status).
    pub fn push_field(&mut self, field: &str, before: Option<&Value>, after: Value) {
        self.before
            .insert(field.to_string(), before.cloned().unwrap_or(Value::Null));
        self.after.insert(field.to_string(), after.clone());
        self.patch.fields.insert(field.to_string(), after);
        self.changed.push(field.to_string());
    }
}

/// Only fields the precedence table allows and whose value actually differs.
pub fn build_patch(
    precedence: &FieldPrecedence,
    current: &InternalRecord,
    source_id: &str,
    incoming: &FieldMap,
) -> PatchPlan {
    let mut plan = PatchPlan::default();

    let current_ref = current.external_id.clone().map(Value::String);
    let incoming_ref = Value::String(source_id.to_string());
    if current_ref.as_ref() != Some(&incoming_ref)
        && should_apply_field(
            precedence.classify(EXTERNAL_ID_FIELD),
            current_ref.as_ref(),
            Some(&incoming_ref),
        )
    {
        plan.patch.external_id = Some(source_id.to_string());
        plan.before.insert(
            EXTERNAL_ID_FIELD.to_string(),
            current_ref.unwrap_or(Value::Null),
        );
        plan.after.insert(EXTERNAL_ID_FIELD.to_string(), incoming_ref);
        plan.changed.push(EXTERNAL_ID_FIELD.to_string());
    }

    for (field, value) in incoming {
        let existing = current.get(field);
        if existing == Some(value) {
            continue;
        }
        if should_apply_field(precedence.classify(field), existing, Some(value)) {
            plan.push_field(field, existing, value.clone());
        }
    }

    plan
}
