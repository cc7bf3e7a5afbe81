//! Per-type declarations consumed by the generic reconciler.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use recon_core::{value_as_text, ExternalRecord, FieldClass, FieldMap, ObjectType, SourceQuery};
use serde_json::Value;

use crate::merge::FieldPrecedence;
use crate::resolver::{normalize_email, normalize_phone, FieldPair, MatchProfile};
use crate::status::normalize_status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Email,
    Phone,
    Number,
    Bool,
    Date,
}

impl ValueKind {
    /// `None` means "the source carries nothing usable for this field".
    pub fn convert(self, raw: Option<&Value>) -> Option<Value> {
        match self {
            ValueKind::Text => value_as_text(raw).map(Value::String),
            ValueKind::Email => normalize_email(value_as_text(raw).as_deref()).map(Value::String),
            ValueKind::Phone => {
                let text = value_as_text(raw)?;
                Some(Value::String(normalize_phone(Some(&text)).unwrap_or(text)))
            }
            ValueKind::Number => match raw? {
                Value::Number(n) => Some(Value::Number(n.clone())),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number),
                _ => None,
            },
            ValueKind::Bool => match raw? {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Some(Value::Bool(true)),
                    "false" | "no" | "0" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            ValueKind::Date => value_as_text(raw).map(|s| Value::String(normalize_date(&s))),
        }
    }
}

/// Dates stay `YYYY-MM-DD`; timestamps (RFC 3339 or the `+0000` offset form)
/// become RFC 3339 UTC. Anything else is kept verbatim.
pub fn normalize_date(raw: &str) -> String {
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        return raw.to_string();
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|_| raw.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub external: &'static str,
    pub internal: &'static str,
    pub kind: ValueKind,
}

impl FieldMapping {
    pub const fn new(external: &'static str, internal: &'static str, kind: ValueKind) -> Self {
        Self {
            external,
            internal,
            kind,
        }
    }

    pub const fn text(external: &'static str, internal: &'static str) -> Self {
        Self::new(external, internal, ValueKind::Text)
    }
}

/// Foreign key from this type to `target`, resolved through external ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    pub external_field: &'static str,
    pub internal_field: &'static str,
    pub target: ObjectType,
    pub required: bool,
    /// Reason-code stem, e.g. `account` for `NULL_ACCOUNT_ID`.
    pub code: &'static str,
}

pub trait EntityProfile: Send + Sync + 'static {
    fn object_type(&self) -> ObjectType;

    fn fields(&self) -> &'static [FieldMapping];

    fn match_profile(&self) -> MatchProfile;

    fn precedence(&self) -> &'static FieldPrecedence;

    fn relationships(&self) -> &'static [Relationship] {
        &[]
    }

    fn status_field(&self) -> Option<FieldPair> {
        None
    }

    /// Internal fields a new record cannot be created without.
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn display_name(&self, record: &ExternalRecord) -> String {
        let person = [record.text("FirstName"), record.text("LastName")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        record
            .text("Name")
            .or_else(|| (!person.is_empty()).then_some(person))
            .or_else(|| record.text("Subject"))
            .unwrap_or_else(|| record.source_id.clone())
    }

    fn classify(&self, field: &str) -> FieldClass {
        self.precedence().classify(field)
    }

    fn source_query(&self) -> SourceQuery {
        let mut fields: Vec<&str> = self.fields().iter().map(|f| f.external).collect();
        fields.extend(self.relationships().iter().map(|r| r.external_field));
        fields.extend(self.status_field().map(|s| s.external));
        SourceQuery::new(self.object_type(), &fields)
    }

    /// Internal fields the candidate pool needs.
    fn projection(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let names = self
            .fields()
            .iter()
            .map(|f| f.internal)
            .chain(self.relationships().iter().map(|r| r.internal_field))
            .chain(self.status_field().map(|s| s.internal));
        for name in names {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
        out
    }

    /// Source values converted to internal names and shapes. Relationships are
    /// resolved separately by the reconciler.
    fn map_fields(&self, record: &ExternalRecord) -> FieldMap {
        let mut out = FieldMap::new();
        for mapping in self.fields() {
            if let Some(value) = mapping.kind.convert(record.get(mapping.external)) {
                out.insert(mapping.internal.to_string(), value);
            }
        }
        if let Some(status) = self.status_field() {
            if let Some(mapped) = record
                .text(status.external)
                .and_then(|raw| normalize_status(self.object_type(), &raw))
            {
                out.insert(status.internal.to_string(), Value::String(mapped));
            }
        }
        out
    }
}
