use recon_core::{FieldClass, ObjectType};

use crate::merge::FieldPrecedence;
use crate::profile::{EntityProfile, FieldMapping, ValueKind};
use crate::resolver::{AddressKey, CompositeKey, FieldPair, MatchProfile, NameKey};

const FIELDS: &[FieldMapping] = &[
    FieldMapping::text("Name", "name"),
    FieldMapping::new("Phone", "phone", ValueKind::Phone),
    FieldMapping::text("Website", "website"),
    FieldMapping::text("Type", "account_type"),
    FieldMapping::text("Industry", "industry"),
    FieldMapping::text("BillingStreet", "billing_street"),
    FieldMapping::text("BillingCity", "billing_city"),
    FieldMapping::text("BillingState", "billing_state"),
    FieldMapping::text("BillingPostalCode", "billing_postal_code"),
    FieldMapping::new("NumberOfEmployees", "employee_count", ValueKind::Number),
    FieldMapping::new("AnnualRevenue", "annual_revenue", ValueKind::Number),
    FieldMapping::text("Description", "description"),
];

static PRECEDENCE: FieldPrecedence = FieldPrecedence::new(&[
    ("name", FieldClass::UserEdited),
    ("description", FieldClass::UserEdited),
    ("phone", FieldClass::UpdateIfEmpty),
    ("website", FieldClass::UpdateIfEmpty),
    ("total_sales_volume", FieldClass::Calculated),
    ("open_job_count", FieldClass::Calculated),
]);

const NAME: NameKey = NameKey::Single(FieldPair::new("Name", "name"));

#[derive(Debug, Clone, Copy, Default)]
pub struct AccountProfile;

impl EntityProfile for AccountProfile {
    fn object_type(&self) -> ObjectType {
        ObjectType::Account
    }

    fn fields(&self) -> &'static [FieldMapping] {
        FIELDS
    }

    fn match_profile(&self) -> MatchProfile {
        MatchProfile {
            email: None,
            phone: Some(FieldPair::new("Phone", "phone")),
            composite: Some(CompositeKey::NameAddress {
                name: NAME,
                address: AddressKey {
                    external: &["BillingStreet", "BillingCity"],
                    internal: &["billing_street", "billing_city"],
                },
            }),
            fuzzy: Some(NAME),
        }
    }

    fn precedence(&self) -> &'static FieldPrecedence {
        &PRECEDENCE
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["name"]
    }
}
