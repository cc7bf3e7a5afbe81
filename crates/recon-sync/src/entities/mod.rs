//! One [`EntityProfile`] per reconciled object type.

use recon_core::ObjectType;

use crate::profile::EntityProfile;

mod account;
mod case;
mod commission;
mod contact;
mod contract;
mod event;
mod invoice;
mod lead;
mod opportunity;
mod quote;
mod service_appointment;
mod task;
mod work_order;

pub use account::AccountProfile;
pub use case::CaseProfile;
pub use commission::CommissionProfile;
pub use contact::ContactProfile;
pub use contract::ContractProfile;
pub use event::EventProfile;
pub use invoice::InvoiceProfile;
pub use lead::LeadProfile;
pub use opportunity::OpportunityProfile;
pub use quote::QuoteProfile;
pub use service_appointment::ServiceAppointmentProfile;
pub use task::TaskProfile;
pub use work_order::WorkOrderProfile;

pub fn profile_for(object_type: ObjectType) -> &'static dyn EntityProfile {
    match object_type {
        ObjectType::Account => &AccountProfile,
        ObjectType::Contact => &ContactProfile,
        ObjectType::Lead => &LeadProfile,
        ObjectType::Opportunity => &OpportunityProfile,
        ObjectType::Quote => &QuoteProfile,
        ObjectType::Contract => &ContractProfile,
        ObjectType::WorkOrder => &WorkOrderProfile,
        ObjectType::ServiceAppointment => &ServiceAppointmentProfile,
        ObjectType::Invoice => &InvoiceProfile,
        ObjectType::Commission => &CommissionProfile,
        ObjectType::Case => &CaseProfile,
        ObjectType::Task => &TaskProfile,
        ObjectType::Event => &EventProfile,
    }
}
