//! Forward-only lifecycle guard for status fields.
//!
//! Each type with a lifecycle declares an ordered sequence and a terminal set.
//! A transition is allowed when it does not move backwards in the sequence,
//! when the current status is terminal (explicit reopen), or when either side
//! is not a recognized status.

use recon_core::ObjectType;

#[derive(Debug, Clone, Copy)]
pub struct Lifecycle {
    pub sequence: &'static [&'static str],
    pub terminal: &'static [&'static str],
}

impl Lifecycle {
    pub fn index_of(&self, status: &str) -> Option<usize> {
        self.sequence.iter().position(|s| *s == status)
    }

    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal.contains(&status)
    }
}

const LEAD: Lifecycle = Lifecycle {
    sequence: &["NEW", "CONTACTED", "QUALIFIED", "NURTURING", "CONVERTED", "UNQUALIFIED"],
    terminal: &["CONVERTED", "UNQUALIFIED"],
};

const OPPORTUNITY: Lifecycle = Lifecycle {
    sequence: &[
        "LEAD_UNASSIGNED",
        "LEAD_ASSIGNED",
        "SCHEDULED",
        "INSPECTED",
        "CLAIM_FILED",
        "ADJUSTER_MEETING_COMPLETE",
        "APPROVED",
        "CONTRACT_SIGNED",
        "IN_PRODUCTION",
        "COMPLETED",
        "CLOSED_WON",
        "CLOSED_LOST",
    ],
    terminal: &["CLOSED_WON", "CLOSED_LOST"],
};

const QUOTE: Lifecycle = Lifecycle {
    sequence: &["DRAFT", "NEEDS_REVIEW", "IN_REVIEW", "APPROVED", "PRESENTED", "ACCEPTED", "REJECTED"],
    terminal: &["ACCEPTED", "REJECTED"],
};

const CONTRACT: Lifecycle = Lifecycle {
    sequence: &["DRAFT", "IN_APPROVAL", "ACTIVATED", "EXPIRED", "TERMINATED"],
    terminal: &["EXPIRED", "TERMINATED"],
};

const WORK_ORDER: Lifecycle = Lifecycle {
    sequence: &[
        "NEW",
        "SCHEDULED",
        "IN_PROGRESS",
        "ON_HOLD",
        "COMPLETED",
        "CLOSED",
        "CANNOT_COMPLETE",
        "CANCELED",
    ],
    terminal: &["COMPLETED", "CLOSED", "CANNOT_COMPLETE", "CANCELED"],
};

const SERVICE_APPOINTMENT: Lifecycle = Lifecycle {
    sequence: &[
        "NONE",
        "SCHEDULED",
        "DISPATCHED",
        "IN_PROGRESS",
        "COMPLETED",
        "CANNOT_COMPLETE",
        "CANCELED",
    ],
    terminal: &["COMPLETED", "CANNOT_COMPLETE", "CANCELED"],
};

const INVOICE: Lifecycle = Lifecycle {
    sequence: &["DRAFT", "PENDING", "SENT", "PARTIALLY_PAID", "PAID", "VOID"],
    terminal: &["PAID", "VOID"],
};

const COMMISSION: Lifecycle = Lifecycle {
    sequence: &["PENDING", "REQUESTED", "APPROVED", "PAID", "REJECTED"],
    terminal: &["PAID", "REJECTED"],
};

const CASE: Lifecycle = Lifecycle {
    sequence: &["NEW", "WORKING", "ESCALATED", "CLOSED"],
    terminal: &["CLOSED"],
};

const TASK: Lifecycle = Lifecycle {
    sequence: &["NOT_STARTED", "IN_PROGRESS", "WAITING", "COMPLETED", "DEFERRED"],
    terminal: &["COMPLETED", "DEFERRED"],
};

pub fn lifecycle_for(object_type: ObjectType) -> Option<&'static Lifecycle> {
    match object_type {
        ObjectType::Lead => Some(&LEAD),
        ObjectType::Opportunity => Some(&OPPORTUNITY),
        ObjectType::Quote => Some(&QUOTE),
        ObjectType::Contract => Some(&CONTRACT),
        ObjectType::WorkOrder => Some(&WORK_ORDER),
        ObjectType::ServiceAppointment => Some(&SERVICE_APPOINTMENT),
        ObjectType::Invoice => Some(&INVOICE),
        ObjectType::Commission => Some(&COMMISSION),
        ObjectType::Case => Some(&CASE),
        ObjectType::Task => Some(&TASK),
        ObjectType::Account | ObjectType::Contact | ObjectType::Event => None,
    }
}

/// Source picklist labels that do not survive plain UPPER_SNAKE conversion.
fn synonym(object_type: ObjectType, label: &str) -> Option<&'static str> {
    let key = label.trim().to_ascii_lowercase();
    let hit = match (object_type, key.as_str()) {
        (ObjectType::Lead, "open - not contacted") => "NEW",
        (ObjectType::Lead, "working - contacted") => "CONTACTED",
        (ObjectType::Lead, "closed - converted") => "CONVERTED",
        (ObjectType::Lead, "closed - not converted") => "UNQUALIFIED",
        (ObjectType::Opportunity, "prospecting") => "LEAD_ASSIGNED",
        (ObjectType::Opportunity, "closed - won") => "CLOSED_WON",
        (ObjectType::Opportunity, "closed - lost") => "CLOSED_LOST",
        (ObjectType::Quote, "needs review") => "NEEDS_REVIEW",
        (ObjectType::Quote, "denied") => "REJECTED",
        (ObjectType::WorkOrder, "cancelled") => "CANCELED",
        (ObjectType::ServiceAppointment, "cancelled") => "CANCELED",
        (ObjectType::Invoice, "voided") => "VOID",
        (ObjectType::Task, "waiting on someone else") => "WAITING",
        _ => return None,
    };
    Some(hit)
}

fn upper_snake(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Map a source status label to the internal status vocabulary.
pub fn normalize_status(object_type: ObjectType, raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }
    if let Some(mapped) = synonym(object_type, raw) {
        return Some(mapped.to_string());
    }
    let converted = upper_snake(raw);
    (!converted.is_empty()).then_some(converted)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusGuard;

impl StatusGuard {
    pub fn should_transition(&self, object_type: ObjectType, current: &str, new: &str) -> bool {
        let Some(lifecycle) = lifecycle_for(object_type) else {
            return true;
        };
        let (Some(current_idx), Some(new_idx)) = (lifecycle.index_of(current), lifecycle.index_of(new))
        else {
            return true;
        };
        if lifecycle.is_terminal(current) {
            return true;
        }
        new_idx >= current_idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUARD: StatusGuard = StatusGuard;

    #[test]
    fn forward_moves_are_allowed_and_backward_rejected() {
        assert!(GUARD.should_transition(ObjectType::Lead, "NEW", "QUALIFIED"));
        assert!(GUARD.should_transition(ObjectType::Lead, "QUALIFIED", "QUALIFIED"));
        assert!(!GUARD.should_transition(ObjectType::Lead, "QUALIFIED", "NEW"));
        assert!(!GUARD.should_transition(ObjectType::WorkOrder, "IN_PROGRESS", "SCHEDULED"));
    }

    #[test]
    fn lead_statuses_follow_the_sales_funnel() {
        assert!(GUARD.should_transition(ObjectType::Lead, "CONTACTED", "QUALIFIED"));
        assert!(GUARD.should_transition(ObjectType::Lead, "CONVERTED", "QUALIFIED"));
    }

    #[test]
    fn every_known_pair_is_monotonic_unless_terminal() {
        let mut checked = 0;
        for object_type in ObjectType::ALL {
            let Some(lifecycle) = lifecycle_for(object_type) else {
                continue;
            };
            for (current_idx, current) in lifecycle.sequence.iter().enumerate() {
                for (new_idx, new) in lifecycle.sequence.iter().enumerate() {
                    let expected = lifecycle.is_terminal(current) || new_idx >= current_idx;
                    assert_eq!(
                        GUARD.should_transition(object_type, current, new),
                        expected,
                        "{object_type}: {current} -> {new}"
                    );
                    checked += 1;
                }
            }
        }
        assert!(checked > 100);
    }

    #[test]
    fn terminal_statuses_can_be_reopened() {
        assert!(GUARD.should_transition(ObjectType::Lead, "CONVERTED", "NEW"));
        assert!(GUARD.should_transition(ObjectType::Opportunity, "CLOSED_LOST", "SCHEDULED"));
    }

    #[test]
    fn unknown_values_fail_open() {
        assert!(GUARD.should_transition(ObjectType::Lead, "SOMETHING_ELSE", "NEW"));
        assert!(GUARD.should_transition(ObjectType::Lead, "QUALIFIED", "ON_ICE"));
        assert!(GUARD.should_transition(ObjectType::Lead, "", "NEW"));
        assert!(GUARD.should_transition(ObjectType::Account, "ACTIVE", "PROSPECT"));
    }

    #[test]
    fn every_terminal_status_is_in_its_sequence() {
        for object_type in ObjectType::ALL {
            if let Some(lifecycle) = lifecycle_for(object_type) {
                for terminal in lifecycle.terminal {
                    assert!(lifecycle.index_of(terminal).is_some(), "{object_type}: {terminal}");
                }
            }
        }
    }

    #[test]
    fn source_labels_normalize_to_internal_values() {
        assert_eq!(normalize_status(ObjectType::Opportunity, "Closed Won").as_deref(), Some("CLOSED_WON"));
        assert_eq!(
            normalize_status(ObjectType::Lead, "Closed - Not Converted").as_deref(),
            Some("UNQUALIFIED")
        );
        assert_eq!(normalize_status(ObjectType::Task, "In Progress").as_deref(), Some("IN_PROGRESS"));
        assert_eq!(normalize_status(ObjectType::WorkOrder, "Cancelled").as_deref(), Some("CANCELED"));
        assert_eq!(normalize_status(ObjectType::Case, "  "), None);
    }
}
