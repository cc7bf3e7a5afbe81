//! Tiered identity resolution: external id, then contact keys (email, phone),
//! then a type-specific composite key, then fuzzy name similarity.

use std::collections::HashMap;

use recon_core::{ExternalRecord, IdentityMapping, InternalRecord, MatchMethod, MatchResult};
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use crate::config::MatchSettings;
use crate::similarity::{normalize_key_fragment, similarity};
use crate::SyncError;

pub const CONFIDENCE_EXTERNAL_ID: f64 = 1.0;
pub const CONFIDENCE_EMAIL: f64 = 0.95;
pub const CONFIDENCE_PHONE: f64 = 0.90;
pub const CONFIDENCE_COMPOSITE: f64 = 0.85;

const MIN_ADDRESS_LEN: usize = 5;

/// Source field name paired with the internal field holding the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPair {
    pub external: &'static str,
    pub internal: &'static str,
}

impl FieldPair {
    pub const fn new(external: &'static str, internal: &'static str) -> Self {
        Self { external, internal }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKey {
    Person { first: FieldPair, last: FieldPair },
    Single(FieldPair),
}

impl NameKey {
    fn external(&self, record: &ExternalRecord) -> String {
        match self {
            NameKey::Person { first, last } => join_parts(&[
                record.text(first.external),
                record.text(last.external),
            ]),
            NameKey::Single(pair) => record.text(pair.external).unwrap_or_default(),
        }
    }

    fn internal(&self, record: &InternalRecord) -> String {
        match self {
            NameKey::Person { first, last } => join_parts(&[
                record.text(first.internal),
                record.text(last.internal),
            ]),
            NameKey::Single(pair) => record.text(pair.internal).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressKey {
    pub external: &'static [&'static str],
    pub internal: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKey {
    /// Person name plus "both sides carry an account".
    NameAccount { name: NameKey, account: FieldPair },
    /// Organization name plus normalized address.
    NameAddress { name: NameKey, address: AddressKey },
    /// Job number token pulled from the record name; the candidate side also
    /// checks `job_number_field` when one is stored.
    JobNumber {
        name: FieldPair,
        job_number_field: Option<&'static str>,
    },
}

/// Which tiers apply to a type, and which fields feed them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchProfile {
    pub email: Option<FieldPair>,
    pub phone: Option<FieldPair>,
    pub composite: Option<CompositeKey>,
    pub fuzzy: Option<NameKey>,
}

fn join_parts(parts: &[Option<String>]) -> String {
    parts
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_email(raw: Option<&str>) -> Option<String> {
    let email = raw?.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

/// North American numbers to `(AAA) BBB-CCCC`. Fewer than ten digits is not a phone.
pub fn normalize_phone(raw: Option<&str>) -> Option<String> {
    let digits: String = raw?.chars().filter(char::is_ascii_digit).collect();
    let ten = match digits.len() {
        n if n < 10 => return None,
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        n => &digits[n - 10..],
    };
    Some(format!("({}) {}-{}", &ten[0..3], &ten[3..6], &ten[6..10]))
}

/// Internal records of one type plus their durable identity mappings, loaded
/// once per reconciler run. Lookups return the first-seen record in store order.
#[derive(Debug, Default)]
pub struct CandidatePool {
    records: Vec<InternalRecord>,
    by_id: HashMap<Uuid, usize>,
    by_external_id: HashMap<String, usize>,
    mapped: HashMap<String, Uuid>,
}

impl CandidatePool {
    pub fn new(records: Vec<InternalRecord>, mappings: Vec<IdentityMapping>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_external_id = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            by_id.entry(record.id).or_insert(idx);
            if let Some(ext) = record.external_id.as_deref().filter(|s| !s.is_empty()) {
                by_external_id.entry(ext.to_string()).or_insert(idx);
            }
        }
        let mapped = mappings
            .into_iter()
            .map(|m| (m.external_id, m.internal_id))
            .collect();
        Self {
            records,
            by_id,
            by_external_id,
            mapped,
        }
    }

    pub fn records(&self) -> &[InternalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn by_source_id(&self, source_id: &str) -> Option<&InternalRecord> {
        let idx = self.by_external_id.get(source_id).or_else(|| {
            self.mapped
                .get(source_id)
                .and_then(|internal_id| self.by_id.get(internal_id))
        })?;
        self.records.get(*idx)
    }
}

pub struct IdentityResolver {
    accept_threshold: f64,
    review_threshold: f64,
    job_number: Regex,
}

impl IdentityResolver {
    pub fn new(settings: &MatchSettings) -> Result<Self, SyncError> {
        Ok(Self {
            accept_threshold: settings.fuzzy_accept_threshold,
            review_threshold: settings.fuzzy_review_threshold,
            job_number: settings.job_number_regex()?,
        })
    }

    pub fn find_match(
        &self,
        external: &ExternalRecord,
        profile: &MatchProfile,
        pool: &CandidatePool,
    ) -> MatchResult {
        let result = self.resolve(external, profile, pool);
        debug!(
            source_id = %external.source_id,
            method = %result.method,
            confidence = result.confidence,
            requires_review = result.requires_review,
            "match decision"
        );
        result
    }

    fn resolve(&self, external: &ExternalRecord, profile: &MatchProfile, pool: &CandidatePool) -> MatchResult {
        if let Some(record) = pool.by_source_id(&external.source_id) {
            return MatchResult::matched(record.clone(), MatchMethod::ExternalId, CONFIDENCE_EXTERNAL_ID);
        }

        if let Some(pair) = profile.email {
            if let Some(record) = find_normalized(external, pool, pair, normalize_email) {
                return MatchResult::matched(record.clone(), MatchMethod::Email, CONFIDENCE_EMAIL);
            }
        }

        if let Some(pair) = profile.phone {
            if let Some(record) = find_normalized(external, pool, pair, normalize_phone) {
                return MatchResult::matched(record.clone(), MatchMethod::Phone, CONFIDENCE_PHONE);
            }
        }

        if let Some(key) = &profile.composite {
            if let Some((record, method)) = self.find_composite(external, key, pool) {
                return MatchResult::matched(record.clone(), method, CONFIDENCE_COMPOSITE);
            }
        }

        if let Some(name) = &profile.fuzzy {
            if let Some(result) = self.find_fuzzy(external, name, pool) {
                return result;
            }
        }

        MatchResult::none()
    }

    fn find_composite<'p>(
        &self,
        external: &ExternalRecord,
        key: &CompositeKey,
        pool: &'p CandidatePool,
    ) -> Option<(&'p InternalRecord, MatchMethod)> {
        match key {
            CompositeKey::NameAccount { name, account } => {
                let wanted = normalize_key_fragment(&name.external(external));
                if wanted.is_empty() || external.text(account.external).is_none() {
                    return None;
                }
                pool.records()
                    .iter()
                    .find(|r| {
                        r.text(account.internal).is_some()
                            && normalize_key_fragment(&name.internal(r)) == wanted
                    })
                    .map(|r| (r, MatchMethod::NameAccount))
            }
            CompositeKey::NameAddress { name, address } => {
                let wanted_name = normalize_key_fragment(&name.external(external));
                let wanted_address = normalize_key_fragment(&join_parts(
                    &address.external.iter().map(|f| external.text(f)).collect::<Vec<_>>(),
                ));
                if wanted_name.is_empty() || wanted_address.chars().count() <= MIN_ADDRESS_LEN {
                    return None;
                }
                pool.records()
                    .iter()
                    .find(|r| {
                        normalize_key_fragment(&name.internal(r)) == wanted_name
                            && normalize_key_fragment(&join_parts(
                                &address.internal.iter().map(|f| r.text(f)).collect::<Vec<_>>(),
                            )) == wanted_address
                    })
                    .map(|r| (r, MatchMethod::NameAddress))
            }
            CompositeKey::JobNumber {
                name,
                job_number_field,
            } => {
                let wanted = self.job_token(external.text(name.external).as_deref())?;
                pool.records()
                    .iter()
                    .find(|r| {
                        let stored = job_number_field
                            .and_then(|f| self.job_token(r.text(f).as_deref()));
                        let named = || self.job_token(r.text(name.internal).as_deref());
                        stored.or_else(named).as_deref() == Some(wanted.as_str())
                    })
                    .map(|r| (r, MatchMethod::JobNumber))
            }
        }
    }

    fn job_token(&self, text: Option<&str>) -> Option<String> {
        self.job_number.find(text?).map(|m| m.as_str().to_string())
    }

    fn find_fuzzy(&self, external: &ExternalRecord, name: &NameKey, pool: &CandidatePool) -> Option<MatchResult> {
        let wanted = name.external(external);
        if wanted.trim().is_empty() {
            return None;
        }
        let mut best: Option<(&InternalRecord, f64)> = None;
        for candidate in pool.records() {
            let score = similarity(&wanted, &name.internal(candidate));
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }
        let (record, score) = best?;
        if score < self.accept_threshold {
            return None;
        }
        Some(
            MatchResult::matched(record.clone(), MatchMethod::Fuzzy, score)
                .flagged(score < self.review_threshold),
        )
    }
}

fn find_normalized<'p>(
    external: &ExternalRecord,
    pool: &'p CandidatePool,
    pair: FieldPair,
    normalize: fn(Option<&str>) -> Option<String>,
) -> Option<&'p InternalRecord> {
    let wanted = normalize(external.text(pair.external).as_deref())?;
    pool.records()
        .iter()
        .find(|r| normalize(r.text(pair.internal).as_deref()).as_deref() == Some(wanted.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recon_core::ObjectType;
    use serde_json::json;

    const FIRST: FieldPair = FieldPair::new("FirstName", "first_name");
    const LAST: FieldPair = FieldPair::new("LastName", "last_name");

    fn contact_profile() -> MatchProfile {
        MatchProfile {
            email: Some(FieldPair::new("Email", "email")),
            phone: Some(FieldPair::new("Phone", "phone")),
            composite: Some(CompositeKey::NameAccount {
                name: NameKey::Person { first: FIRST, last: LAST },
                account: FieldPair::new("AccountId", "account_id"),
            }),
            fuzzy: Some(NameKey::Person { first: FIRST, last: LAST }),
        }
    }

    fn internal(external_id: Option<&str>, fields: serde_json::Value) -> InternalRecord {
        InternalRecord {
            id: Uuid::new_v4(),
            object_type: ObjectType::Contact,
            external_id: external_id.map(str::to_string),
            fields: serde_json::from_value(fields).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn external(object_type: ObjectType, fields: serde_json::Value) -> ExternalRecord {
        let fields: recon_core::FieldMap = serde_json::from_value(fields).unwrap();
        ExternalRecord {
            object_type,
            source_id: fields["Id"].as_str().unwrap().to_string(),
            fields,
        }
    }

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(&MatchSettings::default()).unwrap()
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone(Some("555.123.4567")).as_deref(), Some("(555) 123-4567"));
        assert_eq!(normalize_phone(Some("+1 (555) 123-4567")).as_deref(), Some("(555) 123-4567"));
        assert_eq!(normalize_phone(Some("0044 555 123 4567")).as_deref(), Some("(555) 123-4567"));
        assert_eq!(normalize_phone(Some("123-4567")), None);
        assert_eq!(normalize_email(Some("  Jane@Example.COM ")).as_deref(), Some("jane@example.com"));
        assert_eq!(normalize_email(Some("  ")), None);
    }

    #[test]
    fn email_tier_matches_case_insensitively() {
        let existing = internal(None, json!({"email": "jane@example.com", "first_name": "Janet"}));
        let pool = CandidatePool::new(vec![existing.clone()], vec![]);
        let incoming = external(
            ObjectType::Contact,
            json!({"Id": "003A", "Email": "JANE@EXAMPLE.COM", "FirstName": "Jane"}),
        );
        let result = resolver().find_match(&incoming, &contact_profile(), &pool);
        assert_eq!(result.method, MatchMethod::Email);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.matched.unwrap().id, existing.id);
    }

    #[test]
    fn external_id_beats_every_other_tier() {
        let by_email = internal(None, json!({"email": "jane@example.com"}));
        let by_ref = internal(Some("003A"), json!({"email": "other@example.com"}));
        let pool = CandidatePool::new(vec![by_email, by_ref.clone()], vec![]);
        let incoming = external(ObjectType::Contact, json!({"Id": "003A", "Email": "jane@example.com"}));
        let result = resolver().find_match(&incoming, &contact_profile(), &pool);
        assert_eq!(result.method, MatchMethod::ExternalId);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.matched.unwrap().id, by_ref.id);
    }

    #[test]
    fn identity_mappings_count_as_external_id() {
        let existing = internal(None, json!({"last_name": "Unrelated"}));
        let mapping = IdentityMapping {
            object_type: ObjectType::Contact,
            external_id: "003M".into(),
            internal_id: existing.id,
            run_id: Uuid::new_v4(),
            match_method: MatchMethod::Email,
            confidence: 0.95,
            updated_at: Utc::now(),
        };
        let pool = CandidatePool::new(vec![existing.clone()], vec![mapping]);
        let incoming = external(ObjectType::Contact, json!({"Id": "003M"}));
        let result = resolver().find_match(&incoming, &contact_profile(), &pool);
        assert_eq!(result.method, MatchMethod::ExternalId);
        assert_eq!(result.matched.unwrap().id, existing.id);
    }

    #[test]
    fn email_is_tried_before_phone() {
        let by_phone = internal(None, json!({"phone": "(555) 123-4567"}));
        let by_email = internal(None, json!({"email": "jane@example.com"}));
        let pool = CandidatePool::new(vec![by_phone, by_email.clone()], vec![]);
        let incoming = external(
            ObjectType::Contact,
            json!({"Id": "003A", "Email": "jane@example.com", "Phone": "555-123-4567"}),
        );
        let result = resolver().find_match(&incoming, &contact_profile(), &pool);
        assert_eq!(result.method, MatchMethod::Email);
        assert_eq!(result.matched.unwrap().id, by_email.id);
    }

    #[test]
    fn name_account_requires_both_sides_to_have_accounts() {
        let no_account = internal(None, json!({"first_name": "Pat", "last_name": "Lee"}));
        let with_account = internal(
            None,
            json!({"first_name": "pat", "last_name": "LEE", "account_id": Uuid::new_v4().to_string()}),
        );
        let pool = CandidatePool::new(vec![no_account, with_account.clone()], vec![]);
        let incoming = external(
            ObjectType::Contact,
            json!({"Id": "003A", "FirstName": "Pat", "LastName": "Lee", "AccountId": "001X"}),
        );
        let result = resolver().find_match(&incoming, &contact_profile(), &pool);
        assert_eq!(result.method, MatchMethod::NameAccount);
        assert_eq!(result.matched.unwrap().id, with_account.id);
    }

    #[test]
    fn name_address_scenario() {
        let profile = MatchProfile {
            composite: Some(CompositeKey::NameAddress {
                name: NameKey::Single(FieldPair::new("Name", "name")),
                address: AddressKey {
                    external: &["BillingStreet", "BillingCity"],
                    internal: &["billing_street", "billing_city"],
                },
            }),
            ..MatchProfile::default()
        };
        let existing = internal(
            None,
            json!({"name": "Acme Corp", "billing_street": "123 Main St", "billing_city": "Springfield"}),
        );
        let pool = CandidatePool::new(vec![existing.clone()], vec![]);
        let incoming = external(
            ObjectType::Account,
            json!({"Id": "001A", "Name": "ACME CORP", "BillingStreet": "123 Main St.", "BillingCity": "Springfield"}),
        );
        let result = resolver().find_match(&incoming, &profile, &pool);
        assert_eq!(result.method, MatchMethod::NameAddress);
        assert_eq!(result.confidence, 0.85);

        let short = external(
            ObjectType::Account,
            json!({"Id": "001B", "Name": "Acme Corp", "BillingCity": "Rye"}),
        );
        assert!(!resolver().find_match(&short, &profile, &pool).is_match());
    }

    #[test]
    fn job_number_tokens_match_across_names() {
        let profile = MatchProfile {
            composite: Some(CompositeKey::JobNumber {
                name: FieldPair::new("Name", "name"),
                job_number_field: Some("job_number"),
            }),
            ..MatchProfile::default()
        };
        let stored = internal(None, json!({"name": "Smith residence", "job_number": "2024-1187"}));
        let named = internal(None, json!({"name": "2024-2001 Jones reroof"}));
        let pool = CandidatePool::new(vec![stored.clone(), named.clone()], vec![]);

        let a = external(ObjectType::Opportunity, json!({"Id": "006A", "Name": "Smith Roof 2024-1187"}));
        let result = resolver().find_match(&a, &profile, &pool);
        assert_eq!(result.method, MatchMethod::JobNumber);
        assert_eq!(result.matched.unwrap().id, stored.id);

        let b = external(ObjectType::Opportunity, json!({"Id": "006B", "Name": "Jones 2024-2001"}));
        assert_eq!(resolver().find_match(&b, &profile, &pool).matched.unwrap().id, named.id);

        let c = external(ObjectType::Opportunity, json!({"Id": "006C", "Name": "No job here 24-1"}));
        assert!(!resolver().find_match(&c, &profile, &pool).is_match());
    }

    #[test]
    fn fuzzy_keeps_first_candidate_on_ties() {
        let first = internal(None, json!({"first_name": "Jon", "last_name": "Smith"}));
        let second = internal(None, json!({"first_name": "Jon", "last_name": "Smith"}));
        let pool = CandidatePool::new(vec![first.clone(), second], vec![]);
        let incoming = external(ObjectType::Contact, json!({"Id": "003A", "FirstName": "John", "LastName": "Smith"}));
        let result = resolver().find_match(&incoming, &contact_profile(), &pool);
        assert_eq!(result.method, MatchMethod::Fuzzy);
        assert!(result.confidence >= 0.85);
        assert!(!result.requires_review);
        assert_eq!(result.matched.unwrap().id, first.id);
    }

    #[test]
    fn fuzzy_below_threshold_is_no_match_and_low_accept_flags_review() {
        let existing = internal(None, json!({"first_name": "Maria", "last_name": "Gonzalez"}));
        let pool = CandidatePool::new(vec![existing], vec![]);
        let incoming = external(ObjectType::Contact, json!({"Id": "003A", "FirstName": "Mario", "LastName": "Gomez"}));
        assert_eq!(
            resolver().find_match(&incoming, &contact_profile(), &pool).method,
            MatchMethod::None
        );

        let lenient = IdentityResolver::new(&MatchSettings {
            fuzzy_accept_threshold: 0.5,
            ..MatchSettings::default()
        })
        .unwrap();
        let result = lenient.find_match(&incoming, &contact_profile(), &pool);
        assert_eq!(result.method, MatchMethod::Fuzzy);
        assert!(result.requires_review);
    }

    fn phone_then_name() -> MatchProfile {
        MatchProfile {
            phone: Some(FieldPair::new("Phone", "phone")),
            fuzzy: Some(NameKey::Person { first: FIRST, last: LAST }),
            ..MatchProfile::default()
        }
    }

    #[test]
    fn phone_tier_matches_across_formats() {
        let existing = internal(None, json!({"last_name": "Doe", "phone": "555.123.4567"}));
        let pool = CandidatePool::new(vec![existing.clone()], vec![]);
        let incoming = external(
            ObjectType::Contact,
            json!({"Id": "003A", "LastName": "Roe", "Phone": "+1 (555) 123-4567"}),
        );
        let result = resolver().find_match(&incoming, &phone_then_name(), &pool);
        assert_eq!(result.method, MatchMethod::Phone);
        assert_eq!(result.confidence, CONFIDENCE_PHONE);
        assert_eq!(result.matched.unwrap().id, existing.id);
    }

    #[test]
    fn short_phones_skip_the_phone_tier() {
        let existing = internal(None, json!({"first_name": "Jane", "last_name": "Doe", "phone": "123-4567"}));
        let pool = CandidatePool::new(vec![existing.clone()], vec![]);
        let incoming = external(
            ObjectType::Contact,
            json!({"Id": "003A", "FirstName": "Jane", "LastName": "Doe", "Phone": "123-4567"}),
        );
        let result = resolver().find_match(&incoming, &phone_then_name(), &pool);
        assert_eq!(result.method, MatchMethod::Fuzzy);
        assert_eq!(result.matched.unwrap().id, existing.id);
    }
}
