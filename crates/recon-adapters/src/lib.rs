//! Read-only source-system adapters: the Salesforce query API, JSON fixtures, and
//! in-memory sources for tests, plus the credential lookup they depend on.

use async_trait::async_trait;
use recon_core::{ExternalRecord, FieldMap, ObjectType, SourceQuery};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod fixtures;
pub mod http;
mod salesforce;
mod secrets;

pub use fixtures::{FixtureSource, MemorySource};
pub use http::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher, RequestQuota};
pub use salesforce::{SalesforceConfig, SalesforceSource};
pub use secrets::{EnvSecretsProvider, SecretsError, SecretsProvider, StaticSecrets};

pub const CRATE_NAME: &str = "recon-adapters";

/// Opaque continuation token handed back by [`SourceReader::fetch_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(pub String);

#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<ExternalRecord>,
    pub next: Option<PageCursor>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source authentication failed: {0}")]
    Auth(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Secrets(#[from] SecretsError),
    #[error("malformed source payload for {object_type}: {message}")]
    Decode {
        object_type: ObjectType,
        message: String,
    },
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Paginated, restartable-from-start export of one object type.
#[async_trait]
pub trait SourceReader: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<SourcePage, SourceError>;
}

/// Follow the cursor until the source reports no further pages.
pub async fn fetch_all(
    source: &dyn SourceReader,
    query: &SourceQuery,
) -> Result<Vec<ExternalRecord>, SourceError> {
    let mut out = Vec::new();
    let mut cursor: Option<PageCursor> = None;
    loop {
        let page = source.fetch_page(query, cursor.as_ref()).await?;
        out.extend(page.records);
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(out)
}

/// Turn one JSON object from the source into an [`ExternalRecord`], dropping
/// Salesforce's `attributes` envelope.
pub fn external_record_from_json(
    object_type: ObjectType,
    value: JsonValue,
) -> Result<ExternalRecord, SourceError> {
    let JsonValue::Object(map) = value else {
        return Err(SourceError::Decode {
            object_type,
            message: "record is not a JSON object".to_string(),
        });
    };
    let mut fields: FieldMap = map.into_iter().collect();
    fields.remove("attributes");
    let source_id = match fields.get("Id") {
        Some(JsonValue::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        _ => {
            return Err(SourceError::Decode {
                object_type,
                message: "record has no Id".to_string(),
            })
        }
    };
    Ok(ExternalRecord {
        object_type,
        source_id,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attributes_envelope_is_dropped() {
        let record = external_record_from_json(
            ObjectType::Account,
            json!({"attributes": {"type": "Account"}, "Id": "001A", "Name": "Acme"}),
        )
        .unwrap();
        assert_eq!(record.source_id, "001A");
        assert!(!record.fields.contains_key("attributes"));
        assert_eq!(record.fields["Name"], json!("Acme"));
    }

    #[test]
    fn records_without_id_are_rejected() {
        let err = external_record_from_json(ObjectType::Lead, json!({"Name": "x"})).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[tokio::test]
    async fn fetch_all_exhausts_every_page() {
        let records = (0..7)
            .map(|i| json!({"Id": format!("003{i}"), "LastName": format!("L{i}")}))
            .collect::<Vec<_>>();
        let source = MemorySource::new(3).with_records(ObjectType::Contact, records);
        let query = SourceQuery::new(ObjectType::Contact, &["LastName"]);
        let all = fetch_all(&source, &query).await.unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[6].source_id, "0036");
    }
}
