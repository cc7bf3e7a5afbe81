use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use recon_core::{ObjectType, SourceQuery};
use serde_json::Value as JsonValue;
use tokio::fs;

use crate::{external_record_from_json, PageCursor, SourceError, SourcePage, SourceReader};

fn parse_offset(cursor: Option<&PageCursor>) -> Result<usize, SourceError> {
    match cursor {
        None => Ok(0),
        Some(PageCursor(raw)) => raw
            .parse()
            .map_err(|_| SourceError::Unavailable(format!("invalid page cursor {raw}"))),
    }
}

fn page_of(
    object_type: ObjectType,
    values: &[JsonValue],
    offset: usize,
    page_size: usize,
) -> Result<SourcePage, SourceError> {
    let end = (offset + page_size).min(values.len());
    let records = values
        .get(offset..end)
        .unwrap_or_default()
        .iter()
        .cloned()
        .map(|v| external_record_from_json(object_type, v))
        .collect::<Result<Vec<_>, _>>()?;
    let next = (end < values.len()).then(|| PageCursor(end.to_string()));
    Ok(SourcePage { records, next })
}

/// Reads `<dir>/<sObject>.json` (a JSON array of source records). A missing
/// file is an empty export.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    dir: PathBuf,
    page_size: usize,
}

impl FixtureSource {
    pub fn new(dir: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            dir: dir.into(),
            page_size: page_size.max(1),
        }
    }

    fn path_for(&self, query: &SourceQuery) -> PathBuf {
        self.dir.join(format!("{}.json", query.sobject))
    }

    async fn load(&self, query: &SourceQuery) -> Result<Vec<JsonValue>, SourceError> {
        let path = self.path_for(query);
        if !fs::try_exists(&path)
            .await
            .with_context(|| format!("checking fixture {}", path.display()))?
        {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading fixture {}", path.display()))?;
        let values: Vec<JsonValue> = serde_json::from_str(&text)
            .with_context(|| format!("parsing fixture {}", path.display()))?;
        Ok(values)
    }
}

#[async_trait]
impl SourceReader for FixtureSource {
    fn name(&self) -> &'static str {
        "fixtures"
    }

    async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<SourcePage, SourceError> {
        let offset = parse_offset(cursor)?;
        let values = self.load(query).await?;
        page_of(query.object_type, &values, offset, self.page_size)
    }
}

/// In-process source with optional injected failures per object type.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    page_size: usize,
    records: HashMap<ObjectType, Vec<JsonValue>>,
    failing: HashSet<ObjectType>,
}

impl MemorySource {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::default()
        }
    }

    pub fn with_records(mut self, object_type: ObjectType, records: Vec<JsonValue>) -> Self {
        self.records.entry(object_type).or_default().extend(records);
        self
    }

    /// Every page fetch for `object_type` fails, as if the connection dropped.
    pub fn failing_on(mut self, object_type: ObjectType) -> Self {
        self.failing.insert(object_type);
        self
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<SourcePage, SourceError> {
        if self.failing.contains(&query.object_type) {
            return Err(SourceError::Unavailable(format!(
                "connection reset while paging {}",
                query.sobject
            )));
        }
        let offset = parse_offset(cursor)?;
        let values = self
            .records
            .get(&query.object_type)
            .map(Vec::as_slice)
            .unwrap_or_default();
        page_of(query.object_type, values, offset, self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_all;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fixture_files_are_paged() {
        let dir = tempdir().expect("tempdir");
        let records: Vec<_> = (0..5)
            .map(|i| json!({"Id": format!("001{i}"), "Name": format!("Account {i}")}))
            .collect();
        std::fs::write(
            dir.path().join("Account.json"),
            serde_json::to_vec(&records).unwrap(),
        )
        .unwrap();

        let source = FixtureSource::new(dir.path(), 2);
        let query = SourceQuery::new(ObjectType::Account, &["Name"]);
        let first = source.fetch_page(&query, None).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next, Some(PageCursor("2".into())));

        let all = fetch_all(&source, &query).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn missing_fixture_is_an_empty_export() {
        let dir = tempdir().expect("tempdir");
        let source = FixtureSource::new(dir.path(), 10);
        let query = SourceQuery::new(ObjectType::Invoice, &[]);
        let page = source.fetch_page(&query, None).await.unwrap();
        assert!(page.records.is_empty());
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let source = MemorySource::new(10).failing_on(ObjectType::Contact);
        let query = SourceQuery::new(ObjectType::Contact, &[]);
        assert!(matches!(
            source.fetch_page(&query, None).await,
            Err(SourceError::Unavailable(_))
        ));
    }
}
