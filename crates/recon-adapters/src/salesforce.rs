use async_trait::async_trait;
use recon_core::SourceQuery;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::http::{FetchError, HttpFetcher};
use crate::secrets::SecretsProvider;
use crate::{external_record_from_json, PageCursor, SourceError, SourcePage, SourceReader};

#[derive(Debug, Clone)]
pub struct SalesforceConfig {
    pub login_url: String,
    pub api_version: String,
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            login_url: "https://login.salesforce.com".to_string(),
            api_version: "v59.0".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    next_records_url: Option<String>,
    #[serde(default)]
    records: Vec<JsonValue>,
}

/// Salesforce REST query API reader (OAuth2 password grant + `nextRecordsUrl` paging).
pub struct SalesforceSource {
    config: SalesforceConfig,
    http: HttpFetcher,
    credentials: Credentials,
    session: Mutex<Option<TokenResponse>>,
}

impl SalesforceSource {
    /// Resolves credentials up front so a missing secret fails at startup rather
    /// than mid-run.
    pub fn new(
        config: SalesforceConfig,
        http: HttpFetcher,
        secrets: &dyn SecretsProvider,
    ) -> Result<Self, SourceError> {
        let security_token = secrets.resolve("security_token").unwrap_or_default();
        let credentials = Credentials {
            client_id: secrets.resolve("client_id")?,
            client_secret: secrets.resolve("client_secret")?,
            username: secrets.resolve("username")?,
            password: format!("{}{}", secrets.resolve("password")?, security_token),
        };
        Ok(Self {
            config,
            http,
            credentials,
            session: Mutex::new(None),
        })
    }

    async fn authenticate(&self) -> Result<TokenResponse, SourceError> {
        let url = format!(
            "{}/services/oauth2/token",
            self.config.login_url.trim_end_matches('/')
        );
        let form = [
            ("grant_type", "password"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];
        let token: TokenResponse = self.http.post_form(&url, &form).await.map_err(|err| {
            match err.status() {
                Some(400) | Some(401) => SourceError::Auth(err.to_string()),
                _ => SourceError::Fetch(err),
            }
        })?;
        info!(instance_url = %token.instance_url, "authenticated against source system");
        Ok(token)
    }

    async fn session(&self) -> Result<TokenResponse, SourceError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
    }

    async fn query_once(
        &self,
        session: &TokenResponse,
        query: &SourceQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<QueryResponse, FetchError> {
        let instance = session.instance_url.trim_end_matches('/');
        match cursor {
            Some(PageCursor(next)) => {
                let url = format!("{instance}{next}");
                self.http
                    .get_json(&url, Some(&session.access_token), &[])
                    .await
            }
            None => {
                let url = format!(
                    "{instance}/services/data/{}/query",
                    self.config.api_version
                );
                let soql = build_soql(query);
                self.http
                    .get_json(&url, Some(&session.access_token), &[("q", soql.as_str())])
                    .await
            }
        }
    }
}

pub(crate) fn build_soql(query: &SourceQuery) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY Id",
        query.fields.join(", "),
        query.sobject
    )
}

#[async_trait]
impl SourceReader for SalesforceSource {
    fn name(&self) -> &'static str {
        "salesforce"
    }

    async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<SourcePage, SourceError> {
        let session = self.session().await?;
        let response = match self.query_once(&session, query, cursor).await {
            Ok(response) => response,
            Err(err) if err.status() == Some(401) => {
                debug!("source session expired; re-authenticating");
                self.invalidate_session().await;
                let session = self.session().await?;
                self.query_once(&session, query, cursor).await?
            }
            Err(err) => return Err(err.into()),
        };

        let records = response
            .records
            .into_iter()
            .map(|value| external_record_from_json(query.object_type, value))
            .collect::<Result<Vec<_>, _>>()?;
        let next = if response.done {
            None
        } else {
            response.next_records_url.map(PageCursor)
        };
        debug!(
            sobject = %query.sobject,
            records = records.len(),
            more = next.is_some(),
            "fetched source page"
        );
        Ok(SourcePage { records, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClientConfig;
    use crate::secrets::{SecretsError, StaticSecrets};
    use recon_core::ObjectType;

    #[test]
    fn soql_selects_projection_in_id_order() {
        let query = SourceQuery::new(ObjectType::WorkOrder, &["Subject", "AccountId", "Status"]);
        assert_eq!(
            build_soql(&query),
            "SELECT Id, Subject, AccountId, Status FROM WorkOrder ORDER BY Id"
        );
    }

    #[test]
    fn missing_credentials_fail_construction() {
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let secrets = StaticSecrets::new([("client_id", "abc")]);
        let err = SalesforceSource::new(SalesforceConfig::default(), http, &secrets)
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Secrets(SecretsError::Missing(_))));
    }

    #[test]
    fn query_responses_decode_with_cursor() {
        let body = r#"{"totalSize": 2, "done": false,
            "nextRecordsUrl": "/services/data/v59.0/query/01gD-2000",
            "records": [{"attributes": {"type": "Lead"}, "Id": "00Q1"}]}"#;
        let parsed: QueryResponse = serde_json::from_str(body).unwrap();
        assert!(!parsed.done);
        assert_eq!(
            parsed.next_records_url.as_deref(),
            Some("/services/data/v59.0/query/01gD-2000")
        );
        assert_eq!(parsed.records.len(), 1);
    }
}
