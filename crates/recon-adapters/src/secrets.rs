use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("secret {0} is not configured")]
    Missing(String),
    #[error("secret {0} is empty")]
    Empty(String),
}

/// Resolves source-system credentials by name.
pub trait SecretsProvider: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String, SecretsError>;
}

/// Reads `<PREFIX><NAME>` from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretsProvider {
    prefix: String,
}

impl EnvSecretsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name).to_ascii_uppercase()
    }
}

impl SecretsProvider for EnvSecretsProvider {
    fn resolve(&self, name: &str) -> Result<String, SecretsError> {
        let var = self.var_name(name);
        let value = std::env::var(&var).map_err(|_| SecretsError::Missing(var.clone()))?;
        if value.trim().is_empty() {
            return Err(SecretsError::Empty(var));
        }
        Ok(value)
    }
}

/// Fixed credentials, for tests and fixture runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl SecretsProvider for StaticSecrets {
    fn resolve(&self, name: &str) -> Result<String, SecretsError> {
        match self.values.get(name) {
            Some(v) if !v.trim().is_empty() => Ok(v.clone()),
            Some(_) => Err(SecretsError::Empty(name.to_string())),
            None => Err(SecretsError::Missing(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names_are_prefixed_and_uppercased() {
        let provider = EnvSecretsProvider::with_prefix("salesforce_");
        assert_eq!(provider.var_name("client_id"), "SALESFORCE_CLIENT_ID");
    }

    #[test]
    fn static_secrets_reject_missing_and_blank() {
        let secrets = StaticSecrets::new([("username", "ops@example.com"), ("password", " ")]);
        assert_eq!(secrets.resolve("username").unwrap(), "ops@example.com");
        assert!(matches!(secrets.resolve("password"), Err(SecretsError::Empty(_))));
        assert!(matches!(secrets.resolve("token"), Err(SecretsError::Missing(_))));
    }
}
