use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashMap, fs::File, io::BufReader, path::Path, sync::Arc};

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, InternalResult};

/// Secrets handed to a query, by name.
pub type Secrets = HashMap<String, SecretString>;

/// Per-query options (query-options.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secrets")]
    pub secrets: Arc<Secrets>,

    /// Maximum number of pages a query fetches.
    #[serde(default = "default_fetch_count_limit")]
    pub fetch_count_limit: usize,

    #[serde(default)]
    pub cache_network_requests: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            secrets: Arc::default(),
            fetch_count_limit: default_fetch_count_limit(),
            cache_network_requests: false,
        }
    }
}

impl QueryOptions {
    pub fn from_file(path: &str) -> InternalResult<Self> {
        from_file(path)
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut secrets = clone_secrets(&self.secrets);
        secrets.insert(name.into(), SecretString::from(value.into()));
        self.secrets = Arc::new(secrets);
        self
    }

    pub fn with_fetch_count_limit(mut self, limit: usize) -> Self {
        self.fetch_count_limit = limit;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinderConfig {
    /// Log a warning when a source id is loaded twice.
    #[serde(default = "default_true")]
    pub warn_on_source_overwrite: bool,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            warn_on_source_overwrite: default_true(),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn deserialize_secrets<'de, D>(deserializer: D) -> Result<Arc<Secrets>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(Arc::new(
        raw.into_iter()
            .map(|(name, value)| (name, SecretString::from(value)))
            .collect(),
    ))
}

fn clone_secrets(secrets: &Secrets) -> Secrets {
    secrets
        .iter()
        .map(|(name, secret)| {
            (
                name.clone(),
                SecretString::from(secret.expose_secret().to_string()),
            )
        })
        .collect()
}

// デフォルト値の定義
fn default_fetch_count_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}
