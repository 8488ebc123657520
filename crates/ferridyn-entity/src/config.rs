//! Storage account and handle settings.
//!
//! Settings are read from TOML; every field has a default, so an empty
//! document is a valid configuration:
//!
//! ```toml
//! connection_string = "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=..."
//! page_size = 1000
//! max_batch_size = 100
//!
//! [queue]
//! visibility_timeout_secs = 30
//! message_ttl_secs = 604800
//! initial_delay_secs = 0
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::MAX_BATCH_SIZE;

const EMULATOR_ACCOUNT: &str = "devstoreaccount1";
const EMULATOR_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const EMULATOR_TABLE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";
const EMULATOR_QUEUE_ENDPOINT: &str = "http://127.0.0.1:10001/devstoreaccount1";

/// Account name, credentials and service endpoints parsed from a connection
/// string of `Key=Value;` pairs.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageAccount {
    pub protocol: String,
    pub account_name: String,
    account_key: String,
    pub table_endpoint: String,
    pub queue_endpoint: String,
    /// Whether this account points at the local storage emulator.
    pub development: bool,
    /// Pairs with keys this parser does not recognize.
    pub extras: BTreeMap<String, String>,
}

impl StorageAccount {
    /// Parse a connection string. Keys compare case-insensitively; values
    /// may contain `=`.
    pub fn from_connection_string(text: &str) -> Result<Self, ConfigError> {
        let mut protocol = None;
        let mut account_name = None;
        let mut account_key = None;
        let mut table_endpoint = None;
        let mut queue_endpoint = None;
        let mut development = false;
        let mut extras = BTreeMap::new();

        for segment in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((key, value)) = segment.split_once('=') else {
                return Err(ConfigError::ConnectionString(format!(
                    "segment '{segment}' is not a Key=Value pair"
                )));
            };
            let key = key.trim();
            let value = value.trim().to_string();
            if key.is_empty() {
                return Err(ConfigError::ConnectionString(format!(
                    "segment '{segment}' has an empty key"
                )));
            }
            match key.to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => protocol = Some(value),
                "accountname" => account_name = Some(value),
                "accountkey" => account_key = Some(value),
                "tableendpoint" => table_endpoint = Some(value),
                "queueendpoint" => queue_endpoint = Some(value),
                "usedevelopmentstorage" => development = value.eq_ignore_ascii_case("true"),
                _ => {
                    extras.insert(key.to_string(), value);
                }
            }
        }

        if development {
            return Ok(Self {
                protocol: protocol.unwrap_or_else(|| "http".to_string()),
                account_name: account_name.unwrap_or_else(|| EMULATOR_ACCOUNT.to_string()),
                account_key: account_key.unwrap_or_else(|| EMULATOR_KEY.to_string()),
                table_endpoint: trim_endpoint(table_endpoint, EMULATOR_TABLE_ENDPOINT),
                queue_endpoint: trim_endpoint(queue_endpoint, EMULATOR_QUEUE_ENDPOINT),
                development,
                extras,
            });
        }

        let account_name = account_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigError::ConnectionString("AccountName is required".to_string()))?;
        let protocol = protocol.unwrap_or_else(|| "https".to_string());
        let table_default = format!("{protocol}://{account_name}.table.core.windows.net");
        let queue_default = format!("{protocol}://{account_name}.queue.core.windows.net");
        Ok(Self {
            table_endpoint: trim_endpoint(table_endpoint, &table_default),
            queue_endpoint: trim_endpoint(queue_endpoint, &queue_default),
            protocol,
            account_name,
            account_key: account_key.unwrap_or_default(),
            development,
            extras,
        })
    }

    /// The local storage emulator account.
    pub fn development() -> Self {
        Self {
            protocol: "http".to_string(),
            account_name: EMULATOR_ACCOUNT.to_string(),
            account_key: EMULATOR_KEY.to_string(),
            table_endpoint: EMULATOR_TABLE_ENDPOINT.to_string(),
            queue_endpoint: EMULATOR_QUEUE_ENDPOINT.to_string(),
            development: true,
            extras: BTreeMap::new(),
        }
    }

    pub fn account_key(&self) -> &str {
        &self.account_key
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.table_endpoint)
    }

    pub fn queue_url(&self, queue: &str) -> String {
        format!("{}/{queue}", self.queue_endpoint)
    }
}

fn trim_endpoint(configured: Option<String>, fallback: &str) -> String {
    configured
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| fallback.to_string())
        .trim_end_matches('/')
        .to_string()
}

impl FromStr for StorageAccount {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_connection_string(s)
    }
}

impl fmt::Debug for StorageAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccount")
            .field("protocol", &self.protocol)
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("table_endpoint", &self.table_endpoint)
            .field("queue_endpoint", &self.queue_endpoint)
            .field("development", &self.development)
            .field("extras", &self.extras)
            .finish()
    }
}

/// Default value functions for serde.
pub mod defaults {
    use crate::types::{DEFAULT_PAGE_SIZE, MAX_BATCH_SIZE};

    pub fn page_size() -> usize {
        DEFAULT_PAGE_SIZE
    }

    pub fn max_batch_size() -> usize {
        MAX_BATCH_SIZE
    }

    pub fn visibility_timeout_secs() -> u64 {
        30
    }

    pub fn message_ttl_secs() -> u64 {
        7 * 24 * 60 * 60
    }

    pub fn initial_delay_secs() -> u64 {
        0
    }
}

/// Settings for the handles an [`EntityRegistry`](crate::EntityRegistry) opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySettings {
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Rows requested per query page.
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    /// Operations per store batch, at most 100.
    #[serde(default = "defaults::max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default)]
    pub queue: QueueSettings,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            connection_string: None,
            page_size: defaults::page_size(),
            max_batch_size: defaults::max_batch_size(),
            queue: QueueSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "defaults::visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Zero keeps messages until they are removed.
    #[serde(default = "defaults::message_ttl_secs")]
    pub message_ttl_secs: u64,

    #[serde(default = "defaults::initial_delay_secs")]
    pub initial_delay_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: defaults::visibility_timeout_secs(),
            message_ttl_secs: defaults::message_ttl_secs(),
            initial_delay_secs: defaults::initial_delay_secs(),
        }
    }
}

impl QueueSettings {
    pub fn visibility(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn ttl(&self) -> Option<Duration> {
        (self.message_ttl_secs > 0).then(|| Duration::from_secs(self.message_ttl_secs))
    }

    pub fn initial_delay(&self) -> Option<Duration> {
        (self.initial_delay_secs > 0).then(|| Duration::from_secs(self.initial_delay_secs))
    }
}

impl EntitySettings {
    /// Parse and validate settings from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: EntitySettings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.max_batch_size) {
            return Err(ConfigError::InvalidSetting {
                name: "max_batch_size",
                reason: format!(
                    "must be between 1 and {MAX_BATCH_SIZE}, got {}",
                    self.max_batch_size
                ),
            });
        }
        if self.queue.visibility_timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "queue.visibility_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(text) = &self.connection_string {
            StorageAccount::from_connection_string(text)?;
        }
        Ok(())
    }

    /// The storage account named by `connection_string`, if one is set.
    pub fn account(&self) -> Result<Option<StorageAccount>, ConfigError> {
        self.connection_string
            .as_deref()
            .map(StorageAccount::from_connection_string)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_connection_string() {
        let account = StorageAccount::from_connection_string(
            "DefaultEndpointsProtocol=https;accountname=acme;AccountKey=a2V5==;EndpointSuffix=core.windows.net;",
        )
        .unwrap();
        assert_eq!(account.account_name, "acme");
        assert_eq!(account.account_key(), "a2V5==");
        assert_eq!(account.table_endpoint, "https://acme.table.core.windows.net");
        assert_eq!(account.queue_url("jobs"), "https://acme.queue.core.windows.net/jobs");
        assert_eq!(
            account.extras.get("EndpointSuffix").map(String::as_str),
            Some("core.windows.net")
        );
        assert!(!account.development);
    }

    #[test]
    fn test_explicit_endpoints_win() {
        let account: StorageAccount =
            "AccountName=acme;TableEndpoint=http://localhost:8902/;QueueEndpoint=http://q"
                .parse()
                .unwrap();
        assert_eq!(account.table_url("t"), "http://localhost:8902/t");
        assert_eq!(account.queue_endpoint, "http://q");
    }

    #[test]
    fn test_development_storage() {
        let account = StorageAccount::from_connection_string("UseDevelopmentStorage=true").unwrap();
        assert_eq!(account, StorageAccount::development());
        assert_eq!(
            account.table_url("contacts"),
            "http://127.0.0.1:10002/devstoreaccount1/contacts"
        );
    }

    #[test]
    fn test_malformed_connection_strings() {
        for bad in ["AccountName", "=x;AccountName=a", "AccountKey=k"] {
            let err = StorageAccount::from_connection_string(bad).unwrap_err();
            assert!(matches!(err, ConfigError::ConnectionString(_)), "{bad}");
        }
    }

    #[test]
    fn test_debug_hides_key() {
        let account =
            StorageAccount::from_connection_string("AccountName=a;AccountKey=s3cret").unwrap();
        let printed = format!("{account:?}");
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = EntitySettings::from_toml_str("").unwrap();
        assert_eq!(settings, EntitySettings::default());
        assert_eq!(settings.page_size, 1000);
        assert_eq!(settings.max_batch_size, 100);
        assert_eq!(settings.queue.visibility(), Duration::from_secs(30));
        assert_eq!(settings.queue.ttl(), Some(Duration::from_secs(604_800)));
        assert_eq!(settings.queue.initial_delay(), None);
        assert!(settings.account().unwrap().is_none());
    }

    #[test]
    fn test_settings_overrides() {
        let settings = EntitySettings::from_toml_str(
            r#"
            connection_string = "UseDevelopmentStorage=true"
            max_batch_size = 25

            [queue]
            message_ttl_secs = 0
            initial_delay_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.max_batch_size, 25);
        assert_eq!(settings.page_size, 1000);
        assert_eq!(settings.queue.ttl(), None);
        assert_eq!(settings.queue.initial_delay(), Some(Duration::from_secs(5)));
        assert!(settings.account().unwrap().unwrap().development);
    }

    #[test]
    fn test_settings_validation() {
        let err = EntitySettings::from_toml_str("max_batch_size = 101").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                name: "max_batch_size",
                ..
            }
        ));
        assert!(EntitySettings::from_toml_str("page_size = 0").is_err());
        assert!(EntitySettings::from_toml_str("connection_string = \"junk\"").is_err());
        assert!(matches!(
            EntitySettings::from_toml_str("page_size = \"many\"").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_settings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "page_size = 50").unwrap();
        let settings = EntitySettings::from_file(file.path()).unwrap();
        assert_eq!(settings.page_size, 50);

        let err = EntitySettings::from_file("/nonexistent/settings.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
