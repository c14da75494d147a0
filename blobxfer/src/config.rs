//! Client configuration.
//!
//! [`ClientConfig`] is the in-code configuration handed to
//! [`BlobServiceClient::new`](crate::client::BlobServiceClient::new).
//! [`ConfigFile`] reads the same settings from an INI file:
//!
//! ```ini
//! [account]
//! endpoint = https://acct.blob.core.windows.net
//! account_name = acct
//! account_key = <base64>
//!
//! [retry]
//! policy = exponential
//! max_tries = 4
//!
//! [transfer]
//! concurrency = 8
//!
//! [logging]
//! level = debug
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ini::{Ini, Properties};
use url::Url;

use crate::credential::{Credential, SharedKeyCredential, TokenCredential};
use crate::error::{BlobError, BlobResult};
use crate::logging::LogConfig;
use crate::pipeline::HttpTransport;
use crate::retry::RetryPolicyConfig;
use crate::transfer::TransferOptions;

/// Settings for a [`BlobServiceClient`](crate::client::BlobServiceClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Service endpoint, e.g. `https://acct.blob.core.windows.net`.
    pub endpoint: Url,
    /// How requests are authorized.
    pub credential: Credential,
    /// SAS query string appended to every request (use with an anonymous
    /// credential).
    pub sas_token: Option<String>,
    /// Retry behavior shared by every request.
    pub retry: RetryPolicyConfig,
    /// Chunking and concurrency for uploads and downloads.
    pub transfer: TransferOptions,
    /// Transport override; `None` uses reqwest.
    pub transport: Option<Arc<dyn HttpTransport>>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("credential", &self.credential)
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .field("transfer", &self.transfer)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Creates a configuration for `endpoint` with default settings.
    pub fn new(endpoint: &str) -> BlobResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| BlobError::InvalidConfig(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        if endpoint.host_str().is_none() {
            return Err(BlobError::InvalidConfig(format!(
                "endpoint '{}' has no host",
                endpoint
            )));
        }
        Ok(Self {
            endpoint,
            credential: Credential::Anonymous,
            sas_token: None,
            retry: RetryPolicyConfig::default(),
            transfer: TransferOptions::default(),
            transport: None,
        })
    }

    /// Set the credential.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    /// Set the SAS token (leading `?` is ignored).
    pub fn with_sas_token(mut self, token: impl AsRef<str>) -> Self {
        self.sas_token = Some(token.as_ref().trim_start_matches('?').to_string());
        self
    }

    /// Set the retry configuration.
    pub fn with_retry(mut self, retry: RetryPolicyConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the transfer options.
    pub fn with_transfer(mut self, transfer: TransferOptions) -> Self {
        self.transfer = transfer;
        self
    }

    /// Use a custom transport.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

/// `[account]` section.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AccountSettings {
    pub endpoint: Option<String>,
    pub secondary_host: Option<String>,
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    pub bearer_token: Option<String>,
}

impl fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("AccountSettings")
            .field("endpoint", &self.endpoint)
            .field("secondary_host", &self.secondary_host)
            .field("account_name", &self.account_name)
            .field("account_key", &redact(&self.account_key))
            .field("sas_token", &redact(&self.sas_token))
            .field("bearer_token", &redact(&self.bearer_token))
            .finish()
    }
}

/// Settings loaded from an INI file.
#[derive(Clone, Debug, Default)]
pub struct ConfigFile {
    pub account: AccountSettings,
    pub retry: RetryPolicyConfig,
    pub transfer: TransferOptions,
    pub logging: LogConfig,
}

impl ConfigFile {
    /// `<config dir>/blobxfer/config.ini`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("blobxfer").join("config.ini"))
    }

    /// Loads and validates `path`.
    pub fn load(path: &Path) -> BlobResult<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| {
            BlobError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_ini(&ini)
    }

    /// Loads `path` if it exists, otherwise returns defaults.
    pub fn load_or_default(path: &Path) -> BlobResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parses INI text.
    pub fn parse(text: &str) -> BlobResult<Self> {
        let ini = Ini::load_from_str(text)
            .map_err(|e| BlobError::InvalidConfig(format!("invalid config: {}", e)))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> BlobResult<Self> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("account")) {
            let text = |key: &str| {
                section
                    .get(key)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            config.account = AccountSettings {
                endpoint: text("endpoint"),
                secondary_host: text("secondary_host"),
                account_name: text("account_name"),
                account_key: text("account_key"),
                sas_token: text("sas_token"),
                bearer_token: text("bearer_token"),
            };
            if let Some(host) = &config.account.secondary_host {
                config.retry.secondary_host = Some(host.clone());
            }
        }

        if let Some(section) = ini.section(Some("retry")) {
            let retry = &mut config.retry;
            if let Some(kind) = parse(section, "retry", "policy")? {
                retry.kind = kind;
            }
            if let Some(tries) = parse(section, "retry", "max_tries")? {
                retry.max_tries = tries;
            }
            if let Some(ms) = parse(section, "retry", "retry_delay_ms")? {
                retry.retry_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = parse(section, "retry", "max_retry_delay_ms")? {
                retry.max_retry_delay = Duration::from_millis(ms);
            }
            if let Some(secs) = parse(section, "retry", "try_timeout_secs")? {
                retry.try_timeout = Some(Duration::from_secs(secs));
            }
            if let Some(secs) = parse(section, "retry", "max_elapsed_secs")? {
                retry.max_elapsed = Some(Duration::from_secs(secs));
            }
            if let Some(jitter) = parse(section, "retry", "jitter")? {
                retry.jitter = jitter;
            }
        }

        if let Some(section) = ini.section(Some("transfer")) {
            let transfer = &mut config.transfer;
            transfer.chunk_size = parse(section, "transfer", "block_size")?;
            if let Some(concurrency) = parse(section, "transfer", "concurrency")? {
                transfer.concurrency = concurrency;
            }
            transfer.max_single_shot_size = parse(section, "transfer", "max_single_shot_size")?;
            transfer.max_retry_requests = parse(section, "transfer", "max_retry_requests")?;
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(level) = parse(section, "logging", "level")? {
                config.logging.level = level;
            }
            config.logging.directory = parse::<PathBuf>(section, "logging", "directory")?;
        }

        config.retry = config.retry.validated()?;
        if config.transfer.chunk_size == Some(0) {
            return Err(BlobError::InvalidConfig(
                "invalid value '0' for [transfer] block_size".to_string(),
            ));
        }
        Ok(config)
    }

    /// Credential implied by the `[account]` section.
    ///
    /// A shared key wins over a bearer token; a SAS token uses anonymous
    /// requests.
    pub fn credential(&self) -> BlobResult<Credential> {
        let account = &self.account;
        match (&account.account_name, &account.account_key, &account.bearer_token) {
            (Some(name), Some(key), _) => Ok(Credential::SharedKey(SharedKeyCredential::new(
                name.clone(),
                key,
            )?)),
            (_, Some(_), _) => Err(BlobError::InvalidConfig(
                "account_key requires account_name".to_string(),
            )),
            (_, None, Some(token)) => Ok(Credential::Token(TokenCredential::new(token.clone()))),
            _ => Ok(Credential::Anonymous),
        }
    }

    /// Endpoint from `endpoint`, or derived from `account_name`.
    pub fn endpoint(&self) -> BlobResult<String> {
        match (&self.account.endpoint, &self.account.account_name) {
            (Some(endpoint), _) => Ok(endpoint.clone()),
            (None, Some(name)) => Ok(format!("https://{}.blob.core.windows.net", name)),
            (None, None) => Err(BlobError::InvalidConfig(
                "[account] needs an endpoint or an account_name".to_string(),
            )),
        }
    }

    /// Builds the client configuration described by this file.
    pub fn client_config(&self) -> BlobResult<ClientConfig> {
        let mut config = ClientConfig::new(&self.endpoint()?)?
            .with_credential(self.credential()?)
            .with_retry(self.retry.clone())
            .with_transfer(self.transfer.clone());
        if let Some(sas) = &self.account.sas_token {
            config = config.with_sas_token(sas);
        }
        Ok(config)
    }
}

/// Parses `key` from `section`, naming the key in the error.
fn parse<T: FromStr>(props: &Properties, section: &str, key: &str) -> BlobResult<Option<T>> {
    match props.get(key).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            BlobError::InvalidConfig(format!(
                "invalid value '{}' for [{}] {}",
                raw, section, key
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use crate::retry::RetryPolicyKind;
    use std::io::Write;

    const FULL: &str = r#"
[account]
endpoint = https://acct.blob.core.windows.net
secondary_host = acct-secondary.blob.core.windows.net
account_name = acct
account_key = c2VjcmV0LWtleS1ieXRlcw==

[retry]
policy = linear
max_tries = 6
retry_delay_ms = 500
max_retry_delay_ms = 10000
try_timeout_secs = 30

[transfer]
block_size = 1048576
concurrency = 12
max_single_shot_size = 4194304
max_retry_requests = 3

[logging]
level = debug
directory = /var/log/blobxfer
"#;

    #[test]
    fn test_parse_full_file() {
        let config = ConfigFile::parse(FULL).unwrap();

        assert_eq!(config.retry.kind, RetryPolicyKind::Fixed);
        assert_eq!(config.retry.max_tries, 6);
        assert_eq!(config.retry.retry_delay, Duration::from_millis(500));
        assert_eq!(config.retry.try_timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            config.retry.secondary_host.as_deref(),
            Some("acct-secondary.blob.core.windows.net")
        );
        assert_eq!(config.transfer.chunk_size, Some(1_048_576));
        assert_eq!(config.transfer.concurrency, 12);
        assert_eq!(config.transfer.retry_requests(), 3);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/blobxfer"))
        );
        assert!(matches!(config.credential().unwrap(), Credential::SharedKey(_)));
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config = ConfigFile::parse("[account]\naccount_name = acct\n").unwrap();
        assert_eq!(config.retry, RetryPolicyConfig::default());
        assert_eq!(config.transfer.effective_concurrency(), 5);
        assert_eq!(
            config.endpoint().unwrap(),
            "https://acct.blob.core.windows.net"
        );
        assert!(matches!(config.credential().unwrap(), Credential::Anonymous));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for text in [
            "[retry]\nmax_tries = many\n",
            "[retry]\npolicy = random\n",
            "[retry]\nmax_tries = 0\n",
            "[retry]\nretry_delay_ms = 0\n",
            "[transfer]\nconcurrency = -1\n",
            "[transfer]\nblock_size = 0\n",
            "[logging]\nlevel = loud\n",
        ] {
            let err = ConfigFile::parse(text).unwrap_err();
            assert!(matches!(err, BlobError::InvalidConfig(_)), "{text}");
        }
    }

    #[test]
    fn test_error_names_the_key() {
        let err = ConfigFile::parse("[retry]\nmax_tries = many\n").unwrap_err();
        assert!(err.to_string().contains("[retry] max_tries"));
    }

    #[test]
    fn test_client_config_with_sas() {
        let config = ConfigFile::parse(
            "[account]\nendpoint = https://acct.blob.core.windows.net\nsas_token = ?sv=2019-12-12&sig=abc\n",
        )
        .unwrap()
        .client_config()
        .unwrap();

        assert_eq!(config.sas_token.as_deref(), Some("sv=2019-12-12&sig=abc"));
        assert!(matches!(config.credential, Credential::Anonymous));
        assert!(!format!("{:?}", config).contains("sig=abc"));
    }

    #[test]
    fn test_bearer_token_credential() {
        let config = ConfigFile::parse("[account]\nbearer_token = tok\n").unwrap();
        assert!(matches!(config.credential().unwrap(), Credential::Token(_)));
        assert!(config.endpoint().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = ConfigFile::load(file.path()).unwrap();
        assert_eq!(config.account.account_name.as_deref(), Some("acct"));

        let missing = file.path().with_extension("missing");
        assert!(ConfigFile::load_or_default(&missing).is_ok());
        assert!(ConfigFile::load(&missing).is_err());
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(ClientConfig::new("not a url").is_err());
    }
}
