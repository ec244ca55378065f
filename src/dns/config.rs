//! Proxy configuration file
//!
//! The configuration is a YAML document describing the upstream PowerDNS API
//! and the list of environments. It is deserialized as-is here and turned into
//! an immutable [`PolicyModel`](crate::dns::policy::PolicyModel) by
//! `PolicyModel::build`, which is where structural validation happens.

use std::fs;
use std::path::Path;

use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Display)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    #[display(fmt = "invalid configuration: {}", _0)]
    Invalid(String),
    #[display(fmt = "duplicate environment name: {}", _0)]
    DuplicateName(String),
    #[display(fmt = "environments {} and {} share a token fingerprint", _0, _1)]
    DuplicateFingerprint(String, String),
    #[display(fmt = "environment {}: token_sha512 must be 128 hex digits", _0)]
    InvalidFingerprint(String),
    #[display(fmt = "environment {}: invalid regex {:?}: {}", environment, pattern, reason)]
    InvalidRegex {
        environment: String,
        pattern: String,
        reason: String,
    },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

impl std::error::Error for ConfigError {}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const DEFAULT_INDEX_HTML: &str = r#"<html>
    <head>
        <title>PowerDNS API Proxy</title>
    </head>
    <body>
        <center>
        <h1>PowerDNS API Proxy</h1>
        <q>The Domain Name Server (DNS) is the Achilles heel of the Web.<br>
        The important thing is that it's managed responsibly.</q>
        </center>
    </body>
</html>
"#;

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_worker_threads() -> usize {
    8
}

fn default_index_html() -> String {
    DEFAULT_INDEX_HTML.to_string()
}

/// Optional services that widen a zone grant
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Allow `_acme-challenge.<record>` for every literal record of the grant
    #[serde(default)]
    pub acme: bool,
}

/// A zone entry of an environment as written in the configuration file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone name, or a regex when `regex` is set
    pub name: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub records: Vec<String>,
    #[serde(default)]
    pub regex_records: Vec<String>,
    #[serde(default)]
    pub services: ServicesConfig,
    /// Allows creating, deleting and changing metadata of the zone
    #[serde(default)]
    pub admin: bool,
    /// Applies the same grant to every zone below `name`
    #[serde(default)]
    pub subzones: bool,
    /// Allows DNSSEC key management on the zone
    #[serde(default)]
    pub cryptokeys: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    /// Hex encoded SHA-512 digest of the environment's token
    pub token_sha512: String,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub global_read_only: bool,
    #[serde(default)]
    pub global_search: bool,
    #[serde(default)]
    pub global_tsigkeys: bool,
    #[serde(default)]
    pub global_cryptokeys: bool,
    #[serde(default)]
    pub metrics_proxy: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub pdns_api_url: String,
    pub pdns_api_token: String,
    #[serde(default = "default_true")]
    pub pdns_api_verify_ssl: bool,
    #[serde(default = "default_timeout_secs")]
    pub pdns_api_timeout_secs: u64,
    #[serde(default)]
    pub audit_log_path: Option<String>,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_true")]
    pub metrics_require_auth: bool,
    #[serde(default = "default_true")]
    pub index_enabled: bool,
    #[serde(default = "default_index_html")]
    pub index_html: String,
    pub environments: Vec<EnvironmentConfig>,
}

impl ProxyConfig {
    /// Load and check the configuration file at `path`
    pub fn load(path: &Path) -> Result<ProxyConfig> {
        log::info!("Loading config from {}", path.display());
        let data = fs::read_to_string(path)?;
        ProxyConfig::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<ProxyConfig> {
        let config: ProxyConfig = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the scalar settings. Environments are checked when the policy
    /// model is built from them.
    pub fn validate(&self) -> Result<()> {
        if self.pdns_api_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "pdns_api_url must be a non-empty string".to_string(),
            ));
        }
        if self.pdns_api_token.is_empty() {
            return Err(ConfigError::Invalid(
                "pdns_api_token must be a non-empty string".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.pdns_api_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "pdns_api_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
