//! Configuration management for mongobucket
//!
//! Three sources feed an export run:
//! - Source credentials (JSON): where the MongoDB instance lives
//! - Destination configuration (JSON): bucket, endpoint and access material
//! - Runtime settings (TOML, optional): timeouts, segment size, logging
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Settings file
//! 3. Default values

use mongodb::options::Credential;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::export::ChunkFormat;
use crate::utils::convert::parse_bytes;

/// Default location of the source credential file.
pub const DEFAULT_SOURCE_CONFIG: &str = "./config/db_property.json";

/// Default location of the destination configuration file.
pub const DEFAULT_DESTINATION_CONFIG: &str = "./config/storj_config.json";

/// Default location of the optional runtime settings file.
pub const DEFAULT_SETTINGS_FILE: &str = "./config/mongobucket.toml";

/// MongoDB source credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Host name or address of the MongoDB server
    pub hostname: String,

    /// Port, accepted as a number or a string
    #[serde(deserialize_with = "deserialize_port", default = "default_port")]
    pub port: u16,

    /// User name for authentication
    #[serde(default)]
    pub username: String,

    /// Password for authentication
    #[serde(default)]
    pub password: String,

    /// Database to export
    pub database: String,
}

/// Destination bucket configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Root credential, `ACCESS_KEY_ID:SECRET_KEY`
    #[serde(rename = "apikey", default)]
    pub api_key: String,

    /// Endpoint URL of the object storage gateway
    #[serde(rename = "satellite", default)]
    pub endpoint: String,

    /// Destination bucket
    pub bucket: String,

    /// Prefix prepended to every object key
    #[serde(rename = "uploadPath", default)]
    pub upload_path: String,

    /// Passphrase the encryption key is derived from
    #[serde(rename = "encryptionpassphrase", default)]
    pub encryption_passphrase: String,

    /// Pre-serialized capability token, used instead of `apikey` when present
    #[serde(rename = "serializedAccess", default)]
    pub serialized_access: Option<String>,

    /// Strip read permission from shared capabilities
    #[serde(rename = "disallowReads", default)]
    pub disallow_reads: bool,

    /// Strip write permission from shared capabilities
    #[serde(rename = "disallowWrites", default)]
    pub disallow_writes: bool,

    /// Strip delete permission from shared capabilities
    #[serde(rename = "disallowDeletes", default)]
    pub disallow_deletes: bool,

    /// Region reported to the S3 gateway
    #[serde(default = "default_region")]
    pub region: String,
}

/// Runtime settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Export pipeline settings
    #[serde(default)]
    pub export: ExportSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Export pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Timeout applied to collection listing, cursor acquisition and each
    /// cursor fetch, in seconds
    #[serde(default = "default_cursor_timeout")]
    pub cursor_timeout_secs: u64,

    /// Maximum size of one destination segment (e.g. "32MB")
    #[serde(default = "default_segment_size")]
    pub segment_size: String,

    /// Chunk encoding
    #[serde(default)]
    pub format: ChunkFormat,

    /// Pull retries after a transient read error, per segment
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    /// Re-download every segment and compare it with what was sent
    #[serde(default)]
    pub verify: bool,

    /// Show a progress spinner
    #[serde(default)]
    pub progress: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_port() -> u16 {
    27017
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_cursor_timeout() -> u64 {
    10
}

fn default_segment_size() -> String {
    "32MB".to_string()
}

fn default_read_retries() -> u32 {
    3
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        Text(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(port) => Ok(port),
        PortValue::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{text}'"))),
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"****")
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("api_key", &"****")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("upload_path", &self.upload_path)
            .field("encryption_passphrase", &"****")
            .field("serialized_access", &self.serialized_access.as_ref().map(|_| "****"))
            .field("disallow_reads", &self.disallow_reads)
            .field("disallow_writes", &self.disallow_writes)
            .field("disallow_deletes", &self.disallow_deletes)
            .field("region", &self.region)
            .finish()
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            cursor_timeout_secs: default_cursor_timeout(),
            segment_size: default_segment_size(),
            format: ChunkFormat::default(),
            read_retries: default_read_retries(),
            verify: false,
            progress: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

/// Read a whole config file, mapping a missing file to [`ConfigError::FileNotFound`].
fn read_config_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.display().to_string()).into()
        } else {
            ConfigError::InvalidFormat(format!("{}: {e}", path.display())).into()
        }
    })
}

fn parse_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = read_config_file(path)?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::InvalidFormat(format!("{}: {e}", path.display())).into())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field.to_string()).into());
    }
    Ok(())
}

impl SourceConfig {
    /// Load source credentials from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: SourceConfig = parse_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field needed to connect is present
    pub fn validate(&self) -> Result<()> {
        require("hostname", &self.hostname)?;
        require("database", &self.database)?;
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Build the MongoDB connection URI
    ///
    /// Format: `mongodb://host:port/database`. Credentials travel separately
    /// through [`SourceConfig::credential`], so they need no URI escaping.
    pub fn connection_uri(&self) -> String {
        format!("mongodb://{}:{}/{}", self.hostname, self.port, self.database)
    }

    /// Driver credential authenticating against `admin`, if a user is set
    pub fn credential(&self) -> Option<Credential> {
        if self.username.is_empty() {
            return None;
        }
        let mut credential = Credential::default();
        credential.username = Some(self.username.clone());
        credential.password = (!self.password.is_empty()).then(|| self.password.clone());
        credential.source = Some("admin".to_string());
        Some(credential)
    }

    /// Connection URI for display, with the password replaced by `***`
    pub fn sanitized_uri(&self) -> String {
        if self.username.is_empty() {
            return self.connection_uri();
        }
        format!(
            "mongodb://{}:***@{}:{}/{}?authSource=admin",
            self.username, self.hostname, self.port, self.database
        )
    }
}

impl DestinationConfig {
    /// Load destination configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: DestinationConfig = parse_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the bucket and some form of access material are present
    pub fn validate(&self) -> Result<()> {
        require("bucket", &self.bucket)?;
        match &self.serialized_access {
            Some(token) => require("serializedAccess", token)?,
            None => require("apikey", &self.api_key)?,
        }
        Ok(())
    }

    /// Upload prefix normalized to either empty or ending in `/`
    pub fn key_prefix(&self) -> String {
        let prefix = self.upload_path.trim_matches('/');
        if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        }
    }
}

impl Settings {
    /// Load settings
    ///
    /// An explicit path must exist. Without one, the default locations are
    /// tried in order and defaults are used when none exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_paths().into_iter().find(|p| p.exists()) {
                Some(found) => Self::from_file(&found)?,
                None => Self::default(),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = read_config_file(path)?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::InvalidFormat(format!("{}: {e}", path.display())).into())
    }

    /// Candidate settings files, most specific first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(DEFAULT_SETTINGS_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("mongobucket").join("settings.toml"));
        }
        paths
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        self.export.segment_capacity()?;
        if self.export.cursor_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "export.cursor_timeout_secs".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl ExportSettings {
    /// Cursor acquisition timeout as Duration
    pub fn cursor_timeout(&self) -> Duration {
        Duration::from_secs(self.cursor_timeout_secs)
    }

    /// Segment size in bytes
    pub fn segment_capacity(&self) -> Result<usize> {
        match parse_bytes(&self.segment_size) {
            Some(bytes) if bytes > 0 => Ok(bytes as usize),
            _ => Err(ConfigError::InvalidValue {
                field: "export.segment_size".to_string(),
                value: self.segment_size.clone(),
            }
            .into()),
        }
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
