//! Client configuration.

use std::str::FromStr;
use std::time::Duration;

use derive_builder::Builder;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(1500);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_METADATA_RETRIES: u32 = 3;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("at least one bootstrap endpoint is required")]
    EmptyBootstrap,
    #[error("invalid bootstrap endpoint `{0}`, expected host:port")]
    InvalidEndpoint(String),
    #[error("missing required config option: {0}")]
    MissingField(String),
    #[error("invalid option value: {0}")]
    InvalidValue(String),
}

/// Durability level a produce request waits for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AckLevel {
    /// Fire and forget, the broker replies before any durability.
    None,
    /// Acknowledged once the partition leader has appended the record.
    #[default]
    Leader,
    /// Acknowledged once the full replica set has the record.
    All,
}

impl AckLevel {
    pub(crate) fn required_acks(&self) -> i16 {
        match self {
            AckLevel::None => 0,
            AckLevel::Leader => 1,
            AckLevel::All => -1,
        }
    }
}

impl FromStr for AckLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "0" => Ok(AckLevel::None),
            "leader" | "1" => Ok(AckLevel::Leader),
            "all" | "-1" => Ok(AckLevel::All),
            _ => Err(ConfigError::InvalidValue(format!("ack level: {s}"))),
        }
    }
}

impl std::fmt::Display for AckLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckLevel::None => write!(f, "none"),
            AckLevel::Leader => write!(f, "leader"),
            AckLevel::All => write!(f, "all"),
        }
    }
}

/// Where a consumer starts when the group has no committed offset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl FromStr for OffsetReset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            _ => Err(ConfigError::InvalidValue(format!("offset reset: {s}"))),
        }
    }
}

impl std::fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OffsetReset::Earliest => write!(f, "earliest"),
            OffsetReset::Latest => write!(f, "latest"),
        }
    }
}

/// How offset commits are delivered to the cluster.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Commit completes only after the cluster acknowledged it.
    #[default]
    Sync,
    /// Commit is handed to a background task; failures are logged.
    Async,
}

impl FromStr for CommitMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(CommitMode::Sync),
            "async" => Ok(CommitMode::Async),
            _ => Err(ConfigError::InvalidValue(format!("commit mode: {s}"))),
        }
    }
}

/// Cluster-wide client settings.
/// Create this struct with [`ClientConfig::builder`].
#[derive(Debug, Builder, Clone)]
#[builder(build_fn(private, name = "build_impl"))]
pub struct ClientConfig {
    /// Ordered list of `host:port` endpoints tried during the initial connect.
    #[builder(default, setter(custom))]
    pub bootstrap: Vec<String>,
    #[builder(default, setter(strip_option, into))]
    pub client_id: Option<String>,
    #[builder(default)]
    pub ack_level: AckLevel,
    #[builder(default)]
    pub auto_commit: bool,
    #[builder(default)]
    pub offset_reset: OffsetReset,
    #[builder(default)]
    pub commit_mode: CommitMode,
    #[builder(default = "DEFAULT_POLL_TIMEOUT")]
    pub poll_timeout: Duration,
    #[builder(default = "DEFAULT_SEND_TIMEOUT")]
    pub send_timeout: Duration,
    #[builder(default = "DEFAULT_HEARTBEAT_INTERVAL")]
    pub heartbeat_interval: Duration,
    #[builder(default = "DEFAULT_SESSION_TIMEOUT")]
    pub session_timeout: Duration,
    #[builder(default = "DEFAULT_METADATA_RETRIES")]
    pub metadata_retries: u32,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

impl ClientConfigBuilder {
    pub fn bootstrap_server(&mut self, addr: impl Into<String>) -> &mut Self {
        self.bootstrap.get_or_insert_with(Vec::new).push(addr.into());
        self
    }

    pub fn bootstrap(&mut self, addrs: Vec<String>) -> &mut Self {
        self.bootstrap = Some(addrs);
        self
    }

    pub fn build(&self) -> Result<ClientConfig, ConfigError> {
        let config = self
            .build_impl()
            .map_err(|e| ConfigError::MissingField(e.to_string()))?;

        if config.bootstrap.is_empty() {
            return Err(ConfigError::EmptyBootstrap);
        }
        for addr in &config.bootstrap {
            parse_endpoint(addr)?;
        }

        Ok(config)
    }
}

/// Split a `host:port` string, rejecting anything malformed early.
pub(crate) fn parse_endpoint(addr: &str) -> Result<(String, u16), ConfigError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidEndpoint(addr.to_owned()))?;
    if host.is_empty() {
        return Err(ConfigError::InvalidEndpoint(addr.to_owned()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ConfigError::InvalidEndpoint(addr.to_owned()))?;
    Ok((host.to_owned(), port))
}
