//! Node configuration document.
//!
//! The native side applies its own defaults; every field left empty here is
//! omitted from the JSON it receives.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{NodeError, Result};

/// Prefix of the environment variables read by [`NodeConfig::apply_env`].
pub const ENV_PREFIX: &str = "STORAGE_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Notice,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl FromStr for LogLevel {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "notice" => Ok(Self::Notice),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(NodeError::Config(format!("unknown log level: {other}"))),
        }
    }
}

/// What the node writes to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Auto,
    Colors,
    NoColors,
    Json,
}

impl FromStr for LogFormat {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "colors" => Ok(Self::Colors),
            "nocolors" => Ok(Self::NoColors),
            "json" => Ok(Self::Json),
            other => Err(NodeError::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Backend of the main repo store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    Fs,
    Sqlite,
    LevelDb,
}

impl FromStr for RepoKind {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fs" => Ok(Self::Fs),
            "sqlite" => Ok(Self::Sqlite),
            "leveldb" => Ok(Self::LevelDb),
            other => Err(NodeError::Config(format!("unknown repo kind: {other}"))),
        }
    }
}

/// Configuration handed to the native node on creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NodeConfig {
    /// Log level, optionally followed by `;level:topic` directives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
    #[serde(rename = "metrics", skip_serializing_if = "is_false")]
    pub metrics_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub listen_addrs: Vec<String>,
    /// One of `any`, `none`, `upnp`, `pmp` or `extip:<IP>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nat: Option<String>,
    #[serde(rename = "disc-port", skip_serializing_if = "Option::is_none")]
    pub discovery_port: Option<u16>,
    #[serde(rename = "net-privkey", skip_serializing_if = "Option::is_none")]
    pub net_priv_key_file: Option<String>,
    #[serde(rename = "bootstrap-node", skip_serializing_if = "Vec::is_empty")]
    pub bootstrap_nodes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_peers: Option<u32>,
    /// Zero uses one thread per core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_kind: Option<RepoKind>,
    /// Bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_quota: Option<u64>,
    /// Seconds, as a string; `0` disables the ttl.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_ttl: Option<String>,
    /// Block maintenance interval in seconds, as a string.
    #[serde(rename = "block-mi", skip_serializing_if = "Option::is_none")]
    pub block_maintenance_interval: Option<String>,
    /// Blocks checked per maintenance cycle.
    #[serde(rename = "block-mn", skip_serializing_if = "Option::is_none")]
    pub block_maintenance_blocks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn is_false(b: &bool) -> bool {
    !b
}

impl NodeConfig {
    /// Configuration with only a data directory set.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content).map_err(|source| NodeError::Decode {
            what: "node config",
            source,
        })?;
        debug!(path = %path.display(), "loaded node config");
        Ok(config)
    }

    /// Overlays `STORAGE_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlays variables from `lookup`. Unparsable values are logged and
    /// ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).filter(|v| !v.is_empty()).map(|v| (key, v))
        };

        if let Some((_, v)) = get("DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some((key, v)) = get("LOG_LEVEL") {
            // Only the leading level is checked; topic directives pass through.
            let base = v.split([';', ',']).next().unwrap_or_default().trim();
            match base.parse::<LogLevel>() {
                Ok(_) => self.log_level = Some(v),
                Err(e) => warn!(key = %key, value = %v, error = %e, "ignoring unparsable environment override"),
            }
        }
        if let Some((_, v)) = get("NAT") {
            self.nat = Some(v);
        }
        if let Some((_, v)) = get("AGENT_STRING") {
            self.agent_string = Some(v);
        }
        if let Some(v) = parse_var(get("LOG_FORMAT")) {
            self.log_format = Some(v);
        }
        if let Some(v) = parse_var(get("REPO_KIND")) {
            self.repo_kind = Some(v);
        }
        if let Some(v) = parse_var(get("STORAGE_QUOTA")) {
            self.storage_quota = Some(v);
        }
        if let Some(v) = parse_var(get("MAX_PEERS")) {
            self.max_peers = Some(v);
        }
        if let Some(v) = parse_var(get("DISCOVERY_PORT")) {
            self.discovery_port = Some(v);
        }
        if let Some(v) = parse_var(get("NUM_THREADS")) {
            self.num_threads = Some(v);
        }
        if let Some(v) = parse_var(get("BLOCK_RETRIES")) {
            self.block_retries = Some(v);
        }
    }

    /// Serialises the document handed to the native side.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| NodeError::Config(e.to_string()))
    }
}

fn parse_var<T: FromStr>(var: Option<(String, String)>) -> Option<T> {
    let (key, value) = var?;
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = %key, value = %value, "ignoring unparsable environment override");
            None
        }
    }
}
