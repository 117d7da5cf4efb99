use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;
use wagate_protocol::DeviceInfo;

use crate::dispatch::DispatchMode;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            dispatch: DispatchConfig::default(),
            staging: StagingConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_request_timeout() -> u64 {
    60
}

// ============================================================================
// SessionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_credentials_dir")]
    pub credentials_dir: PathBuf,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_seconds: u64,
    /// Device identity presented to the network during pairing.
    #[serde(default)]
    pub device: DeviceInfo,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials_dir: default_credentials_dir(),
            reconnect_delay_seconds: default_reconnect_delay(),
            device: DeviceInfo::default(),
        }
    }
}

fn default_credentials_dir() -> PathBuf {
    PathBuf::from(".wagate/session")
}

fn default_reconnect_delay() -> u64 {
    3
}

// ============================================================================
// DispatchConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    /// `queued` accepts and executes later; `immediate` sends inline and
    /// returns the real result.
    #[serde(default)]
    pub mode: DispatchMode,
    /// Minimum gap between consecutive send attempts. The remote network
    /// throttles accounts that burst, so this is paced on purpose.
    #[serde(default = "default_send_delay")]
    pub send_delay_seconds: u64,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_seconds: u64,
    /// Total attempts per item. 1 disables retries; only send failures and
    /// timeouts are ever retried.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            send_delay_seconds: default_send_delay(),
            attempt_timeout_seconds: default_attempt_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_send_delay() -> u64 {
    5
}

fn default_attempt_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    1
}

// ============================================================================
// StagingConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(".wagate/uploads")
}

// ============================================================================
// ResolverConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ResolverConfig {
    /// Country code prefixed onto numbers entered with a trunk digit.
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            country_code: default_country_code(),
        }
    }
}

fn default_country_code() -> String {
    "62".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
