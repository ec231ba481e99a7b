//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which endpoints this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Run both endpoints in one process.
    Both,
    /// Browser-facing half only.
    Local,
    /// Outbound half only.
    Remote,
}

impl ServerMode {
    pub fn runs_local(self) -> bool {
        matches!(self, ServerMode::Both | ServerMode::Local)
    }

    pub fn runs_remote(self) -> bool {
        matches!(self, ServerMode::Both | ServerMode::Remote)
    }
}

/// Main configuration
///
/// Loaded from a JSON file; every key is optional and unknown keys are
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which acceptors to run
    #[serde(default = "default_mode")]
    pub server_mode: ServerMode,
    /// Local acceptor listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// Local acceptor listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Concurrent session limit per acceptor
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-read buffer size for the data pump
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Handshake / tunnel-dial timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Tunnel hop configuration
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// Cipher module configuration
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Listen address of the local acceptor.
    pub fn local_listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address of the remote endpoint: dialed by the local endpoint,
    /// bound by the remote acceptor.
    pub fn tunnel_addr(&self) -> String {
        format!("{}:{}", self.tunnel.host, self.tunnel.port)
    }

    /// Handshake / tunnel-dial timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_mode: default_mode(),
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            timeout: default_timeout(),
            tunnel: TunnelConfig::default(),
            encryption: EncryptionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Tunnel hop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Remote endpoint address
    #[serde(default = "default_tunnel_host")]
    pub host: String,
    /// Remote endpoint port
    #[serde(default = "default_tunnel_port")]
    pub port: u16,
    /// Fallback keystream byte when the cipher module fails to load
    #[serde(default = "default_xor_key")]
    pub xor_key: u8,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            host: default_tunnel_host(),
            port: default_tunnel_port(),
            xor_key: default_xor_key(),
        }
    }
}

/// Cipher module configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Path to the cipher module
    #[serde(default = "default_library_path")]
    pub library_path: String,
    /// Algorithm name (informational)
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Cipher key
    #[serde(default = "default_key")]
    pub key: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            library_path: default_library_path(),
            algorithm: default_algorithm(),
            key: default_key(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path (optional; stdout when absent)
    #[serde(default)]
    pub file: Option<String>,
    /// Log format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            format: default_log_format(),
        }
    }
}

fn default_mode() -> ServerMode {
    ServerMode::Both
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    100
}

fn default_buffer_size() -> usize {
    4096
}

fn default_timeout() -> u64 {
    30
}

fn default_tunnel_host() -> String {
    "127.0.0.1".to_string()
}

fn default_tunnel_port() -> u16 {
    8081
}

fn default_xor_key() -> u8 {
    42
}

fn default_library_path() -> String {
    "./encryption_plugins/libxor_encryption.so".to_string()
}

fn default_algorithm() -> String {
    "XOR".to_string()
}

fn default_key() -> String {
    "DefaultKey123".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
