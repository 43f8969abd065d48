//! Server configuration.
//!
//! Loaded from a YAML file or assembled from command-line flags, then validated
//! before anything is opened or bound.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tstorage_engine::{StorageOptions, TimestampPrecision};

/// Server configuration.
///
/// Example YAML:
/// ```yaml
/// port: 50051
/// host: "0.0.0.0"
/// data_path: "./tsdb"
/// timestamp_precision: "s"
/// partition_duration_hours: 1
/// write_timeout_secs: 30
/// http_addr: "0.0.0.0:9090"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// gRPC listen interface
    #[serde(default = "default_host")]
    pub host: String,

    /// Directory the storage engine flushes partitions to
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// One of "ns", "us", "ms", "s"
    #[serde(default = "default_timestamp_precision")]
    pub timestamp_precision: String,

    /// Timestamp range covered by one partition
    #[serde(default = "default_partition_duration_hours")]
    pub partition_duration_hours: u64,

    /// How long an insert waits for a free writer
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Optional HTTP address for /health and /metrics
    #[serde(default)]
    pub http_addr: Option<String>,
}

fn default_port() -> u16 {
    50051
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./tsdb")
}

fn default_timestamp_precision() -> String {
    "s".to_string()
}

fn default_partition_duration_hours() -> u64 {
    1
}

fn default_write_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            data_path: default_data_path(),
            timestamp_precision: default_timestamp_precision(),
            partition_duration_hours: default_partition_duration_hours(),
            write_timeout_secs: default_write_timeout_secs(),
            http_addr: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: ServerConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc_addr()?;
        self.precision()?;

        if self.partition_duration_hours == 0 {
            return Err(ConfigError::InvalidField(
                "partition_duration_hours must be > 0".to_string(),
            ));
        }

        if self.write_timeout_secs == 0 {
            return Err(ConfigError::InvalidField(
                "write_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.data_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidField(
                "data_path cannot be empty".to_string(),
            ));
        }

        if self.data_path.exists() && !self.data_path.is_dir() {
            return Err(ConfigError::InvalidField(
                "data_path exists but is not a directory".to_string(),
            ));
        }

        self.http_socket_addr()?;

        Ok(())
    }

    /// gRPC socket address from host and port.
    pub fn rpc_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| ConfigError::InvalidField(format!("Invalid host {:?}: {}", self.host, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Parsed HTTP address, if one is configured.
    pub fn http_socket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.http_addr
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .map_err(|e| ConfigError::InvalidField(format!("Invalid http_addr: {}", e)))
            })
            .transpose()
    }

    pub fn precision(&self) -> Result<TimestampPrecision, ConfigError> {
        self.timestamp_precision
            .parse()
            .map_err(|e: tstorage_engine::Error| ConfigError::InvalidField(e.to_string()))
    }

    pub fn partition_duration(&self) -> Duration {
        Duration::from_secs(self.partition_duration_hours.saturating_mul(60 * 60))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Storage engine options for this configuration.
    pub fn storage_options(&self) -> Result<StorageOptions, ConfigError> {
        Ok(StorageOptions::default()
            .with_data_path(&self.data_path)
            .with_precision(self.precision()?)
            .with_partition_duration(self.partition_duration())
            .with_write_timeout(self.write_timeout()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.port, 50051);
        assert_eq!(config.precision().unwrap(), TimestampPrecision::Seconds);
        assert_eq!(config.partition_duration(), Duration::from_secs(3600));
        assert_eq!(config.write_timeout(), Duration::from_secs(30));
        assert_eq!(config.rpc_addr().unwrap().to_string(), "0.0.0.0:50051");
    }

    #[test]
    fn test_invalid_precision() {
        let config = ServerConfig {
            timestamp_precision: "minutes".to_string(),
            ..ServerConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ns, us, ms or s"));
    }

    #[test]
    fn test_invalid_host() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            ..ServerConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_durations() {
        let config = ServerConfig {
            partition_duration_hours: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            write_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_defaults_fill_missing_fields() {
        let config: ServerConfig =
            serde_yaml::from_str("port: 6000\ntimestamp_precision: ms\n").unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.precision().unwrap(), TimestampPrecision::Milliseconds);
        assert_eq!(config.data_path, PathBuf::from("./tsdb"));
        assert!(config.http_addr.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tstorage.yaml");
        std::fs::write(
            &path,
            format!(
                "host: \"127.0.0.1\"\ndata_path: {:?}\nhttp_addr: \"127.0.0.1:9090\"\n",
                dir.path().join("data")
            ),
        )
        .unwrap();

        let config = ServerConfig::load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.rpc_addr().unwrap().to_string(), "127.0.0.1:50051");
        assert_eq!(
            config.http_socket_addr().unwrap().unwrap().to_string(),
            "127.0.0.1:9090"
        );

        assert!(ServerConfig::load_from_file("/nonexistent/tstorage.yaml").is_err());
    }
}
