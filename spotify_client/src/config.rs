use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 7788;

pub const SERVER_IP_ENV: &str = "SPOTIFY_SERVER_IP";
pub const SERVER_PORT_ENV: &str = "SPOTIFY_SERVER_PORT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Config file format error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid IP address '{0}', expected dotted quad")]
    InvalidIpAddress(String),
    #[error("Invalid port {0}, expected 1-65535")]
    InvalidPort(u32),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("Invalid value '{value}' for environment variable {var}")]
    InvalidEnvVar { var: String, value: String },
}

/// Connection settings for the spotify service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_ip: String,
    pub server_port: u16,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub reconnect_min_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ip: DEFAULT_SERVER_IP.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            connect_timeout_ms: 3000,
            request_timeout_ms: 10_000,
            reconnect_min_backoff_ms: 250,
            reconnect_max_backoff_ms: 10_000,
        }
    }
}

impl ClientConfig {
    pub fn new(server_ip: impl Into<String>, server_port: u16) -> Self {
        Self {
            server_ip: server_ip.into(),
            server_port,
            ..Self::default()
        }
    }

    /// Defaults overlaid with `SPOTIFY_SERVER_IP` / `SPOTIFY_SERVER_PORT`
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay environment variables onto this config
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(ip) = env::var(SERVER_IP_ENV) {
            self.server_ip = ip.trim().to_string();
        }
        if let Ok(port) = env::var(SERVER_PORT_ENV) {
            self.server_port = port.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
                var: SERVER_PORT_ENV.to_string(),
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ip(&self.server_ip)?;
        validate_port(self.server_port as u32)?;
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("reconnect_min_backoff_ms", self.reconnect_min_backoff_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    /// Validated socket address of the service
    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = validate_ip(&self.server_ip)?;
        validate_port(self.server_port as u32)?;
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, self.server_port)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_backoff_ms.max(self.reconnect_min_backoff_ms))
    }
}

/// Accepts only dotted-quad IPv4 addresses
pub fn validate_ip(ip: &str) -> Result<Ipv4Addr, ConfigError> {
    ip.parse::<Ipv4Addr>()
        .map_err(|_| ConfigError::InvalidIpAddress(ip.to_string()))
}

pub fn validate_port(port: u32) -> Result<u16, ConfigError> {
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(port)),
    }
}

/// JSON file backed config persistence
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored config, falling back to defaults when no file exists
    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let config: ClientConfig = serde_json::from_str(&contents)?;
                log::debug!("📁 Loaded config from {}", self.path.display());
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(
                    "📁 No config at {}, using defaults",
                    self.path.display()
                );
                Ok(ClientConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate and write the config
    pub fn save(&self, config: &ClientConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(config)?)?;
        log::info!("💾 Saved config to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_ip, "127.0.0.1");
        assert_eq!(config.server_port, 7788);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.server_addr().unwrap(),
            "127.0.0.1:7788".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_zero_durations_rejected() {
        let zero_connect = ClientConfig {
            connect_timeout_ms: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            zero_connect.validate(),
            Err(ConfigError::ZeroDuration("connect_timeout_ms"))
        ));

        let zero_backoff = ClientConfig {
            reconnect_min_backoff_ms: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            zero_backoff.validate(),
            Err(ConfigError::ZeroDuration("reconnect_min_backoff_ms"))
        ));
    }

    #[test]
    fn test_ip_validation() {
        assert!(validate_ip("192.168.1.20").is_ok());
        assert!(validate_ip("256.1.1.1").is_err());
        assert!(validate_ip("localhost").is_err());
        assert!(validate_ip("1.2.3").is_err());
        assert!(validate_ip("::1").is_err());
    }

    #[test]
    fn test_port_validation() {
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(matches!(validate_port(0), Err(ConfigError::InvalidPort(0))));
        assert!(matches!(
            validate_port(65536),
            Err(ConfigError::InvalidPort(65536))
        ));
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("client.json"));

        // missing file gives defaults
        assert_eq!(store.load().unwrap(), ClientConfig::default());

        let mut config = ClientConfig::new("10.0.0.7", 9000);
        config.request_timeout_ms = 500;
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn test_store_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("client.json"));
        let config = ClientConfig::new("not an ip", 9000);
        assert!(matches!(
            store.save(&config),
            Err(ConfigError::InvalidIpAddress(_))
        ));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, r#"{ "server_port": 8000 }"#).unwrap();

        let config = ConfigStore::new(&path).load().unwrap();
        assert_eq!(config.server_port, 8000);
        assert_eq!(config.server_ip, DEFAULT_SERVER_IP);
        assert_eq!(config.connect_timeout_ms, 3000);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ConfigStore::new(&path).load(),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_overlay() {
        env::set_var(SERVER_IP_ENV, "10.1.2.3");
        env::set_var(SERVER_PORT_ENV, "7000");
        let mut config = ClientConfig::default();
        config.apply_env().unwrap();
        env::remove_var(SERVER_IP_ENV);
        env::remove_var(SERVER_PORT_ENV);

        assert_eq!(config.server_ip, "10.1.2.3");
        assert_eq!(config.server_port, 7000);
    }

    #[test]
    #[serial]
    fn test_env_bad_port() {
        env::set_var(SERVER_PORT_ENV, "seventy");
        let result = ClientConfig::default().apply_env();
        env::remove_var(SERVER_PORT_ENV);

        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }
}
