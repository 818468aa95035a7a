//! Gateway configuration

use config::{Config, ConfigError, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Name of the credential file inside the data directory
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Configuration files probed by [`GatewayConfig::load`], relative to the
/// working directory
pub const CONFIG_FILES: &[&str] = &[
    "campus.json",
    "campus.toml",
    "config/campus.json",
    "config/campus.toml",
];

/// Session gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Backend base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Transport timeout per request, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional scheme placed before the access token (e.g. `Bearer`).
    /// The backend expects the raw token, so this is unset by default.
    #[serde(default)]
    pub auth_scheme: Option<String>,
    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Credential file location
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://localhost:2800".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("campus-session/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            auth_scheme: None,
            user_agent: default_user_agent(),
            store_path: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from well-known files in the working directory
    /// and `CAMPUS__*` variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_in(Path::new("."))
    }

    /// Load configuration from the well-known files under `dir`.
    /// Later files in [`CONFIG_FILES`] override earlier ones.
    pub fn load_in(dir: &Path) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        for name in CONFIG_FILES {
            let path = dir.join(name);
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CAMPUS")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load configuration from a specific file, still honoring the environment
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let builder = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("CAMPUS")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Credential file path, falling back to the platform data directory
    pub fn resolved_store_path(&self) -> PathBuf {
        if let Some(path) = &self.store_path {
            return path.clone();
        }
        default_data_dir().join(CREDENTIALS_FILE)
    }
}

/// Platform data directory for the campus client
pub fn default_data_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("uk.ac.ucl", "Campus", "campus") {
        dirs.data_dir().to_path_buf()
    } else {
        warn!("Failed to determine platform-specific directories, using ./data");
        PathBuf::from("./data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend() {
        let config = GatewayConfig::default();
        assert_eq!(config.base_url, "http://localhost:2800");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert!(config.auth_scheme.is_none());
        assert!(config.user_agent.starts_with("campus-session/"));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campus.toml");
        std::fs::write(
            &path,
            "base_url = \"https://sms.example.ac.uk\"\ntimeout_secs = 3\nauth_scheme = \"Bearer\"\n",
        )
        .unwrap();

        let config = GatewayConfig::load_from_file(&path).unwrap();
        assert_eq!(config.base_url, "https://sms.example.ac.uk");
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.auth_scheme.as_deref(), Some("Bearer"));
        assert!(config.store_path.is_none());
    }

    #[test]
    fn generated_json_file_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            base_url: "https://sms.example.ac.uk".into(),
            ..Default::default()
        };
        std::fs::write(
            dir.path().join("campus.json"),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        let loaded = GatewayConfig::load_in(dir.path()).unwrap();
        assert_eq!(loaded.base_url, "https://sms.example.ac.uk");
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = GatewayConfig::load_in(dir.path()).unwrap();
        assert_eq!(loaded.base_url, GatewayConfig::default().base_url);
    }

    #[test]
    fn explicit_store_path_wins() {
        let config = GatewayConfig {
            store_path: Some(PathBuf::from("/tmp/creds.json")),
            ..Default::default()
        };
        assert_eq!(config.resolved_store_path(), PathBuf::from("/tmp/creds.json"));
    }
}
