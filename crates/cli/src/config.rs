//! CLI configuration utilities

use anyhow::{Context, Result};
use campus_session::GatewayConfig;
use campus_session::config::CREDENTIALS_FILE;
use std::path::Path;
use tracing::info;

/// Load the gateway configuration.
///
/// An explicit file takes precedence over the well-known locations. A data
/// directory given on the command line relocates the credential file unless
/// the configuration names one itself.
pub fn load_gateway_config(path: Option<&Path>, data_dir: Option<&Path>) -> Result<GatewayConfig> {
    let mut config = if let Some(path) = path {
        info!("Loading configuration from: {}", path.display());
        GatewayConfig::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        GatewayConfig::load().context("failed to load configuration")?
    };

    if config.store_path.is_none() {
        if let Some(dir) = data_dir {
            config.store_path = Some(dir.join(CREDENTIALS_FILE));
        }
    }

    Ok(config)
}

/// Save a gateway configuration to a JSON file
pub fn save_gateway_config<P: AsRef<Path>>(config: &GatewayConfig, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default configuration file
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    save_gateway_config(&GatewayConfig::default(), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campus.json");
        generate_default_config(&path).unwrap();

        let config = load_gateway_config(Some(&path), Some(dir.path())).unwrap();
        assert_eq!(config.base_url, GatewayConfig::default().base_url);
        assert_eq!(
            config.store_path.as_deref(),
            Some(dir.path().join(CREDENTIALS_FILE).as_path())
        );
    }
}
