use super::GatewayConfig;
use crate::constants;
use crate::error::AppError;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// `GATEWAY_CONFIG`, falling back to the default location.
    pub fn path_from_env() -> PathBuf {
        std::env::var(constants::env::CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(constants::DEFAULT_CONFIG_PATH))
    }

    pub fn load_from_file(path: &Path) -> Result<GatewayConfig, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
            .map_err(|e| AppError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn parse(raw: &str) -> Result<GatewayConfig, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
