use std::path::Path;

use serde::{Deserialize, Serialize};
use spaetzli_core::{PremiumCapabilities, PremiumLimits};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub limits: PremiumLimits,

    #[serde(default)]
    pub capabilities: PremiumCapabilities,
}

impl ServerConfig {
    /// Read a TOML config file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read config file '{}': {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| format!("invalid config file '{}': {e}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Root data directory; backups are mirrored to `<data_dir>/backups`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,

    /// Additionally require an API-SIGN header. Signatures are never verified.
    #[serde(default)]
    pub validate_signatures: bool,

    /// Log output format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Abandoned upload sessions are dropped after this many idle seconds.
    #[serde(default = "default_upload_ttl")]
    pub upload_ttl_seconds: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            debug: false,
            validate_signatures: false,
            log_format: default_log_format(),
            upload_ttl_seconds: default_upload_ttl(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_upload_ttl() -> u64 {
    3600
}
