//! Protocol configuration loading from TOML, with defaults.

use moltspeak_types::config::ProtocolConfig;
use moltspeak_types::{MoltSpeakError, MoltSpeakResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable consulted when no path is given.
pub const CONFIG_ENV: &str = "MOLTSPEAK_CONFIG";

/// Load configuration, falling back to defaults.
///
/// Without an explicit `path` the file named by `MOLTSPEAK_CONFIG` is used;
/// if that is unset too, defaults are returned. A missing, unreadable or
/// invalid file is logged and replaced by defaults.
pub fn load_config(path: Option<&Path>) -> ProtocolConfig {
    let Some(config_path) = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    else {
        return ProtocolConfig::default();
    };

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return ProtocolConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match parse_config(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                ProtocolConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            ProtocolConfig::default()
        }
    }
}

/// Parse a TOML document. Absent keys take their defaults.
pub fn parse_config(contents: &str) -> MoltSpeakResult<ProtocolConfig> {
    toml::from_str(contents).map_err(|e| MoltSpeakError::Parse(format!("invalid config: {e}")))
}
