//! Default paths for gatekeep
//!
//! Paths are user-writable by default:
//! - Data: `$GATEKEEP_DATA_DIR`, `$XDG_DATA_HOME/gatekeep` or `~/.local/share/gatekeep`
//! - Config: `$XDG_CONFIG_HOME/gatekeep/config.toml` or `~/.config/gatekeep/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the data directory
pub const GATEKEEP_DATA_DIR_ENV: &str = "GATEKEEP_DATA_DIR";

const APP_DIR: &str = "gatekeep";

const CONFIG_FILENAME: &str = "config.toml";

fn home_subdir(parts: &[&str]) -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let mut path = PathBuf::from(home);
    path.extend(parts);
    Some(path.join(APP_DIR))
}

/// Get the default data directory, honouring `GATEKEEP_DATA_DIR`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(GATEKEEP_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }
    data_dir_without_env()
}

/// Data directory ignoring the `GATEKEEP_DATA_DIR` override.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    home_subdir(&[".local", "share"]).unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR).join("data"))
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    let dir = match std::env::var("XDG_CONFIG_HOME") {
        Ok(config_home) => PathBuf::from(config_home).join(APP_DIR),
        Err(_) => home_subdir(&[".config"]).unwrap_or_else(|| PathBuf::from("/etc").join(APP_DIR)),
    };
    dir.join(CONFIG_FILENAME)
}
