//! Initialize the configuration directory: create ~/.helpdesk, a default config and an empty
//! announcement board.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};

/// Create the config directory and default files if they do not exist.
/// - Writes `config.json` with every default spelled out, so it can be edited in place.
/// - Seeds the announcements file (`[]`) at the resolved announcements path.
///
/// Returns the config directory. Existing files are left untouched.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    let config = if config_path.exists() {
        log::debug!("config already exists at {}, skipping", config_path.display());
        config::load_config(Some(config_path.to_path_buf()))?.0
    } else {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).context("serializing default config")?;
        std::fs::write(config_path, json)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
        config
    };

    let announcements = config::resolve_announcements_path(&config, config_path);
    if !announcements.exists() {
        if let Some(parent) = announcements.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        std::fs::write(&announcements, "[]")
            .with_context(|| format!("writing {}", announcements.display()))?;
        log::info!("created announcement board at {}", announcements.display());
    }

    Ok(config_dir.to_path_buf())
}
