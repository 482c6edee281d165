use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::HeraldConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "herald.toml",
    "herald.yaml",
    "herald.yml",
    "herald.json",
    "herald.json5",
];

/// Load config from the given path (format chosen by extension).
pub fn load_config(path: &Path) -> Result<HeraldConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

fn parse_config(raw: &str, path: &Path) -> Result<HeraldConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_ascii_lowercase();
    let parsed = match ext.as_str() {
        "toml" => toml::from_str(raw).map_err(|e| Error::message(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::message(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(Error::from),
        "json5" => json5::from_str(raw).map_err(|e| Error::message(e.to_string())),
        other => Err(Error::message(format!("unsupported config format: {other}"))),
    };
    parsed.with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./herald.{toml,yaml,yml,json,json5}` (project-local)
/// 2. `~/.config/herald/herald.{toml,…}` (user-global)
///
/// Returns `HeraldConfig::default()` if no config file is found or the
/// found file fails to parse.
#[must_use]
pub fn discover_and_load() -> HeraldConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    HeraldConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "herald") {
        for name in CONFIG_FILENAMES {
            let p = dirs.config_dir().join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}
