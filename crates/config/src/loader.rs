use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::schema::PigeonConfig;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["pigeon.toml", "pigeon.yaml", "pigeon.yml", "pigeon.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, discovery only looks in this
/// directory — process-local and user-global paths are skipped. Each call
/// replaces the previous override (tests rely on this).
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut slot) = CONFIG_DIR_OVERRIDE.lock() {
        *slot = Some(path);
    }
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    if let Ok(mut slot) = CONFIG_DIR_OVERRIDE.lock() {
        *slot = None;
    }
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE.lock().ok().and_then(|slot| slot.clone())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<PigeonConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./pigeon.{toml,yaml,yml,json}` (process-local)
/// 2. `~/.config/pigeon/pigeon.{toml,yaml,yml,json}` (user-global)
///
/// Returns `PigeonConfig::default()` when no file is found; a file that
/// fails to parse is logged and ignored rather than aborting startup.
pub fn discover_and_load() -> PigeonConfig {
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
    PigeonConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
        // Override is set — don't fall through to other locations.
        return None;
    }

    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dir) = home_dir().map(|h| h.join(".config").join("pigeon")) {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the config directory: override, or `~/.config/pigeon/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("pigeon"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<PigeonConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn loads_toml_from_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pigeon.toml"),
            "[service_discovery]\nzk = \"127.0.0.1:9100\"\n",
        )
        .unwrap();
        set_config_dir(dir.path().to_path_buf());
        let cfg = discover_and_load();
        clear_config_dir();
        assert_eq!(cfg.service_discovery.zk, "127.0.0.1:9100");
    }

    #[test]
    fn yaml_and_json_formats_parse() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("pigeon.yaml");
        std::fs::write(&yaml, "presence:\n  rpc_addr: 10.0.0.2:9200\n").unwrap();
        let cfg = load_config(&yaml).unwrap();
        assert_eq!(cfg.presence.rpc_addr, "10.0.0.2:9200");

        let json = dir.path().join("pigeon.json");
        std::fs::write(&json, r#"{"talk":{"rpc_addr":"10.0.0.2:9300"}}"#).unwrap();
        let cfg = load_config(&json).unwrap();
        assert_eq!(cfg.talk.rpc_addr, "10.0.0.2:9300");
    }

    #[test]
    #[serial]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pigeon.toml"), "not = [valid").unwrap();
        set_config_dir(dir.path().to_path_buf());
        let cfg = discover_and_load();
        clear_config_dir();
        assert_eq!(cfg.auth.jwt.secret, "dev-secret");
    }
}
