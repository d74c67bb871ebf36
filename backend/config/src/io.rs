//! Config file read/write with atomic backup rotation.

use crate::schema::AfkWardenConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Number of rolling backups to keep.
const MAX_BACKUPS: usize = 5;

/// Resolve the config directory.
/// Priority: `AFKWARDEN_CONFIG_DIR` env > `~/.afkwarden/`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AFKWARDEN_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".afkwarden"),
        None => PathBuf::from(".afkwarden"),
    }
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Resolve a possibly relative path (database, log dir) against the config directory.
pub fn resolve_relative(config_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_dir.join(path)
    }
}

/// Load the raw YAML tree. A missing file yields an empty mapping (first run).
pub async fn load_raw(path: &Path) -> Result<serde_json::Value> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(serde_json::Value::Object(Default::default()));
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let value: serde_json::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    // An empty file parses as null.
    Ok(match value {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    })
}

/// Write config to disk atomically (write to temp file, rename).
///
/// Creates a rolling backup of the previous config before overwriting.
pub async fn write_config(config: &AfkWardenConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    if path.exists() {
        rotate_backups(path).await;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "Wrote config");
    Ok(())
}

/// config.yaml.bak.1 → .bak.2 → ... → .bak.N, then copy the live file to .bak.1
async fn rotate_backups(path: &Path) {
    for i in (1..MAX_BACKUPS).rev() {
        let old = path.with_extension(format!("yaml.bak.{i}"));
        let new = path.with_extension(format!("yaml.bak.{}", i + 1));
        if old.exists() {
            if let Err(e) = fs::rename(&old, &new).await {
                warn!("Failed to rotate backup {}: {}", old.display(), e);
            }
        }
    }

    let bak = path.with_extension("yaml.bak.1");
    if let Err(e) = fs::copy(path, &bak).await {
        warn!("Failed to create backup {}: {}", bak.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::starter_config;

    #[tokio::test]
    async fn missing_file_is_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let value = load_raw(&dir.path().join("config.yaml")).await.unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[tokio::test]
    async fn write_then_load_keeps_token_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        write_config(&starter_config(), &path).await.unwrap();

        let value = load_raw(&path).await.unwrap();
        assert_eq!(value["discord"]["botToken"], "${DISCORD_TOKEN}");
        assert_eq!(value["watchdog"]["challengeIntervalMinutes"], 30);
    }

    #[tokio::test]
    async fn second_write_leaves_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        write_config(&starter_config(), &path).await.unwrap();
        write_config(&starter_config(), &path).await.unwrap();
        assert!(path.with_extension("yaml.bak.1").exists());
        assert!(!path.with_extension("yaml.tmp").exists());
    }

    #[test]
    fn relative_paths_resolve_under_config_dir() {
        let base = Path::new("/etc/afkwarden");
        assert_eq!(
            resolve_relative(base, "afkwarden.db"),
            PathBuf::from("/etc/afkwarden/afkwarden.db")
        );
        assert_eq!(resolve_relative(base, "/data/xp.db"), PathBuf::from("/data/xp.db"));
    }
}
