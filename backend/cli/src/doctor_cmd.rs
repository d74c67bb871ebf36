//! CLI Doctor Command
//!
//! Checks that `serve` has what it needs: a readable config, the env vars it
//! references, a bot token and a writable progression database.

use std::path::Path;

use anyhow::Result;

use afkwarden_config::{
    apply_all_defaults, collect_referenced_vars, config_file_path, load_raw, resolve_env_vars,
    validate, AfkWardenConfig,
};
use afkwarden_progression::SqliteProgressionStore;

use crate::terminal_output::{note_error, note_success, note_warn};

pub async fn run(dir: &Path) -> Result<()> {
    println!("\nRunning afkwarden doctor...\n");

    let path = config_file_path(dir);
    if !path.exists() {
        note_warn(&format!(
            "{} not found; run `afkwarden init-config`",
            path.display()
        ));
    }

    let raw = match load_raw(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            note_error(&format!("{e:#}"));
            return Ok(());
        }
    };

    let mut ok = check_env_vars(&raw);

    let config = match resolve_env_vars(&raw)
        .and_then(|v| Ok(serde_json::from_value::<AfkWardenConfig>(v)?))
    {
        Ok(config) => apply_all_defaults(config),
        Err(e) => {
            note_error(&format!("config could not be read: {e:#}"));
            return Ok(());
        }
    };

    let report = validate(&config);
    for warning in &report.warnings {
        note_warn(&warning.to_string());
    }
    for error in &report.errors {
        note_error(&error.to_string());
        ok = false;
    }
    if config.bot_token().is_some() {
        note_success("Bot token is set");
    } else {
        ok = false;
    }

    ok &= check_database(&config, dir);

    println!();
    if ok {
        note_success("All checks passed");
    } else {
        note_error("Some checks failed; fix the errors above");
    }
    Ok(())
}

fn check_env_vars(raw: &serde_json::Value) -> bool {
    let mut all_set = true;
    for var in collect_referenced_vars(raw) {
        match std::env::var(&var) {
            Ok(val) if !val.is_empty() => note_success(&format!("{var} is set")),
            _ => {
                note_error(&format!("{var} is referenced by the config but not set"));
                all_set = false;
            }
        }
    }
    all_set
}

fn check_database(config: &AfkWardenConfig, dir: &Path) -> bool {
    let path = crate::db_path(config, dir);
    match SqliteProgressionStore::open(&path.to_string_lossy()) {
        Ok(_) => {
            note_success(&format!("Progression database {} is usable", path.display()));
            true
        }
        Err(e) => {
            note_error(&format!("Progression database {}: {e:#}", path.display()));
            false
        }
    }
}
