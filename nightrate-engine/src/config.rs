//! Configuration resolution for nightrate-engine
//!
//! The LLM API key is resolved with Database → ENV → TOML priority. A missing
//! key is not fatal: runs simply skip the LLM stage.

use nightrate_common::config::TomlConfig;
use nightrate_common::Result;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

/// Environment variable holding the LLM API key
pub const LLM_API_KEY_ENV: &str = "NIGHTRATE_LLM_API_KEY";

/// Resolve the LLM API key from the three configuration tiers
///
/// Returns `Ok(None)` when no tier holds a usable key.
pub async fn resolve_llm_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    let db_key = crate::db::settings::get_llm_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(LLM_API_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .llm
        .api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        ("database", db_key.is_some()),
        ("environment", env_key.is_some()),
        ("TOML", toml_key.is_some()),
    ]
    .iter()
    .filter(|(_, present)| *present)
    .map(|(name, _)| *name)
    .collect();

    if sources.len() > 1 {
        warn!(
            "LLM API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("LLM API key loaded from database");
        return Ok(Some(key));
    }
    if let Some(key) = env_key {
        info!("LLM API key loaded from environment variable");
        return Ok(Some(key));
    }
    if let Some(key) = toml_key {
        info!("LLM API key loaded from TOML config");
        return Ok(Some(key));
    }

    warn!(
        "LLM API key not configured; calendars will be generated without market adjustment. \
         Set it in the settings table, {} or the [llm] section of nightrate.toml",
        LLM_API_KEY_ENV
    );
    Ok(None)
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
