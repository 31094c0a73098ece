//! Engine settings stored in the shared `settings` table

use nightrate_common::db::settings::{get_setting, set_setting};
use nightrate_common::Result;
use sqlx::{Pool, Sqlite};

/// Key of the LLM API key (highest-priority source)
pub const LLM_API_KEY: &str = "llm_api_key";

pub async fn get_llm_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, LLM_API_KEY).await
}

pub async fn set_llm_api_key(db: &Pool<Sqlite>, key: &str) -> Result<()> {
    set_setting(db, LLM_API_KEY, key).await
}
