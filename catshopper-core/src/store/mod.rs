//! Local persistence for plans, scripts and provider preferences
//!
//! Storage is reached only through the [`PlanStore`], [`ScriptStore`] and
//! [`PreferenceStore`] traits; the orchestrator and API client receive them
//! as injected handles. [`Database`] implements all three on top of a SQLite
//! key-value table.
//!
//! Key layout:
//!
//! | Record | Key |
//! |--------|-----|
//! | Plan | `content-plan-{id}` |
//! | Script | `script-{planId}-episode-{index}` |
//! | Provider preference | `api_provider` |
//! | API key | `openai_api_key`, `huggingface_api_key` |
//!
//! Deleting a plan removes only its plan record. Script records for that plan
//! stay behind and remain loadable.

pub mod repo;
pub mod schema;

pub use repo::Database;

use crate::error::Result;
use crate::types::ContentPlan;

/// Key prefix shared by all plan records
pub const PLAN_KEY_PREFIX: &str = "content-plan-";

/// Preference key holding the selected provider
pub const PROVIDER_PREFERENCE: &str = "api_provider";

pub mod keys {
    use super::PLAN_KEY_PREFIX;

    pub fn plan(id: &str) -> String {
        format!("{}{}", PLAN_KEY_PREFIX, id)
    }

    pub fn script(plan_id: &str, episode: usize) -> String {
        format!("script-{}-episode-{}", plan_id, episode)
    }
}

/// Persistence of whole content plans
pub trait PlanStore: Send + Sync {
    /// Store a plan under its id, replacing any previous record
    fn save_plan(&self, plan: &ContentPlan) -> Result<()>;

    fn load_plan(&self, id: &str) -> Result<Option<ContentPlan>>;

    /// All parsable plans, newest `created_at` first
    fn load_all_plans(&self) -> Result<Vec<ContentPlan>>;

    /// Remove a plan record; returns whether it existed
    fn delete_plan(&self, id: &str) -> Result<bool>;
}

/// Persistence of per-episode scripts
pub trait ScriptStore: Send + Sync {
    fn save_script(&self, plan_id: &str, episode: usize, text: &str) -> Result<()>;

    fn load_script(&self, plan_id: &str, episode: usize) -> Result<Option<String>>;
}

/// Persistence of global provider and key preferences
pub trait PreferenceStore: Send + Sync {
    fn get_preference(&self, key: &str) -> Result<Option<String>>;

    fn set_preference(&self, key: &str, value: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::plan("abc"), "content-plan-abc");
        assert_eq!(keys::script("abc", 2), "script-abc-episode-2");
    }
}
