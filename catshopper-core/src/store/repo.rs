//! SQLite-backed key-value store
//!
//! Records are full JSON (or raw text) values under string keys, so every
//! write is a whole-record overwrite and the last writer wins.

use crate::error::{Error, Result};
use crate::types::ContentPlan;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{keys, PlanStore, PreferenceStore, ScriptStore, PLAN_KEY_PREFIX};

/// Store handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this store
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        super::schema::apply_pending(&conn)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Raw record operations
    // ============================================

    /// Insert or overwrite a record
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO records (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Get a record by key
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row("SELECT value FROM records WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(Error::from)
    }

    /// Remove a record; returns whether it existed
    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM records WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    /// All records whose key starts with `prefix`, ordered by key
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM records WHERE substr(key, 1, ?1) = ?2 ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![prefix.chars().count() as i64, prefix], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(rows)
    }
}

impl PlanStore for Database {
    fn save_plan(&self, plan: &ContentPlan) -> Result<()> {
        let id = plan.id.as_deref().ok_or_else(|| {
            Error::Validation("content plan must have an id before it is saved".to_string())
        })?;
        let value = serde_json::to_string(plan)
            .map_err(|e| Error::Persistence(format!("failed to serialize plan {}: {}", id, e)))?;
        self.put(&keys::plan(id), &value)
    }

    fn load_plan(&self, id: &str) -> Result<Option<ContentPlan>> {
        match self.get(&keys::plan(id))? {
            Some(value) => {
                let mut plan: ContentPlan = serde_json::from_str(&value)?;
                plan.id = Some(id.to_string());
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }

    fn load_all_plans(&self) -> Result<Vec<ContentPlan>> {
        let mut plans: Vec<ContentPlan> = self
            .scan_prefix(PLAN_KEY_PREFIX)?
            .into_iter()
            .filter_map(|(key, value)| {
                match serde_json::from_str::<ContentPlan>(&value) {
                    Ok(mut plan) => {
                        // The key is the identity; a stale embedded id loses.
                        plan.id = Some(key[PLAN_KEY_PREFIX.len()..].to_string());
                        Some(plan)
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Skipping unparsable plan record");
                        None
                    }
                }
            })
            .collect();

        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    fn delete_plan(&self, id: &str) -> Result<bool> {
        self.remove(&keys::plan(id))
    }
}

impl ScriptStore for Database {
    fn save_script(&self, plan_id: &str, episode: usize, text: &str) -> Result<()> {
        self.put(&keys::script(plan_id, episode), text)
    }

    fn load_script(&self, plan_id: &str, episode: usize) -> Result<Option<String>> {
        self.get(&keys::script(plan_id, episode))
    }
}

impl PreferenceStore for Database {
    fn get_preference(&self, key: &str) -> Result<Option<String>> {
        self.get(key)
    }

    fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Episode;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn plan(id: &str, days_ago: i64) -> ContentPlan {
        ContentPlan {
            id: Some(id.to_string()),
            series_concept: format!("Series {}", id),
            cat_name: "Whiskers".to_string(),
            content_style: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
                - Duration::days(days_ago),
            cat_personality: Default::default(),
            episodes: vec![Episode {
                title: "Pilot".to_string(),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_put_overwrites() {
        let db = test_db();
        db.put("k", "one").unwrap();
        db.put("k", "two").unwrap();
        assert_eq!(db.get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_scan_prefix_is_literal() {
        let db = test_db();
        db.put("content-plan-a", "{}").unwrap();
        db.put("content-plan_b", "{}").unwrap();
        db.put("script-a-episode-0", "x").unwrap();

        let keys: Vec<String> = db
            .scan_prefix("content-plan-")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["content-plan-a".to_string()]);
    }

    #[test]
    fn test_load_all_plans_sorted_newest_first() {
        let db = test_db();
        db.save_plan(&plan("old", 10)).unwrap();
        db.save_plan(&plan("new", 0)).unwrap();
        db.save_plan(&plan("mid", 5)).unwrap();

        let ids: Vec<String> = db
            .load_all_plans()
            .unwrap()
            .into_iter()
            .filter_map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_load_all_plans_skips_corrupt_records() {
        let db = test_db();
        db.save_plan(&plan("good", 0)).unwrap();
        db.put("content-plan-broken", "{not json").unwrap();

        let plans = db.load_all_plans().unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].id.as_deref(), Some("good"));
    }

    #[test]
    fn test_save_plan_requires_id() {
        let db = test_db();
        let mut unsaved = plan("x", 0);
        unsaved.id = None;
        assert!(matches!(
            db.save_plan(&unsaved),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_delete_plan_leaves_scripts() {
        let db = test_db();
        db.save_plan(&plan("p1", 0)).unwrap();
        db.save_script("p1", 0, "FADE IN").unwrap();

        assert!(db.delete_plan("p1").unwrap());
        assert!(!db.delete_plan("p1").unwrap());
        assert!(db.load_plan("p1").unwrap().is_none());
        assert_eq!(db.load_script("p1", 0).unwrap().as_deref(), Some("FADE IN"));
    }
}
