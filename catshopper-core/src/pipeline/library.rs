//! Saved content plans

use std::sync::Arc;

use crate::api::{ApiClient, Credentials, GenerationApi};
use crate::error::{Error, Result};
use crate::store::PlanStore;
use crate::types::{ContentPlan, PlanRequest};

/// Counts from a remote import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Plans already present locally
    pub skipped: usize,
}

/// The user's locally saved plans
pub struct PlanLibrary {
    plans: Arc<dyn PlanStore>,
}

impl PlanLibrary {
    pub fn new(plans: Arc<dyn PlanStore>) -> Self {
        Self { plans }
    }

    /// Save a plan, assigning an id first if it has none
    pub fn save(&self, plan: &mut ContentPlan) -> Result<String> {
        let id = plan.ensure_id().to_string();
        self.plans.save_plan(plan)?;
        tracing::debug!(plan_id = %id, "Saved content plan");
        Ok(id)
    }

    /// Generate a new plan on the backend and save it locally
    pub async fn generate(
        &self,
        api: &dyn GenerationApi,
        request: &PlanRequest,
        credentials: Option<&Credentials>,
    ) -> Result<ContentPlan> {
        let mut plan = api.generate_plan(request, credentials).await?;
        let id = self.save(&mut plan)?;
        tracing::info!(
            plan_id = %id,
            episodes = plan.episodes.len(),
            "Generated content plan"
        );
        Ok(plan)
    }

    /// All saved plans, newest first
    pub fn list(&self) -> Result<Vec<ContentPlan>> {
        self.plans.load_all_plans()
    }

    pub fn get(&self, id: &str) -> Result<ContentPlan> {
        self.plans
            .load_plan(id)?
            .ok_or_else(|| Error::PlanNotFound(id.to_string()))
    }

    /// Delete a saved plan. Its scripts are left in the store.
    pub fn delete(&self, id: &str) -> Result<()> {
        if self.plans.delete_plan(id)? {
            tracing::info!(plan_id = %id, "Deleted content plan");
            Ok(())
        } else {
            Err(Error::PlanNotFound(id.to_string()))
        }
    }

    /// Copy the backend's saved plans into the local store.
    ///
    /// A plan that already exists locally is left untouched.
    pub async fn import_remote(&self, client: &ApiClient) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        for mut plan in client.list_remote_plans().await? {
            if let Some(id) = plan.id.as_deref() {
                if self.plans.load_plan(id)?.is_some() {
                    summary.skipped += 1;
                    continue;
                }
            }
            self.save(&mut plan)?;
            summary.imported += 1;
        }

        tracing::info!(
            imported = summary.imported,
            skipped = summary.skipped,
            "Imported remote plans"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::types::Episode;

    fn library() -> PlanLibrary {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        PlanLibrary::new(Arc::new(db))
    }

    fn unsaved_plan() -> ContentPlan {
        serde_json::from_value(serde_json::json!({
            "series_concept": "Whiskers raids the mall",
            "episodes": [{"title": "Pet Store Heist"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_save_assigns_id_once() {
        let library = library();
        let mut plan = unsaved_plan();

        let id = library.save(&mut plan).unwrap();
        assert_eq!(plan.id.as_deref(), Some(id.as_str()));
        assert_eq!(library.save(&mut plan).unwrap(), id);
        assert_eq!(library.list().unwrap().len(), 1);
    }

    #[test]
    fn test_get_and_delete_missing_plan() {
        let library = library();
        assert!(matches!(library.get("nope"), Err(Error::PlanNotFound(_))));
        assert!(matches!(library.delete("nope"), Err(Error::PlanNotFound(_))));
    }

    #[test]
    fn test_get_returns_saved_plan() {
        let library = library();
        let mut plan = unsaved_plan();
        plan.episodes.push(Episode {
            title: "Bakery Blitz".to_string(),
            ..Default::default()
        });
        let id = library.save(&mut plan).unwrap();

        let loaded = library.get(&id).unwrap();
        assert_eq!(loaded, plan);
    }
}
