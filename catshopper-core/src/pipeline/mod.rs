//! Per-episode generation pipeline
//!
//! The [`Orchestrator`] owns one loaded plan and drives each episode through
//! six stages:
//!
//! ```text
//! script ──┬── visual prompts ── images ──┐
//!          ├── voiceovers ────────────────┴── video
//!          └── social media
//! ```
//!
//! A stage may start once every prerequisite holds an artifact and is not
//! itself running. Successful stages persist the plan and its scripts and
//! publish a [`PipelineEvent::PlanUpdated`] snapshot. Persistence failures
//! never fail a stage; they are logged and published as
//! [`PipelineEvent::PersistenceWarning`].
//!
//! [`PlanLibrary`] manages saved plans outside of a generation run.

pub mod events;
pub mod library;
pub mod orchestrator;

pub use events::{EventBus, PipelineEvent};
pub use library::{ImportSummary, PlanLibrary};
pub use orchestrator::{
    BatchSummary, ConnectionState, EpisodeArtifacts, EpisodeReport, Orchestrator, StageOutcome,
};

use std::sync::Arc;

use crate::store::{Database, PlanStore, ScriptStore};

/// Store handles injected into the orchestrator
#[derive(Clone)]
pub struct Stores {
    pub plans: Arc<dyn PlanStore>,
    pub scripts: Arc<dyn ScriptStore>,
}

impl Stores {
    /// Back both stores with one database
    pub fn from_database(db: Arc<Database>) -> Self {
        Self {
            plans: db.clone(),
            scripts: db,
        }
    }
}
