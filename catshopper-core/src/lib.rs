//! # catshopper-core
//!
//! Core library for catshopper - the client for the "Mischievous Cat Shopper"
//! content-generation backend.
//!
//! This library provides:
//! - Domain types for content plans, episodes, stages and jobs
//! - An HTTP client for the generation backend
//! - Local storage of plans, scripts and provider preferences with SQLite
//! - A job poller for long-running backend jobs
//! - The per-episode generation orchestrator
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Control flows through three layers:
//! - **Client:** [`ApiClient`] talks to the backend; every failure becomes
//!   [`Error::RequestFailed`]
//! - **Store:** [`Database`] keeps plans and scripts locally and is the source
//!   of truth when the backend's own storage is unreliable
//! - **Pipeline:** [`Orchestrator`] runs stages in dependency order, tracks
//!   their state and publishes [`PipelineEvent`]s
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catshopper_core::{ApiClient, Config, Database, Orchestrator, PlanLibrary, Stage, Stores};
//!
//! # async fn run() -> catshopper_core::Result<()> {
//! let config = Config::load()?;
//! let db = Arc::new(Database::open(&Config::store_path())?);
//! db.migrate()?;
//!
//! let client = Arc::new(ApiClient::new(&config.api, db.clone())?);
//! let plan = PlanLibrary::new(db.clone()).get("my-plan-id")?;
//!
//! let orchestrator = Orchestrator::load(plan, client, Stores::from_database(db), &config.pipeline);
//! orchestrator.generate_stage(0, Stage::Script).await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use api::{ApiClient, Credentials, GenerationApi};
pub use config::Config;
pub use error::{Error, Result};
pub use jobs::{JobPoller, PollHandle};
pub use pipeline::{
    BatchSummary, ConnectionState, EpisodeReport, Orchestrator, PipelineEvent, PlanLibrary,
    StageOutcome, Stores,
};
pub use store::Database;
pub use types::*;

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod types;
