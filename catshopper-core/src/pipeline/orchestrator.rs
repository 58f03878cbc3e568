//! Per-episode generation state machine

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::api::{Credentials, GenerationApi};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::jobs::JobPoller;
use crate::types::{
    ContentPlan, Episode, JobOutcome, JobTicket, SocialMediaPlan, Stage, StageState, VideoResult,
    VisualPrompts,
};

use super::events::{EventBus, PipelineEvent};
use super::Stores;

/// Whether the backend was reachable at the last probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not probed yet; generation is allowed
    #[default]
    Unknown,
    Operational,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Operational => "operational",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Artifacts produced so far for one episode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeArtifacts {
    pub script: Option<String>,
    pub visual_prompts: Option<VisualPrompts>,
    pub images: Option<JobOutcome>,
    pub voiceovers: Option<JobOutcome>,
    pub video: Option<VideoResult>,
    pub social_media: Option<SocialMediaPlan>,
}

impl EpisodeArtifacts {
    fn store(&mut self, artifact: Artifact) {
        match artifact {
            Artifact::Script(text) => self.script = Some(text),
            Artifact::VisualPrompts(prompts) => self.visual_prompts = Some(prompts),
            Artifact::Images(outcome) => self.images = Some(outcome),
            Artifact::Voiceovers(outcome) => self.voiceovers = Some(outcome),
            Artifact::Video(video) => self.video = Some(video),
            Artifact::SocialMedia(plan) => self.social_media = Some(plan),
        }
    }
}

/// Result of one successful stage run
enum Artifact {
    Script(String),
    VisualPrompts(VisualPrompts),
    Images(JobOutcome),
    Voiceovers(JobOutcome),
    Video(VideoResult),
    SocialMedia(SocialMediaPlan),
}

/// How one stage ended inside `generate_all_stages`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed(String),
    /// Not attempted because a prerequisite is not done
    Skipped { missing: Stage },
}

/// Per-stage outcomes for one episode, in run order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeReport {
    pub episode: usize,
    pub outcomes: Vec<(Stage, StageOutcome)>,
}

impl EpisodeReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::Completed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::Skipped { .. }))
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, o)| o)
    }

    fn count(&self, pred: impl Fn(&StageOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Aggregate of a whole-plan batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total_episodes: usize,
    /// Stages that completed
    pub success_count: usize,
    /// Stages that failed or were skipped
    pub failure_count: usize,
    pub reports: Vec<EpisodeReport>,
}

#[derive(Debug, Default)]
struct EpisodeState {
    stages: [StageState; 6],
    artifacts: EpisodeArtifacts,
    /// A server-side full pipeline job is running for this episode
    pipeline_running: bool,
}

impl EpisodeState {
    fn stage(&self, stage: Stage) -> &StageState {
        &self.stages[stage_slot(stage)]
    }

    fn set(&mut self, stage: Stage, state: StageState) {
        self.stages[stage_slot(stage)] = state;
    }

    fn first_missing(&self, stage: Stage) -> Option<Stage> {
        stage
            .prerequisites()
            .iter()
            .copied()
            .find(|prereq| *self.stage(*prereq) != StageState::Done)
    }

    fn running_stage(&self) -> Option<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| self.stage(*stage).is_running())
    }
}

fn stage_slot(stage: Stage) -> usize {
    match stage {
        Stage::Script => 0,
        Stage::VisualPrompts => 1,
        Stage::Images => 2,
        Stage::Voiceovers => 3,
        Stage::Video => 4,
        Stage::SocialMedia => 5,
    }
}

struct PipelineState {
    plan: ContentPlan,
    episodes: Vec<EpisodeState>,
}

/// Inputs copied out of the locked state for one stage run
struct StageInput {
    episode: Episode,
    cat_name: String,
    content_style: String,
}

/// Drives the per-episode generation pipeline for one loaded plan.
///
/// All methods take `&self`. Per-stage state lives behind a mutex that is
/// never held across an await, so a second call for a stage that is already
/// running fails with [`Error::AlreadyInProgress`].
pub struct Orchestrator {
    api: Arc<dyn GenerationApi>,
    stores: Stores,
    poller: JobPoller,
    events: EventBus,
    inter_episode_delay: Duration,
    state: Mutex<PipelineState>,
    credentials: Mutex<Option<Credentials>>,
    connection: Mutex<ConnectionState>,
}

impl Orchestrator {
    /// Build orchestrator state for `plan`.
    ///
    /// A script found in the script store wins over the plan's embedded copy.
    /// Episodes with a script start with `script` done; every other stage
    /// starts idle.
    pub fn load(
        mut plan: ContentPlan,
        api: Arc<dyn GenerationApi>,
        stores: Stores,
        config: &PipelineConfig,
    ) -> Self {
        let storage_id = plan.storage_id().to_string();

        let episodes = plan
            .episodes
            .iter_mut()
            .enumerate()
            .map(|(index, episode)| {
                let saved = match stores.scripts.load_script(&storage_id, index) {
                    Ok(saved) => saved,
                    Err(e) => {
                        tracing::warn!(episode = index, error = %e, "Failed to load saved script");
                        None
                    }
                };

                let mut state = EpisodeState::default();
                if let Some(script) = saved.or_else(|| episode.script.clone()) {
                    episode.script = Some(script.clone());
                    state.artifacts.script = Some(script);
                    state.set(Stage::Script, StageState::Done);
                }
                state
            })
            .collect::<Vec<_>>();

        tracing::info!(
            plan_id = %storage_id,
            episodes = episodes.len(),
            scripted = plan.scripted_count(),
            "Loaded content plan"
        );

        Self {
            poller: JobPoller::new(Arc::clone(&api), config),
            api,
            stores,
            events: EventBus::new(),
            inter_episode_delay: config.inter_episode_delay(),
            state: Mutex::new(PipelineState { plan, episodes }),
            credentials: Mutex::new(None),
            connection: Mutex::new(ConnectionState::Unknown),
        }
    }

    /// Cancel in-flight job polls when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.poller = self.poller.with_shutdown(token);
        self
    }

    // ============================================
    // Accessors
    // ============================================

    /// Current plan with each episode's script mirrored from stage state
    pub fn snapshot(&self) -> ContentPlan {
        self.state().plan.clone()
    }

    pub fn episode_count(&self) -> usize {
        self.state().episodes.len()
    }

    pub fn stage_state(&self, episode: usize, stage: Stage) -> Option<StageState> {
        self.state()
            .episodes
            .get(episode)
            .map(|e| e.stage(stage).clone())
    }

    /// All six stage states of an episode, in pipeline order
    pub fn stage_states(&self, episode: usize) -> Option<Vec<(Stage, StageState)>> {
        self.state().episodes.get(episode).map(|e| {
            Stage::ALL
                .iter()
                .map(|s| (*s, e.stage(*s).clone()))
                .collect()
        })
    }

    pub fn artifacts(&self, episode: usize) -> Option<EpisodeArtifacts> {
        self.state()
            .episodes
            .get(episode)
            .map(|e| e.artifacts.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.connection)
    }

    /// Credentials sent with credentialed requests; `None` falls back to the
    /// stored preference
    pub fn set_credentials(&self, credentials: Option<Credentials>) -> Result<()> {
        if let Some(creds) = &credentials {
            creds.validate()?;
        }
        *lock(&self.credentials) = credentials;
        Ok(())
    }

    /// Probe the backend and record the result
    pub async fn probe_connection(&self) -> ConnectionState {
        let state = if self.api.check_status().await {
            ConnectionState::Operational
        } else {
            ConnectionState::Disconnected
        };
        *lock(&self.connection) = state;
        tracing::info!(connection = %state, "Probed backend");
        state
    }

    // ============================================
    // Generation
    // ============================================

    /// Run one stage for one episode.
    ///
    /// On success the artifact replaces any previous one and the stage is
    /// done. On failure the stage records the error and keeps its previous
    /// artifact.
    pub async fn generate_stage(&self, episode: usize, stage: Stage) -> Result<()> {
        let input = self.begin(episode, stage)?;
        let mut guard = InFlight {
            orchestrator: self,
            episode,
            stage,
            armed: true,
        };

        let result = self.run_stage(episode, stage, input).await;
        guard.armed = false;

        match result {
            Ok(artifact) => {
                self.finish(episode, stage, artifact);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(episode, stage = %stage, error = %e, "Stage failed");
                self.transition(episode, stage, StageState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Run every stage of one episode in pipeline order.
    ///
    /// A stage is skipped when a prerequisite failed or was skipped earlier
    /// in this run, or is otherwise not done; stages on independent branches
    /// still run.
    pub async fn generate_all_stages(&self, episode: usize) -> Result<EpisodeReport> {
        if episode >= self.episode_count() {
            return Err(Error::EpisodeNotFound(episode));
        }

        let mut outcomes: Vec<(Stage, StageOutcome)> = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let unavailable = stage.prerequisites().iter().copied().find(|prereq| {
                outcomes
                    .iter()
                    .any(|(s, o)| s == prereq && *o != StageOutcome::Completed)
            });
            let missing = unavailable.or_else(|| {
                let state = self.state();
                state.episodes[episode].first_missing(stage)
            });

            let outcome = match missing {
                Some(missing) => {
                    tracing::info!(episode, stage = %stage, missing = %missing, "Skipping stage");
                    StageOutcome::Skipped { missing }
                }
                None => match self.generate_stage(episode, stage).await {
                    Ok(()) => StageOutcome::Completed,
                    Err(e) => StageOutcome::Failed(e.to_string()),
                },
            };
            outcomes.push((stage, outcome));
        }

        Ok(EpisodeReport { episode, outcomes })
    }

    /// Run every episode in index order with a pause between episodes.
    ///
    /// A failing episode never aborts the batch.
    pub async fn generate_all_episodes(&self) -> BatchSummary {
        let total = self.episode_count();
        let mut summary = BatchSummary {
            total_episodes: total,
            ..Default::default()
        };

        for episode in 0..total {
            if episode > 0 && !self.inter_episode_delay.is_zero() {
                tokio::time::sleep(self.inter_episode_delay).await;
            }

            match self.generate_all_stages(episode).await {
                Ok(report) => {
                    summary.success_count += report.completed();
                    summary.failure_count += report.failed() + report.skipped();
                    summary.reports.push(report);
                }
                Err(e) => {
                    tracing::warn!(episode, error = %e, "Episode could not be generated");
                    summary.failure_count += Stage::ALL.len();
                }
            }

            let completed = episode + 1;
            self.events.publish(PipelineEvent::BatchProgress {
                completed,
                total,
                percent: (completed * 100 / total) as u8,
            });
        }

        tracing::info!(
            episodes = total,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            "Batch generation finished"
        );
        summary
    }

    /// Start the server-side pipeline for one episode and wait for its job.
    ///
    /// Stage states are not touched; the backend produces the media itself.
    /// While the job runs, the episode rejects stage runs and a second
    /// pipeline with [`Error::AlreadyInProgress`].
    pub async fn run_full_pipeline(&self, episode: usize) -> Result<JobOutcome> {
        {
            let mut state = self.state();
            let ep = state
                .episodes
                .get_mut(episode)
                .ok_or(Error::EpisodeNotFound(episode))?;
            self.ensure_connected()?;
            if ep.pipeline_running {
                return Err(Error::AlreadyInProgress {
                    episode,
                    stage: None,
                });
            }
            if let Some(stage) = ep.running_stage() {
                return Err(Error::AlreadyInProgress {
                    episode,
                    stage: Some(stage),
                });
            }
            ep.pipeline_running = true;
        }
        let _run = PipelineRun {
            orchestrator: self,
            episode,
        };

        let credentials = self.credentials();
        let ticket = self
            .api
            .start_full_pipeline(episode, credentials.as_ref())
            .await?;
        tracing::info!(episode, job_id = %ticket.job_id, "Started full pipeline");
        self.track_job(episode, None, ticket).await
    }

    /// Replace an episode's script with edited text
    pub fn save_script(&self, episode: usize, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        {
            let state = self.state();
            let ep = state
                .episodes
                .get(episode)
                .ok_or(Error::EpisodeNotFound(episode))?;
            if text.trim().is_empty() {
                return Err(Error::Validation("no script to save".to_string()));
            }
            if ep.pipeline_running {
                return Err(Error::AlreadyInProgress {
                    episode,
                    stage: None,
                });
            }
            if ep.stage(Stage::Script).is_running() {
                return Err(Error::AlreadyInProgress {
                    episode,
                    stage: Some(Stage::Script),
                });
            }
        }
        self.finish(episode, Stage::Script, Artifact::Script(text));
        Ok(())
    }

    // ============================================
    // Internals
    // ============================================

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        lock(&self.state)
    }

    fn credentials(&self) -> Option<Credentials> {
        lock(&self.credentials).clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connection_state() == ConnectionState::Disconnected {
            return Err(Error::Connection(
                "backend is not operational".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and mark a stage running; no request is issued on error
    fn begin(&self, episode: usize, stage: Stage) -> Result<StageInput> {
        let input = {
            let mut state = self.state();
            let PipelineState { plan, episodes } = &mut *state;

            let ep = episodes
                .get_mut(episode)
                .ok_or(Error::EpisodeNotFound(episode))?;
            self.ensure_connected()?;
            if ep.pipeline_running {
                return Err(Error::AlreadyInProgress {
                    episode,
                    stage: None,
                });
            }
            if ep.stage(stage).is_running() {
                return Err(Error::AlreadyInProgress {
                    episode,
                    stage: Some(stage),
                });
            }
            if let Some(missing) = ep.first_missing(stage) {
                return Err(Error::DependencyNotMet {
                    episode,
                    stage,
                    missing,
                });
            }
            ep.set(stage, StageState::Running);

            StageInput {
                episode: plan.episodes[episode].clone(),
                cat_name: plan.cat_name.clone(),
                content_style: plan.style_or_default().to_string(),
            }
        };

        tracing::info!(episode, stage = %stage, "Stage started");
        self.publish_stage(episode, stage, StageState::Running);
        Ok(input)
    }

    async fn run_stage(&self, episode: usize, stage: Stage, input: StageInput) -> Result<Artifact> {
        let credentials = self.credentials();
        let creds = credentials.as_ref();

        match stage {
            Stage::Script => self
                .api
                .generate_script(&input.episode, &input.cat_name, &input.content_style, creds)
                .await
                .map(Artifact::Script),
            Stage::VisualPrompts => self
                .api
                .generate_visual_prompts(episode, creds)
                .await
                .map(Artifact::VisualPrompts),
            Stage::Images => {
                let ticket = self.api.start_images(episode, creds).await?;
                self.track_job(episode, Some(stage), ticket)
                    .await
                    .map(Artifact::Images)
            }
            Stage::Voiceovers => {
                let ticket = self.api.start_voiceovers(episode, creds).await?;
                self.track_job(episode, Some(stage), ticket)
                    .await
                    .map(Artifact::Voiceovers)
            }
            Stage::Video => self.api.generate_video(episode).await.map(Artifact::Video),
            Stage::SocialMedia => self
                .api
                .generate_social_media(episode)
                .await
                .map(Artifact::SocialMedia),
        }
    }

    /// Poll a job to completion, forwarding its progress as events
    async fn track_job(
        &self,
        episode: usize,
        stage: Option<Stage>,
        ticket: JobTicket,
    ) -> Result<JobOutcome> {
        let handle = self.poller.start(ticket.job_id);
        let mut progress = handle.progress();
        let events = self.events.clone();

        let forwarder = tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let progress = progress.borrow_and_update().clone();
                events.publish(PipelineEvent::JobProgress {
                    episode,
                    stage,
                    progress,
                });
            }
        });

        let result = handle.wait().await;
        if let Err(e) = forwarder.await {
            tracing::debug!(error = %e, "Progress forwarder ended abnormally");
        }
        result
    }

    /// Store a successful artifact, persist and publish
    fn finish(&self, episode: usize, stage: Stage, artifact: Artifact) {
        let (plan, script) = {
            let mut state = self.state();
            let PipelineState { plan, episodes } = &mut *state;

            let script = match &artifact {
                Artifact::Script(text) => {
                    plan.episodes[episode].script = Some(text.clone());
                    Some(text.clone())
                }
                _ => None,
            };
            let ep = &mut episodes[episode];
            ep.artifacts.store(artifact);
            ep.set(stage, StageState::Done);
            (plan.clone(), script)
        };

        tracing::info!(episode, stage = %stage, "Stage done");
        self.persist(&plan, episode, script.as_deref());
        self.publish_stage(episode, stage, StageState::Done);
        self.events.publish(PipelineEvent::PlanUpdated { plan });
    }

    fn persist(&self, plan: &ContentPlan, episode: usize, script: Option<&str>) {
        if let Some(text) = script {
            if let Err(e) = self
                .stores
                .scripts
                .save_script(plan.storage_id(), episode, text)
            {
                self.persistence_warning(format!(
                    "failed to save script for episode {}: {}",
                    episode, e
                ));
            }
        }

        if plan.is_saved() {
            if let Err(e) = self.stores.plans.save_plan(plan) {
                self.persistence_warning(format!(
                    "failed to save plan {}: {}",
                    plan.storage_id(),
                    e
                ));
            }
        }
    }

    fn persistence_warning(&self, message: String) {
        tracing::warn!(message = %message, "Local persistence failed");
        self.events
            .publish(PipelineEvent::PersistenceWarning { message });
    }

    fn transition(&self, episode: usize, stage: Stage, to: StageState) {
        {
            let mut state = self.state();
            if let Some(ep) = state.episodes.get_mut(episode) {
                ep.set(stage, to.clone());
            }
        }
        self.publish_stage(episode, stage, to);
    }

    fn publish_stage(&self, episode: usize, stage: Stage, state: StageState) {
        self.events.publish(PipelineEvent::StageChanged {
            episode,
            stage,
            state,
        });
    }
}

/// Marks a running stage as failed if its future is dropped mid-flight
struct InFlight<'a> {
    orchestrator: &'a Orchestrator,
    episode: usize,
    stage: Stage,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.orchestrator.transition(
                self.episode,
                self.stage,
                StageState::Error("cancelled".to_string()),
            );
        }
    }
}

/// Clears an episode's full pipeline flag however the run ends
struct PipelineRun<'a> {
    orchestrator: &'a Orchestrator,
    episode: usize,
}

impl Drop for PipelineRun<'_> {
    fn drop(&mut self) {
        if let Some(ep) = self.orchestrator.state().episodes.get_mut(self.episode) {
            ep.pipeline_running = false;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
