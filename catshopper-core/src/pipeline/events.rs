//! Orchestrator event stream

use tokio::sync::broadcast;

use crate::types::{ContentPlan, JobProgress, Stage, StageState};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// State changes published by the orchestrator
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageChanged {
        episode: usize,
        stage: Stage,
        state: StageState,
    },
    /// Clamped job progress; `stage` is `None` for the server-side full pipeline
    JobProgress {
        episode: usize,
        stage: Option<Stage>,
        progress: JobProgress,
    },
    /// Plan snapshot after a successful stage, with scripts mirrored in
    PlanUpdated { plan: ContentPlan },
    /// Local persistence failed; in-memory state is still authoritative
    PersistenceWarning { message: String },
    BatchProgress {
        completed: usize,
        total: usize,
        percent: u8,
    },
}

impl PipelineEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            PipelineEvent::StageChanged { .. } => "stage_changed",
            PipelineEvent::JobProgress { .. } => "job_progress",
            PipelineEvent::PlanUpdated { .. } => "plan_updated",
            PipelineEvent::PersistenceWarning { .. } => "persistence_warning",
            PipelineEvent::BatchProgress { .. } => "batch_progress",
        }
    }
}

/// Broadcast channel fanning events out to every subscriber
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: PipelineEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::trace!(event = e.0.event_name(), "No subscribers for event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
