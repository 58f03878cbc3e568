//! Terminal rendering of orchestrator events

use std::collections::HashMap;

use catshopper_core::{PipelineEvent, Stage, StageState};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

fn job_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:<24} [{bar:30.cyan/blue}] {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn batch_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<24} [{bar:30.green/white}] {pos}/{len} episodes")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Live progress bars for running jobs and batches
pub struct ProgressView {
    multi: MultiProgress,
    jobs: HashMap<(usize, Option<Stage>), ProgressBar>,
    batch: Option<ProgressBar>,
}

impl ProgressView {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            jobs: HashMap::new(),
            batch: None,
        }
    }

    pub fn handle(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageChanged {
                episode,
                stage,
                state,
            } => self.stage_changed(episode, stage, state),
            PipelineEvent::JobProgress {
                episode,
                stage,
                progress,
            } => {
                let bar = self.job_bar(episode, stage);
                bar.set_position(progress.percent as u64);
            }
            PipelineEvent::PersistenceWarning { message } => {
                let _ = self.multi.println(format!("warning: {}", message));
            }
            PipelineEvent::BatchProgress {
                completed, total, ..
            } => {
                let bar = self.batch.get_or_insert_with(|| {
                    let bar = self.multi.add(ProgressBar::new(total as u64));
                    bar.set_style(batch_style());
                    bar.set_prefix("All episodes");
                    bar
                });
                bar.set_position(completed as u64);
            }
            PipelineEvent::PlanUpdated { .. } => {}
        }
    }

    fn stage_changed(&mut self, episode: usize, stage: Stage, state: StageState) {
        let line = match &state {
            StageState::Running => format!("… episode {} {}", episode, stage.display_name()),
            StageState::Done => format!("✓ episode {} {}", episode, stage.display_name()),
            StageState::Error(msg) => {
                format!("✗ episode {} {}: {}", episode, stage.display_name(), msg)
            }
            StageState::Idle => return,
        };
        let _ = self.multi.println(line);

        if !state.is_running() {
            if let Some(bar) = self.jobs.remove(&(episode, Some(stage))) {
                bar.finish_and_clear();
            }
        }
    }

    fn job_bar(&mut self, episode: usize, stage: Option<Stage>) -> &ProgressBar {
        let multi = &self.multi;
        self.jobs.entry((episode, stage)).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(job_style());
            bar.set_prefix(format!(
                "episode {} {}",
                episode,
                stage.map(|s| s.display_name()).unwrap_or("pipeline")
            ));
            bar
        })
    }

    pub fn finish(self) {
        for bar in self.jobs.into_values() {
            bar.finish_and_clear();
        }
        if let Some(bar) = self.batch {
            bar.finish_and_clear();
        }
    }
}

/// Render events until the orchestrator's channel closes
pub fn spawn(mut rx: broadcast::Receiver<PipelineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut view = ProgressView::new();
        loop {
            match rx.recv().await {
                Ok(event) => view.handle(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress view lagged behind events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        view.finish();
    })
}
