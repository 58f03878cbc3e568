//! Fixed-interval job poller

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::GenerationApi;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::types::{JobOutcome, JobProgress, JobState, JobStatus};

/// Spawns polling tasks for backend jobs
#[derive(Clone)]
pub struct JobPoller {
    api: Arc<dyn GenerationApi>,
    interval: Duration,
    max_duration: Duration,
    max_errors: u32,
    shutdown: CancellationToken,
}

impl JobPoller {
    pub fn new(api: Arc<dyn GenerationApi>, config: &PipelineConfig) -> Self {
        Self {
            api,
            interval: config.poll_interval(),
            max_duration: config.max_poll_duration(),
            max_errors: config.max_poll_errors,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel every poll started from this poller when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Start polling `job_id` on the current runtime
    pub fn start(&self, job_id: impl Into<String>) -> PollHandle {
        let job_id = job_id.into();
        let cancel = self.shutdown.child_token();
        let (progress_tx, progress_rx) = watch::channel(JobProgress {
            job_id: job_id.clone(),
            state: JobState::Queued,
            percent: 0,
        });

        let task = tokio::spawn(poll_job(
            Arc::clone(&self.api),
            job_id.clone(),
            PollLimits {
                interval: self.interval,
                max_duration: self.max_duration,
                max_errors: self.max_errors,
            },
            cancel.clone(),
            progress_tx,
        ));

        tracing::debug!(job_id = %job_id, "Started job poller");

        PollHandle {
            job_id,
            cancel,
            progress: progress_rx,
            task: Some(task),
        }
    }
}

/// Owner's handle to one polling task
///
/// Dropping the handle stops the task.
pub struct PollHandle {
    job_id: String,
    cancel: CancellationToken,
    progress: watch::Receiver<JobProgress>,
    task: Option<JoinHandle<Result<JobOutcome>>>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Stop polling; a pending or later `wait` returns `JobCancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Receiver for the latest clamped progress
    pub fn progress(&self) -> watch::Receiver<JobProgress> {
        self.progress.clone()
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(mut self) -> Result<JobOutcome> {
        let Some(task) = self.task.take() else {
            return Err(Error::JobCancelled(self.job_id.clone()));
        };

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::JobCancelled(self.job_id.clone())),
            Err(e) => Err(Error::RequestFailed(format!(
                "poller for job {} panicked: {}",
                self.job_id, e
            ))),
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PollLimits {
    interval: Duration,
    max_duration: Duration,
    max_errors: u32,
}

/// Monotonic progress as shown to the user
#[derive(Debug, Default)]
struct ProgressTracker {
    percent: u8,
}

impl ProgressTracker {
    fn observe(&mut self, status: &JobStatus) -> u8 {
        if status.status == JobState::Completed {
            self.percent = 100;
        } else if let Some(progress) = status.progress {
            let reported = progress.clamp(0.0, 100.0).round() as u8;
            self.percent = self.percent.max(reported);
        }
        self.percent
    }
}

async fn poll_job(
    api: Arc<dyn GenerationApi>,
    job_id: String,
    limits: PollLimits,
    cancel: CancellationToken,
    progress: watch::Sender<JobProgress>,
) -> Result<JobOutcome> {
    let started = Instant::now();
    let mut tracker = ProgressTracker::default();
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::JobCancelled(job_id)),
            _ = tokio::time::sleep(limits.interval) => {}
        }

        if started.elapsed() > limits.max_duration {
            tracing::warn!(job_id = %job_id, "Job exceeded poll budget");
            return Err(Error::JobTimeout {
                job_id,
                secs: limits.max_duration.as_secs(),
            });
        }

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::JobCancelled(job_id)),
            polled = api.job_status(&job_id) => polled,
        };

        let status = match polled {
            Ok(status) => {
                consecutive_errors = 0;
                status
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors > limits.max_errors {
                    return Err(Error::RequestFailed(format!(
                        "status for job {} failed {} times in a row: {}",
                        job_id, consecutive_errors, e
                    )));
                }
                tracing::warn!(
                    job_id = %job_id,
                    attempt = consecutive_errors,
                    error = %e,
                    "Job status poll failed"
                );
                continue;
            }
        };

        let percent = tracker.observe(&status);
        progress.send_replace(JobProgress {
            job_id: job_id.clone(),
            state: status.status,
            percent,
        });

        match status.status {
            JobState::Completed => {
                tracing::info!(job_id = %job_id, "Job completed");
                return Ok(JobOutcome {
                    job_id,
                    result_path: status.result_path,
                });
            }
            JobState::Failed => {
                tracing::warn!(job_id = %job_id, "Job failed");
                return Err(Error::JobFailed { job_id });
            }
            JobState::Queued | JobState::Running => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Credentials;
    use crate::types::{
        ContentPlan, Episode, JobTicket, PlanRequest, SocialMediaPlan, VideoResult,
        VisualPrompts,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers job polls from a script; every other call is unreachable here.
    struct ScriptedJobs {
        replies: Mutex<VecDeque<Result<JobStatus>>>,
        polls: AtomicUsize,
    }

    impl ScriptedJobs {
        fn new(replies: Vec<Result<JobStatus>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                polls: AtomicUsize::new(0),
            })
        }
    }

    fn status(state: JobState, progress: Option<f64>) -> Result<JobStatus> {
        Ok(JobStatus {
            status: state,
            progress,
            result_path: None,
        })
    }

    #[async_trait]
    impl GenerationApi for ScriptedJobs {
        async fn generate_plan(&self, _: &PlanRequest, _: Option<&Credentials>) -> Result<ContentPlan> {
            unimplemented!()
        }
        async fn generate_script(&self, _: &Episode, _: &str, _: &str, _: Option<&Credentials>) -> Result<String> {
            unimplemented!()
        }
        async fn generate_visual_prompts(&self, _: usize, _: Option<&Credentials>) -> Result<VisualPrompts> {
            unimplemented!()
        }
        async fn start_images(&self, _: usize, _: Option<&Credentials>) -> Result<JobTicket> {
            unimplemented!()
        }
        async fn start_voiceovers(&self, _: usize, _: Option<&Credentials>) -> Result<JobTicket> {
            unimplemented!()
        }
        async fn generate_video(&self, _: usize) -> Result<VideoResult> {
            unimplemented!()
        }
        async fn generate_social_media(&self, _: usize) -> Result<SocialMediaPlan> {
            unimplemented!()
        }
        async fn start_full_pipeline(&self, _: usize, _: Option<&Credentials>) -> Result<JobTicket> {
            unimplemented!()
        }
        async fn job_status(&self, _: &str) -> Result<JobStatus> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| status(JobState::Running, None))
        }
        async fn check_status(&self) -> bool {
            true
        }
    }

    fn poller(api: Arc<ScriptedJobs>) -> JobPoller {
        JobPoller::new(api, &PipelineConfig::default())
    }

    #[test]
    fn test_progress_tracker_never_regresses() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.observe(&status(JobState::Running, Some(40.0)).unwrap()), 40);
        assert_eq!(tracker.observe(&status(JobState::Running, None).unwrap()), 40);
        assert_eq!(tracker.observe(&status(JobState::Running, Some(25.0)).unwrap()), 40);
        assert_eq!(tracker.observe(&status(JobState::Running, Some(250.0)).unwrap()), 100);
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.observe(&status(JobState::Completed, None).unwrap()), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_clamped_until_completion() {
        let api = ScriptedJobs::new(vec![
            status(JobState::Running, Some(40.0)),
            status(JobState::Running, None),
            status(JobState::Running, Some(10.0)),
            Ok(JobStatus {
                status: JobState::Completed,
                progress: None,
                result_path: Some("/media/ep0/images".to_string()),
            }),
        ]);
        let handle = poller(api.clone()).start("job-1");
        let mut progress = handle.progress();

        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while progress.changed().await.is_ok() {
                seen.push(progress.borrow_and_update().percent);
            }
            seen
        });

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.job_id, "job-1");
        assert_eq!(outcome.result_path.as_deref(), Some("/media/ep0/images"));

        let seen = watcher.await.unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "regressed: {:?}", seen);
        assert!(seen.iter().all(|p| *p >= 40));
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(api.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job() {
        let api = ScriptedJobs::new(vec![
            status(JobState::Queued, None),
            status(JobState::Failed, Some(30.0)),
        ]);
        let err = poller(api).start("job-2").wait().await.unwrap_err();
        assert!(matches!(err, Error::JobFailed { job_id } if job_id == "job-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerates_transient_poll_errors() {
        let mut replies: Vec<Result<JobStatus>> = (0..5)
            .map(|_| Err(Error::RequestFailed("HTTP error 502".to_string())))
            .collect();
        replies.push(status(JobState::Completed, Some(100.0)));

        let api = ScriptedJobs::new(replies);
        assert!(poller(api).start("job-3").wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_many_poll_errors_fail_the_job() {
        let replies: Vec<Result<JobStatus>> = (0..6)
            .map(|_| Err(Error::RequestFailed("HTTP error 502".to_string())))
            .collect();

        let api = ScriptedJobs::new(replies);
        let err = poller(api.clone()).start("job-4").wait().await.unwrap_err();
        assert!(matches!(err, Error::RequestFailed(msg) if msg.contains("6 times")));
        assert_eq!(api.polls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhausted() {
        let api = ScriptedJobs::new(Vec::new());
        let config = PipelineConfig {
            max_poll_secs: 10,
            ..Default::default()
        };
        let err = JobPoller::new(api, &config)
            .start("job-5")
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobTimeout { secs: 10, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let api = ScriptedJobs::new(Vec::new());
        let handle = poller(api.clone()).start("job-6");
        handle.cancel();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, Error::JobCancelled(id) if id == "job-6"));
        assert_eq!(api.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_token_cancels_children() {
        let shutdown = CancellationToken::new();
        let api = ScriptedJobs::new(Vec::new());
        let handle = poller(api).with_shutdown(shutdown.clone()).start("job-7");

        shutdown.cancel();
        assert!(matches!(
            handle.wait().await,
            Err(Error::JobCancelled(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_task() {
        let api = ScriptedJobs::new(Vec::new());
        let handle = poller(api.clone()).start("job-8");
        drop(handle);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), 0);
    }
}
