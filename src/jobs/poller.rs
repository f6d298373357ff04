//! Async job poller
//!
//! Creates export jobs, polls them a bounded number of times per run and
//! pages through the results of completed jobs. Every observation of a job
//! is returned as a [`JobEvent`] so the caller can surface it.

use super::types::{AsyncJob, JobState, JobWindow};
use crate::config::ExportJobConfig;
use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use crate::pagination::{FetchPage, PaginatedFetcher};
use crate::source::ExportJobSource;
use crate::types::PartitionKey;
use tracing::{debug, info, warn};

/// One observed job status
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    /// Job as reported by the upstream
    pub job: AsyncJob,
    /// State before this observation; `None` right after creation
    pub previous: Option<JobState>,
}

impl JobEvent {
    /// Check if the state changed with this observation
    pub fn is_transition(&self) -> bool {
        self.previous != Some(self.job.state)
    }
}

/// Result of polling a job within one run
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Last observed job
    pub job: AsyncJob,
    /// One event per poll, oldest first
    pub events: Vec<JobEvent>,
}

/// Drives export jobs of one partition
pub struct AsyncJobPoller<'a> {
    source: &'a dyn ExportJobSource,
    partition: &'a PartitionKey,
    policy: &'a RetryPolicy,
    config: &'a ExportJobConfig,
}

impl<'a> AsyncJobPoller<'a> {
    /// Create a poller
    pub fn new(
        source: &'a dyn ExportJobSource,
        partition: &'a PartitionKey,
        policy: &'a RetryPolicy,
        config: &'a ExportJobConfig,
    ) -> Self {
        Self {
            source,
            partition,
            policy,
            config,
        }
    }

    /// Start a job exporting `window`
    pub async fn create(&self, window: JobWindow) -> Result<JobEvent> {
        if window.is_empty() {
            return Err(Error::invalid_value(
                "export_jobs",
                format!("refusing to export empty window {window}"),
            ));
        }
        if window.duration() > self.config.max_window {
            return Err(Error::invalid_value(
                "export_jobs.max_window",
                format!("window {window} exceeds the maximum export window"),
            ));
        }

        let source = self.source;
        let partition = self.partition;
        let job = self
            .policy
            .run("create_export_job", || {
                source.create_export_job(partition, window)
            })
            .await?;

        info!(partition = %partition, job_id = %job.id, %window, state = %job.state, "export job created");
        Ok(JobEvent {
            job,
            previous: None,
        })
    }

    /// Poll `job` until it reaches a terminal state or the per-run budget
    /// runs out
    pub async fn poll(&self, job: &AsyncJob) -> Result<PollOutcome> {
        let source = self.source;
        let partition = self.partition;
        let interval = self.config.poll_interval.to_std().unwrap_or_default();
        let mut current = job.clone();
        let mut events = Vec::new();

        for attempt in 0..self.config.max_polls_per_run {
            if attempt > 0 {
                tokio::time::sleep(interval).await;
            }

            let job_id = current.id.clone();
            let observed = self
                .policy
                .run("get_export_job", || source.get_export_job(partition, &job_id))
                .await?;

            if observed.id != current.id {
                return Err(Error::malformed(format!(
                    "asked for job {} but upstream returned {}",
                    current.id, observed.id
                )));
            }
            if !current.state.can_transition_to(observed.state) {
                return Err(Error::export_job(
                    &current.id,
                    format!("illegal transition {} -> {}", current.state, observed.state),
                ));
            }

            let previous = current.state;
            debug!(partition = %partition, job_id = %observed.id, attempt, from = %previous, to = %observed.state, "polled export job");
            if observed.state == JobState::Failed {
                warn!(
                    partition = %partition,
                    job_id = %observed.id,
                    reason = observed.error_reason.as_deref().unwrap_or("unknown"),
                    "export job failed"
                );
            }

            current = AsyncJob {
                // keep the requested window
                window: current.window,
                ..observed
            };
            events.push(JobEvent {
                job: current.clone(),
                previous: Some(previous),
            });

            if current.state.is_terminal() {
                break;
            }
        }

        Ok(PollOutcome {
            job: current,
            events,
        })
    }

    /// Pages of a completed job's results
    pub fn results(&self, job: &AsyncJob) -> PaginatedFetcher<'a, impl FetchPage + 'a> {
        let source = self.source;
        let partition = self.partition;
        let job = job.clone();
        let fetch = move |cursor: Option<String>| {
            let job = job.clone();
            async move {
                source
                    .fetch_job_results(partition, &job, cursor.as_deref())
                    .await
            }
        };
        PaginatedFetcher::new(fetch, self.policy.clone()).with_operation("fetch_job_results")
    }
}
