use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ObservationJob;
use crate::config::AggregationConfig;
use crate::store::RepositoryError;

/// Destination for drained observation jobs (normally the SQLite store).
pub trait BucketSink: Send + Sync {
    /// Merges `jobs` in one unit of work, skipping any job key merged before.
    fn merge(&self, jobs: &[ObservationJob]) -> Result<MergeSummary, RepositoryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub jobs_merged: usize,
    pub jobs_skipped: usize,
    pub buckets: usize,
}

/// FIFO of whole jobs with an observation-count drain trigger.
#[derive(Debug)]
pub struct ObservationBuffer {
    jobs: VecDeque<ObservationJob>,
    buffered: usize,
    trigger: usize,
}

impl ObservationBuffer {
    pub fn new(trigger: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            buffered: 0,
            trigger: trigger.max(1),
        }
    }

    pub fn push(&mut self, job: ObservationJob) {
        self.buffered += job.observation_count();
        self.jobs.push_back(job);
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Oldest whole jobs covering at least the trigger, once the trigger is reached.
    pub fn drain_ready(&mut self) -> Option<Vec<ObservationJob>> {
        if self.buffered < self.trigger {
            return None;
        }
        let mut drained = Vec::new();
        let mut covered = 0;
        while covered < self.trigger {
            let Some(job) = self.jobs.pop_front() else {
                break;
            };
            covered += job.observation_count();
            drained.push(job);
        }
        self.buffered -= covered;
        Some(drained)
    }

    pub fn drain_all(&mut self) -> Vec<ObservationJob> {
        self.buffered = 0;
        self.jobs.drain(..).collect()
    }

    /// Puts jobs from a failed merge back ahead of everything buffered since.
    pub fn requeue(&mut self, jobs: Vec<ObservationJob>) {
        for job in jobs.into_iter().rev() {
            self.buffered += job.observation_count();
            self.jobs.push_front(job);
        }
    }
}

const CLOSE_ATTEMPTS: usize = 3;
const CLOSE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Runs the aggregation worker until the channel closes, then flushes what is left.
pub fn spawn_aggregator(
    mut receiver: mpsc::Receiver<ObservationJob>,
    sink: Arc<dyn BucketSink>,
    config: AggregationConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = ObservationBuffer::new(config.trigger_rows);
        let mut ticker = tokio::time::interval(config.flush_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                received = receiver.recv() => match received {
                    Some(job) => {
                        debug!(job_key = %job.job_key, observations = job.observation_count(), "observation job buffered");
                        buffer.push(job);
                        while let Some(ready) = buffer.drain_ready() {
                            if let Err(failed) = flush(&sink, ready).await {
                                buffer.requeue(failed);
                                break;
                            }
                        }
                    }
                    None => {
                        flush_on_close(&sink, &mut buffer).await;
                        info!("observation channel closed; aggregator stopped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        if let Err(failed) = flush(&sink, buffer.drain_all()).await {
                            buffer.requeue(failed);
                        }
                    }
                }
            }
        }
    })
}

/// Last drain before exit; the merge log makes each retry safe.
async fn flush_on_close(sink: &Arc<dyn BucketSink>, buffer: &mut ObservationBuffer) {
    for attempt in 1..=CLOSE_ATTEMPTS {
        if buffer.is_empty() {
            return;
        }
        if let Err(failed) = flush(sink, buffer.drain_all()).await {
            buffer.requeue(failed);
            if attempt < CLOSE_ATTEMPTS {
                tokio::time::sleep(CLOSE_RETRY_DELAY).await;
            }
        }
    }
    if !buffer.is_empty() {
        let keys: Vec<String> = buffer.drain_all().into_iter().map(|job| job.job_key).collect();
        error!(job_keys = ?keys, "demographic merge abandoned at shutdown");
    }
}

/// Merges `jobs`, handing them back when the sink fails so they can be retried.
async fn flush(
    sink: &Arc<dyn BucketSink>,
    jobs: Vec<ObservationJob>,
) -> Result<(), Vec<ObservationJob>> {
    if jobs.is_empty() {
        return Ok(());
    }
    let sink = Arc::clone(sink);

    let (jobs, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = sink.merge(&jobs);
        (jobs, outcome)
    })
    .await
    .map_err(|error| {
        warn!(%error, "demographic merge task panicked");
        Vec::new()
    })?;

    match outcome {
        Ok(summary) => {
            info!(
                merged = summary.jobs_merged,
                skipped = summary.jobs_skipped,
                buckets = summary.buckets,
                "demographic buckets merged"
            );
            Ok(())
        }
        Err(error) => {
            let keys: Vec<&str> = jobs.iter().map(|job| job.job_key.as_str()).collect();
            warn!(%error, job_keys = ?keys, "demographic merge failed; jobs kept for retry");
            Err(jobs)
        }
    }
}
