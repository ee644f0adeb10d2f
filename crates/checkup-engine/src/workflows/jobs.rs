//! Background work handed from the request path to worker tasks.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::demographics::ObservationJob;
use super::ingestion::domain::BatchId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBatchJob {
    pub batch_id: BatchId,
    pub approved_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineJob {
    ProcessBatch(ProcessBatchJob),
    MergeObservations(ObservationJob),
}

impl EngineJob {
    pub const fn label(&self) -> &'static str {
        match self {
            EngineJob::ProcessBatch(_) => "process_batch",
            EngineJob::MergeObservations(_) => "merge_observations",
        }
    }
}

/// Outbound port for background jobs.
pub trait JobQueue: Send + Sync {
    /// Hands `job` over without waiting; a full queue is an error.
    fn enqueue(&self, job: EngineJob) -> Result<(), QueueError>;

    /// Hands observations over, waiting for capacity where the queue supports it.
    fn publish(&self, job: ObservationJob) -> Result<(), QueueError> {
        self.enqueue(EngineJob::MergeObservations(job))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("{0} queue is full")]
    Full(&'static str),
    #[error("{0} queue is closed")]
    Closed(&'static str),
}

/// Bounded in-process queue: one channel per job kind so a burst of
/// observations never starves batch processing.
#[derive(Clone)]
pub struct ChannelJobQueue {
    batches: mpsc::Sender<ProcessBatchJob>,
    observations: mpsc::Sender<ObservationJob>,
}

pub struct JobReceivers {
    pub batches: mpsc::Receiver<ProcessBatchJob>,
    pub observations: mpsc::Receiver<ObservationJob>,
}

impl ChannelJobQueue {
    pub fn bounded(capacity: usize) -> (Self, JobReceivers) {
        let capacity = capacity.max(1);
        let (batch_sender, batch_receiver) = mpsc::channel(capacity);
        let (observation_sender, observation_receiver) = mpsc::channel(capacity);
        (
            Self {
                batches: batch_sender,
                observations: observation_sender,
            },
            JobReceivers {
                batches: batch_receiver,
                observations: observation_receiver,
            },
        )
    }
}

fn map_send_error<T>(label: &'static str, error: TrySendError<T>) -> QueueError {
    match error {
        TrySendError::Full(_) => QueueError::Full(label),
        TrySendError::Closed(_) => QueueError::Closed(label),
    }
}

impl JobQueue for ChannelJobQueue {
    fn enqueue(&self, job: EngineJob) -> Result<(), QueueError> {
        let label = job.label();
        match job {
            EngineJob::ProcessBatch(job) => self
                .batches
                .try_send(job)
                .map_err(|error| map_send_error(label, error)),
            EngineJob::MergeObservations(job) => self
                .observations
                .try_send(job)
                .map_err(|error| map_send_error(label, error)),
        }
    }

    /// Parks the calling thread until the aggregator frees a slot. Must not be
    /// called from an async task; the coordinator only runs on the blocking pool.
    fn publish(&self, job: ObservationJob) -> Result<(), QueueError> {
        const LABEL: &str = "merge_observations";
        match self.observations.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed(LABEL)),
            Err(TrySendError::Full(job)) => self
                .observations
                .blocking_send(job)
                .map_err(|_| QueueError::Closed(LABEL)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_job(id: &str) -> EngineJob {
        EngineJob::ProcessBatch(ProcessBatchJob {
            batch_id: BatchId(id.to_string()),
            approved_by: "lead@acme".to_string(),
        })
    }

    #[test]
    fn routes_jobs_to_their_channel() {
        let (queue, mut receivers) = ChannelJobQueue::bounded(4);
        queue.enqueue(batch_job("batch-1")).expect("enqueue batch");
        queue
            .enqueue(EngineJob::MergeObservations(ObservationJob {
                job_key: "batch-1:0".to_string(),
                batch_id: BatchId("batch-1".to_string()),
                records: Vec::new(),
            }))
            .expect("enqueue observations");

        let received = receivers.batches.try_recv().expect("batch job");
        assert_eq!(received.batch_id.as_str(), "batch-1");
        let observations = receivers.observations.try_recv().expect("observation job");
        assert_eq!(observations.job_key, "batch-1:0");
    }

    #[test]
    fn full_and_closed_channels_are_reported() {
        let (queue, receivers) = ChannelJobQueue::bounded(1);
        queue.enqueue(batch_job("batch-1")).expect("first fits");
        assert_eq!(
            queue.enqueue(batch_job("batch-2")),
            Err(QueueError::Full("process_batch"))
        );

        drop(receivers);
        assert_eq!(
            queue.enqueue(batch_job("batch-3")),
            Err(QueueError::Closed("process_batch"))
        );
    }

    fn observations(key: &str) -> ObservationJob {
        ObservationJob {
            job_key: key.to_string(),
            batch_id: BatchId("batch-1".to_string()),
            records: Vec::new(),
        }
    }

    #[test]
    fn publish_waits_for_capacity_instead_of_dropping() {
        let (queue, receivers) = ChannelJobQueue::bounded(1);
        let JobReceivers {
            observations: mut receiver,
            ..
        } = receivers;
        queue.publish(observations("batch-1:0")).expect("first fits");

        let consumer = std::thread::spawn(move || {
            let mut keys = Vec::new();
            while let Some(job) = receiver.blocking_recv() {
                keys.push(job.job_key);
            }
            keys
        });
        queue.publish(observations("batch-1:1")).expect("waits for a slot");
        queue.publish(observations("batch-1:2")).expect("waits for a slot");
        drop(queue);

        let keys = consumer.join().expect("consumer joins");
        assert_eq!(keys, vec!["batch-1:0", "batch-1:1", "batch-1:2"]);
    }
}
