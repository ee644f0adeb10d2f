use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::alerts::BatchNotifier;
use super::service::BatchCoordinator;
use crate::workflows::jobs::{JobQueue, ProcessBatchJob};

/// Drains queued batches one at a time until the channel closes.
pub fn spawn_batch_worker<Q, N>(
    mut receiver: mpsc::Receiver<ProcessBatchJob>,
    coordinator: Arc<BatchCoordinator<Q, N>>,
) -> JoinHandle<()>
where
    Q: JobQueue + 'static,
    N: BatchNotifier + 'static,
{
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let batch_id = job.batch_id.clone();
            let coordinator = Arc::clone(&coordinator);
            match tokio::task::spawn_blocking(move || coordinator.process_queued(&job)).await {
                Ok(Ok(summary)) => info!(
                    batch_id = %batch_id,
                    employees = summary.employees,
                    reports = summary.reports,
                    "queued batch completed"
                ),
                Ok(Err(error)) => warn!(batch_id = %batch_id, %error, "queued batch failed"),
                Err(error) => warn!(batch_id = %batch_id, %error, "batch worker task panicked"),
            }
        }
        info!("batch channel closed; worker stopped");
    })
}
