use chrono::NaiveDate;
use checkup_engine::config::{AppConfig, DatabaseConfig};
use checkup_engine::error::AppError;
use checkup_engine::reference::catalog::standard_snapshot;
use checkup_engine::reference::{ReferenceCache, ReferenceSource};
use checkup_engine::store::{records, SqliteStore};
use checkup_engine::workflows::ingestion::{AlertError, BatchAlert, BatchCoordinator, BatchNotifier};
use checkup_engine::workflows::jobs::{ChannelJobQueue, JobReceivers};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) type Coordinator = BatchCoordinator<ChannelJobQueue, TracingNotifier>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) store: Arc<SqliteStore>,
}

/// Writes batch alerts to the log until a mail or chat transport is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingNotifier;

impl BatchNotifier for TracingNotifier {
    fn notify(&self, alert: BatchAlert) -> Result<(), AlertError> {
        warn!(
            template = %alert.template,
            batch_id = %alert.batch_id,
            details = ?alert.details,
            "batch alert"
        );
        Ok(())
    }
}

/// Store, coordinator, and the receiving ends of the job queue.
pub(crate) struct Engine {
    pub(crate) store: Arc<SqliteStore>,
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) receivers: JobReceivers,
}

pub(crate) fn build_engine(config: &AppConfig) -> Result<Engine, AppError> {
    let store = open_store(&config.database)?;
    let reference = Arc::new(ReferenceCache::new(
        store.clone() as Arc<dyn ReferenceSource>,
        config.reference.cache_ttl,
    ));
    let (queue, receivers) = ChannelJobQueue::bounded(config.ingestion.queue_capacity);
    let coordinator = Arc::new(BatchCoordinator::new(
        store.clone(),
        reference,
        Arc::new(queue),
        Arc::new(TracingNotifier),
        config.ingestion,
    ));

    Ok(Engine {
        store,
        coordinator,
        receivers,
    })
}

/// Opens the configured database and seeds the standard catalog into an empty one.
pub(crate) fn open_store(config: &DatabaseConfig) -> Result<Arc<SqliteStore>, AppError> {
    let store = if config.is_in_memory() {
        SqliteStore::open_in_memory()?
    } else {
        SqliteStore::open(&config.path)?
    };

    let parameters = store.with_connection(|conn| records::count_rows(conn, "parameters"))?;
    if parameters == 0 {
        store.seed_reference(&standard_snapshot())?;
        info!(path = %config.path.display(), "seeded standard reference catalog");
    }

    Ok(Arc::new(store))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_databases_receive_the_standard_catalog() {
        let store = open_store(&DatabaseConfig {
            path: PathBuf::from(":memory:"),
        })
        .expect("store opens");

        let companies = store
            .with_connection(|conn| records::count_rows(conn, "companies"))
            .expect("count");
        assert!(companies > 0);
    }

    #[test]
    fn dates_must_be_iso_formatted() {
        assert_eq!(
            parse_date(" 2024-05-20 "),
            Ok(NaiveDate::from_ymd_opt(2024, 5, 20).expect("valid date"))
        );
        assert!(parse_date("20/05/2024").is_err());
    }
}
