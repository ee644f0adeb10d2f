use crate::cli::ServeArgs;
use crate::infra::{build_engine, AppState, Engine};
use crate::routes::with_batch_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use checkup_engine::config::AppConfig;
use checkup_engine::error::AppError;
use checkup_engine::telemetry;
use checkup_engine::workflows::demographics::{spawn_aggregator, BucketSink};
use checkup_engine::workflows::ingestion::spawn_batch_worker;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let Engine {
        store,
        coordinator,
        receivers,
    } = build_engine(&config)?;

    let _batch_worker = spawn_batch_worker(receivers.batches, coordinator.clone());
    let _aggregator = spawn_aggregator(
        receivers.observations,
        store.clone() as Arc<dyn BucketSink>,
        config.aggregation,
    );

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        store,
    };

    let app = with_batch_routes(coordinator)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        database = %config.database.path.display(),
        sync_threshold = config.ingestion.sync_employee_threshold,
        "checkup engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
