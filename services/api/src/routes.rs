use crate::infra::{AppState, Coordinator};
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use checkup_engine::error::AppError;
use checkup_engine::store::demographics::averages_for_company;
use checkup_engine::workflows::ingestion::batch_router;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// One demographic bucket as exposed over HTTP.
#[derive(Debug, Serialize)]
pub(crate) struct BucketView {
    pub(crate) location: String,
    pub(crate) age_bracket: &'static str,
    pub(crate) gender: &'static str,
    pub(crate) parameter_key: String,
    pub(crate) average_value: f64,
    pub(crate) sample_size: u64,
}

pub(crate) fn with_batch_routes(coordinator: Arc<Coordinator>) -> axum::Router {
    batch_router(coordinator)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route(
            "/api/v1/companies/:company_id/demographics",
            axum::routing::get(demographics_endpoint),
        )
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn demographics_endpoint(
    Extension(state): Extension<AppState>,
    Path(company_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = Arc::clone(&state.store);
    let lookup = company_id.clone();
    let buckets = tokio::task::spawn_blocking(move || {
        store.with_connection(|conn| averages_for_company(conn, &lookup))
    })
    .await??;

    let buckets: Vec<BucketView> = buckets
        .into_iter()
        .map(|(key, stat)| BucketView {
            location: key.location,
            age_bracket: key.age_bracket.label(),
            gender: key.gender.label(),
            parameter_key: key.parameter_key,
            average_value: stat.average,
            sample_size: stat.sample_size,
        })
        .collect();

    Ok(Json(json!({
        "company_id": company_id,
        "buckets": buckets,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::open_store;
    use checkup_engine::config::DatabaseConfig;
    use checkup_engine::reference::Gender;
    use checkup_engine::workflows::demographics::{
        AgeBracket, BucketSink, ObservationJob, ObservationRecord,
    };
    use checkup_engine::workflows::ingestion::BatchId;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;

    fn state(ready: bool) -> AppState {
        AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
            store: open_store(&DatabaseConfig {
                path: PathBuf::from(":memory:"),
            })
            .expect("store opens"),
        }
    }

    #[tokio::test]
    async fn readiness_reflects_the_startup_flag() {
        let response = readiness_endpoint(Extension(state(false))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = readiness_endpoint(Extension(state(true))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn demographics_endpoint_lists_company_buckets() {
        let state = state(true);
        let mut values = BTreeMap::new();
        values.insert("hba1c".to_string(), "5.8".to_string());
        let batch_id = BatchId("batch-demo".to_string());
        state
            .store
            .merge(&[ObservationJob {
                job_key: ObservationJob::key_for(&batch_id, 0),
                batch_id,
                records: vec![ObservationRecord {
                    company_id: "ACME".to_string(),
                    location: "Pune".to_string(),
                    age_bracket: AgeBracket::Forties,
                    gender: Gender::Male,
                    values,
                }],
            }])
            .expect("merge");

        let Json(body) = demographics_endpoint(Extension(state), Path("ACME".to_string()))
            .await
            .expect("buckets load");

        assert_eq!(body["company_id"], "ACME");
        assert_eq!(body["buckets"][0]["age_bracket"], "40-50");
        assert_eq!(body["buckets"][0]["gender"], "Male");
        assert_eq!(body["buckets"][0]["sample_size"], 1);
    }
}
