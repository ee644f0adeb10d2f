use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use checkup_engine::config::AggregationConfig;
use checkup_engine::reference::catalog::standard_snapshot;
use checkup_engine::reference::Gender;
use checkup_engine::store::{demographics, SqliteStore};
use checkup_engine::workflows::demographics::{
    spawn_aggregator, AgeBracket, BucketKey, BucketSink, ObservationJob, ObservationRecord,
};
use checkup_engine::workflows::ingestion::BatchId;
use tokio::sync::mpsc;

fn store() -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory().expect("open store");
    store
        .seed_reference(&standard_snapshot())
        .expect("seed reference data");
    Arc::new(store)
}

fn record(location: &str, glucose: &str) -> ObservationRecord {
    let mut values = BTreeMap::new();
    values.insert("fasting_glucose".to_string(), glucose.to_string());
    values.insert("blood_group".to_string(), "B+".to_string());
    ObservationRecord {
        company_id: "ACME".to_string(),
        location: location.to_string(),
        age_bracket: AgeBracket::Thirties,
        gender: Gender::Female,
        values,
    }
}

fn job(batch: &str, chunk: usize, records: Vec<ObservationRecord>) -> ObservationJob {
    let batch_id = BatchId(batch.to_string());
    ObservationJob {
        job_key: ObservationJob::key_for(&batch_id, chunk),
        batch_id,
        records,
    }
}

fn glucose_key(location: &str) -> BucketKey {
    BucketKey {
        company_id: "ACME".to_string(),
        location: location.to_string(),
        age_bracket: AgeBracket::Thirties,
        gender: Gender::Female,
        parameter_key: "fasting_glucose".to_string(),
    }
}

#[test]
fn merges_are_weighted_and_idempotent_per_job_key() {
    let store = store();

    let first = job("batch-a", 0, vec![record("Pune", "90"), record("Pune", "100")]);
    let summary = store.merge(&[first.clone()]).expect("first merge");
    assert_eq!(summary.jobs_merged, 1);

    let second = job("batch-b", 0, vec![record("Pune", "120")]);
    let summary = store.merge(&[first, second]).expect("second merge");
    assert_eq!(summary.jobs_merged, 1);
    assert_eq!(summary.jobs_skipped, 1);

    let stat = store
        .with_connection(|conn| demographics::load_average(conn, &glucose_key("Pune")))
        .expect("load")
        .expect("bucket exists");
    assert_eq!(stat.sample_size, 3);
    assert!((stat.average - 310.0 / 3.0).abs() < 1e-9);
}

#[test]
fn non_numeric_values_never_create_buckets() {
    let store = store();
    store
        .merge(&[job("batch-a", 0, vec![record("Pune", "pending")])])
        .expect("merge");

    let buckets = store
        .with_connection(|conn| demographics::averages_for_company(conn, "ACME"))
        .expect("averages");
    assert!(buckets.is_empty(), "{buckets:?}");
}

#[tokio::test]
async fn aggregator_flushes_remaining_jobs_on_shutdown() {
    let store = store();
    let (sender, receiver) = mpsc::channel(8);
    let handle = spawn_aggregator(
        receiver,
        store.clone() as Arc<dyn BucketSink>,
        AggregationConfig {
            trigger_rows: 1_000,
            flush_interval: Duration::from_secs(3_600),
        },
    );

    sender
        .send(job("batch-a", 0, vec![record("Pune", "90")]))
        .await
        .expect("send");
    sender
        .send(job("batch-a", 1, vec![record("Nagpur", "110")]))
        .await
        .expect("send");
    drop(sender);
    handle.await.expect("aggregator exits cleanly");

    let buckets = store
        .with_connection(|conn| demographics::averages_for_company(conn, "ACME"))
        .expect("averages");
    let locations: Vec<&str> = buckets.iter().map(|(key, _)| key.location.as_str()).collect();
    assert_eq!(locations, vec!["Nagpur", "Pune"]);
}
