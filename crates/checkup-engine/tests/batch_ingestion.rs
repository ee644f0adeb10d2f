use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use checkup_engine::config::{AggregationConfig, IngestionConfig};
use checkup_engine::reference::catalog::standard_snapshot;
use checkup_engine::reference::{ReferenceCache, ReferenceSource};
use checkup_engine::store::{demographics, records, SqliteStore};
use checkup_engine::workflows::demographics::{spawn_aggregator, BucketSink};
use checkup_engine::workflows::ingestion::{
    spawn_batch_worker, AlertError, BatchAlert, BatchCoordinator, BatchId, BatchNotifier,
    BatchStatus, ExecutionMode,
};
use checkup_engine::workflows::jobs::ChannelJobQueue;

struct SilentNotifier;

impl BatchNotifier for SilentNotifier {
    fn notify(&self, _alert: BatchAlert) -> Result<(), AlertError> {
        Ok(())
    }
}

type Coordinator = BatchCoordinator<ChannelJobQueue, SilentNotifier>;

fn upload() -> String {
    let tested = (Utc::now().date_naive() - chrono::Duration::days(10)).format("%Y-%m-%d");
    let mut csv = String::from(
        "Employee ID,Name,DOB,Gender,Email,Phone,Test Date,Company,Location,FBS,HbA1c,Total Cholesterol,LDL,HDL,Triglycerides,Hemoglobin,BMI,BP\n",
    );
    for (index, (gender, glucose)) in [("Male", 92), ("Female", 104), ("Female", 131)]
        .into_iter()
        .enumerate()
    {
        csv.push_str(&format!(
            "E{index},Employee {index},1986-02-11,{gender},e{index}@globex.test,+91 98450 1234{index},{tested},GLOBEX,Chennai,{glucose},5.6,188,112,48,140,13.8,24.2,122/80\n"
        ));
    }
    csv
}

async fn wait_for_status(coordinator: &Coordinator, batch_id: &BatchId, wanted: BatchStatus) {
    for _ in 0..100 {
        let status = coordinator.get(batch_id).expect("batch").status;
        if status == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("batch {batch_id} never reached {wanted:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_batch_flows_from_upload_to_population_statistics() {
    let directory = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(SqliteStore::open(&directory.path().join("checkup.db")).expect("open store"));
    store
        .seed_reference(&standard_snapshot())
        .expect("seed reference data");
    let reference = Arc::new(ReferenceCache::new(
        store.clone() as Arc<dyn ReferenceSource>,
        Duration::from_secs(60),
    ));

    let (queue, receivers) = ChannelJobQueue::bounded(8);
    let coordinator = Arc::new(BatchCoordinator::new(
        store.clone(),
        reference,
        Arc::new(queue),
        Arc::new(SilentNotifier),
        IngestionConfig {
            chunk_rows: 16,
            sync_employee_threshold: 2,
            queue_capacity: 8,
        },
    ));
    let worker = spawn_batch_worker(receivers.batches, coordinator.clone());
    let aggregator = spawn_aggregator(
        receivers.observations,
        store.clone() as Arc<dyn BucketSink>,
        AggregationConfig {
            trigger_rows: 1,
            flush_interval: Duration::from_millis(50),
        },
    );

    let accepted = coordinator
        .submit_csv(upload().as_bytes(), "hr@globex.test")
        .expect("upload validates");
    assert_eq!(accepted.record.counts.total_records, 3);
    assert_eq!(accepted.record.counts.parameter_rows, 27);

    let outcome = coordinator
        .approve(&accepted.record.id, "lead@globex.test")
        .expect("approve");
    assert_eq!(outcome.mode, ExecutionMode::Queued);

    wait_for_status(&coordinator, &accepted.record.id, BatchStatus::Completed).await;

    let reports = coordinator.reports(&accepted.record.id).expect("reports");
    assert_eq!(reports.len(), 3);
    let labs = store
        .with_connection(|conn| records::lab_parameters_for_report(conn, &reports[0].report_id))
        .expect("labs");
    assert_eq!(labs.len(), 10, "BP expands into systolic and diastolic");

    let mut buckets = Vec::new();
    for _ in 0..100 {
        buckets = store
            .with_connection(|conn| demographics::averages_for_company(conn, "GLOBEX"))
            .expect("averages");
        let merged: u64 = buckets
            .iter()
            .filter(|(key, _)| key.parameter_key == "fasting_glucose")
            .map(|(_, stat)| stat.sample_size)
            .sum();
        if merged == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let glucose: Vec<_> = buckets
        .iter()
        .filter(|(key, _)| key.parameter_key == "fasting_glucose")
        .collect();
    assert_eq!(glucose.len(), 2, "one bucket per gender");
    let female = glucose
        .iter()
        .find(|(key, _)| key.gender.label() == "Female")
        .expect("female bucket");
    assert_eq!(female.1.sample_size, 2);
    assert!((female.1.average - 117.5).abs() < 1e-9);

    worker.abort();
    aggregator.abort();
}
