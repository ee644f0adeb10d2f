use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::schema::{self, rows_per_statement};
use super::{decode, RepositoryError, SqliteStore};
use crate::reference::Gender;
use crate::workflows::demographics::{
    collect_deltas, AgeBracket, BucketKey, BucketSink, BucketStat, MergeSummary, ObservationJob,
};

const AVERAGE_COLUMNS: &[&str] = &[
    "company_id",
    "location",
    "age_bracket",
    "gender",
    "parameter_key",
    "average_value",
    "sample_size",
    "updated_at",
];

const WEIGHTED_UPSERT: &str = " ON CONFLICT(company_id, location, age_bracket, gender, parameter_key) \
     DO UPDATE SET average_value = (demographic_averages.average_value * demographic_averages.sample_size \
     + excluded.average_value * excluded.sample_size) \
     / (demographic_averages.sample_size + excluded.sample_size), \
     sample_size = demographic_averages.sample_size + excluded.sample_size, \
     updated_at = excluded.updated_at";

impl BucketSink for SqliteStore {
    fn merge(&self, jobs: &[ObservationJob]) -> Result<MergeSummary, RepositoryError> {
        self.with_transaction(|tx| merge_jobs(tx, jobs))
    }
}

/// Merges every job not yet recorded in the merge log. Call inside a transaction.
pub fn merge_jobs(conn: &Connection, jobs: &[ObservationJob]) -> Result<MergeSummary, RepositoryError> {
    let mut fresh = Vec::new();
    let mut skipped = 0;
    for job in jobs {
        let seen = conn
            .query_row(
                "SELECT 1 FROM demographic_merge_log WHERE job_key = ?1",
                [job.job_key.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if seen || fresh.iter().any(|known: &&ObservationJob| known.job_key == job.job_key) {
            skipped += 1;
        } else {
            fresh.push(job);
        }
    }

    let deltas = collect_deltas(fresh.iter().copied());
    upsert_deltas(conn, &deltas)?;

    let now = Utc::now().to_rfc3339();
    for job in &fresh {
        conn.execute(
            "INSERT INTO demographic_merge_log (job_key, batch_id, observations, merged_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job.job_key,
                job.batch_id.as_str(),
                job.observation_count() as i64,
                now
            ],
        )?;
    }

    Ok(MergeSummary {
        jobs_merged: fresh.len(),
        jobs_skipped: skipped,
        buckets: deltas.len(),
    })
}

/// One multi-row weighted upsert, split only past the variable limit.
fn upsert_deltas(
    conn: &Connection,
    deltas: &BTreeMap<BucketKey, BucketStat>,
) -> Result<(), RepositoryError> {
    let now = Utc::now().to_rfc3339();
    let rows: Vec<Vec<Value>> = deltas
        .iter()
        .map(|(key, stat)| {
            vec![
                schema::text(key.company_id.as_str()),
                schema::text(key.location.as_str()),
                schema::text(key.age_bracket.label()),
                schema::text(key.gender.label()),
                schema::text(key.parameter_key.as_str()),
                Value::Real(stat.average),
                Value::Integer(stat.sample_size as i64),
                schema::text(now.as_str()),
            ]
        })
        .collect();

    for group in rows.chunks(rows_per_statement(AVERAGE_COLUMNS.len())) {
        let sql = format!(
            "{}{WEIGHTED_UPSERT}",
            schema::insert_statement("demographic_averages", AVERAGE_COLUMNS, group.len())
        );
        conn.prepare_cached(&sql)?
            .execute(params_from_iter(group.iter().flatten()))?;
    }
    Ok(())
}

pub fn load_average(conn: &Connection, key: &BucketKey) -> Result<Option<BucketStat>, RepositoryError> {
    let raw = conn
        .query_row(
            "SELECT average_value, sample_size FROM demographic_averages \
             WHERE company_id = ?1 AND location = ?2 AND age_bracket = ?3 AND gender = ?4 \
             AND parameter_key = ?5",
            params![
                key.company_id,
                key.location,
                key.age_bracket.label(),
                key.gender.label(),
                key.parameter_key
            ],
            |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    Ok(raw.map(|(average, sample_size)| BucketStat {
        average,
        sample_size: u64::try_from(sample_size).unwrap_or(0),
    }))
}

/// Every bucket for one company, ordered by key.
pub fn averages_for_company(
    conn: &Connection,
    company_id: &str,
) -> Result<Vec<(BucketKey, BucketStat)>, RepositoryError> {
    let mut statement = conn.prepare_cached(
        "SELECT company_id, location, age_bracket, gender, parameter_key, average_value, sample_size \
         FROM demographic_averages WHERE company_id = ?1 \
         ORDER BY location, age_bracket, gender, parameter_key",
    )?;
    let raw = statement
        .query_map([company_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(
            |(company_id, location, bracket, gender, parameter_key, average, sample_size)| {
                Ok((
                    BucketKey {
                        company_id,
                        location,
                        age_bracket: decode("age bracket", bracket, AgeBracket::parse)?,
                        gender: decode("bucket gender", gender, Gender::parse)?,
                        parameter_key,
                    },
                    BucketStat {
                        average,
                        sample_size: u64::try_from(sample_size).unwrap_or(0),
                    },
                ))
            },
        )
        .collect()
}
