use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AgeBracket, ObservationJob};
use crate::reference::Gender;
use crate::workflows::ingestion::values::parse_numeric;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub company_id: String,
    pub location: String,
    pub age_bracket: AgeBracket,
    pub gender: Gender,
    pub parameter_key: String,
}

/// Running mean over `sample_size` observations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketStat {
    pub average: f64,
    pub sample_size: u64,
}

impl BucketStat {
    pub fn single(value: f64) -> Self {
        Self {
            average: value,
            sample_size: 1,
        }
    }

    /// Weighted merge; commutative and associative up to float rounding.
    pub fn merge(self, other: Self) -> Self {
        let total = self.sample_size + other.sample_size;
        if total == 0 {
            return self;
        }
        let weighted = self.average * self.sample_size as f64 + other.average * other.sample_size as f64;
        Self {
            average: weighted / total as f64,
            sample_size: total,
        }
    }
}

/// Groups every finite numeric observation in `jobs` by bucket key.
pub fn collect_deltas<'a>(
    jobs: impl IntoIterator<Item = &'a ObservationJob>,
) -> BTreeMap<BucketKey, BucketStat> {
    let mut deltas: BTreeMap<BucketKey, BucketStat> = BTreeMap::new();
    for job in jobs {
        for record in &job.records {
            for (parameter_key, raw) in &record.values {
                let Some(value) = parse_numeric(raw) else {
                    continue;
                };
                let key = BucketKey {
                    company_id: record.company_id.clone(),
                    location: record.location.clone(),
                    age_bracket: record.age_bracket,
                    gender: record.gender,
                    parameter_key: parameter_key.clone(),
                };
                deltas
                    .entry(key)
                    .and_modify(|stat| *stat = stat.merge(BucketStat::single(value)))
                    .or_insert_with(|| BucketStat::single(value));
            }
        }
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::demographics::ObservationRecord;
    use crate::workflows::ingestion::domain::BatchId;
    use proptest::prelude::*;

    fn job(key: &str, samples: &[(&str, &str)]) -> ObservationJob {
        ObservationJob {
            job_key: key.to_string(),
            batch_id: BatchId("batch-test".to_string()),
            records: samples
                .iter()
                .map(|(parameter, value)| ObservationRecord {
                    company_id: "ACME".to_string(),
                    location: "Pune".to_string(),
                    age_bracket: AgeBracket::Thirties,
                    gender: Gender::Female,
                    values: [(parameter.to_string(), value.to_string())].into_iter().collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn groups_numeric_values_and_skips_the_rest() {
        let jobs = vec![
            job("a:0", &[("hba1c", "5.0"), ("hba1c", "6.0"), ("blood_group", "O+")]),
            job("a:1", &[("hba1c", "7.0"), ("hba1c", "n/a")]),
        ];
        let deltas = collect_deltas(&jobs);

        assert_eq!(deltas.len(), 1);
        let stat = deltas.values().next().expect("bucket");
        assert_eq!(stat.sample_size, 3);
        assert!((stat.average - 6.0).abs() < 1e-9);
    }

    #[test]
    fn merge_matches_worked_example() {
        let stored = BucketStat {
            average: 100.0,
            sample_size: 4,
        };
        let delta = BucketStat {
            average: 110.0,
            sample_size: 1,
        };
        let merged = stored.merge(delta);
        assert_eq!(merged.sample_size, 5);
        assert!((merged.average - 102.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn merge_order_does_not_change_the_result(
            values in prop::collection::vec(0.0f64..500.0, 1..40),
            split in 0usize..40,
        ) {
            let split = split.min(values.len());
            let all = values
                .iter()
                .fold(None, |acc: Option<BucketStat>, value| {
                    Some(acc.map_or(BucketStat::single(*value), |stat| stat.merge(BucketStat::single(*value))))
                })
                .expect("non-empty");

            let (left, right) = values.split_at(split);
            let fold = |part: &[f64]| {
                part.iter().fold(BucketStat { average: 0.0, sample_size: 0 }, |stat, value| {
                    stat.merge(BucketStat::single(*value))
                })
            };
            let forward = fold(left).merge(fold(right));
            let backward = fold(right).merge(fold(left));

            prop_assert_eq!(forward.sample_size, all.sample_size);
            prop_assert!((forward.average - all.average).abs() < 1e-6);
            prop_assert!((backward.average - all.average).abs() < 1e-6);
        }
    }
}
