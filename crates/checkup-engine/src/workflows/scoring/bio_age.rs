use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::deviation::{high_deviation, low_deviation, two_sided_deviation};
use super::ParameterValues;
use crate::reference::{Gender, ReferenceSnapshot};

pub const MIN_PARAMETERS: usize = 6;
pub const STALE_AFTER_DAYS: i64 = 90;
pub const MAX_TOTAL_PENALTY: f64 = 15.0;
pub const MAX_ADJUSTMENT: f64 = 20.0;
pub const EXTREME_DEVIATION_PCT: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BioAgeDirection {
    High,
    Low,
    Both,
    /// Matches the raw value rather than a deviation percentage.
    Range,
}

impl BioAgeDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
            Self::Both => "both",
            Self::Range => "range",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "high" => Some(Self::High),
            "low" => Some(Self::Low),
            "both" => Some(Self::Both),
            "range" => Some(Self::Range),
            _ => None,
        }
    }
}

/// One rung of a parameter's penalty ladder. `[range_start, range_end)`, open-ended when `range_end` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioAgeRule {
    pub parameter_key: String,
    pub gender: Option<Gender>,
    pub direction: BioAgeDirection,
    pub range_start: f64,
    pub range_end: Option<f64>,
    pub penalty_years: f64,
    pub flag_extreme: bool,
}

impl BioAgeRule {
    fn applies_to(&self, gender: Gender) -> bool {
        self.gender.map_or(true, |rule_gender| rule_gender == gender)
    }

    fn window_contains(&self, measure: f64) -> bool {
        measure >= self.range_start && self.range_end.map_or(true, |end| measure < end)
    }
}

pub struct BioAgeInput<'v> {
    pub chronological_age: f64,
    pub gender: Gender,
    pub test_date: NaiveDate,
    pub values: &'v ParameterValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BioAgeSkip {
    InsufficientParameters { present: usize, required: usize },
    StaleTest { age_days: i64 },
    NonFinite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedBioAgeRule {
    pub parameter_key: String,
    pub direction: BioAgeDirection,
    pub measure: f64,
    pub penalty_years: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioAgeOutcome {
    pub biological_age: f64,
    pub total_penalty: f64,
    pub applied: Vec<AppliedBioAgeRule>,
    /// Parameters whose deviation reached the extreme threshold on a flagging rule.
    pub review_flags: Vec<String>,
    pub skipped: Option<BioAgeSkip>,
}

impl BioAgeOutcome {
    fn unchanged(chronological_age: f64, reason: BioAgeSkip) -> Self {
        Self {
            biological_age: chronological_age,
            total_penalty: 0.0,
            applied: Vec::new(),
            review_flags: Vec::new(),
            skipped: Some(reason),
        }
    }
}

pub struct BioAgeEstimator<'a> {
    snapshot: &'a ReferenceSnapshot,
    evaluation_date: NaiveDate,
}

impl<'a> BioAgeEstimator<'a> {
    pub fn new(snapshot: &'a ReferenceSnapshot, evaluation_date: NaiveDate) -> Self {
        Self {
            snapshot,
            evaluation_date,
        }
    }

    pub fn estimate(&self, input: &BioAgeInput<'_>) -> BioAgeOutcome {
        let chronological = input.chronological_age;

        let present = input.values.values().filter(|v| v.is_finite()).count();
        if present < MIN_PARAMETERS {
            return BioAgeOutcome::unchanged(
                chronological,
                BioAgeSkip::InsufficientParameters {
                    present,
                    required: MIN_PARAMETERS,
                },
            );
        }

        let age_days = (self.evaluation_date - input.test_date).num_days();
        if age_days > STALE_AFTER_DAYS {
            return BioAgeOutcome::unchanged(chronological, BioAgeSkip::StaleTest { age_days });
        }

        let mut applied = Vec::new();
        let mut review_flags = Vec::new();
        let mut total = 0.0;

        for (key, value) in input.values {
            if !value.is_finite() || *value <= 0.0 {
                continue;
            }
            let range = self
                .snapshot
                .parameter(key)
                .and_then(|definition| definition.range_for(input.gender));

            let matched = self
                .snapshot
                .bio_age_rules
                .iter()
                .filter(|rule| &rule.parameter_key == key && rule.applies_to(input.gender))
                .find_map(|rule| {
                    let measure = match rule.direction {
                        BioAgeDirection::Range => Some(*value),
                        BioAgeDirection::High => range
                            .and_then(|r| high_deviation(*value, &r))
                            .filter(|d| *d > 0.0)
                            .map(|d| d * 100.0),
                        BioAgeDirection::Low => range
                            .and_then(|r| low_deviation(*value, &r))
                            .filter(|d| *d > 0.0)
                            .map(|d| d * 100.0),
                        BioAgeDirection::Both => range
                            .and_then(|r| two_sided_deviation(*value, &r))
                            .filter(|d| *d > 0.0)
                            .map(|d| d * 100.0),
                    }?;
                    rule.window_contains(measure).then_some((rule, measure))
                });

            let Some((rule, measure)) = matched else {
                continue;
            };

            total += rule.penalty_years;
            applied.push(AppliedBioAgeRule {
                parameter_key: key.clone(),
                direction: rule.direction,
                measure,
                penalty_years: rule.penalty_years,
            });

            if rule.flag_extreme {
                let deviation_pct = match rule.direction {
                    BioAgeDirection::Range => range
                        .and_then(|r| two_sided_deviation(*value, &r))
                        .map(|d| d * 100.0)
                        .unwrap_or(0.0),
                    _ => measure,
                };
                if deviation_pct >= EXTREME_DEVIATION_PCT {
                    review_flags.push(key.clone());
                }
            }
        }

        let total = total.clamp(0.0, MAX_TOTAL_PENALTY);
        let total = (total * 10.0).round() / 10.0;
        let biological_age = (chronological + total).min(chronological + MAX_ADJUSTMENT);

        if !biological_age.is_finite() {
            return BioAgeOutcome::unchanged(chronological, BioAgeSkip::NonFinite);
        }

        BioAgeOutcome {
            biological_age,
            total_penalty: total,
            applied,
            review_flags,
            skipped: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::catalog;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn healthy_panel() -> ParameterValues {
        [
            ("hemoglobin", 14.5),
            ("fasting_glucose", 88.0),
            ("hba1c", 5.2),
            ("total_cholesterol", 170.0),
            ("ldl_cholesterol", 90.0),
            ("hdl_cholesterol", 55.0),
            ("triglycerides", 110.0),
            ("crp", 1.0),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }

    fn estimate(values: &ParameterValues, gender: Gender, test_date: NaiveDate) -> BioAgeOutcome {
        let snapshot = catalog::standard_snapshot();
        let estimator = BioAgeEstimator::new(&snapshot, date(2024, 6, 1));
        estimator.estimate(&BioAgeInput {
            chronological_age: 40.0,
            gender,
            test_date,
            values,
        })
    }

    #[test]
    fn healthy_panel_keeps_chronological_age() {
        let outcome = estimate(&healthy_panel(), Gender::Male, date(2024, 5, 20));
        assert_eq!(outcome.biological_age, 40.0);
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.skipped, None);
    }

    #[test]
    fn deviations_add_first_matching_rung() {
        let mut values = healthy_panel();
        // 130 vs max 100 => 30% deviation.
        values.insert("fasting_glucose".to_string(), 130.0);
        let outcome = estimate(&values, Gender::Male, date(2024, 5, 20));
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.applied[0].parameter_key, "fasting_glucose");
        assert!(outcome.biological_age > 40.0);
        assert_eq!(outcome.biological_age, 40.0 + outcome.applied[0].penalty_years);
    }

    #[test]
    fn fewer_than_six_parameters_is_skipped() {
        let values: ParameterValues = healthy_panel().into_iter().take(5).collect();
        let outcome = estimate(&values, Gender::Female, date(2024, 5, 20));
        assert_eq!(outcome.biological_age, 40.0);
        assert_eq!(
            outcome.skipped,
            Some(BioAgeSkip::InsufficientParameters {
                present: 5,
                required: MIN_PARAMETERS
            })
        );
    }

    #[test]
    fn stale_tests_are_skipped() {
        let mut values = healthy_panel();
        values.insert("fasting_glucose".to_string(), 300.0);
        let outcome = estimate(&values, Gender::Male, date(2024, 2, 1));
        assert_eq!(outcome.biological_age, 40.0);
        assert!(matches!(outcome.skipped, Some(BioAgeSkip::StaleTest { .. })));
    }

    #[test]
    fn total_penalty_is_capped() {
        let values: ParameterValues = [
            ("fasting_glucose", 400.0),
            ("hba1c", 14.0),
            ("total_cholesterol", 400.0),
            ("ldl_cholesterol", 350.0),
            ("triglycerides", 900.0),
            ("crp", 40.0),
            ("hdl_cholesterol", 10.0),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        let outcome = estimate(&values, Gender::Male, date(2024, 5, 30));
        assert_eq!(outcome.total_penalty, MAX_TOTAL_PENALTY);
        assert_eq!(outcome.biological_age, 55.0);
        assert!(outcome.review_flags.contains(&"crp".to_string()));
    }

    #[test]
    fn gender_specific_rules_only_apply_to_that_gender() {
        let mut values = healthy_panel();
        // Within the male HDL range, below the female one.
        values.insert("hdl_cholesterol".to_string(), 42.0);
        let male = estimate(&values, Gender::Male, date(2024, 5, 20));
        let female = estimate(&values, Gender::Female, date(2024, 5, 20));
        assert!(male.applied.is_empty());
        assert!(female
            .applied
            .iter()
            .any(|rule| rule.parameter_key == "hdl_cholesterol"));
    }
}
