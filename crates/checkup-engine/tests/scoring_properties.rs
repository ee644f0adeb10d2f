use chrono::NaiveDate;
use checkup_engine::reference::catalog::{standard_parameters, standard_snapshot};
use checkup_engine::reference::{Gender, ReferenceSnapshot};
use checkup_engine::workflows::scoring::bio_age::{MAX_TOTAL_PENALTY, MIN_PARAMETERS};
use checkup_engine::workflows::scoring::health_index::{
    DeviationDirection, HealthIndexConfig, HealthIndexRules, MAX_SCORE,
};
use checkup_engine::workflows::scoring::{
    BioAgeEstimator, BioAgeInput, HealthIndexEngine, HealthIndexVersion, ParameterValues,
};
use proptest::prelude::*;

const PANEL: [&str; 12] = [
    "fasting_glucose",
    "hba1c",
    "total_cholesterol",
    "ldl_cholesterol",
    "hdl_cholesterol",
    "triglycerides",
    "hemoglobin",
    "creatinine",
    "alt",
    "crp",
    "bmi",
    "systolic_bp",
];

fn gender() -> impl Strategy<Value = Gender> {
    prop_oneof![Just(Gender::Male), Just(Gender::Female), Just(Gender::Other)]
}

fn panel() -> impl Strategy<Value = ParameterValues> {
    proptest::collection::vec(proptest::option::of(0.0f64..2_000.0), PANEL.len()).prop_map(
        |values| {
            PANEL
                .iter()
                .zip(values)
                .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
                .collect()
        },
    )
}

fn single(key: &str, value: f64) -> ParameterValues {
    std::iter::once((key.to_string(), value)).collect()
}

/// Percentage index scoring fasting glucose alone, deviation on both sides.
fn glucose_percentage_snapshot() -> ReferenceSnapshot {
    ReferenceSnapshot::new(
        Vec::<String>::new(),
        standard_parameters(),
        HealthIndexRules {
            parameter_configs: vec![HealthIndexConfig {
                include: true,
                direction: DeviationDirection::TwoSided,
                ..HealthIndexConfig::defaults_for("fasting_glucose")
            }],
            ..HealthIndexRules::default()
        },
        Vec::new(),
    )
}

fn evaluation_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
}

proptest! {
    #[test]
    fn both_score_versions_stay_in_bounds(values in panel(), gender in gender()) {
        let snapshot = standard_snapshot();
        let engine = HealthIndexEngine::new(&snapshot);

        for version in [HealthIndexVersion::Legacy, HealthIndexVersion::Percentage] {
            let outcome = engine.evaluate_with(version, &values, gender);
            prop_assert!(outcome.score <= MAX_SCORE);
            prop_assert_eq!(outcome.version, version);
            if let Some(completeness) = outcome.completeness {
                prop_assert!((0.0..=1.0).contains(&completeness));
            }
        }
    }

    #[test]
    fn biological_age_never_drops_below_chronological(
        values in panel(),
        gender in gender(),
        age in 18.0f64..75.0,
        days_before in 0i64..200,
    ) {
        let snapshot = standard_snapshot();
        let estimator = BioAgeEstimator::new(&snapshot, evaluation_date());
        let test_date = evaluation_date() - chrono::Duration::days(days_before);

        let outcome = estimator.estimate(&BioAgeInput {
            chronological_age: age,
            gender,
            test_date,
            values: &values,
        });

        prop_assert!(outcome.biological_age >= age);
        prop_assert!(outcome.biological_age <= age + MAX_TOTAL_PENALTY + 1e-9);
        if values.len() < MIN_PARAMETERS || days_before > 90 {
            prop_assert!(outcome.skipped.is_some());
            prop_assert_eq!(outcome.biological_age, age);
        }
    }
}

proptest! {
    #[test]
    fn legacy_score_never_improves_as_glucose_rises(base in 100.0f64..400.0, extra in 0.0f64..400.0) {
        let snapshot = standard_snapshot();
        let engine = HealthIndexEngine::new(&snapshot);

        let nearer = engine.evaluate_with(HealthIndexVersion::Legacy, &single("fasting_glucose", base), Gender::Male);
        let farther = engine.evaluate_with(HealthIndexVersion::Legacy, &single("fasting_glucose", base + extra), Gender::Male);

        prop_assert!(farther.score <= nearer.score);
    }

    #[test]
    fn legacy_score_never_improves_as_hdl_falls(base in 1.0f64..40.0, drop in 0.0f64..1.0) {
        let snapshot = standard_snapshot();
        let engine = HealthIndexEngine::new(&snapshot);
        let lower = base * (1.0 - drop * 0.99);

        let nearer = engine.evaluate_with(HealthIndexVersion::Legacy, &single("hdl_cholesterol", base), Gender::Male);
        let farther = engine.evaluate_with(HealthIndexVersion::Legacy, &single("hdl_cholesterol", lower), Gender::Male);

        prop_assert!(farther.score <= nearer.score);
    }

    #[test]
    fn percentage_score_is_monotone_on_both_sides(offset in 0.0f64..300.0, extra in 0.0f64..300.0) {
        let snapshot = glucose_percentage_snapshot();
        let engine = HealthIndexEngine::new(&snapshot);
        prop_assert_eq!(engine.active_version(), HealthIndexVersion::Percentage);

        let score_of = |value: f64| engine.evaluate(&single("fasting_glucose", value), Gender::Female).score;
        prop_assert!(score_of(100.0 + offset + extra) <= score_of(100.0 + offset));

        let low_near = 70.0 - (offset / 300.0) * 60.0;
        let low_far = low_near - (extra / 300.0) * (low_near - 1.0);
        prop_assert!(score_of(low_far) <= score_of(low_near));
    }
}

#[test]
fn an_in_range_panel_scores_full_marks() {
    let snapshot = standard_snapshot();
    let engine = HealthIndexEngine::new(&snapshot);
    let values: ParameterValues = [
        ("fasting_glucose", 88.0),
        ("hba1c", 5.1),
        ("total_cholesterol", 170.0),
        ("ldl_cholesterol", 90.0),
        ("hdl_cholesterol", 55.0),
        ("triglycerides", 110.0),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect();

    let outcome = engine.evaluate(&values, Gender::Female);

    assert_eq!(outcome.score, MAX_SCORE);
    assert!(outcome.flags.is_empty());
}
