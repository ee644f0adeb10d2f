//! Built-in checkup panel used to seed empty stores, drive the CLI demo and back tests.

use super::{Gender, ParameterDefinition, ParameterKind, ReferenceSnapshot};
use crate::workflows::scoring::bio_age::{BioAgeDirection, BioAgeRule};
use crate::workflows::scoring::expression::{Comparator, RuleExpr};
use crate::workflows::scoring::health_index::{
    CombinationRule, CombinationTrigger, ConditionRule, DeviationDirection, HealthIndexConfig,
    HealthIndexRules, PenaltyDirection, PenaltyRule, SafetyRule,
};

pub const STANDARD_COMPANIES: [&str; 3] = ["ACME", "GLOBEX", "INITECH"];

struct Spec {
    key: &'static str,
    display_name: &'static str,
    unit: Option<&'static str>,
    kind: ParameterKind,
    general: Option<(f64, f64)>,
    male: Option<(f64, f64)>,
    female: Option<(f64, f64)>,
    category: &'static str,
    aliases: &'static [&'static str],
}

const fn numeric(
    key: &'static str,
    display_name: &'static str,
    unit: &'static str,
    general: (f64, f64),
    category: &'static str,
    aliases: &'static [&'static str],
) -> Spec {
    Spec {
        key,
        display_name,
        unit: Some(unit),
        kind: ParameterKind::Numeric,
        general: Some(general),
        male: None,
        female: None,
        category,
        aliases,
    }
}

const fn gendered(spec: Spec, male: (f64, f64), female: (f64, f64)) -> Spec {
    Spec {
        male: Some(male),
        female: Some(female),
        ..spec
    }
}

const fn unranged(
    key: &'static str,
    display_name: &'static str,
    kind: ParameterKind,
    category: &'static str,
    aliases: &'static [&'static str],
) -> Spec {
    Spec {
        key,
        display_name,
        unit: None,
        kind,
        general: None,
        male: None,
        female: None,
        category,
        aliases,
    }
}

const PANEL: [Spec; 19] = [
    gendered(
        numeric("hemoglobin", "Hemoglobin", "g/dL", (12.0, 17.5), "Haematology", &["Hb", "HGB", "Haemoglobin"]),
        (13.5, 17.5),
        (12.0, 15.5),
    ),
    numeric("wbc_count", "WBC Count", "10^3/uL", (4.0, 11.0), "Haematology", &["WBC", "TLC", "Total Leucocyte Count"]),
    numeric("platelet_count", "Platelet Count", "10^3/uL", (150.0, 450.0), "Haematology", &["Platelets", "PLT"]),
    numeric("fasting_glucose", "Fasting Glucose", "mg/dL", (70.0, 100.0), "Diabetes", &["FBS", "Fasting Blood Sugar", "Glucose Fasting"]),
    numeric("hba1c", "HbA1c", "%", (4.0, 5.6), "Diabetes", &["A1C", "Glycated Hemoglobin"]),
    numeric("total_cholesterol", "Total Cholesterol", "mg/dL", (125.0, 200.0), "Lipid Profile", &["Cholesterol", "TC"]),
    numeric("ldl_cholesterol", "LDL Cholesterol", "mg/dL", (50.0, 100.0), "Lipid Profile", &["LDL", "LDL-C"]),
    gendered(
        numeric("hdl_cholesterol", "HDL Cholesterol", "mg/dL", (40.0, 80.0), "Lipid Profile", &["HDL", "HDL-C"]),
        (40.0, 60.0),
        (50.0, 80.0),
    ),
    numeric("triglycerides", "Triglycerides", "mg/dL", (50.0, 150.0), "Lipid Profile", &["TG", "Triglyceride"]),
    gendered(
        numeric("creatinine", "Creatinine", "mg/dL", (0.6, 1.3), "Kidney Function", &["Serum Creatinine"]),
        (0.7, 1.3),
        (0.6, 1.1),
    ),
    numeric("alt", "ALT", "U/L", (7.0, 56.0), "Liver Function", &["SGPT", "Alanine Aminotransferase"]),
    numeric("crp", "CRP", "mg/L", (0.1, 3.0), "Inflammation", &["C-Reactive Protein", "hs-CRP"]),
    numeric("vitamin_d", "Vitamin D", "ng/mL", (30.0, 100.0), "Vitamins", &["Vit D", "25-OH Vitamin D"]),
    numeric("bmi", "BMI", "kg/m2", (18.5, 24.9), "Vitals", &["Body Mass Index"]),
    numeric("systolic_bp", "Systolic BP", "mmHg", (90.0, 120.0), "Vitals", &["Systolic", "SBP"]),
    numeric("diastolic_bp", "Diastolic BP", "mmHg", (60.0, 80.0), "Vitals", &["Diastolic", "DBP"]),
    unranged("blood_pressure", "Blood Pressure", ParameterKind::CombinedBloodPressure, "Vitals", &["BP"]),
    unranged("blood_group", "Blood Group", ParameterKind::Text, "General", &["Blood Type"]),
    unranged("remarks", "Remarks", ParameterKind::Text, "General", &["Doctor Remarks", "Notes"]),
];

pub fn standard_parameters() -> Vec<ParameterDefinition> {
    PANEL
        .iter()
        .enumerate()
        .map(|(index, spec)| ParameterDefinition {
            key: spec.key.to_string(),
            display_name: spec.display_name.to_string(),
            unit: spec.unit.map(str::to_string),
            kind: spec.kind,
            reference_min: spec.general.map(|(min, _)| min),
            reference_max: spec.general.map(|(_, max)| max),
            male_min: spec.male.map(|(min, _)| min),
            male_max: spec.male.map(|(_, max)| max),
            female_min: spec.female.map(|(min, _)| min),
            female_max: spec.female.map(|(_, max)| max),
            priority: index as i32 + 1,
            category: Some(spec.category.to_string()),
            aliases: spec.aliases.iter().map(|alias| alias.to_string()).collect(),
        })
        .collect()
}

fn ladder(
    key: &str,
    direction: PenaltyDirection,
    steps: &[(Option<f64>, Option<f64>, u16)],
) -> Vec<PenaltyRule> {
    steps
        .iter()
        .map(|(lower, upper, penalty)| PenaltyRule {
            parameter_key: key.to_string(),
            direction,
            lower: *lower,
            upper: *upper,
            penalty: *penalty,
        })
        .collect()
}

/// Legacy v1 tables. No v2 configuration, so the legacy strategy is active.
pub fn standard_health_index_rules() -> HealthIndexRules {
    use PenaltyDirection::{Above, Below};

    let mut penalty_rules = Vec::new();
    penalty_rules.extend(ladder("fasting_glucose", Above, &[(None, Some(126.0), 20), (Some(126.0), Some(200.0), 60), (Some(200.0), None, 120)]));
    penalty_rules.extend(ladder("fasting_glucose", Below, &[(Some(54.0), None, 20), (None, Some(54.0), 60)]));
    penalty_rules.extend(ladder("hba1c", Above, &[(None, Some(6.5), 30), (Some(6.5), Some(9.0), 80), (Some(9.0), None, 150)]));
    penalty_rules.extend(ladder("total_cholesterol", Above, &[(None, Some(240.0), 20), (Some(240.0), None, 50)]));
    penalty_rules.extend(ladder("ldl_cholesterol", Above, &[(None, Some(130.0), 15), (Some(130.0), Some(160.0), 30), (Some(160.0), Some(190.0), 60), (Some(190.0), None, 100)]));
    penalty_rules.extend(ladder("hdl_cholesterol", Below, &[(Some(35.0), None, 20), (None, Some(35.0), 50)]));
    penalty_rules.extend(ladder("triglycerides", Above, &[(None, Some(200.0), 20), (Some(200.0), Some(500.0), 50), (Some(500.0), None, 100)]));
    penalty_rules.extend(ladder("crp", Above, &[(None, Some(10.0), 30), (Some(10.0), None, 80)]));
    penalty_rules.extend(ladder("bmi", Above, &[(None, Some(30.0), 20), (Some(30.0), None, 60)]));
    penalty_rules.extend(ladder("bmi", Below, &[(None, None, 20)]));
    penalty_rules.extend(ladder("systolic_bp", Above, &[(None, Some(140.0), 15), (Some(140.0), Some(160.0), 40), (Some(160.0), None, 80)]));
    penalty_rules.extend(ladder("diastolic_bp", Above, &[(None, Some(90.0), 15), (Some(90.0), Some(100.0), 40), (Some(100.0), None, 80)]));
    penalty_rules.extend(ladder("hemoglobin", Below, &[(None, None, 30)]));
    penalty_rules.extend(ladder("creatinine", Above, &[(None, None, 40)]));
    penalty_rules.extend(ladder("alt", Above, &[(None, Some(112.0), 20), (Some(112.0), None, 50)]));
    penalty_rules.extend(ladder("vitamin_d", Below, &[(Some(20.0), None, 10), (None, Some(20.0), 30)]));

    let condition_rules = vec![
        ConditionRule {
            name: "metabolic_syndrome_pattern".to_string(),
            expression: RuleExpr::All {
                terms: vec![
                    RuleExpr::compare("fasting_glucose", Comparator::Ge, 100.0),
                    RuleExpr::compare("triglycerides", Comparator::Ge, 150.0),
                    RuleExpr::compare("hdl_cholesterol", Comparator::Lt, 40.0),
                ],
            },
            penalty: 50,
        },
        ConditionRule {
            name: "atherogenic_dyslipidemia".to_string(),
            expression: RuleExpr::Any {
                terms: vec![
                    RuleExpr::compare("ldl_cholesterol", Comparator::Ge, 160.0),
                    RuleExpr::compare("triglycerides", Comparator::Ge, 200.0),
                ],
            },
            penalty: 30,
        },
    ];

    let safety_rules = vec![
        SafetyRule {
            flag: "severe_hyperglycemia".to_string(),
            expression: RuleExpr::compare("fasting_glucose", Comparator::Ge, 250.0),
            message: "fasting glucose at or above 250 mg/dL".to_string(),
        },
        SafetyRule {
            flag: "acute_inflammation".to_string(),
            expression: RuleExpr::compare("crp", Comparator::Gt, 10.0),
            message: "CRP above 10 mg/L".to_string(),
        },
        SafetyRule {
            flag: "hypertensive_crisis".to_string(),
            expression: RuleExpr::Any {
                terms: vec![
                    RuleExpr::compare("systolic_bp", Comparator::Ge, 180.0),
                    RuleExpr::compare("diastolic_bp", Comparator::Ge, 120.0),
                ],
            },
            message: "blood pressure in hypertensive crisis range".to_string(),
        },
    ];

    HealthIndexRules {
        penalty_rules,
        condition_rules,
        safety_rules,
        parameter_configs: Vec::new(),
        combination_rules: Vec::new(),
    }
}

pub fn percentage_index_configs() -> Vec<HealthIndexConfig> {
    use DeviationDirection::{HighBad, LowBad, TwoSided};

    let scored: [(&str, DeviationDirection, f64, f64); 14] = [
        ("fasting_glucose", HighBad, 75.0, 1.0),
        ("hba1c", HighBad, 75.0, 1.0),
        ("total_cholesterol", HighBad, 75.0, 0.8),
        ("ldl_cholesterol", HighBad, 75.0, 1.0),
        ("hdl_cholesterol", LowBad, 75.0, 1.0),
        ("triglycerides", HighBad, 75.0, 1.0),
        ("crp", HighBad, 50.0, 1.0),
        ("bmi", TwoSided, 75.0, 1.0),
        ("systolic_bp", HighBad, 75.0, 1.0),
        ("diastolic_bp", HighBad, 75.0, 1.0),
        ("hemoglobin", TwoSided, 75.0, 0.8),
        ("creatinine", HighBad, 75.0, 1.0),
        ("alt", HighBad, 75.0, 0.8),
        ("vitamin_d", LowBad, 40.0, 1.0),
    ];

    scored
        .into_iter()
        .map(|(key, direction, pmax, weight)| HealthIndexConfig {
            include: true,
            direction,
            pmax,
            weight,
            ..HealthIndexConfig::defaults_for(key)
        })
        .collect()
}

pub fn combination_rules() -> Vec<CombinationRule> {
    let members = |keys: &[&str]| keys.iter().map(|key| key.to_string()).collect::<Vec<_>>();
    vec![
        CombinationRule {
            name: "metabolic_cluster".to_string(),
            members: members(&["fasting_glucose", "triglycerides", "hdl_cholesterol"]),
            trigger: CombinationTrigger::AllOut,
            threshold: 0.0,
            combo_max: 100.0,
            scale_by_average: false,
            active: true,
        },
        CombinationRule {
            name: "lipid_burden".to_string(),
            members: members(&["ldl_cholesterol", "triglycerides", "total_cholesterol"]),
            trigger: CombinationTrigger::AnyTwo,
            threshold: 0.0,
            combo_max: 60.0,
            scale_by_average: true,
            active: true,
        },
        CombinationRule {
            name: "glycemic_load".to_string(),
            members: members(&["fasting_glucose", "hba1c"]),
            trigger: CombinationTrigger::AvgDevGeT,
            threshold: 0.5,
            combo_max: 80.0,
            scale_by_average: false,
            active: true,
        },
    ]
}

fn rungs(
    key: &str,
    gender: Option<Gender>,
    direction: BioAgeDirection,
    steps: &[(f64, Option<f64>, f64)],
    flag_top: bool,
) -> Vec<BioAgeRule> {
    let last = steps.len().saturating_sub(1);
    steps
        .iter()
        .enumerate()
        .map(|(index, (start, end, years))| BioAgeRule {
            parameter_key: key.to_string(),
            gender,
            direction,
            range_start: *start,
            range_end: *end,
            penalty_years: *years,
            flag_extreme: flag_top && index == last,
        })
        .collect()
}

/// Deviation ladders in percent; `systolic_bp` matches raw mmHg.
pub fn standard_bio_age_rules() -> Vec<BioAgeRule> {
    use BioAgeDirection::{Both, High, Low, Range};

    [
        rungs("fasting_glucose", None, High, &[(0.0, Some(10.0), 0.5), (10.0, Some(30.0), 1.0), (30.0, Some(60.0), 2.0), (60.0, None, 3.0)], true),
        rungs("hba1c", None, High, &[(0.0, Some(10.0), 0.5), (10.0, Some(25.0), 1.0), (25.0, Some(50.0), 2.0), (50.0, None, 3.0)], true),
        rungs("total_cholesterol", None, High, &[(0.0, Some(20.0), 0.5), (20.0, Some(50.0), 1.0), (50.0, None, 2.0)], false),
        rungs("ldl_cholesterol", None, High, &[(0.0, Some(30.0), 1.0), (30.0, Some(60.0), 2.0), (60.0, None, 3.0)], true),
        rungs("hdl_cholesterol", Some(Gender::Female), Low, &[(0.0, Some(20.0), 1.0)], false),
        rungs("hdl_cholesterol", None, Low, &[(0.0, Some(25.0), 1.0), (25.0, None, 2.0)], false),
        rungs("triglycerides", None, High, &[(0.0, Some(50.0), 0.5), (50.0, Some(100.0), 1.0), (100.0, None, 2.0)], true),
        rungs("crp", None, High, &[(0.0, Some(100.0), 1.0), (100.0, None, 2.5)], true),
        rungs("systolic_bp", None, Range, &[(140.0, Some(160.0), 1.0), (160.0, None, 2.0)], false),
        rungs("hemoglobin", None, Low, &[(0.0, None, 1.0)], false),
        rungs("creatinine", None, High, &[(0.0, Some(30.0), 1.0), (30.0, None, 2.0)], true),
        rungs("bmi", None, Both, &[(0.0, Some(20.0), 0.5), (20.0, None, 1.5)], false),
        rungs("alt", None, High, &[(0.0, None, 1.0)], false),
        rungs("vitamin_d", None, Low, &[(0.0, None, 0.5)], false),
    ]
    .into_iter()
    .flatten()
    .collect()
}

pub fn standard_snapshot() -> ReferenceSnapshot {
    ReferenceSnapshot::new(
        STANDARD_COMPANIES.iter().map(|company| company.to_string()),
        standard_parameters(),
        standard_health_index_rules(),
        standard_bio_age_rules(),
    )
}

/// Standard snapshot with the v2 percentage tables switched on.
pub fn standard_snapshot_with_percentage_index() -> ReferenceSnapshot {
    let mut rules = standard_health_index_rules();
    rules.parameter_configs = percentage_index_configs();
    rules.combination_rules = combination_rules();
    ReferenceSnapshot::new(
        STANDARD_COMPANIES.iter().map(|company| company.to_string()),
        standard_parameters(),
        rules,
        standard_bio_age_rules(),
    )
}
