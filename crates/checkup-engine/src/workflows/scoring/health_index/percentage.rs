use std::collections::BTreeMap;

use super::{
    finalize_score, CombinationRule, CombinationTrigger, DeviationDirection, HealthIndexConfig,
    HealthIndexOutcome, HealthIndexVersion, PenaltyComponent, SafetyFlag,
};
use crate::reference::{Gender, ReferenceSnapshot};
use crate::workflows::scoring::deviation::{high_deviation, low_deviation, two_sided_deviation};
use crate::workflows::scoring::ParameterValues;

const LOW_CONFIDENCE_BELOW: f64 = 0.6;
const CRITICAL_SCORE_FLOOR: u16 = 400;

struct CriticalThreshold {
    parameter: &'static str,
    code: &'static str,
    threshold: f64,
    inclusive: bool,
    message: &'static str,
}

impl CriticalThreshold {
    fn crossed(&self, value: f64) -> bool {
        if self.inclusive {
            value >= self.threshold
        } else {
            value > self.threshold
        }
    }
}

const CRITICAL_THRESHOLDS: [CriticalThreshold; 4] = [
    CriticalThreshold {
        parameter: "crp",
        code: "acute_inflammation",
        threshold: 10.0,
        inclusive: false,
        message: "CRP above 10 mg/L indicates acute inflammation",
    },
    CriticalThreshold {
        parameter: "hba1c",
        code: "poor_glycemic_control",
        threshold: 9.0,
        inclusive: true,
        message: "HbA1c at or above 9% indicates poor long-term glucose control",
    },
    CriticalThreshold {
        parameter: "fasting_glucose",
        code: "severe_hyperglycemia",
        threshold: 200.0,
        inclusive: true,
        message: "fasting glucose at or above 200 mg/dL",
    },
    CriticalThreshold {
        parameter: "ldl_cholesterol",
        code: "very_high_ldl",
        threshold: 190.0,
        inclusive: true,
        message: "LDL cholesterol at or above 190 mg/dL",
    },
];

#[derive(Debug, Clone, Copy)]
struct Evaluated {
    deviation: f64,
    severity: f64,
}

/// Percentage-deviation scoring with cross-parameter combination penalties.
pub(super) fn score(
    snapshot: &ReferenceSnapshot,
    values: &ParameterValues,
    gender: Gender,
) -> HealthIndexOutcome {
    let rules = &snapshot.health_index;
    let mut components = Vec::new();
    let mut evaluated: BTreeMap<&str, Evaluated> = BTreeMap::new();
    let mut included = 0usize;
    let mut total = 0.0;

    for config in rules.parameter_configs.iter().filter(|c| c.is_scored()) {
        let Some(range) = snapshot
            .parameter(&config.parameter_key)
            .and_then(|definition| definition.range_for(gender))
        else {
            continue;
        };

        let Some(value) = values.get(&config.parameter_key).copied() else {
            included += 1;
            continue;
        };

        let deviation = match config.direction {
            DeviationDirection::HighBad => high_deviation(value, &range),
            DeviationDirection::LowBad => low_deviation(value, &range),
            DeviationDirection::TwoSided => two_sided_deviation(value, &range),
        };
        let Some(deviation) = deviation else {
            continue;
        };

        included += 1;
        let severity = severity(deviation, config);
        let penalty = config.weight * config.pmax * severity;
        if penalty > 0.0 {
            total += penalty;
            components.push(PenaltyComponent {
                source: config.parameter_key.clone(),
                penalty,
                notes: format!(
                    "deviation {:.1}% ({}), severity {severity:.2}",
                    deviation * 100.0,
                    config.direction.as_str()
                ),
            });
        }
        evaluated.insert(config.parameter_key.as_str(), Evaluated { deviation, severity });
    }

    for rule in rules.combination_rules.iter().filter(|rule| rule.active) {
        if let Some(penalty) = combination_penalty(rule, &evaluated) {
            total += penalty;
            components.push(PenaltyComponent {
                source: rule.name.clone(),
                penalty,
                notes: format!("{} over {}", rule.trigger.as_str(), rule.members.join(", ")),
            });
        }
    }

    let completeness = if included == 0 {
        0.0
    } else {
        evaluated.len() as f64 / included as f64
    };

    let score = finalize_score(total);
    let mut flags: Vec<SafetyFlag> = CRITICAL_THRESHOLDS
        .iter()
        .filter(|threshold| {
            values
                .get(threshold.parameter)
                .is_some_and(|value| value.is_finite() && threshold.crossed(*value))
        })
        .map(|threshold| SafetyFlag {
            code: threshold.code.to_string(),
            message: threshold.message.to_string(),
        })
        .collect();

    if score < CRITICAL_SCORE_FLOOR {
        flags.push(SafetyFlag {
            code: "critical_health_index".to_string(),
            message: format!("health index {score} below {CRITICAL_SCORE_FLOOR}"),
        });
    }

    HealthIndexOutcome {
        score,
        version: HealthIndexVersion::Percentage,
        completeness: Some(completeness),
        low_confidence: completeness < LOW_CONFIDENCE_BELOW,
        flags,
        components,
    }
}

fn severity(deviation: f64, config: &HealthIndexConfig) -> f64 {
    if deviation <= 0.0 {
        return 0.0;
    }
    if config.k_full <= 0.0 {
        return 1.0;
    }
    (deviation / config.k_full).min(1.0)
}

fn combination_penalty(rule: &CombinationRule, evaluated: &BTreeMap<&str, Evaluated>) -> Option<f64> {
    if rule.members.len() < 2 {
        return None;
    }

    let deviating: Vec<f64> = rule
        .members
        .iter()
        .filter_map(|member| evaluated.get(member.as_str()))
        .filter(|entry| entry.deviation > 0.0)
        .map(|entry| entry.severity)
        .collect();

    let mean_severity = if deviating.is_empty() {
        0.0
    } else {
        deviating.iter().sum::<f64>() / deviating.len() as f64
    };

    let fires = match rule.trigger {
        CombinationTrigger::AllOut => deviating.len() == rule.members.len(),
        CombinationTrigger::AnyTwo => deviating.len() >= 2,
        CombinationTrigger::AvgDevGeT => !deviating.is_empty() && mean_severity >= rule.threshold,
    };

    if !fires {
        return None;
    }

    Some(if rule.scale_by_average {
        rule.combo_max * mean_severity
    } else {
        rule.combo_max
    })
}
