use super::{
    finalize_score, HealthIndexOutcome, HealthIndexVersion, PenaltyComponent, PenaltyDirection,
    PenaltyRule, SafetyFlag,
};
use crate::reference::{Gender, ReferenceSnapshot};
use crate::workflows::scoring::ParameterValues;

/// Additive penalty ladder plus condition and safety rules.
pub(super) fn score(
    snapshot: &ReferenceSnapshot,
    values: &ParameterValues,
    gender: Gender,
) -> HealthIndexOutcome {
    let rules = &snapshot.health_index;
    let mut components = Vec::new();
    let mut total = 0.0;

    for (key, value) in values {
        if !value.is_finite() {
            continue;
        }

        let matched = rules
            .penalty_rules
            .iter()
            .filter(|rule| &rule.parameter_key == key)
            .find(|rule| rule_matches(rule, snapshot, *value, gender));

        if let Some(rule) = matched {
            total += f64::from(rule.penalty);
            components.push(PenaltyComponent {
                source: key.clone(),
                penalty: f64::from(rule.penalty),
                notes: format!("{value} matched {} rule", rule.direction.as_str()),
            });
        }
    }

    for condition in &rules.condition_rules {
        if condition.expression.evaluate(values) == Some(true) {
            total += f64::from(condition.penalty);
            components.push(PenaltyComponent {
                source: condition.name.clone(),
                penalty: f64::from(condition.penalty),
                notes: condition.expression.to_string(),
            });
        }
    }

    let flags = rules
        .safety_rules
        .iter()
        .filter(|rule| rule.expression.evaluate(values) == Some(true))
        .map(|rule| SafetyFlag {
            code: rule.flag.clone(),
            message: rule.message.clone(),
        })
        .collect();

    HealthIndexOutcome {
        score: finalize_score(total),
        version: HealthIndexVersion::Legacy,
        completeness: None,
        low_confidence: false,
        flags,
        components,
    }
}

fn rule_matches(
    rule: &PenaltyRule,
    snapshot: &ReferenceSnapshot,
    value: f64,
    gender: Gender,
) -> bool {
    let range = snapshot
        .parameter(&rule.parameter_key)
        .and_then(|definition| definition.range_for(gender));

    let side_ok = match (rule.direction, range) {
        (PenaltyDirection::Above, Some(range)) => value > range.max,
        (PenaltyDirection::Below, Some(range)) => value < range.min,
        // Without a resolvable range the raw bounds alone decide.
        (PenaltyDirection::Above | PenaltyDirection::Below, None) => true,
        (PenaltyDirection::Range, _) => true,
    };

    side_ok && rule.bounds_contain(value)
}
