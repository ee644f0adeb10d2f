mod legacy;
mod percentage;

use serde::{Deserialize, Serialize};

use super::expression::RuleExpr;
use super::ParameterValues;
use crate::reference::{Gender, ReferenceSnapshot};

pub const MAX_SCORE: u16 = 1000;

/// Which side of the reference range a v1 penalty rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyDirection {
    Above,
    Below,
    Range,
}

impl PenaltyDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::Range => "range",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "above" => Some(Self::Above),
            "below" => Some(Self::Below),
            "range" => Some(Self::Range),
            _ => None,
        }
    }
}

/// v1 ladder step. Bounds are raw values, `lower` inclusive and `upper` exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyRule {
    pub parameter_key: String,
    pub direction: PenaltyDirection,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub penalty: u16,
}

impl PenaltyRule {
    fn bounds_contain(&self, value: f64) -> bool {
        self.lower.map_or(true, |lower| value >= lower)
            && self.upper.map_or(true, |upper| value < upper)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub name: String,
    pub expression: RuleExpr,
    pub penalty: u16,
}

/// Raises a named flag without touching the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyRule {
    pub flag: String,
    pub expression: RuleExpr,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationDirection {
    HighBad,
    LowBad,
    TwoSided,
}

impl DeviationDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HighBad => "high_bad",
            Self::LowBad => "low_bad",
            Self::TwoSided => "two_sided",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "high_bad" => Some(Self::HighBad),
            "low_bad" => Some(Self::LowBad),
            "two_sided" => Some(Self::TwoSided),
            _ => None,
        }
    }
}

/// Per-parameter v2 scoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIndexConfig {
    pub parameter_key: String,
    pub include: bool,
    pub direction: DeviationDirection,
    pub pmax: f64,
    pub k_full: f64,
    pub weight: f64,
    pub active: bool,
}

impl HealthIndexConfig {
    /// Values used when a parameter has no configuration row.
    pub fn defaults_for(parameter_key: impl Into<String>) -> Self {
        Self {
            parameter_key: parameter_key.into(),
            include: false,
            direction: DeviationDirection::HighBad,
            pmax: 75.0,
            k_full: 0.25,
            weight: 1.0,
            active: true,
        }
    }

    pub fn is_scored(&self) -> bool {
        self.active && self.include
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationTrigger {
    AllOut,
    AnyTwo,
    AvgDevGeT,
}

impl CombinationTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllOut => "all_out",
            Self::AnyTwo => "any_two",
            Self::AvgDevGeT => "avg_dev_ge_t",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "all_out" => Some(Self::AllOut),
            "any_two" => Some(Self::AnyTwo),
            "avg_dev_ge_t" => Some(Self::AvgDevGeT),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationRule {
    pub name: String,
    pub members: Vec<String>,
    pub trigger: CombinationTrigger,
    /// Only read by `avg_dev_ge_t`.
    pub threshold: f64,
    pub combo_max: f64,
    pub scale_by_average: bool,
    pub active: bool,
}

/// Every Health Index rule table, both generations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthIndexRules {
    pub penalty_rules: Vec<PenaltyRule>,
    pub condition_rules: Vec<ConditionRule>,
    pub safety_rules: Vec<SafetyRule>,
    pub parameter_configs: Vec<HealthIndexConfig>,
    pub combination_rules: Vec<CombinationRule>,
}

impl HealthIndexRules {
    pub fn has_active_percentage_config(&self) -> bool {
        self.parameter_configs.iter().any(|config| config.active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthIndexVersion {
    #[serde(rename = "v1")]
    Legacy,
    #[serde(rename = "v2")]
    Percentage,
}

impl HealthIndexVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "v1",
            Self::Percentage => "v2",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "v1" => Some(Self::Legacy),
            "v2" => Some(Self::Percentage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFlag {
    pub code: String,
    pub message: String,
}

/// One deduction in the score audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyComponent {
    pub source: String,
    pub penalty: f64,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIndexOutcome {
    pub score: u16,
    pub version: HealthIndexVersion,
    /// Present/included ratio; only the percentage strategy tracks it.
    pub completeness: Option<f64>,
    pub low_confidence: bool,
    pub flags: Vec<SafetyFlag>,
    pub components: Vec<PenaltyComponent>,
}

/// Stateless evaluator over one reference snapshot.
pub struct HealthIndexEngine<'a> {
    snapshot: &'a ReferenceSnapshot,
}

impl<'a> HealthIndexEngine<'a> {
    pub fn new(snapshot: &'a ReferenceSnapshot) -> Self {
        Self { snapshot }
    }

    /// The percentage strategy supersedes the legacy one once any active v2 row exists.
    pub fn active_version(&self) -> HealthIndexVersion {
        if self.snapshot.health_index.has_active_percentage_config() {
            HealthIndexVersion::Percentage
        } else {
            HealthIndexVersion::Legacy
        }
    }

    pub fn evaluate(&self, values: &ParameterValues, gender: Gender) -> HealthIndexOutcome {
        self.evaluate_with(self.active_version(), values, gender)
    }

    /// Runs a specific strategy regardless of configuration, e.g. for side-by-side comparison.
    pub fn evaluate_with(
        &self,
        version: HealthIndexVersion,
        values: &ParameterValues,
        gender: Gender,
    ) -> HealthIndexOutcome {
        match version {
            HealthIndexVersion::Legacy => legacy::score(self.snapshot, values, gender),
            HealthIndexVersion::Percentage => percentage::score(self.snapshot, values, gender),
        }
    }
}

fn finalize_score(total_penalty: f64) -> u16 {
    let score = (f64::from(MAX_SCORE) - total_penalty).round();
    if score.is_finite() {
        score.clamp(0.0, f64::from(MAX_SCORE)) as u16
    } else {
        0
    }
}
