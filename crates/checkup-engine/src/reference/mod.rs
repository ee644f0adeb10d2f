//! Read-only reference data the engine validates and scores against.
//!
//! A [`ReferenceSnapshot`] is taken once per validation + write cycle so the
//! validator and the scoring engines always see the same rule set.

pub mod cache;
pub mod catalog;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::workflows::ingestion::normalizer::normalize_header;
use crate::workflows::scoring::bio_age::BioAgeRule;
use crate::workflows::scoring::health_index::HealthIndexRules;

pub use cache::{ReferenceCache, ReferenceSource};

pub const SYSTOLIC_KEY: &str = "systolic_bp";
pub const DIASTOLIC_KEY: &str = "diastolic_bp";

/// Closed set of genders accepted on upload. Matching is case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::Other];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Male" => Some(Self::Male),
            "Female" => Some(Self::Female),
            "Other" => Some(Self::Other),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Other => "Other",
        }
    }
}

/// How a parameter's raw cell is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Numeric,
    Text,
    /// A single `systolic/diastolic` cell that expands into two numeric facts.
    CombinedBloodPressure,
}

impl ParameterKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Text => "text",
            Self::CombinedBloodPressure => "combined_blood_pressure",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "numeric" => Some(Self::Numeric),
            "text" => Some(Self::Text),
            "combined_blood_pressure" => Some(Self::CombinedBloodPressure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub min: f64,
    pub max: f64,
}

impl ReferenceRange {
    pub fn new(min: f64, max: f64) -> Option<Self> {
        (min.is_finite() && max.is_finite() && min <= max).then_some(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub key: String,
    pub display_name: String,
    pub unit: Option<String>,
    pub kind: ParameterKind,
    pub reference_min: Option<f64>,
    pub reference_max: Option<f64>,
    pub male_min: Option<f64>,
    pub male_max: Option<f64>,
    pub female_min: Option<f64>,
    pub female_max: Option<f64>,
    pub priority: i32,
    pub category: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ParameterDefinition {
    /// Gender-specific bounds win when both are configured; otherwise the general range.
    pub fn range_for(&self, gender: Gender) -> Option<ReferenceRange> {
        let specific = match gender {
            Gender::Male => pair(self.male_min, self.male_max),
            Gender::Female => pair(self.female_min, self.female_max),
            Gender::Other => None,
        };

        specific.or_else(|| pair(self.reference_min, self.reference_max))
    }
}

fn pair(min: Option<f64>, max: Option<f64>) -> Option<ReferenceRange> {
    match (min, max) {
        (Some(min), Some(max)) => ReferenceRange::new(min, max),
        _ => None,
    }
}

/// Consistent view of every reference table the engine reads.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    pub companies: BTreeSet<String>,
    pub parameters: BTreeMap<String, ParameterDefinition>,
    pub health_index: HealthIndexRules,
    pub bio_age_rules: Vec<BioAgeRule>,
    lookup: HashMap<String, String>,
}

impl ReferenceSnapshot {
    pub fn new(
        companies: impl IntoIterator<Item = String>,
        parameters: impl IntoIterator<Item = ParameterDefinition>,
        health_index: HealthIndexRules,
        bio_age_rules: Vec<BioAgeRule>,
    ) -> Self {
        let parameters: BTreeMap<String, ParameterDefinition> = parameters
            .into_iter()
            .map(|definition| (definition.key.clone(), definition))
            .collect();

        let mut lookup = HashMap::new();
        // Aliases first so a direct key always wins on collision.
        for definition in parameters.values() {
            for alias in &definition.aliases {
                lookup.insert(normalize_header(alias), definition.key.clone());
            }
        }
        for definition in parameters.values() {
            lookup.insert(normalize_header(&definition.key), definition.key.clone());
            lookup.insert(normalize_header(&definition.display_name), definition.key.clone());
        }

        Self {
            companies: companies.into_iter().collect(),
            parameters,
            health_index,
            bio_age_rules,
            lookup,
        }
    }

    /// Resolves a column header or parameter name via direct key or text alias.
    pub fn resolve_parameter(&self, raw: &str) -> Option<&ParameterDefinition> {
        let normalized = normalize_header(raw);
        if normalized.is_empty() {
            return None;
        }
        self.lookup
            .get(&normalized)
            .or_else(|| self.lookup.get(&normalized.replace(' ', "_")))
            .and_then(|key| self.parameters.get(key))
    }

    pub fn parameter(&self, key: &str) -> Option<&ParameterDefinition> {
        self.parameters.get(key)
    }

    pub fn has_company(&self, company_id: &str) -> bool {
        self.companies.contains(company_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hemoglobin() -> ParameterDefinition {
        ParameterDefinition {
            key: "hemoglobin".to_string(),
            display_name: "Hemoglobin".to_string(),
            unit: Some("g/dL".to_string()),
            kind: ParameterKind::Numeric,
            reference_min: Some(12.0),
            reference_max: Some(17.5),
            male_min: Some(13.5),
            male_max: Some(17.5),
            female_min: Some(12.0),
            female_max: None,
            priority: 1,
            category: Some("Haematology".to_string()),
            aliases: vec!["Hb".to_string(), "Haemoglobin".to_string()],
        }
    }

    #[test]
    fn gender_specific_range_wins_when_complete() {
        let definition = hemoglobin();
        assert_eq!(
            definition.range_for(Gender::Male),
            Some(ReferenceRange { min: 13.5, max: 17.5 })
        );
        // Female max missing, so the general range applies.
        assert_eq!(
            definition.range_for(Gender::Female),
            Some(ReferenceRange { min: 12.0, max: 17.5 })
        );
        assert_eq!(
            definition.range_for(Gender::Other),
            Some(ReferenceRange { min: 12.0, max: 17.5 })
        );
    }

    #[test]
    fn resolves_keys_aliases_and_display_names() {
        let snapshot = ReferenceSnapshot::new(
            vec!["ACME".to_string()],
            vec![hemoglobin()],
            HealthIndexRules::default(),
            Vec::new(),
        );

        for header in ["hemoglobin", "HB", " Haemoglobin ", "\u{feff}Hemoglobin"] {
            assert_eq!(
                snapshot.resolve_parameter(header).map(|p| p.key.as_str()),
                Some("hemoglobin"),
                "header {header:?}"
            );
        }
        assert!(snapshot.resolve_parameter("platelets").is_none());
        assert!(snapshot.resolve_parameter("   ").is_none());
        assert!(snapshot.has_company("ACME"));
        assert!(!snapshot.has_company("acme"));
    }

    #[test]
    fn gender_parse_is_case_sensitive() {
        assert_eq!(Gender::parse("Female"), Some(Gender::Female));
        assert_eq!(Gender::parse("female"), None);
        assert_eq!(Gender::parse("M"), None);
    }
}
