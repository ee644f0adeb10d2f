use serde::{Deserialize, Serialize};

use crate::reference::ReferenceRange;

const BORDERLINE_BAND: f64 = 0.1;
const FLAGGED_BAND: f64 = 0.2;

/// Lab parameter status derived from how far a value sits outside its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LabStatus {
    Normal,
    Borderline,
    Flagged,
    Severe,
}

impl LabStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Borderline => "Borderline",
            Self::Flagged => "Flagged",
            Self::Severe => "Severe",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Normal" => Some(Self::Normal),
            "Borderline" => Some(Self::Borderline),
            "Flagged" => Some(Self::Flagged),
            "Severe" => Some(Self::Severe),
            _ => None,
        }
    }
}

/// Classifies `value` against `range` using ±10% / ±20% bands of the range width.
pub fn classify(value: f64, range: &ReferenceRange) -> LabStatus {
    if range.contains(value) {
        return LabStatus::Normal;
    }

    let width = range.width();
    let distance = if value < range.min {
        range.min - value
    } else {
        value - range.max
    };

    if distance <= BORDERLINE_BAND * width {
        LabStatus::Borderline
    } else if distance <= FLAGGED_BAND * width {
        LabStatus::Flagged
    } else {
        LabStatus::Severe
    }
}

/// `(value − max) / max`, clamped at zero. `None` when the bound cannot divide.
pub fn high_deviation(value: f64, range: &ReferenceRange) -> Option<f64> {
    if range.max <= 0.0 || !value.is_finite() {
        return None;
    }
    Some(((value - range.max) / range.max).max(0.0))
}

/// `(min − value) / min`, clamped at zero.
pub fn low_deviation(value: f64, range: &ReferenceRange) -> Option<f64> {
    if range.min <= 0.0 || !value.is_finite() {
        return None;
    }
    Some(((range.min - value) / range.min).max(0.0))
}

/// Deviation on whichever side of the range is exceeded.
pub fn two_sided_deviation(value: f64, range: &ReferenceRange) -> Option<f64> {
    if value > range.max {
        high_deviation(value, range)
    } else if value < range.min {
        low_deviation(value, range)
    } else if value.is_finite() {
        Some(0.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> ReferenceRange {
        ReferenceRange { min: 70.0, max: 100.0 }
    }

    #[test]
    fn classifies_bands_on_both_sides() {
        let range = range();
        assert_eq!(classify(85.0, &range), LabStatus::Normal);
        assert_eq!(classify(100.0, &range), LabStatus::Normal);
        assert_eq!(classify(103.0, &range), LabStatus::Borderline);
        assert_eq!(classify(67.0, &range), LabStatus::Borderline);
        assert_eq!(classify(105.0, &range), LabStatus::Flagged);
        assert_eq!(classify(64.5, &range), LabStatus::Flagged);
        assert_eq!(classify(106.5, &range), LabStatus::Severe);
        assert_eq!(classify(40.0, &range), LabStatus::Severe);
    }

    #[test]
    fn zero_width_range_marks_any_excursion_severe() {
        let range = ReferenceRange { min: 1.0, max: 1.0 };
        assert_eq!(classify(1.0, &range), LabStatus::Normal);
        assert_eq!(classify(1.01, &range), LabStatus::Severe);
    }

    #[test]
    fn deviations_are_fractions_of_the_violated_bound() {
        let range = range();
        assert_eq!(high_deviation(125.0, &range), Some(0.25));
        assert_eq!(high_deviation(90.0, &range), Some(0.0));
        assert_eq!(low_deviation(35.0, &range), Some(0.5));
        assert_eq!(two_sided_deviation(35.0, &range), Some(0.5));
        assert_eq!(two_sided_deviation(150.0, &range), Some(0.5));
        assert_eq!(two_sided_deviation(80.0, &range), Some(0.0));
    }

    #[test]
    fn zero_bounds_cannot_be_evaluated() {
        let range = ReferenceRange { min: 0.0, max: 0.0 };
        assert_eq!(high_deviation(1.0, &range), None);
        assert_eq!(low_deviation(-1.0, &range), None);
    }
}
