use std::collections::{BTreeMap, BTreeSet};

use super::{DuplicateParameter, Occurrence, StructuralIssue};
use crate::reference::ReferenceSnapshot;
use crate::workflows::ingestion::domain::BatchSubmission;
use crate::workflows::ingestion::mapping::demographic_field_for;
use crate::workflows::ingestion::normalizer::normalize_header;

pub(super) fn check(snapshot: &ReferenceSnapshot, submission: &BatchSubmission) -> Vec<StructuralIssue> {
    let mut issues = Vec::new();

    let unknown_companies: BTreeSet<&str> = submission
        .rows
        .iter()
        .map(|row| row.company_id.trim())
        .filter(|company| !company.is_empty() && !snapshot.has_company(company))
        .collect();
    if !unknown_companies.is_empty() {
        issues.push(StructuralIssue::UnknownCompany {
            company_ids: unknown_companies.into_iter().map(str::to_string).collect(),
        });
    }

    let unknown_columns: Vec<String> = submission
        .columns
        .iter()
        .filter(|column| !column.trim().is_empty())
        .filter(|column| {
            demographic_field_for(column).is_none() && snapshot.resolve_parameter(column).is_none()
        })
        .cloned()
        .collect();
    if !unknown_columns.is_empty() {
        issues.push(StructuralIssue::UnknownColumn {
            columns: unknown_columns,
        });
    }

    // Keyed by resolved parameter key so `FBS` and `Fasting Glucose` collide.
    let mut seen: BTreeMap<(&str, String), Vec<Occurrence>> = BTreeMap::new();
    let mut order: Vec<(&str, String)> = Vec::new();
    for row in &submission.rows {
        let parameter = snapshot
            .resolve_parameter(&row.parameter_name)
            .map(|definition| definition.key.clone())
            .unwrap_or_else(|| normalize_header(&row.parameter_name));
        let key = (row.employee_id.as_str(), parameter);
        let entry = seen.entry(key.clone()).or_default();
        if entry.is_empty() {
            order.push(key);
        }
        entry.push(Occurrence {
            row_number: row.row_number,
            value: row.parameter_value.clone(),
        });
    }

    let duplicates: Vec<DuplicateParameter> = order
        .into_iter()
        .filter_map(|key| {
            let occurrences = seen.remove(&key)?;
            (occurrences.len() > 1).then(|| DuplicateParameter {
                employee_id: key.0.to_string(),
                parameter: key.1,
                occurrences,
            })
        })
        .collect();
    if !duplicates.is_empty() {
        issues.push(StructuralIssue::DuplicateParameter { duplicates });
    }

    issues
}
