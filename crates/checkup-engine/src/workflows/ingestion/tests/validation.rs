use super::common::*;

use crate::reference::catalog::standard_snapshot;
use crate::workflows::ingestion::domain::BatchRow;
use crate::workflows::ingestion::parser::parse_upload;
use crate::workflows::ingestion::validation::{StructuralIssue, Validator};

fn validate(rows: Vec<BatchRow>) -> crate::workflows::ingestion::ValidationReport {
    let snapshot = standard_snapshot();
    Validator::new(&snapshot, today()).validate(&submission(rows))
}

fn field_errors(report: &crate::workflows::ingestion::ValidationReport) -> Vec<(&str, &str)> {
    report
        .rows
        .iter()
        .flat_map(|row| row.errors.iter())
        .map(|error| (error.field.as_str(), error.value.as_str()))
        .collect()
}

#[test]
fn clean_batch_is_admissible_with_counts() {
    let mut rows = full_panel("E1", 2);
    rows.extend(full_panel("E2", 3));

    let report = validate(rows);

    assert!(report.is_admissible());
    assert_eq!(report.counts.parameter_rows, 16);
    assert_eq!(report.counts.total_records, 2);
    assert_eq!(report.counts.valid_records, 2);
    assert_eq!(report.counts.error_records, 0);
}

#[test]
fn unknown_company_rejects_whole_batch_and_skips_row_checks() {
    let mut rows = full_panel("E1", 2);
    let mut stranger = employee("E2", 3, &[("HbA1c", "5.1")]);
    for row in &mut stranger {
        row.company_id = "UMBRELLA".to_string();
        row.gender = "male".to_string();
    }
    rows.extend(stranger);

    let report = validate(rows);

    assert!(!report.is_admissible());
    assert_eq!(
        report.structural,
        vec![StructuralIssue::UnknownCompany {
            company_ids: vec!["UMBRELLA".to_string()]
        }]
    );
    assert!(report.rows.is_empty(), "phase B must not run");
}

#[test]
fn unknown_columns_are_listed() {
    let mut submission = submission(full_panel("E1", 2));
    submission.columns = vec![
        "Employee ID".to_string(),
        "FBS".to_string(),
        "Favourite Colour".to_string(),
    ];
    let snapshot = standard_snapshot();

    let report = Validator::new(&snapshot, today()).validate(&submission);

    assert_eq!(
        report.structural,
        vec![StructuralIssue::UnknownColumn {
            columns: vec!["Favourite Colour".to_string()]
        }]
    );
}

#[test]
fn duplicate_parameter_reports_both_occurrences() {
    let mut rows = employee("E1", 2, &[("FBS", "92"), ("HbA1c", "5.4")]);
    rows.push(row("E1", 2, "Fasting Glucose", "97"));

    let report = validate(rows);

    let [StructuralIssue::DuplicateParameter { duplicates }] = report.structural.as_slice() else {
        panic!("expected one duplicate issue, got {:?}", report.structural);
    };
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].employee_id, "E1");
    assert_eq!(duplicates[0].parameter, "fasting_glucose");
    let values: Vec<&str> = duplicates[0]
        .occurrences
        .iter()
        .map(|occurrence| occurrence.value.as_str())
        .collect();
    assert_eq!(values, vec!["92", "97"]);
}

#[test]
fn row_errors_are_collected_per_employee() {
    let mut bad = employee("E2", 3, &[("HbA1c", "abc"), ("Cortisol", "12")]);
    for row in &mut bad {
        row.email = "not-an-email".to_string();
        row.gender = "male".to_string();
        row.phone = Some("123".to_string());
        row.date_of_birth = "2030-01-01".to_string();
    }
    let mut rows = full_panel("E1", 2);
    rows.extend(bad);

    let report = validate(rows);

    assert!(!report.is_admissible());
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].row_number, 3);
    assert_eq!(report.rows[0].employee_id, "E2");
    let fields: Vec<&str> = field_errors(&report).into_iter().map(|(field, _)| field).collect();
    for expected in ["email", "gender", "phone", "date_of_birth", "hba1c", "Cortisol"] {
        assert!(fields.contains(&expected), "missing {expected} in {fields:?}");
    }
    assert_eq!(report.counts.error_records, 1);
    assert_eq!(report.counts.valid_records, 1);
}

#[test]
fn old_and_future_test_dates_are_rejected() {
    let mut stale = employee("E1", 2, &[("HbA1c", "5.4")]);
    stale[0].test_date = "2018-01-10".to_string();
    let mut future = employee("E2", 3, &[("HbA1c", "5.4")]);
    future[0].test_date = "2024-07-01".to_string();
    let mut rows = stale;
    rows.extend(future);

    let report = validate(rows);

    let messages: Vec<&str> = report
        .rows
        .iter()
        .flat_map(|row| row.errors.iter().map(|error| error.message.as_str()))
        .collect();
    assert!(messages.contains(&"test date is more than 5 years old"));
    assert!(messages.contains(&"test date is in the future"));
}

#[test]
fn test_date_before_birth_is_rejected_at_validation() {
    let mut rows = full_panel("E9", 2);
    for row in &mut rows {
        row.date_of_birth = "2024-05-25".to_string();
        row.test_date = "2024-05-20".to_string();
    }

    let report = validate(rows);

    assert!(!report.is_admissible());
    assert_eq!(report.rows.len(), 1);
    assert!(report.rows[0].errors.iter().any(|error| error.field == "test_date"
        && error.message == "test date is before the date of birth"));
}

#[test]
fn blood_pressure_tokens_are_range_checked() {
    let mut rows = employee("E1", 2, &[("BP", "125/82")]);
    rows.extend(employee("E2", 3, &[("BP", "80/120")]));
    rows.extend(employee("E3", 4, &[("BP", "400/82")]));
    rows.extend(employee("E4", 5, &[("BP", "high")]));

    let report = validate(rows);

    let failing: Vec<&str> = report.rows.iter().map(|row| row.employee_id.as_str()).collect();
    assert_eq!(failing, vec!["E2", "E3", "E4"]);
}

#[test]
fn combined_and_separate_blood_pressure_conflict() {
    let rows = employee("E1", 2, &[("BP", "125/82"), ("Systolic", "125")]);

    let report = validate(rows);

    assert!(field_errors(&report)
        .iter()
        .any(|(field, _)| *field == "blood_pressure"));
}

#[test]
fn implausible_values_warn_without_rejecting() {
    let rows = employee("E1", 2, &[("FBS", "5000"), ("Blood Group", "O+")]);

    let report = validate(rows);

    assert!(report.is_admissible());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].field, "fasting_glucose");
    assert_eq!(report.counts.warnings, 1);
}

#[test]
fn negative_values_are_errors() {
    let report = validate(employee("E1", 2, &[("Triglycerides", "-4")]));
    assert_eq!(field_errors(&report), vec![("triglycerides", "-4")]);
}

#[test]
fn csv_upload_flows_through_parser_and_validator() {
    let csv = "Employee ID,Name,DOB,Gender,Email,Test Date,Company,Location,FBS,BP,HbA1c\n\
               E1,Asha Rao,1985-03-14,Female,asha@acme.test,2024-05-20,ACME,Pune,92,125/82,5.4\n\
               E2,Ravi Iyer,1979-11-02,Male,ravi@acme.test,2024-05-21,ACME,Pune,,,\n";
    let submission = parse_upload(csv.as_bytes(), "hr@acme.test").expect("csv parses");
    let snapshot = standard_snapshot();

    let report = Validator::new(&snapshot, today()).validate(&submission);

    assert!(report.is_admissible(), "{:?}", report.rows);
    assert_eq!(report.counts.parameter_rows, 3);
    assert_eq!(report.counts.total_records, 2);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].row_number, 3);
}
