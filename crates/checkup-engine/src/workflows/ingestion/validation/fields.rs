use std::sync::OnceLock;

use chrono::{Months, NaiveDate};
use regex::Regex;

use super::{FieldError, RowErrors, ValidationWarning};
use crate::reference::{Gender, ParameterKind, ReferenceSnapshot, DIASTOLIC_KEY, SYSTOLIC_KEY};
use crate::workflows::ingestion::chunking::group_rows;
use crate::workflows::ingestion::domain::BatchRow;
use crate::workflows::ingestion::values::{
    age_in_years, normalize_phone, parse_blood_pressure, parse_date, parse_numeric,
};

const SYSTOLIC_BOUNDS: (f64, f64) = (50.0, 300.0);
const DIASTOLIC_BOUNDS: (f64, f64) = (30.0, 200.0);
const PHONE_DIGITS: (usize, usize) = (6, 15);
const MAX_AGE_YEARS: u32 = 150;
const MAX_TEST_AGE_MONTHS: u32 = 60;
const IMPLAUSIBLE_FACTOR: f64 = 10.0;
const IMPLAUSIBLE_WITHOUT_RANGE: f64 = 100_000.0;

static EMAIL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn email_is_valid(value: &str) -> bool {
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(value))
}

struct RowCheck<'r> {
    first: &'r BatchRow,
    errors: Vec<FieldError>,
    warnings: Vec<ValidationWarning>,
}

impl<'r> RowCheck<'r> {
    fn error(&mut self, field: &str, value: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            value: value.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, field: &str, value: &str, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            row_number: self.first.row_number,
            employee_id: self.first.employee_id.clone(),
            field: field.to_string(),
            value: value.to_string(),
            message: message.into(),
        });
    }
}

/// Phase B over every employee occurrence, in first-seen order.
pub(super) fn check(
    snapshot: &ReferenceSnapshot,
    today: NaiveDate,
    rows: &[BatchRow],
) -> (Vec<RowErrors>, Vec<ValidationWarning>) {
    let mut failed = Vec::new();
    let mut warnings = Vec::new();

    for employee in group_rows(rows) {
        let group = &employee.rows;
        let Some(first) = employee.first() else {
            continue;
        };
        let mut row_check = RowCheck {
            first,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        check_demographics(&mut row_check, today);

        if group.iter().any(|row| !row.same_demographics(first)) {
            row_check.error(
                "employee",
                &first.employee_id,
                "demographic fields differ between rows of the same employee",
            );
        }

        let mut combined_bp = false;
        let mut separate_bp = false;
        for row in group {
            match check_parameter(&mut row_check, snapshot, row) {
                Some(ParameterKind::CombinedBloodPressure) => combined_bp = true,
                Some(_) if is_blood_pressure_component(snapshot, row) => separate_bp = true,
                _ => {}
            }
        }
        if combined_bp && separate_bp {
            row_check.error(
                "blood_pressure",
                "",
                "blood pressure supplied both as a combined value and as separate columns",
            );
        }

        warnings.append(&mut row_check.warnings);
        if !row_check.errors.is_empty() {
            failed.push(RowErrors {
                row_number: first.row_number,
                employee_id: first.employee_id.clone(),
                employee_name: first.name.clone(),
                errors: row_check.errors,
            });
        }
    }

    (failed, warnings)
}

fn check_demographics(check: &mut RowCheck<'_>, today: NaiveDate) {
    let row = check.first;

    for (field, value) in [
        ("employee_id", &row.employee_id),
        ("name", &row.name),
        ("email", &row.email),
        ("date_of_birth", &row.date_of_birth),
        ("gender", &row.gender),
        ("test_date", &row.test_date),
    ] {
        if value.trim().is_empty() {
            check.error(field, value, format!("{field} is required"));
        }
    }

    if !row.email.trim().is_empty() && !email_is_valid(row.email.trim()) {
        check.error("email", &row.email, "email address is not valid");
    }

    if let Some(phone) = row.phone.as_deref().filter(|phone| !phone.trim().is_empty()) {
        let digits = normalize_phone(phone).len();
        if digits < PHONE_DIGITS.0 || digits > PHONE_DIGITS.1 {
            check.error(
                "phone",
                phone,
                format!("phone must contain {}-{} digits", PHONE_DIGITS.0, PHONE_DIGITS.1),
            );
        }
    }

    if !row.gender.trim().is_empty() && Gender::parse(row.gender.trim()).is_none() {
        let allowed: Vec<&str> = Gender::ALL.iter().map(|gender| gender.label()).collect();
        check.error(
            "gender",
            &row.gender,
            format!("gender must be one of {}", allowed.join(", ")),
        );
    }

    if !row.date_of_birth.trim().is_empty() {
        match parse_date(&row.date_of_birth) {
            None => check.error("date_of_birth", &row.date_of_birth, "date of birth is not a valid date"),
            Some(dob) if dob > today => {
                check.error("date_of_birth", &row.date_of_birth, "date of birth is in the future")
            }
            Some(dob) if dob < earliest_birth_date() => {
                check.error("date_of_birth", &row.date_of_birth, "date of birth is before 1900")
            }
            Some(dob) if age_in_years(dob, today).is_some_and(|age| age > MAX_AGE_YEARS) => check
                .error(
                    "date_of_birth",
                    &row.date_of_birth,
                    format!("date of birth implies an age over {MAX_AGE_YEARS}"),
                ),
            Some(_) => {}
        }
    }

    if !row.test_date.trim().is_empty() {
        match parse_date(&row.test_date) {
            None => check.error("test_date", &row.test_date, "test date is not a valid date"),
            Some(test_date) if test_date > today => {
                check.error("test_date", &row.test_date, "test date is in the future")
            }
            Some(test_date)
                if today
                    .checked_sub_months(Months::new(MAX_TEST_AGE_MONTHS))
                    .is_some_and(|limit| test_date < limit) =>
            {
                check.error("test_date", &row.test_date, "test date is more than 5 years old")
            }
            Some(_) => {}
        }
    }

    if let (Some(dob), Some(test_date)) = (parse_date(&row.date_of_birth), parse_date(&row.test_date)) {
        if test_date < dob {
            check.error("test_date", &row.test_date, "test date is before the date of birth");
        }
    }
}

fn earliest_birth_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn is_blood_pressure_component(snapshot: &ReferenceSnapshot, row: &BatchRow) -> bool {
    snapshot
        .resolve_parameter(&row.parameter_name)
        .is_some_and(|definition| definition.key == SYSTOLIC_KEY || definition.key == DIASTOLIC_KEY)
}

/// Returns the parameter kind when the name resolves, whether or not the value passed.
fn check_parameter(
    check: &mut RowCheck<'_>,
    snapshot: &ReferenceSnapshot,
    row: &BatchRow,
) -> Option<ParameterKind> {
    let name = row.parameter_name.as_str();
    let value = row.parameter_value.trim();

    let Some(definition) = snapshot.resolve_parameter(name) else {
        check.error(name, value, format!("unknown parameter '{name}'"));
        return None;
    };

    if value.is_empty() {
        check.error(&definition.key, value, "value is required");
        return Some(definition.kind);
    }

    match definition.kind {
        ParameterKind::Text => {}
        ParameterKind::CombinedBloodPressure => match parse_blood_pressure(value) {
            None => check.error(
                &definition.key,
                value,
                "blood pressure must look like systolic/diastolic, e.g. 120/80",
            ),
            Some((systolic, diastolic)) => {
                bounded(check, &definition.key, value, "systolic", systolic, SYSTOLIC_BOUNDS);
                bounded(check, &definition.key, value, "diastolic", diastolic, DIASTOLIC_BOUNDS);
                if systolic <= diastolic {
                    check.error(
                        &definition.key,
                        value,
                        "systolic must be greater than diastolic",
                    );
                }
            }
        },
        ParameterKind::Numeric => match parse_numeric(value) {
            None => check.error(&definition.key, value, "value must be numeric"),
            Some(number) if definition.key == SYSTOLIC_KEY => {
                bounded(check, &definition.key, value, "systolic", number, SYSTOLIC_BOUNDS)
            }
            Some(number) if definition.key == DIASTOLIC_KEY => {
                bounded(check, &definition.key, value, "diastolic", number, DIASTOLIC_BOUNDS)
            }
            Some(number) if number < 0.0 => {
                check.error(&definition.key, value, "value must not be negative")
            }
            Some(number) => {
                let ceiling = definition
                    .reference_max
                    .or(definition.male_max)
                    .or(definition.female_max)
                    .map(|max| max * IMPLAUSIBLE_FACTOR)
                    .unwrap_or(IMPLAUSIBLE_WITHOUT_RANGE);
                if number > ceiling {
                    check.warn(
                        &definition.key,
                        value,
                        format!("value is implausibly large (above {ceiling})"),
                    );
                }
            }
        },
    }

    Some(definition.kind)
}

fn bounded(
    check: &mut RowCheck<'_>,
    field: &str,
    raw: &str,
    label: &str,
    value: f64,
    (min, max): (f64, f64),
) {
    if value < min || value > max {
        check.error(field, raw, format!("{label} must be between {min} and {max}"));
    }
}
