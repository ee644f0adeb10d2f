use super::normalizer::normalize_header;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Fixed demographic columns every upload may carry alongside parameter columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemographicField {
    EmployeeId,
    Name,
    DateOfBirth,
    Gender,
    Email,
    Phone,
    TestDate,
    CompanyId,
    Location,
}

impl DemographicField {
    pub const fn label(self) -> &'static str {
        match self {
            Self::EmployeeId => "employee_id",
            Self::Name => "name",
            Self::DateOfBirth => "date_of_birth",
            Self::Gender => "gender",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::TestDate => "test_date",
            Self::CompanyId => "company_id",
            Self::Location => "location",
        }
    }
}

static DEMOGRAPHIC_HEADERS: OnceLock<HashMap<String, DemographicField>> = OnceLock::new();

pub fn demographic_field_for(header: &str) -> Option<DemographicField> {
    demographic_headers().get(&normalize_header(header)).copied()
}

fn demographic_headers() -> &'static HashMap<String, DemographicField> {
    DEMOGRAPHIC_HEADERS.get_or_init(|| {
        use DemographicField::*;

        const HEADER_TO_FIELD: &[(&str, DemographicField)] = &[
            ("employee_id", EmployeeId),
            ("Employee ID", EmployeeId),
            ("Emp ID", EmployeeId),
            ("Employee Code", EmployeeId),
            ("Emp Code", EmployeeId),
            ("name", Name),
            ("Employee Name", Name),
            ("Full Name", Name),
            ("date_of_birth", DateOfBirth),
            ("Date of Birth", DateOfBirth),
            ("DOB", DateOfBirth),
            ("Birth Date", DateOfBirth),
            ("gender", Gender),
            ("Sex", Gender),
            ("email", Email),
            ("Email Address", Email),
            ("E-mail", Email),
            ("Email ID", Email),
            ("phone", Phone),
            ("Phone Number", Phone),
            ("Mobile", Phone),
            ("Mobile Number", Phone),
            ("Contact Number", Phone),
            ("test_date", TestDate),
            ("Test Date", TestDate),
            ("Date of Test", TestDate),
            ("Checkup Date", TestDate),
            ("Sample Date", TestDate),
            ("company_id", CompanyId),
            ("Company ID", CompanyId),
            ("Company", CompanyId),
            ("Company Code", CompanyId),
            ("location", Location),
            ("Site", Location),
            ("Office Location", Location),
            ("City", Location),
        ];

        let mut map = HashMap::with_capacity(HEADER_TO_FIELD.len());
        for (header, field) in HEADER_TO_FIELD {
            map.insert(normalize_header(header), *field);
        }
        map
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_spreadsheet_headers() {
        assert_eq!(demographic_field_for("Employee ID"), Some(DemographicField::EmployeeId));
        assert_eq!(demographic_field_for("\u{feff}DOB"), Some(DemographicField::DateOfBirth));
        assert_eq!(demographic_field_for("e-mail"), Some(DemographicField::Email));
        assert_eq!(demographic_field_for("  mobile   number "), Some(DemographicField::Phone));
        assert_eq!(demographic_field_for("test_date"), Some(DemographicField::TestDate));
        assert_eq!(demographic_field_for("Hemoglobin"), None);
    }
}
