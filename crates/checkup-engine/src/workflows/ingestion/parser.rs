use std::io::Read;

use super::domain::{BatchRow, BatchSource, BatchSubmission};
use super::mapping::{demographic_field_for, DemographicField};

/// Reads a wide upload (demographic columns plus one column per parameter) and
/// explodes it into one [`BatchRow`] per non-blank parameter cell.
///
/// Row numbers are spreadsheet line numbers: the header is line 1.
pub fn parse_upload<R: Read>(reader: R, uploaded_by: &str) -> Result<BatchSubmission, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|header| header.to_string())
        .collect();

    let mut demographic_columns: Vec<(usize, DemographicField)> = Vec::new();
    let mut parameter_columns: Vec<(usize, &str)> = Vec::new();
    for (index, header) in headers.iter().enumerate() {
        if header.trim().is_empty() {
            continue;
        }
        match demographic_field_for(header) {
            Some(field) => demographic_columns.push((index, field)),
            None => parameter_columns.push((index, header.as_str())),
        }
    }

    let mut rows = Vec::new();
    let mut empty_rows = Vec::new();

    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        // Blank lines are skipped by the reader, so take the line from the record position.
        let row_number = record
            .position()
            .map(|position| position.line() as u32)
            .unwrap_or(index as u32 + 2);

        let mut template = BatchRow {
            row_number,
            employee_id: String::new(),
            name: String::new(),
            date_of_birth: String::new(),
            gender: String::new(),
            email: String::new(),
            phone: None,
            test_date: String::new(),
            company_id: String::new(),
            location: String::new(),
            parameter_name: String::new(),
            parameter_value: String::new(),
        };

        for (column, field) in &demographic_columns {
            let value = record.get(*column).unwrap_or_default().to_string();
            match field {
                DemographicField::EmployeeId => template.employee_id = value,
                DemographicField::Name => template.name = value,
                DemographicField::DateOfBirth => template.date_of_birth = value,
                DemographicField::Gender => template.gender = value,
                DemographicField::Email => template.email = value,
                DemographicField::Phone => {
                    template.phone = (!value.is_empty()).then_some(value);
                }
                DemographicField::TestDate => template.test_date = value,
                DemographicField::CompanyId => template.company_id = value,
                DemographicField::Location => template.location = value,
            }
        }

        let before = rows.len();
        for (column, header) in &parameter_columns {
            let value = record.get(*column).unwrap_or_default();
            if value.is_empty() {
                continue;
            }
            rows.push(BatchRow {
                parameter_name: header.to_string(),
                parameter_value: value.to_string(),
                ..template.clone()
            });
        }

        if rows.len() == before {
            empty_rows.push(row_number);
        }
    }

    Ok(BatchSubmission {
        uploaded_by: uploaded_by.to_string(),
        source: BatchSource::Upload,
        columns: headers.into_iter().filter(|header| !header.trim().is_empty()).collect(),
        rows,
        empty_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPLOAD: &str = "\u{feff}Employee ID,Name,DOB,Gender,Email,Phone,Test Date,Company,Location,Hemoglobin,FBS,BP\n\
E1,Asha Rao,1985-04-12,Female,asha@example.com,,2024-05-20,ACME,Pune,12.8,92,118/76\n\
E2,Ravi Iyer,1979-11-02,Male,ravi@example.com,+91 98765 43210,2024-05-20,ACME,Pune,,130,\n\
\n\
E3,Meera Shah,1990-01-30,Female,meera@example.com,,2024-05-21,ACME,Mumbai,,,\n";

    #[test]
    fn explodes_parameter_cells_with_spreadsheet_line_numbers() {
        let submission = parse_upload(UPLOAD.as_bytes(), "uploader@acme").expect("parses");

        assert_eq!(submission.source, BatchSource::Upload);
        assert_eq!(submission.columns.len(), 12);
        assert_eq!(submission.rows.len(), 4);

        let first = &submission.rows[0];
        assert_eq!(first.row_number, 2);
        assert_eq!(first.employee_id, "E1");
        assert_eq!(first.date_of_birth, "1985-04-12");
        assert_eq!(first.parameter_name, "Hemoglobin");
        assert_eq!(first.parameter_value, "12.8");
        assert_eq!(first.phone, None);

        let ravi: Vec<_> = submission
            .rows
            .iter()
            .filter(|row| row.employee_id == "E2")
            .collect();
        assert_eq!(ravi.len(), 1);
        assert_eq!(ravi[0].row_number, 3);
        assert_eq!(ravi[0].parameter_name, "FBS");
        assert_eq!(ravi[0].phone.as_deref(), Some("+91 98765 43210"));
    }

    #[test]
    fn lines_without_parameter_values_are_reported() {
        let submission = parse_upload(UPLOAD.as_bytes(), "uploader@acme").expect("parses");
        assert_eq!(submission.empty_rows, vec![5]);
    }
}
