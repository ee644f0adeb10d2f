use std::collections::HashMap;

use super::domain::BatchRow;

/// Every row of one employee occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeRows {
    pub row_number: u32,
    pub employee_id: String,
    pub rows: Vec<BatchRow>,
}

impl EmployeeRows {
    pub fn first(&self) -> Option<&BatchRow> {
        self.rows.first()
    }
}

/// Groups rows by `(row_number, employee_id)` preserving first-seen order.
pub fn group_rows(rows: &[BatchRow]) -> Vec<EmployeeRows> {
    let mut groups: Vec<EmployeeRows> = Vec::new();
    let mut index: HashMap<(u32, &str), usize> = HashMap::new();

    for row in rows {
        let slot = *index.entry(row.occurrence_key()).or_insert_with(|| {
            groups.push(EmployeeRows {
                row_number: row.row_number,
                employee_id: row.employee_id.clone(),
                rows: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].rows.push(row.clone());
    }

    groups
}

/// Packs employees into chunks of roughly `target_rows` rows. An employee is
/// never split, so a chunk overshoots by less than one employee's rows.
pub fn partition(employees: Vec<EmployeeRows>, target_rows: usize) -> Vec<Vec<EmployeeRows>> {
    let target = target_rows.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<EmployeeRows> = Vec::new();
    let mut current_rows = 0;

    for employee in employees {
        current_rows += employee.rows.len();
        current.push(employee);
        if current_rows >= target {
            chunks.push(std::mem::take(&mut current));
            current_rows = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rows_for(employee: &str, row_number: u32, count: usize) -> Vec<BatchRow> {
        (0..count)
            .map(|index| BatchRow {
                row_number,
                employee_id: employee.to_string(),
                name: format!("Employee {employee}"),
                date_of_birth: "1980-01-01".to_string(),
                gender: "Male".to_string(),
                email: format!("{}@example.com", employee.to_lowercase()),
                phone: None,
                test_date: "2024-05-20".to_string(),
                company_id: "ACME".to_string(),
                location: "Pune".to_string(),
                parameter_name: format!("p{index}"),
                parameter_value: "1".to_string(),
            })
            .collect()
    }

    #[test]
    fn groups_occurrences_in_first_seen_order() {
        let mut rows = rows_for("E2", 3, 2);
        rows.extend(rows_for("E1", 2, 1));
        rows.extend(rows_for("E2", 3, 1));
        rows.extend(rows_for("E1", 4, 1));

        let groups = group_rows(&rows);
        let keys: Vec<_> = groups
            .iter()
            .map(|group| (group.row_number, group.employee_id.as_str(), group.rows.len()))
            .collect();
        assert_eq!(keys, vec![(3, "E2", 3), (2, "E1", 1), (4, "E1", 1)]);
    }

    #[test]
    fn twelve_employees_of_eight_rows_with_target_twenty() {
        let rows: Vec<BatchRow> = (0..12)
            .flat_map(|index| rows_for(&format!("E{index:02}"), index + 2, 8))
            .collect();
        let chunks = partition(group_rows(&rows), 20);

        let sizes: Vec<usize> = chunks
            .iter()
            .map(|chunk| chunk.iter().map(|employee| employee.rows.len()).sum())
            .collect();
        assert_eq!(sizes, vec![24, 24, 24, 24]);
        assert!(chunks.iter().all(|chunk| chunk.len() == 3));
    }

    #[test]
    fn zero_target_still_makes_progress() {
        let chunks = partition(group_rows(&rows_for("E1", 2, 3)), 0);
        assert_eq!(chunks.len(), 1);
    }

    proptest! {
        #[test]
        fn partition_never_splits_or_reorders_employees(
            sizes in prop::collection::vec(1usize..30, 0..40),
            target in 1usize..120,
        ) {
            let employees: Vec<EmployeeRows> = sizes
                .iter()
                .enumerate()
                .map(|(index, size)| EmployeeRows {
                    row_number: index as u32 + 2,
                    employee_id: format!("E{index}"),
                    rows: rows_for(&format!("E{index}"), index as u32 + 2, *size),
                })
                .collect();
            let chunks = partition(employees.clone(), target);

            let flattened: Vec<EmployeeRows> = chunks.iter().flatten().cloned().collect();
            prop_assert_eq!(&flattened, &employees);

            let max_employee = sizes.iter().copied().max().unwrap_or(0);
            for (index, chunk) in chunks.iter().enumerate() {
                prop_assert!(!chunk.is_empty());
                let rows: usize = chunk.iter().map(|employee| employee.rows.len()).sum();
                prop_assert!(rows < target + max_employee);
                if index + 1 < chunks.len() {
                    prop_assert!(rows >= target);
                }
            }
        }
    }
}
