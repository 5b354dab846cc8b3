use std::io::Read;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use super::domain::UserId;
use super::enrollment::BulkEntry;

#[derive(Debug, thiserror::Error)]
pub enum RosterImportError {
    #[error("failed to read roster: {0}")]
    Csv(#[from] csv::Error),
    #[error("roster line {line} has no user_id")]
    MissingUser { line: u64 },
    #[error("roster line {line} has an unreadable due_date `{value}`")]
    InvalidDueDate { line: u64, value: String },
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    user_id: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    due_date: Option<String>,
}

/// Parse a `user_id[,due_date]` roster with a header row. Due dates accept `YYYY-MM-DD` or
/// `MM/DD/YYYY`.
pub fn parse_roster<R: Read>(reader: R) -> Result<Vec<BulkEntry>, RosterImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let mut entries = Vec::new();

    for record in csv_reader.deserialize::<RosterRow>() {
        let row = record?;
        let line = entries.len() as u64 + 2;
        let user_id = row.user_id.ok_or(RosterImportError::MissingUser { line })?;
        let due_date = match row.due_date {
            Some(value) => Some(
                parse_due_date(&value)
                    .ok_or(RosterImportError::InvalidDueDate { line, value })?,
            ),
            None => None,
        };
        entries.push(BulkEntry {
            user_id: UserId::new(user_id),
            due_date,
        });
    }

    Ok(entries)
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_due_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m/%d/%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_users_with_optional_due_dates() {
        let csv = "user_id,due_date\nlearner-1,2026-11-30\n learner-2 ,\nlearner-3,12/01/2026\n";
        let entries = parse_roster(csv.as_bytes()).expect("roster parses");

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].user_id, UserId::new("learner-1"));
        assert_eq!(entries[0].due_date, NaiveDate::from_ymd_opt(2026, 11, 30));
        assert_eq!(entries[1].user_id, UserId::new("learner-2"));
        assert_eq!(entries[1].due_date, None);
        assert_eq!(entries[2].due_date, NaiveDate::from_ymd_opt(2026, 12, 1));
    }

    #[test]
    fn due_date_column_is_optional() {
        let entries = parse_roster("user_id\nlearner-9\n".as_bytes()).expect("roster parses");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].due_date.is_none());
    }

    #[test]
    fn rejects_rows_without_a_user() {
        let err = parse_roster("user_id,due_date\n,2026-01-01\n".as_bytes())
            .expect_err("missing user");
        assert!(matches!(err, RosterImportError::MissingUser { line: 2 }));
    }

    #[test]
    fn rejects_unreadable_dates() {
        let err = parse_roster("user_id,due_date\nlearner-1,next week\n".as_bytes())
            .expect_err("bad date");
        match err {
            RosterImportError::InvalidDueDate { line, value } => {
                assert_eq!(line, 2);
                assert_eq!(value, "next week");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
