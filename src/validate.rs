use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const REQUIRED_FIELDS: [&str; 13] = [
    "regNumber",
    "studentName",
    "campus",
    "section",
    "stream",
    "testName",
    "date",
    "subjects",
    "overallTotalMarks",
    "fullMarks",
    "percentage",
    "percentile",
    "rank",
];

pub const SUBJECT_FIELDS: [&str; 3] = ["subjectName", "scored", "totalMarks"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    LongTerm,
    Puc,
}

impl Stream {
    pub fn parse(value: &str) -> Option<Stream> {
        match value {
            "LongTerm" => Some(Stream::LongTerm),
            "PUC" => Some(Stream::Puc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::LongTerm => "LongTerm",
            Stream::Puc => "PUC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectScore {
    #[serde(rename = "subjectName")]
    pub subject_name: String,
    pub scored: f64,
    #[serde(rename = "totalMarks")]
    pub total_marks: f64,
}

#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    pub reg_number: String,
    pub student_name: String,
    pub campus: String,
    pub section: String,
    pub stream: Stream,
    pub test_name: String,
    pub date: NaiveDate,
    pub subjects: Vec<SubjectScore>,
    pub overall_total_marks: f64,
    pub full_marks: f64,
    pub percentage: f64,
    pub percentile: f64,
    pub rank: i64,
    pub is_present: bool,
}

#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub index: usize,
    pub reg_number: String,
    pub errors: Vec<String>,
}

/// A field counts as present when it exists and is not JSON null. Zero and
/// false are present values; a score or rank of 0 must never be reported as
/// missing.
fn field_present(value: Option<&Value>) -> bool {
    matches!(value, Some(v) if !v.is_null())
}

fn get_string(record: &Value, field: &str, errors: &mut Vec<String>) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() => {
            errors.push(format!("Field {} must be a string", field));
            String::new()
        }
        _ => String::new(),
    }
}

fn get_number(record: &Value, field: &str, errors: &mut Vec<String>) -> f64 {
    match record.get(field) {
        Some(v) if v.is_null() => 0.0,
        Some(v) => match v.as_f64() {
            Some(n) => n,
            None => {
                errors.push(format!("Field {} must be a number", field));
                0.0
            }
        },
        None => 0.0,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.date_naive())
}

fn validate_subjects(record: &Value, errors: &mut Vec<String>) -> Vec<SubjectScore> {
    let Some(subjects) = record.get("subjects").and_then(|v| v.as_array()) else {
        errors.push("Subjects must be a non-empty array".to_string());
        return Vec::new();
    };
    if subjects.is_empty() {
        errors.push("Subjects must be a non-empty array".to_string());
        return Vec::new();
    }

    let mut out = Vec::with_capacity(subjects.len());
    for (sub_index, subject) in subjects.iter().enumerate() {
        for field in SUBJECT_FIELDS {
            if !field_present(subject.get(field)) {
                errors.push(format!("Subject {} missing field: {}", sub_index + 1, field));
            }
        }
        let subject_name = match subject.get("subjectName") {
            Some(Value::String(s)) => s.clone(),
            Some(v) if !v.is_null() => {
                errors.push(format!(
                    "Subject {} field subjectName must be a string",
                    sub_index + 1
                ));
                String::new()
            }
            _ => String::new(),
        };
        let mut numeric = |field: &str| match subject.get(field) {
            Some(v) if !v.is_null() => match v.as_f64() {
                Some(n) => n,
                None => {
                    errors.push(format!(
                        "Subject {} field {} must be a number",
                        sub_index + 1,
                        field
                    ));
                    0.0
                }
            },
            _ => 0.0,
        };
        let scored = numeric("scored");
        let total_marks = numeric("totalMarks");
        out.push(SubjectScore {
            subject_name,
            scored,
            total_marks,
        });
    }
    out
}

/// Validate one raw payload against the record schema. Returns the typed
/// record only when no problem at all was found; a record with any error is
/// excluded entirely.
pub fn validate_record(record: &Value) -> Result<ValidatedRecord, Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    for field in REQUIRED_FIELDS {
        if !field_present(record.get(field)) {
            errors.push(format!("Missing required field: {}", field));
        }
    }

    let reg_number = get_string(record, "regNumber", &mut errors);
    let student_name = get_string(record, "studentName", &mut errors);
    let campus = get_string(record, "campus", &mut errors);
    let section = get_string(record, "section", &mut errors);
    let test_name = get_string(record, "testName", &mut errors);

    let stream = match record.get("stream") {
        Some(Value::String(raw)) => match Stream::parse(raw) {
            Some(s) => s,
            None => {
                errors.push(format!(
                    "Invalid stream value: {}. Must be 'LongTerm' or 'PUC'",
                    raw
                ));
                Stream::LongTerm
            }
        },
        Some(v) if !v.is_null() => {
            errors.push(format!(
                "Invalid stream value: {}. Must be 'LongTerm' or 'PUC'",
                v
            ));
            Stream::LongTerm
        }
        _ => Stream::LongTerm,
    };

    let subjects = validate_subjects(record, &mut errors);

    let date = match record.get("date") {
        Some(Value::String(raw)) => match parse_date(raw) {
            Some(d) => d,
            None => {
                errors.push("Invalid date format".to_string());
                NaiveDate::MIN
            }
        },
        Some(v) if !v.is_null() => {
            errors.push("Invalid date format".to_string());
            NaiveDate::MIN
        }
        _ => NaiveDate::MIN,
    };

    let overall_total_marks = get_number(record, "overallTotalMarks", &mut errors);
    let full_marks = get_number(record, "fullMarks", &mut errors);
    let percentage = get_number(record, "percentage", &mut errors);
    let percentile = get_number(record, "percentile", &mut errors);
    let rank = get_number(record, "rank", &mut errors) as i64;

    // Default present unless the caller explicitly said false.
    let is_present = record.get("isPresent").and_then(|v| v.as_bool()) != Some(false);

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedRecord {
        reg_number,
        student_name,
        campus,
        section,
        stream,
        test_name,
        date,
        subjects,
        overall_total_marks,
        full_marks,
        percentage,
        percentile,
        rank,
        is_present,
    })
}

/// Partition a raw batch into (valid, failures). Order is preserved and the
/// failure index refers to the position in the submitted batch.
pub fn validate_batch(records: &[Value]) -> (Vec<ValidatedRecord>, Vec<ValidationFailure>) {
    let mut valid = Vec::new();
    let mut failures = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match validate_record(record) {
            Ok(v) => valid.push(v),
            Err(errors) => failures.push(ValidationFailure {
                index,
                reg_number: record
                    .get("regNumber")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown")
                    .to_string(),
                errors,
            }),
        }
    }
    (valid, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "regNumber": "240101",
            "studentName": "A Kumar",
            "campus": "North",
            "section": "A1",
            "stream": "LongTerm",
            "testName": "Weekly Test 4",
            "date": "2026-03-14",
            "subjects": [
                { "subjectName": "Physics", "scored": 120, "totalMarks": 180 },
                { "subjectName": "Biology", "scored": 0, "totalMarks": 360 }
            ],
            "overallTotalMarks": 120,
            "fullMarks": 720,
            "percentage": 16.7,
            "percentile": 22.5,
            "rank": 0
        })
    }

    #[test]
    fn zero_valued_fields_are_not_missing() {
        let record = sample();
        let validated = validate_record(&record).expect("valid record");
        assert_eq!(validated.rank, 0);
        assert_eq!(validated.subjects[1].scored, 0.0);
        assert!(validated.is_present);
    }

    #[test]
    fn unknown_stream_is_rejected() {
        let mut record = sample();
        record["stream"] = json!("Foo");
        let errors = validate_record(&record).expect_err("must fail");
        assert!(errors
            .iter()
            .any(|e| e.contains("Invalid stream value: Foo")));
    }

    #[test]
    fn missing_subject_field_is_reported_with_position() {
        let mut record = sample();
        record["subjects"][1] = json!({ "subjectName": "Biology", "scored": 200 });
        let errors = validate_record(&record).expect_err("must fail");
        assert!(errors.contains(&"Subject 2 missing field: totalMarks".to_string()));
    }

    #[test]
    fn empty_subject_list_is_rejected() {
        let mut record = sample();
        record["subjects"] = json!([]);
        let errors = validate_record(&record).expect_err("must fail");
        assert!(errors.contains(&"Subjects must be a non-empty array".to_string()));
    }

    #[test]
    fn malformed_date_is_rejected() {
        let mut record = sample();
        record["date"] = json!("14/03/2026");
        let errors = validate_record(&record).expect_err("must fail");
        assert!(errors.contains(&"Invalid date format".to_string()));
    }

    #[test]
    fn rfc3339_dates_normalize_to_calendar_dates() {
        let mut record = sample();
        record["date"] = json!("2026-03-14T09:30:00+05:30");
        let validated = validate_record(&record).expect("valid record");
        assert_eq!(validated.date.to_string(), "2026-03-14");
    }

    #[test]
    fn explicit_false_presence_is_kept() {
        let mut record = sample();
        record["isPresent"] = json!(false);
        let validated = validate_record(&record).expect("valid record");
        assert!(!validated.is_present);
    }

    #[test]
    fn batch_partition_keeps_order_and_unknown_reg() {
        let mut bad = sample();
        bad.as_object_mut().expect("object").remove("regNumber");
        let batch = vec![sample(), bad];
        let (valid, failures) = validate_batch(&batch);
        assert_eq!(valid.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].reg_number, "Unknown");
        assert!(failures[0]
            .errors
            .contains(&"Missing required field: regNumber".to_string()));
    }
}
