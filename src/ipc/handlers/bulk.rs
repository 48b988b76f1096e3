use crate::ipc::helpers::{get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reconcile;
use crate::validate::{self, Stream, ValidationFailure};
use rusqlite::Connection;
use serde_json::json;

fn failures_json(failures: &[ValidationFailure]) -> Vec<serde_json::Value> {
    failures
        .iter()
        .map(|f| {
            json!({
                "index": f.index,
                "regNumber": f.reg_number,
                "errors": f.errors,
            })
        })
        .collect()
}

fn parse_stream_param(raw: &str) -> Result<Stream, HandlerErr> {
    Stream::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "Invalid stream value: {}. Must be 'LongTerm' or 'PUC'",
            raw
        ))
    })
}

fn records_bulk_upload(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("Records must be a non-empty array"));
    };
    if records.is_empty() {
        return Err(HandlerErr::bad_params("Records must be a non-empty array"));
    }
    let mark_absent = params
        .get("markAbsentStudents")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let strict = params
        .get("strict")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let (valid, failures) = validate::validate_batch(records);

    // Caller policy: strict mode refuses the whole batch on any validation
    // error. The engine itself always proceeds on the valid subset.
    if strict && !failures.is_empty() {
        return Err(HandlerErr {
            code: "validation_failed",
            message: "Validation failed for some records".to_string(),
            details: Some(json!({
                "errorCount": failures.len(),
                "validCount": valid.len(),
                "errors": failures_json(&failures),
            })),
        });
    }

    // Absent derivation assumes one test per batch; enforce it up front
    // rather than silently stamping the first record's test on everything.
    if let Some(first) = valid.first() {
        let mixed = valid.iter().any(|r| {
            r.test_name != first.test_name || r.stream != first.stream || r.date != first.date
        });
        if mixed {
            return Err(HandlerErr {
                code: "mixed_batch",
                message: "all records in a batch must share one testName, stream and date"
                    .to_string(),
                details: None,
            });
        }
    }

    let report = reconcile::reconcile_batch(conn, &valid, mark_absent)
        .map_err(|e| HandlerErr::db_update(e, "academic_records"))?;

    let duplicates: Vec<serde_json::Value> = report
        .duplicates
        .iter()
        .map(|key| {
            json!({
                "regNumber": key.reg_number,
                "testName": key.test_name,
                "stream": key.stream.as_str(),
            })
        })
        .collect();

    Ok(json!({
        "totalReceived": records.len(),
        "insertedCount": report.inserted_count,
        "duplicateCount": report.duplicates.len(),
        "absentMarkedCount": report.absent_marked_count,
        "validationErrorCount": failures.len(),
        "duplicates": duplicates,
        "validationErrors": failures_json(&failures),
    }))
}

fn records_mark_absent(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let test_name = get_required_str(params, "testName")?;
    let stream = parse_stream_param(&get_required_str(params, "stream")?)?;

    let report = reconcile::mark_absent_for_test(conn, &test_name, stream)
        .map_err(|e| HandlerErr::db_update(e, "academic_records"))?;
    let Some(report) = report else {
        return Err(HandlerErr::not_found(
            "no present records found for this test",
        ));
    };

    Ok(json!({
        "totalStudents": report.total_students,
        "presentStudents": report.present_students,
        "absentStudents": report.absent_students,
        "newAbsentMarked": report.new_absent_marked,
        "alreadyMarked": report.already_marked,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.bulkUpload" => Some(with_db(state, req, records_bulk_upload)),
        "records.markAbsent" => Some(with_db(state, req, records_mark_absent)),
        _ => None,
    }
}
