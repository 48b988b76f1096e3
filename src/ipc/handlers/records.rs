use crate::calc;
use crate::db;
use crate::ipc::helpers::{get_opt_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, NewRecord, RecordKey};
use crate::validate::{self, Stream, SubjectScore};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;

const RECORD_COLUMNS: &str = "id, reg_number, student_name, campus, section, stream, test_name, \
                              date, subjects, overall_total_marks, full_marks, percentage, \
                              percentile, rank, is_present, remarks";

fn record_row_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let subjects_raw: String = row.get(8)?;
    let subjects: serde_json::Value =
        serde_json::from_str(&subjects_raw).unwrap_or_else(|_| json!([]));
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "regNumber": row.get::<_, String>(1)?,
        "studentName": row.get::<_, String>(2)?,
        "campus": row.get::<_, String>(3)?,
        "section": row.get::<_, String>(4)?,
        "stream": row.get::<_, String>(5)?,
        "testName": row.get::<_, String>(6)?,
        "date": row.get::<_, String>(7)?,
        "subjects": subjects,
        "overallTotalMarks": row.get::<_, f64>(9)?,
        "fullMarks": row.get::<_, f64>(10)?,
        "percentage": row.get::<_, f64>(11)?,
        "percentile": row.get::<_, f64>(12)?,
        "rank": row.get::<_, i64>(13)?,
        "isPresent": row.get::<_, i64>(14)? != 0,
        "remarks": row.get::<_, String>(15)?,
    }))
}

fn parse_stream_param(raw: &str) -> Result<Stream, HandlerErr> {
    Stream::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "Invalid stream value: {}. Must be 'LongTerm' or 'PUC'",
            raw
        ))
    })
}

fn records_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(raw) = params.get("record") else {
        return Err(HandlerErr::bad_params("missing record"));
    };
    let record = validate::validate_record(raw).map_err(|errors| HandlerErr {
        code: "validation_failed",
        message: "record failed validation".to_string(),
        details: Some(json!({ "errors": errors })),
    })?;

    let key = RecordKey::of(&record);
    let remarks = if record.is_present {
        calc::remark_for_percentile(record.percentile).to_string()
    } else {
        calc::ABSENT_REMARK.to_string()
    };
    let outcome = store::insert_records(
        conn,
        &[NewRecord {
            record,
            remarks: remarks.clone(),
        }],
    )
    .map_err(|e| HandlerErr::db_update(e, "academic_records"))?;
    if outcome.inserted == 0 {
        return Err(HandlerErr {
            code: "duplicate_key",
            message: "a record for this student, test and stream already exists".to_string(),
            details: Some(json!({
                "regNumber": key.reg_number,
                "testName": key.test_name,
                "stream": key.stream.as_str(),
            })),
        });
    }

    let record_id: String = conn
        .query_row(
            "SELECT id FROM academic_records
             WHERE reg_number = ? AND test_name = ? AND stream = ?",
            (&key.reg_number, &key.test_name, key.stream.as_str()),
            |row| row.get(0),
        )
        .map_err(HandlerErr::db)?;

    Ok(json!({ "recordId": record_id, "remarks": remarks }))
}

fn records_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM academic_records WHERE id = ?",
                RECORD_COLUMNS
            ),
            [&record_id],
            |row| record_row_json(row),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    record
        .map(|r| json!({ "record": r }))
        .ok_or_else(|| HandlerErr::not_found("record not found"))
}

fn records_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    for key_field in ["regNumber", "testName", "stream"] {
        if patch.contains_key(key_field) {
            return Err(HandlerErr::bad_params(format!(
                "{} is part of the record key and cannot be changed",
                key_field
            )));
        }
    }

    let existing = conn
        .query_row(
            &format!(
                "SELECT {} FROM academic_records WHERE id = ?",
                RECORD_COLUMNS
            ),
            [&record_id],
            |row| record_row_json(row),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(mut current) = existing else {
        return Err(HandlerErr::not_found("record not found"));
    };

    for field in [
        "studentName",
        "campus",
        "section",
        "overallTotalMarks",
        "fullMarks",
        "percentage",
        "percentile",
        "rank",
        "isPresent",
    ] {
        if let Some(value) = patch.get(field) {
            current[field] = value.clone();
        }
    }
    if let Some(date) = patch.get("date") {
        let parsed = date
            .as_str()
            .and_then(|raw| chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok());
        let Some(parsed) = parsed else {
            return Err(HandlerErr::bad_params("Invalid date format"));
        };
        current["date"] = json!(parsed.to_string());
    }
    if let Some(subjects) = patch.get("subjects") {
        let parsed: Vec<SubjectScore> = serde_json::from_value(subjects.clone())
            .map_err(|_| HandlerErr::bad_params("subjects must be a list of subject scores"))?;
        if parsed.is_empty() {
            return Err(HandlerErr::bad_params("Subjects must be a non-empty array"));
        }
        current["subjects"] = subjects.clone();
    }

    let is_present = current["isPresent"].as_bool().unwrap_or(true);
    let percentile = current["percentile"].as_f64().unwrap_or(0.0);
    let remarks = if is_present {
        calc::remark_for_percentile(percentile).to_string()
    } else {
        calc::ABSENT_REMARK.to_string()
    };

    conn.execute(
        "UPDATE academic_records SET
            student_name = ?, campus = ?, section = ?, date = ?, subjects = ?,
            overall_total_marks = ?, full_marks = ?, percentage = ?,
            percentile = ?, rank = ?, is_present = ?, remarks = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            current["studentName"].as_str().unwrap_or_default(),
            current["campus"].as_str().unwrap_or_default(),
            current["section"].as_str().unwrap_or_default(),
            current["date"].as_str().unwrap_or_default(),
            current["subjects"].to_string(),
            current["overallTotalMarks"].as_f64().unwrap_or(0.0),
            current["fullMarks"].as_f64().unwrap_or(0.0),
            current["percentage"].as_f64().unwrap_or(0.0),
            percentile,
            current["rank"].as_i64().unwrap_or(0),
            is_present as i64,
            remarks,
            db::now_iso(),
            record_id,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "academic_records"))?;

    Ok(json!({ "recordId": record_id, "remarks": remarks }))
}

fn records_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let deleted = conn
        .execute("DELETE FROM academic_records WHERE id = ?", [&record_id])
        .map_err(|e| HandlerErr::db_update(e, "academic_records"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("record not found"));
    }
    Ok(json!({ "deleted": deleted }))
}

fn records_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    for (key, clause) in [
        ("regNumber", "reg_number = ?"),
        ("testName", "test_name = ?"),
        ("campus", "campus = ?"),
        ("section", "section = ?"),
        ("dateFrom", "date >= ?"),
        ("dateTo", "date <= ?"),
    ] {
        if let Some(value) = get_opt_str(params, key) {
            clauses.push(clause);
            args.push(value);
        }
    }
    if let Some(stream) = get_opt_str(params, "stream") {
        parse_stream_param(&stream)?;
        clauses.push("stream = ?");
        args.push(stream);
    }
    if let Some(is_present) = params.get("isPresent").and_then(|v| v.as_bool()) {
        clauses.push("is_present = ?");
        args.push(if is_present { "1" } else { "0" }.to_string());
    }

    let mut sql = format!("SELECT {} FROM academic_records", RECORD_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY date DESC, test_name ASC");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let records = stmt
        .query_map(params_from_iter(args.iter()), |row| record_row_json(row))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "count": records.len(), "records": records }))
}

fn records_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reg_number = get_required_str(params, "regNumber")?;
    let stream = get_opt_str(params, "stream");
    if let Some(s) = &stream {
        parse_stream_param(s)?;
    }

    let mut sql = format!(
        "SELECT {} FROM academic_records WHERE reg_number = ?",
        RECORD_COLUMNS
    );
    let mut args: Vec<String> = vec![reg_number];
    if let Some(s) = stream {
        sql.push_str(" AND stream = ?");
        args.push(s);
    }
    sql.push_str(" ORDER BY date DESC");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let records = stmt
        .query_map(params_from_iter(args.iter()), |row| record_row_json(row))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    if records.is_empty() {
        return Err(HandlerErr::not_found("no records found for this student"));
    }

    // Group by test name, preserving newest-first order of first appearance.
    let mut groups: Vec<(String, Vec<serde_json::Value>)> = Vec::new();
    for record in records {
        let test_name = record["testName"].as_str().unwrap_or_default().to_string();
        match groups.iter_mut().find(|(name, _)| *name == test_name) {
            Some((_, bucket)) => bucket.push(record),
            None => groups.push((test_name, vec![record])),
        }
    }
    let tests: Vec<serde_json::Value> = groups
        .into_iter()
        .map(|(test_name, records)| {
            json!({
                "testName": test_name,
                "count": records.len(),
                "records": records,
            })
        })
        .collect();

    Ok(json!({ "tests": tests }))
}

fn records_test_names(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let stream = parse_stream_param(&get_required_str(params, "stream")?)?;
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT test_name FROM academic_records
             WHERE stream = ? ORDER BY test_name",
        )
        .map_err(HandlerErr::db)?;
    let names = stmt
        .query_map([stream.as_str()], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "testNames": names }))
}

/// Read-only absent listing: roster minus students with a present record for
/// the test. Writes nothing; records.markAbsent is the persisting variant.
fn records_absent_for_test(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let test_name = get_required_str(params, "testName")?;
    let stream = parse_stream_param(&get_required_str(params, "stream")?)?;

    let roster = store::find_roster(conn, stream).map_err(HandlerErr::db)?;
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT reg_number FROM academic_records
             WHERE test_name = ? AND stream = ? AND is_present = 1",
        )
        .map_err(HandlerErr::db)?;
    let present = stmt
        .query_map((&test_name, stream.as_str()), |row| {
            row.get::<_, String>(0)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    let present: std::collections::HashSet<&str> = present.iter().map(String::as_str).collect();

    let absent: Vec<serde_json::Value> = roster
        .iter()
        .filter(|entry| !present.contains(entry.reg_number.as_str()))
        .map(|entry| {
            json!({
                "regNumber": entry.reg_number,
                "studentName": entry.student_name,
                "campus": entry.campus,
                "section": entry.section,
                "isPresent": false,
            })
        })
        .collect();

    Ok(json!({ "count": absent.len(), "absentStudents": absent }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.create" => Some(with_db(state, req, records_create)),
        "records.get" => Some(with_db(state, req, records_get)),
        "records.update" => Some(with_db(state, req, records_update)),
        "records.delete" => Some(with_db(state, req, records_delete)),
        "records.list" => Some(with_db(state, req, records_list)),
        "records.byStudent" => Some(with_db(state, req, records_by_student)),
        "records.testNames" => Some(with_db(state, req, records_test_names)),
        "records.absentForTest" => Some(with_db(state, req, records_absent_for_test)),
        _ => None,
    }
}
