use crate::db;
use crate::ipc::helpers::{get_opt_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate::Stream;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn valid_reg_number(reg: &str) -> bool {
    reg.len() == 6 && reg.chars().all(|c| c.is_ascii_digit())
}

fn parse_stream_param(raw: &str) -> Result<Stream, HandlerErr> {
    Stream::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "Invalid stream value: {}. Must be 'LongTerm' or 'PUC'",
            raw
        ))
    })
}

fn student_row_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "regNumber": row.get::<_, String>(1)?,
        "studentName": row.get::<_, String>(2)?,
        "campus": row.get::<_, String>(3)?,
        "section": row.get::<_, String>(4)?,
        "stream": row.get::<_, String>(5)?,
    }))
}

const STUDENT_COLUMNS: &str = "id, reg_number, student_name, campus, section, stream";

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reg_number = get_required_str(params, "regNumber")?;
    let student_name = get_required_str(params, "studentName")?;
    let campus = get_required_str(params, "campus")?;
    let section = get_required_str(params, "section")?;
    let stream = parse_stream_param(&get_required_str(params, "stream")?)?;

    if !valid_reg_number(&reg_number) {
        return Err(HandlerErr::bad_params(
            "regNumber must be exactly 6 digits",
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = db::now_iso();
    let inserted = conn
        .execute(
            "INSERT INTO students(id, reg_number, student_name, campus, section, stream,
                                  created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(reg_number) DO NOTHING",
            (
                &id,
                &reg_number,
                &student_name,
                &campus,
                &section,
                stream.as_str(),
                &now,
                &now,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    if inserted == 0 {
        return Err(HandlerErr {
            code: "duplicate_reg_number",
            message: format!("student {} already exists", reg_number),
            details: Some(json!({ "regNumber": reg_number })),
        });
    }

    Ok(json!({ "studentId": id, "regNumber": reg_number }))
}

fn students_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reg_number = get_required_str(params, "regNumber")?;
    let student = conn
        .query_row(
            &format!("SELECT {} FROM students WHERE reg_number = ?", STUDENT_COLUMNS),
            [&reg_number],
            |row| student_row_json(row),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    student
        .map(|s| json!({ "student": s }))
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    if let Some(stream) = get_opt_str(params, "stream") {
        parse_stream_param(&stream)?;
        clauses.push("stream = ?");
        args.push(stream);
    }
    if let Some(campus) = get_opt_str(params, "campus") {
        clauses.push("campus = ?");
        args.push(campus);
    }
    if let Some(section) = get_opt_str(params, "section") {
        clauses.push("section = ?");
        args.push(section);
    }

    let mut sql = format!("SELECT {} FROM students", STUDENT_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY reg_number");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let students = stmt
        .query_map(params_from_iter(args.iter()), |row| student_row_json(row))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "count": students.len(), "students": students }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reg_number = get_required_str(params, "regNumber")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    for (key, column) in [
        ("studentName", "student_name"),
        ("campus", "campus"),
        ("section", "section"),
        ("stream", "stream"),
    ] {
        if let Some(value) = patch.get(key).and_then(|v| v.as_str()) {
            if key == "stream" {
                parse_stream_param(value)?;
            }
            sets.push(format!("{} = ?", column));
            args.push(value.to_string());
        }
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch has no recognized fields"));
    }

    let sql = format!(
        "UPDATE students SET {}, updated_at = ? WHERE reg_number = ?",
        sets.join(", ")
    );
    args.push(db::now_iso());
    args.push(reg_number);
    let changed = conn
        .execute(&sql, params_from_iter(args.iter()))
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "updated": changed }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reg_number = get_required_str(params, "regNumber")?;
    let deleted = conn
        .execute("DELETE FROM students WHERE reg_number = ?", [&reg_number])
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(with_db(state, req, students_create)),
        "students.get" => Some(with_db(state, req, students_get)),
        "students.list" => Some(with_db(state, req, students_list)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
