use crate::db;
use crate::ipc::helpers::{get_opt_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const STATUSES: [&str; 3] = ["present", "absent", "forgiven"];

struct AttendanceEntry {
    reg_number: String,
    subject: String,
    period: String,
    date: String,
    status: String,
}

fn parse_entries(params: &serde_json::Value) -> Result<Vec<AttendanceEntry>, HandlerErr> {
    let Some(raw) = params.get("attendance").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(
            "attendance must be a non-empty array",
        ));
    };
    if raw.is_empty() {
        return Err(HandlerErr::bad_params(
            "attendance must be a non-empty array",
        ));
    }

    let mut entries = Vec::with_capacity(raw.len());
    for (index, item) in raw.iter().enumerate() {
        let field = |key: &str| -> Result<String, HandlerErr> {
            item.get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("attendance[{}] missing {}", index, key))
                })
        };
        let date = field("date")?;
        if chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
            return Err(HandlerErr::bad_params(format!(
                "attendance[{}] has invalid date {:?}",
                index, date
            )));
        }
        let status = field("status")?;
        if !STATUSES.contains(&status.as_str()) {
            return Err(HandlerErr::bad_params(format!(
                "attendance[{}] status must be one of present, absent, forgiven",
                index
            )));
        }
        entries.push(AttendanceEntry {
            reg_number: field("regNumber")?,
            subject: field("subject")?,
            period: field("period")?,
            date,
            status,
        });
    }
    Ok(entries)
}

struct RosterDetails {
    student_name: String,
    campus: String,
    section: String,
}

/// Look up every submitted regNumber in one query; the missing set is
/// reported to the caller so a typo never produces orphan rows.
fn roster_details(
    conn: &Connection,
    entries: &[AttendanceEntry],
) -> Result<HashMap<String, RosterDetails>, HandlerErr> {
    let mut regs: Vec<&str> = entries.iter().map(|e| e.reg_number.as_str()).collect();
    regs.sort_unstable();
    regs.dedup();

    let marks = vec!["?"; regs.len()].join(",");
    let sql = format!(
        "SELECT reg_number, student_name, campus, section FROM students
         WHERE reg_number IN ({})",
        marks
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(params_from_iter(regs.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                RosterDetails {
                    student_name: row.get(1)?,
                    campus: row.get(2)?,
                    section: row.get(3)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    let found: HashMap<String, RosterDetails> = rows.into_iter().collect();

    let missing: Vec<&str> = regs
        .iter()
        .filter(|reg| !found.contains_key(**reg))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(HandlerErr {
            code: "students_missing",
            message: "some students were not found".to_string(),
            details: Some(json!({ "missingRegNumbers": missing })),
        });
    }
    Ok(found)
}

fn attendance_bulk_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entries = parse_entries(params)?;
    let details = roster_details(conn, &entries)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db_update(e, "attendance"))?;
    let now = db::now_iso();
    for entry in &entries {
        let Some(student) = details.get(&entry.reg_number) else {
            continue;
        };
        tx.execute(
            "INSERT INTO attendance(id, reg_number, student_name, campus, section,
                                    subject, period, date, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                entry.reg_number,
                student.student_name,
                student.campus,
                student.section,
                entry.subject,
                entry.period,
                entry.date,
                entry.status,
                now,
            ],
        )
        .map_err(|e| HandlerErr::db_update(e, "attendance"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db_update(e, "attendance"))?;

    Ok(json!({ "count": entries.len() }))
}

fn attendance_row_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "regNumber": row.get::<_, String>(1)?,
        "studentName": row.get::<_, String>(2)?,
        "campus": row.get::<_, String>(3)?,
        "section": row.get::<_, String>(4)?,
        "subject": row.get::<_, String>(5)?,
        "period": row.get::<_, String>(6)?,
        "date": row.get::<_, String>(7)?,
        "status": row.get::<_, String>(8)?,
    }))
}

const ATTENDANCE_COLUMNS: &str =
    "id, reg_number, student_name, campus, section, subject, period, date, status";

fn attendance_query(
    conn: &Connection,
    clauses: Vec<&str>,
    args: Vec<String>,
) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = format!("SELECT {} FROM attendance", ATTENDANCE_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY date DESC, section ASC, student_name ASC");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            attendance_row_json(row)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "count": rows.len(), "attendance": rows }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    for (key, clause) in [
        ("section", "section = ?"),
        ("campus", "campus = ?"),
        ("subject", "subject = ?"),
        ("dateFrom", "date >= ?"),
        ("dateTo", "date <= ?"),
    ] {
        if let Some(value) = get_opt_str(params, key) {
            clauses.push(clause);
            args.push(value);
        }
    }
    attendance_query(conn, clauses, args)
}

fn attendance_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reg_number = get_required_str(params, "regNumber")?;
    let mut clauses: Vec<&str> = vec!["reg_number = ?"];
    let mut args: Vec<String> = vec![reg_number];
    for (key, clause) in [
        ("subject", "subject = ?"),
        ("dateFrom", "date >= ?"),
        ("dateTo", "date <= ?"),
    ] {
        if let Some(value) = get_opt_str(params, key) {
            clauses.push(clause);
            args.push(value);
        }
    }
    attendance_query(conn, clauses, args)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.bulkCreate" => Some(with_db(state, req, attendance_bulk_create)),
        "attendance.list" => Some(with_db(state, req, attendance_list)),
        "attendance.byStudent" => Some(with_db(state, req, attendance_by_student)),
        _ => None,
    }
}
