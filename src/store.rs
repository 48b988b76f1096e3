use crate::validate::{Stream, ValidatedRecord};
use rusqlite::{params_from_iter, Connection};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub reg_number: String,
    pub test_name: String,
    pub stream: Stream,
}

impl RecordKey {
    pub fn of(record: &ValidatedRecord) -> RecordKey {
        RecordKey {
            reg_number: record.reg_number.clone(),
            test_name: record.test_name.clone(),
            stream: record.stream,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub reg_number: String,
    pub student_name: String,
    pub campus: String,
    pub section: String,
    pub stream: Stream,
}

/// A validated record plus its derived remark, ready to persist.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub record: ValidatedRecord,
    pub remarks: String,
}

#[derive(Debug, Default)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub conflicts: Vec<RecordKey>,
}

/// One batched existence query for every incoming natural key. Keys found in
/// the store come back as a set; anything absent is new.
pub fn find_existing_keys(
    conn: &Connection,
    keys: &[RecordKey],
) -> anyhow::Result<HashSet<RecordKey>> {
    if keys.is_empty() {
        return Ok(HashSet::new());
    }

    let tuples = vec!["(?,?,?)"; keys.len()].join(",");
    let sql = format!(
        "SELECT reg_number, test_name, stream FROM academic_records
         WHERE (reg_number, test_name, stream) IN (VALUES {})",
        tuples
    );
    let mut params: Vec<String> = Vec::with_capacity(keys.len() * 3);
    for key in keys {
        params.push(key.reg_number.clone());
        params.push(key.test_name.clone());
        params.push(key.stream.as_str().to_string());
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut found = HashSet::new();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let stream_raw: String = row.get(2)?;
        let Some(stream) = Stream::parse(&stream_raw) else {
            continue;
        };
        found.insert(RecordKey {
            reg_number: row.get(0)?,
            test_name: row.get(1)?,
            stream,
        });
    }
    Ok(found)
}

/// Unordered batch insert: every row is committed independently, so one bad
/// row never blocks the rest. A natural-key conflict (a concurrent writer
/// beat the pre-check) is collected as a duplicate rather than an error.
pub fn insert_records(conn: &Connection, rows: &[NewRecord]) -> anyhow::Result<InsertOutcome> {
    let mut outcome = InsertOutcome::default();
    let now = crate::db::now_iso();
    for new in rows {
        let r = &new.record;
        let subjects_json = serde_json::to_string(&r.subjects)?;
        let changed = conn.execute(
            "INSERT INTO academic_records(
                id, reg_number, student_name, campus, section, stream,
                test_name, date, subjects, overall_total_marks, full_marks,
                percentage, percentile, rank, is_present, remarks,
                created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(reg_number, test_name, stream) DO NOTHING",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                r.reg_number,
                r.student_name,
                r.campus,
                r.section,
                r.stream.as_str(),
                r.test_name,
                r.date.to_string(),
                subjects_json,
                r.overall_total_marks,
                r.full_marks,
                r.percentage,
                r.percentile,
                r.rank,
                r.is_present as i64,
                new.remarks,
                now,
                now,
            ],
        )?;
        if changed == 0 {
            outcome.conflicts.push(RecordKey::of(r));
        } else {
            outcome.inserted += 1;
        }
    }
    Ok(outcome)
}

pub fn find_roster(conn: &Connection, stream: Stream) -> anyhow::Result<Vec<RosterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT reg_number, student_name, campus, section, stream
         FROM students WHERE stream = ? ORDER BY reg_number",
    )?;
    let rows = stmt
        .query_map([stream.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut roster = Vec::with_capacity(rows.len());
    for (reg_number, student_name, campus, section, stream_raw) in rows {
        let Some(stream) = Stream::parse(&stream_raw) else {
            continue;
        };
        roster.push(RosterEntry {
            reg_number,
            student_name,
            campus,
            section,
            stream,
        });
    }
    Ok(roster)
}
