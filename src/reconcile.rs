use crate::calc;
use crate::store::{self, NewRecord, RecordKey, RosterEntry};
use crate::validate::{Stream, ValidatedRecord};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct BulkReport {
    pub inserted_count: usize,
    pub duplicates: Vec<RecordKey>,
    pub absent_marked_count: usize,
}

#[derive(Debug)]
pub struct MarkAbsentReport {
    pub total_students: usize,
    pub present_students: usize,
    pub absent_students: usize,
    pub new_absent_marked: usize,
    pub already_marked: usize,
}

fn absent_placeholder(entry: &RosterEntry, test_name: &str, date: NaiveDate) -> NewRecord {
    NewRecord {
        record: ValidatedRecord {
            reg_number: entry.reg_number.clone(),
            student_name: entry.student_name.clone(),
            campus: entry.campus.clone(),
            section: entry.section.clone(),
            stream: entry.stream,
            test_name: test_name.to_string(),
            date,
            subjects: Vec::new(),
            overall_total_marks: 0.0,
            full_marks: 0.0,
            percentage: 0.0,
            percentile: 0.0,
            rank: 0,
            is_present: false,
        },
        remarks: calc::ABSENT_REMARK.to_string(),
    }
}

/// Insert placeholders for every roster student not in `present_regs`,
/// skipping anyone who already has a record (present or absent) for the
/// test. Returns (synthesized, newly inserted).
fn insert_absentees(
    conn: &Connection,
    roster: &[RosterEntry],
    present_regs: &HashSet<&str>,
    test_name: &str,
    date: NaiveDate,
) -> anyhow::Result<(usize, usize)> {
    let placeholders: Vec<NewRecord> = roster
        .iter()
        .filter(|entry| !present_regs.contains(entry.reg_number.as_str()))
        .map(|entry| absent_placeholder(entry, test_name, date))
        .collect();
    if placeholders.is_empty() {
        return Ok((0, 0));
    }

    let keys: Vec<RecordKey> = placeholders
        .iter()
        .map(|p| RecordKey::of(&p.record))
        .collect();
    let existing = store::find_existing_keys(conn, &keys)?;
    let fresh: Vec<NewRecord> = placeholders
        .into_iter()
        .filter(|p| !existing.contains(&RecordKey::of(&p.record)))
        .collect();

    let synthesized = keys.len();
    let outcome = store::insert_records(conn, &fresh)?;
    Ok((synthesized, outcome.inserted))
}

/// Reconcile a validated batch against the store: partition new vs duplicate
/// by natural key, commit the new rows unordered, and optionally derive
/// absent placeholders for the rest of the roster.
pub fn reconcile_batch(
    conn: &Connection,
    validated: &[ValidatedRecord],
    derive_absent: bool,
) -> anyhow::Result<BulkReport> {
    let mut report = BulkReport::default();
    if validated.is_empty() {
        return Ok(report);
    }

    let keys: Vec<RecordKey> = validated.iter().map(RecordKey::of).collect();
    let existing = store::find_existing_keys(conn, &keys)?;

    let mut to_insert: Vec<NewRecord> = Vec::new();
    for record in validated {
        let key = RecordKey::of(record);
        if existing.contains(&key) {
            report.duplicates.push(key);
        } else {
            let remarks = if record.is_present {
                calc::remark_for_percentile(record.percentile).to_string()
            } else {
                calc::ABSENT_REMARK.to_string()
            };
            to_insert.push(NewRecord {
                record: record.clone(),
                remarks,
            });
        }
    }

    let outcome = store::insert_records(conn, &to_insert)?;
    report.inserted_count = outcome.inserted;
    report.duplicates.extend(outcome.conflicts);

    if derive_absent && report.inserted_count > 0 {
        // One test per batch is a handler precondition, so the first insert
        // carries the canonical test name and date for the whole roster.
        let first = &to_insert[0].record;
        let roster = store::find_roster(conn, first.stream)?;
        if !roster.is_empty() {
            let present_regs: HashSet<&str> = to_insert
                .iter()
                .map(|p| p.record.reg_number.as_str())
                .collect();
            let (_, inserted) =
                insert_absentees(conn, &roster, &present_regs, &first.test_name, first.date)?;
            report.absent_marked_count = inserted;
        }
    }

    Ok(report)
}

/// Derive absentees for a test that was already uploaded: roster minus the
/// students with a present record. Returns None when the test has no present
/// record to take the canonical date from.
pub fn mark_absent_for_test(
    conn: &Connection,
    test_name: &str,
    stream: Stream,
) -> anyhow::Result<Option<MarkAbsentReport>> {
    use rusqlite::OptionalExtension;

    let canonical_date: Option<String> = conn
        .query_row(
            "SELECT date FROM academic_records
             WHERE test_name = ? AND stream = ? AND is_present = 1
             ORDER BY date LIMIT 1",
            (test_name, stream.as_str()),
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw_date) = canonical_date else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("stored date {:?} unreadable: {}", raw_date, e))?;

    let roster = store::find_roster(conn, stream)?;

    let mut stmt = conn.prepare(
        "SELECT DISTINCT reg_number FROM academic_records
         WHERE test_name = ? AND stream = ? AND is_present = 1",
    )?;
    let present: Vec<String> = stmt
        .query_map((test_name, stream.as_str()), |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let present_regs: HashSet<&str> = present.iter().map(String::as_str).collect();

    let (absent_students, new_absent_marked) =
        insert_absentees(conn, &roster, &present_regs, test_name, date)?;

    Ok(Some(MarkAbsentReport {
        total_students: roster.len(),
        present_students: present_regs.len(),
        absent_students,
        new_absent_marked,
        already_marked: absent_students - new_absent_marked,
    }))
}
