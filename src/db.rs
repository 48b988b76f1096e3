use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schooldesk.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            reg_number TEXT NOT NULL UNIQUE,
            student_name TEXT NOT NULL,
            campus TEXT NOT NULL,
            section TEXT NOT NULL,
            stream TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_stream ON students(stream)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_campus_section ON students(campus, section)",
        [],
    )?;

    // Natural key (reg_number, test_name, stream) is enforced here so a
    // concurrent submission racing past the pre-check surfaces as a key
    // conflict, which the reconciliation path counts as a duplicate.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_records(
            id TEXT PRIMARY KEY,
            reg_number TEXT NOT NULL,
            student_name TEXT NOT NULL,
            campus TEXT NOT NULL,
            section TEXT NOT NULL,
            stream TEXT NOT NULL,
            test_name TEXT NOT NULL,
            date TEXT NOT NULL,
            subjects TEXT NOT NULL,
            overall_total_marks REAL NOT NULL,
            full_marks REAL NOT NULL,
            percentage REAL NOT NULL,
            percentile REAL NOT NULL,
            rank INTEGER NOT NULL,
            is_present INTEGER NOT NULL,
            remarks TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(reg_number, test_name, stream)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_records_reg ON academic_records(reg_number)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_records_test_stream
         ON academic_records(test_name, stream)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_records_date_stream
         ON academic_records(date, stream)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            reg_number TEXT NOT NULL,
            student_name TEXT NOT NULL,
            campus TEXT NOT NULL,
            section TEXT NOT NULL,
            subject TEXT NOT NULL,
            period TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_reg_date ON attendance(reg_number, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_section_campus_date
         ON attendance(section, campus, date)",
        [],
    )?;

    Ok(conn)
}

pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
