use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("besmart.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT 'math'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            plan TEXT NOT NULL DEFAULT 'free',
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            prompt TEXT NOT NULL,
            correct_answer TEXT,
            premium INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, idx)
        )",
        [],
    )?;
    ensure_questions_max_attempts(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_class ON questions(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_class_idx ON questions(class_id, idx)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS answer_attempts(
            id TEXT PRIMARY KEY,
            question_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attempt_no INTEGER NOT NULL,
            selected TEXT NOT NULL,
            correct INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(question_id) REFERENCES questions(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(question_id, student_id, attempt_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answer_attempts_question ON answer_attempts(question_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answer_attempts_student ON answer_attempts(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS zoom_sessions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            join_url TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_zoom_sessions_class ON zoom_sessions(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_zoom_sessions_starts ON zoom_sessions(class_id, starts_at)",
        [],
    )?;

    // Attendance is keyed on (session, student) so a replayed webhook
    // delivery upserts instead of double-counting.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_attendance(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES zoom_sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_attendance_student ON session_attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscriptions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            allowed_sessions INTEGER NOT NULL,
            used_sessions INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(class_id, student_id, period_start)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_student ON subscriptions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subscription_id TEXT,
            amount REAL NOT NULL,
            currency TEXT NOT NULL,
            paid_at TEXT NOT NULL,
            reference TEXT UNIQUE,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subscription_id) REFERENCES subscriptions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_questions_max_attempts(conn: &Connection) -> anyhow::Result<()> {
    // First-release workspaces predate per-question attempt limits.
    if table_has_column(conn, "questions", "max_attempts")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE questions ADD COLUMN max_attempts INTEGER NOT NULL DEFAULT 3",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
