use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "schoold.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_levels(
            id TEXT PRIMARY KEY,
            level INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    // Teacher ids come from the identity provider, not from this daemon.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            address TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            capacity INTEGER,
            grade_level_id TEXT NOT NULL,
            supervisor_id TEXT,
            FOREIGN KEY(grade_level_id) REFERENCES grade_levels(id),
            FOREIGN KEY(supervisor_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_grade_level ON classes(grade_level_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_supervisor ON classes(supervisor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            address TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            address TEXT,
            birth_date TEXT,
            class_id TEXT NOT NULL,
            grade_level_id TEXT NOT NULL,
            parent_id TEXT,
            created_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(grade_level_id) REFERENCES grade_levels(id),
            FOREIGN KEY(parent_id) REFERENCES parents(id)
        )",
        [],
    )?;
    // Existing workspaces may have a students table without birth_date.
    ensure_students_birth_date(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_parent ON students(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            day TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_class ON lessons(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_teacher ON lessons(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_subject ON lessons(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            lesson_id TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_lesson ON exams(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            start_date TEXT,
            due_date TEXT,
            total_points REAL,
            lesson_id TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_lesson ON assignments(lesson_id)",
        [],
    )?;

    // A result references exactly one assessment; the CHECK keeps the two
    // reference columns mutually exclusive.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            score REAL NOT NULL,
            exam_id TEXT,
            assignment_id TEXT,
            student_id TEXT NOT NULL,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            CHECK((exam_id IS NULL) <> (assignment_id IS NULL))
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_exam ON results(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_assignment ON results(assignment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            present INTEGER NOT NULL,
            student_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            UNIQUE(student_id, lesson_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_lesson ON attendance(lesson_id)",
        [],
    )?;

    // class_id NULL means school-wide for fees, announcements and events.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            amount REAL NOT NULL,
            due_date TEXT,
            class_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_class ON fees(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            date TEXT NOT NULL,
            class_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcements_class ON announcements(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            class_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_class ON events(class_id)",
        [],
    )?;

    // sender_id/recipient_id may belong to any role's table, so no FK.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            subject TEXT,
            body TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            read_at TEXT
        )",
        [],
    )?;
    ensure_messages_read_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_birth_date(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "birth_date")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN birth_date TEXT", [])?;
    Ok(())
}

fn ensure_messages_read_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "messages", "read_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE messages ADD COLUMN read_at TEXT", [])?;
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

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
