use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_bool, get_required_str, list_response, page_window, require_lesson_manager,
    run_list, scope_of, validate_date, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::attendance_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           attendance.id,
           attendance.date,
           attendance.present,
           attendance.student_id,
           (SELECT s.last_name || ', ' || s.first_name FROM students s WHERE s.id = attendance.student_id),
           attendance.lesson_id,
           (SELECT name FROM lessons l WHERE l.id = attendance.lesson_id)
         FROM attendance",
        "SELECT COUNT(*) FROM attendance",
        "ORDER BY attendance.date DESC, attendance.id",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "date": r.get::<_, String>(1)?,
                "present": r.get::<_, i64>(2)? != 0,
                "studentId": r.get::<_, String>(3)?,
                "studentName": r.get::<_, Option<String>>(4)?,
                "lessonId": r.get::<_, String>(5)?,
                "lessonName": r.get::<_, Option<String>>(6)?,
            }))
        },
    )?;
    Ok(list_response("attendance", rows, total, page, per_page))
}

/// Upsert: one row per (student, lesson, date).
fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let student_id = get_required_str(params, "studentId")?;
    let lesson_id = get_required_str(params, "lessonId")?;
    let date = get_required_str(params, "date")?;
    validate_date(&date, "date")?;
    let Some(present) = get_opt_bool(params, "present")? else {
        return Err(HandlerErr::new("bad_params", "missing present"));
    };
    require_lesson_manager(conn, &scope, &lesson_id)?;

    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students
             WHERE id = ? AND class_id = (SELECT class_id FROM lessons WHERE id = ?)",
            (&student_id, &lesson_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if enrolled.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            "student is not in the lesson's class",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance(id, date, present, student_id, lesson_id)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, lesson_id, date) DO UPDATE SET
           present = excluded.present",
        (&id, &date, present as i64, &student_id, &lesson_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn attendance_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let attendance_id = get_required_str(params, "attendanceId")?;
    let lesson_id: Option<String> = conn
        .query_row(
            "SELECT lesson_id FROM attendance WHERE id = ?",
            [&attendance_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(lesson_id) = lesson_id else {
        return Err(HandlerErr::new("not_found", "attendance row not found"));
    };
    require_lesson_manager(conn, &scope, &lesson_id)?;

    conn.execute("DELETE FROM attendance WHERE id = ?", [&attendance_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(with_conn(state, req, attendance_list)),
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.delete" => Some(with_conn(state, req, attendance_delete)),
        _ => None,
    }
}
