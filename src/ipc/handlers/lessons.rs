use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_str, list_response, page_window, patch_opt_str, patch_str,
    require_admin, run_list, scope_of, validate_datetime, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const WEEKDAYS: [&str; 5] = ["monday", "tuesday", "wednesday", "thursday", "friday"];

fn normalize_day(raw: &str) -> Result<String, HandlerErr> {
    let day = raw.trim().to_ascii_lowercase();
    if WEEKDAYS.contains(&day.as_str()) {
        Ok(day)
    } else {
        Err(HandlerErr::new(
            "bad_params",
            "day must be a weekday (monday..friday)",
        ))
    }
}

fn lessons_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::lesson_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           lessons.id,
           lessons.name,
           lessons.day,
           lessons.start_time,
           lessons.end_time,
           lessons.subject_id,
           (SELECT name FROM subjects sub WHERE sub.id = lessons.subject_id),
           lessons.class_id,
           (SELECT name FROM classes c WHERE c.id = lessons.class_id),
           lessons.teacher_id,
           (SELECT t.last_name || ', ' || t.first_name FROM teachers t WHERE t.id = lessons.teacher_id)
         FROM lessons",
        "SELECT COUNT(*) FROM lessons",
        "ORDER BY lessons.name",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "day": r.get::<_, String>(2)?,
                "startTime": r.get::<_, Option<String>>(3)?,
                "endTime": r.get::<_, Option<String>>(4)?,
                "subjectId": r.get::<_, String>(5)?,
                "subjectName": r.get::<_, Option<String>>(6)?,
                "classId": r.get::<_, String>(7)?,
                "className": r.get::<_, Option<String>>(8)?,
                "teacherId": r.get::<_, String>(9)?,
                "teacherName": r.get::<_, Option<String>>(10)?,
            }))
        },
    )?;
    Ok(list_response("lessons", rows, total, page, per_page))
}

fn lessons_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let name = get_required_str(params, "name")?;
    let day = normalize_day(&get_required_str(params, "day")?)?;
    let subject_id = get_required_str(params, "subjectId")?;
    let class_id = get_required_str(params, "classId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let start_time = get_opt_str(params, "startTime");
    let end_time = get_opt_str(params, "endTime");
    if let Some(t) = &start_time {
        validate_datetime(t, "startTime")?;
    }
    if let Some(t) = &end_time {
        validate_datetime(t, "endTime")?;
    }

    for (table, id, label) in [
        ("subjects", &subject_id, "subject"),
        ("classes", &class_id, "class"),
        ("teachers", &teacher_id, "teacher"),
    ] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        let exists: Option<i64> = conn
            .query_row(&sql, [id], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(HandlerErr::new("not_found", format!("{} not found", label)));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, name, day, start_time, end_time, subject_id, class_id, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &day,
            &start_time,
            &end_time,
            &subject_id,
            &class_id,
            &teacher_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "lessons" })),
    })?;
    Ok(json!({ "lessonId": id, "name": name }))
}

fn lessons_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let lesson_id = get_required_str(params, "lessonId")?;

    #[allow(clippy::type_complexity)]
    let existing: Option<(String, String, Option<String>, Option<String>, String, String, String)> =
        conn.query_row(
            "SELECT name, day, start_time, end_time, subject_id, class_id, teacher_id
             FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()
        .map_err(db_err)?;
    let Some((cur_name, cur_day, cur_start, cur_end, cur_subject, cur_class, cur_teacher)) =
        existing
    else {
        return Err(HandlerErr::new("not_found", "lesson not found"));
    };

    let name = patch_str(params, "name", cur_name)?;
    let day = match params.get("day") {
        None => cur_day,
        Some(_) => normalize_day(&get_required_str(params, "day")?)?,
    };
    let start_time = patch_opt_str(params, "startTime", cur_start)?;
    let end_time = patch_opt_str(params, "endTime", cur_end)?;
    if let Some(t) = &start_time {
        validate_datetime(t, "startTime")?;
    }
    if let Some(t) = &end_time {
        validate_datetime(t, "endTime")?;
    }
    let subject_id = patch_str(params, "subjectId", cur_subject)?;
    let class_id = patch_str(params, "classId", cur_class)?;
    let teacher_id = patch_str(params, "teacherId", cur_teacher)?;

    conn.execute(
        "UPDATE lessons SET name = ?, day = ?, start_time = ?, end_time = ?,
                subject_id = ?, class_id = ?, teacher_id = ?
         WHERE id = ?",
        (
            &name,
            &day,
            &start_time,
            &end_time,
            &subject_id,
            &class_id,
            &teacher_id,
            &lesson_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "lessons" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn lessons_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let lesson_id = get_required_str(params, "lessonId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM lessons WHERE id = ?", [&lesson_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "lesson not found"));
    }

    let steps: [(&str, &str); 6] = [
        (
            "DELETE FROM results WHERE exam_id IN (SELECT id FROM exams WHERE lesson_id = ?)",
            "results",
        ),
        (
            "DELETE FROM results WHERE assignment_id IN (SELECT id FROM assignments WHERE lesson_id = ?)",
            "results",
        ),
        ("DELETE FROM attendance WHERE lesson_id = ?", "attendance"),
        ("DELETE FROM exams WHERE lesson_id = ?", "exams"),
        ("DELETE FROM assignments WHERE lesson_id = ?", "assignments"),
        ("DELETE FROM lessons WHERE id = ?", "lessons"),
    ];
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (sql, table) in steps {
        tx.execute(sql, [&lesson_id]).map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.list" => Some(with_conn(state, req, lessons_list)),
        "lessons.create" => Some(with_conn(state, req, lessons_create)),
        "lessons.update" => Some(with_conn(state, req, lessons_update)),
        "lessons.delete" => Some(with_conn(state, req, lessons_delete)),
        _ => None,
    }
}
