use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_f64, get_opt_str, get_required_str, list_response, page_window, patch_opt_str,
    patch_str, require_lesson_manager, run_list, scope_of, validate_date, validate_datetime,
    with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn exams_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::exam_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           exams.id,
           exams.title,
           exams.start_time,
           exams.end_time,
           exams.lesson_id,
           (SELECT name FROM lessons l WHERE l.id = exams.lesson_id),
           (SELECT c.name FROM lessons l JOIN classes c ON c.id = l.class_id WHERE l.id = exams.lesson_id)
         FROM exams",
        "SELECT COUNT(*) FROM exams",
        "ORDER BY exams.title",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "startTime": r.get::<_, Option<String>>(2)?,
                "endTime": r.get::<_, Option<String>>(3)?,
                "lessonId": r.get::<_, String>(4)?,
                "lessonName": r.get::<_, Option<String>>(5)?,
                "className": r.get::<_, Option<String>>(6)?,
            }))
        },
    )?;
    Ok(list_response("exams", rows, total, page, per_page))
}

fn exams_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let title = get_required_str(params, "title")?;
    let lesson_id = get_required_str(params, "lessonId")?;
    require_lesson_manager(conn, &scope, &lesson_id)?;
    let start_time = get_opt_str(params, "startTime");
    let end_time = get_opt_str(params, "endTime");
    if let Some(t) = &start_time {
        validate_datetime(t, "startTime")?;
    }
    if let Some(t) = &end_time {
        validate_datetime(t, "endTime")?;
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, title, start_time, end_time, lesson_id) VALUES(?, ?, ?, ?, ?)",
        (&id, &title, &start_time, &end_time, &lesson_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "exams" })),
    })?;
    Ok(json!({ "examId": id, "title": title }))
}

fn exams_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let exam_id = get_required_str(params, "examId")?;

    let existing: Option<(String, Option<String>, Option<String>, String)> = conn
        .query_row(
            "SELECT title, start_time, end_time, lesson_id FROM exams WHERE id = ?",
            [&exam_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((cur_title, cur_start, cur_end, lesson_id)) = existing else {
        return Err(HandlerErr::new("not_found", "exam not found"));
    };
    require_lesson_manager(conn, &scope, &lesson_id)?;

    let title = patch_str(params, "title", cur_title)?;
    let start_time = patch_opt_str(params, "startTime", cur_start)?;
    let end_time = patch_opt_str(params, "endTime", cur_end)?;
    if let Some(t) = &start_time {
        validate_datetime(t, "startTime")?;
    }
    if let Some(t) = &end_time {
        validate_datetime(t, "endTime")?;
    }

    conn.execute(
        "UPDATE exams SET title = ?, start_time = ?, end_time = ? WHERE id = ?",
        (&title, &start_time, &end_time, &exam_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "exams" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn exams_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let exam_id = get_required_str(params, "examId")?;
    let lesson_id: Option<String> = conn
        .query_row("SELECT lesson_id FROM exams WHERE id = ?", [&exam_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    let Some(lesson_id) = lesson_id else {
        return Err(HandlerErr::new("not_found", "exam not found"));
    };
    require_lesson_manager(conn, &scope, &lesson_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM results WHERE exam_id = ?", [&exam_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "results" })),
        })?;
    tx.execute("DELETE FROM exams WHERE id = ?", [&exam_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "exams" })),
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn assignments_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::assignment_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           assignments.id,
           assignments.title,
           assignments.start_date,
           assignments.due_date,
           assignments.total_points,
           assignments.lesson_id,
           (SELECT name FROM lessons l WHERE l.id = assignments.lesson_id),
           (SELECT c.name FROM lessons l JOIN classes c ON c.id = l.class_id WHERE l.id = assignments.lesson_id)
         FROM assignments",
        "SELECT COUNT(*) FROM assignments",
        "ORDER BY assignments.title",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "startDate": r.get::<_, Option<String>>(2)?,
                "dueDate": r.get::<_, Option<String>>(3)?,
                "totalPoints": r.get::<_, Option<f64>>(4)?,
                "lessonId": r.get::<_, String>(5)?,
                "lessonName": r.get::<_, Option<String>>(6)?,
                "className": r.get::<_, Option<String>>(7)?,
            }))
        },
    )?;
    Ok(list_response("assignments", rows, total, page, per_page))
}

fn assignments_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let title = get_required_str(params, "title")?;
    let lesson_id = get_required_str(params, "lessonId")?;
    require_lesson_manager(conn, &scope, &lesson_id)?;
    let start_date = get_opt_str(params, "startDate");
    let due_date = get_opt_str(params, "dueDate");
    if let Some(d) = &start_date {
        validate_date(d, "startDate")?;
    }
    if let Some(d) = &due_date {
        validate_date(d, "dueDate")?;
    }
    let total_points = get_opt_f64(params, "totalPoints")?;
    if let Some(tp) = total_points {
        if tp <= 0.0 {
            return Err(HandlerErr::new("bad_params", "totalPoints must be positive"));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assignments(id, title, start_date, due_date, total_points, lesson_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &title, &start_date, &due_date, total_points, &lesson_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "assignments" })),
    })?;
    Ok(json!({ "assignmentId": id, "title": title }))
}

fn assignments_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let assignment_id = get_required_str(params, "assignmentId")?;

    let existing: Option<(String, Option<String>, Option<String>, Option<f64>, String)> = conn
        .query_row(
            "SELECT title, start_date, due_date, total_points, lesson_id
             FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((cur_title, cur_start, cur_due, cur_points, lesson_id)) = existing else {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    };
    require_lesson_manager(conn, &scope, &lesson_id)?;

    let title = patch_str(params, "title", cur_title)?;
    let start_date = patch_opt_str(params, "startDate", cur_start)?;
    let due_date = patch_opt_str(params, "dueDate", cur_due)?;
    if let Some(d) = &start_date {
        validate_date(d, "startDate")?;
    }
    if let Some(d) = &due_date {
        validate_date(d, "dueDate")?;
    }
    let total_points = match params.get("totalPoints") {
        None => cur_points,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let tp = v.as_f64().ok_or_else(|| {
                HandlerErr::new("bad_params", "totalPoints must be numeric or null")
            })?;
            if tp <= 0.0 {
                return Err(HandlerErr::new("bad_params", "totalPoints must be positive"));
            }
            Some(tp)
        }
    };

    conn.execute(
        "UPDATE assignments SET title = ?, start_date = ?, due_date = ?, total_points = ?
         WHERE id = ?",
        (&title, &start_date, &due_date, total_points, &assignment_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "assignments" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn assignments_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let assignment_id = get_required_str(params, "assignmentId")?;
    let lesson_id: Option<String> = conn
        .query_row(
            "SELECT lesson_id FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(lesson_id) = lesson_id else {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    };
    require_lesson_manager(conn, &scope, &lesson_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM results WHERE assignment_id = ?",
        [&assignment_id],
    )
    .map_err(|e| HandlerErr {
        code: "db_delete_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "results" })),
    })?;
    tx.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "assignments" })),
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.list" => Some(with_conn(state, req, exams_list)),
        "exams.create" => Some(with_conn(state, req, exams_create)),
        "exams.update" => Some(with_conn(state, req, exams_update)),
        "exams.delete" => Some(with_conn(state, req, exams_delete)),
        "assignments.list" => Some(with_conn(state, req, assignments_list)),
        "assignments.create" => Some(with_conn(state, req, assignments_create)),
        "assignments.update" => Some(with_conn(state, req, assignments_update)),
        "assignments.delete" => Some(with_conn(state, req, assignments_delete)),
        _ => None,
    }
}
