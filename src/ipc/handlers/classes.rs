use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_i64, get_opt_str, get_required_str, list_response, page_window, patch_opt_str,
    patch_str, require_admin, run_list, scope_of, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn grade_levels_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::grade_level_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT id, level FROM grade_levels",
        "SELECT COUNT(*) FROM grade_levels",
        "ORDER BY level",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "level": r.get::<_, i64>(1)?,
            }))
        },
    )?;
    Ok(list_response("gradeLevels", rows, total, page, per_page))
}

fn grade_levels_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let Some(level) = get_opt_i64(params, "level")? else {
        return Err(HandlerErr::new("bad_params", "missing level"));
    };
    if level < 1 {
        return Err(HandlerErr::new("bad_params", "level must be positive"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_levels(id, level) VALUES(?, ?)",
        (&id, level),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "grade_levels" })),
    })?;
    Ok(json!({ "gradeLevelId": id, "level": level }))
}

fn grade_levels_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let id = get_required_str(params, "gradeLevelId")?;
    let n = conn
        .execute("DELETE FROM grade_levels WHERE id = ?", [&id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grade_levels" })),
        })?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "grade level not found"));
    }
    Ok(json!({ "ok": true }))
}

fn classes_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::class_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    // Correlated subqueries keep the counts honest under the row filter.
    let (rows, total) = run_list(
        conn,
        "SELECT
           classes.id,
           classes.name,
           classes.capacity,
           classes.grade_level_id,
           (SELECT level FROM grade_levels g WHERE g.id = classes.grade_level_id),
           classes.supervisor_id,
           (SELECT t.last_name || ', ' || t.first_name FROM teachers t WHERE t.id = classes.supervisor_id),
           (SELECT COUNT(*) FROM students s WHERE s.class_id = classes.id)
         FROM classes",
        "SELECT COUNT(*) FROM classes",
        "ORDER BY classes.name",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "capacity": r.get::<_, Option<i64>>(2)?,
                "gradeLevelId": r.get::<_, String>(3)?,
                "gradeLevel": r.get::<_, Option<i64>>(4)?,
                "supervisorId": r.get::<_, Option<String>>(5)?,
                "supervisorName": r.get::<_, Option<String>>(6)?,
                "studentCount": r.get::<_, i64>(7)?,
            }))
        },
    )?;
    Ok(list_response("classes", rows, total, page, per_page))
}

fn classes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let name = get_required_str(params, "name")?;
    let grade_level_id = get_required_str(params, "gradeLevelId")?;
    let capacity = get_opt_i64(params, "capacity")?;
    let supervisor_id = get_opt_str(params, "supervisorId");

    let grade_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM grade_levels WHERE id = ?",
            [&grade_level_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if grade_exists.is_none() {
        return Err(HandlerErr::new("not_found", "grade level not found"));
    }
    if let Some(sup) = &supervisor_id {
        let sup_exists: Option<i64> = conn
            .query_row("SELECT 1 FROM teachers WHERE id = ?", [sup], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        if sup_exists.is_none() {
            return Err(HandlerErr::new("not_found", "supervisor not found"));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, capacity, grade_level_id, supervisor_id)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &name, capacity, &grade_level_id, &supervisor_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;
    Ok(json!({ "classId": id, "name": name }))
}

fn classes_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let class_id = get_required_str(params, "classId")?;

    let existing: Option<(String, Option<i64>, String, Option<String>)> = conn
        .query_row(
            "SELECT name, capacity, grade_level_id, supervisor_id FROM classes WHERE id = ?",
            [&class_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((cur_name, cur_capacity, cur_grade, cur_supervisor)) = existing else {
        return Err(HandlerErr::new("not_found", "class not found"));
    };

    let name = patch_str(params, "name", cur_name)?;
    let capacity = match params.get("capacity") {
        None => cur_capacity,
        Some(v) if v.is_null() => None,
        Some(v) => Some(v.as_i64().ok_or_else(|| {
            HandlerErr::new("bad_params", "capacity must be an integer or null")
        })?),
    };
    let grade_level_id = patch_str(params, "gradeLevelId", cur_grade)?;
    let supervisor_id = patch_opt_str(params, "supervisorId", cur_supervisor)?;

    conn.execute(
        "UPDATE classes SET name = ?, capacity = ?, grade_level_id = ?, supervisor_id = ?
         WHERE id = ?",
        (&name, capacity, &grade_level_id, &supervisor_id, &class_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn classes_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let class_id = get_required_str(params, "classId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    // Delete in dependency order; there is no ON DELETE CASCADE.
    let steps: [(&str, &str); 13] = [
        (
            "DELETE FROM results WHERE exam_id IN (
               SELECT e.id FROM exams e JOIN lessons l ON l.id = e.lesson_id WHERE l.class_id = ?)",
            "results",
        ),
        (
            "DELETE FROM results WHERE assignment_id IN (
               SELECT a.id FROM assignments a JOIN lessons l ON l.id = a.lesson_id WHERE l.class_id = ?)",
            "results",
        ),
        (
            "DELETE FROM results WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
            "results",
        ),
        (
            "DELETE FROM attendance WHERE lesson_id IN (SELECT id FROM lessons WHERE class_id = ?)",
            "attendance",
        ),
        (
            "DELETE FROM attendance WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
            "attendance",
        ),
        (
            "DELETE FROM exams WHERE lesson_id IN (SELECT id FROM lessons WHERE class_id = ?)",
            "exams",
        ),
        (
            "DELETE FROM assignments WHERE lesson_id IN (SELECT id FROM lessons WHERE class_id = ?)",
            "assignments",
        ),
        ("DELETE FROM lessons WHERE class_id = ?", "lessons"),
        ("DELETE FROM fees WHERE class_id = ?", "fees"),
        (
            "DELETE FROM announcements WHERE class_id = ?",
            "announcements",
        ),
        ("DELETE FROM events WHERE class_id = ?", "events"),
        ("DELETE FROM students WHERE class_id = ?", "students"),
        ("DELETE FROM classes WHERE id = ?", "classes"),
    ];

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (sql, table) in steps {
        tx.execute(sql, [&class_id]).map_err(|e| HandlerErr {
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
        "gradeLevels.list" => Some(with_conn(state, req, grade_levels_list)),
        "gradeLevels.create" => Some(with_conn(state, req, grade_levels_create)),
        "gradeLevels.delete" => Some(with_conn(state, req, grade_levels_delete)),
        "classes.list" => Some(with_conn(state, req, classes_list)),
        "classes.create" => Some(with_conn(state, req, classes_create)),
        "classes.update" => Some(with_conn(state, req, classes_update)),
        "classes.delete" => Some(with_conn(state, req, classes_delete)),
        _ => None,
    }
}
