use crate::access;
use crate::ipc::helpers::{
    db_err, get_required_str, list_response, page_window, patch_str, require_admin, run_list,
    scope_of, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn subjects_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::subject_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           subjects.id,
           subjects.name,
           (SELECT COUNT(*) FROM lessons l WHERE l.subject_id = subjects.id)
         FROM subjects",
        "SELECT COUNT(*) FROM subjects",
        "ORDER BY subjects.name",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "lessonCount": r.get::<_, i64>(2)?,
            }))
        },
    )?;
    Ok(list_response("subjects", rows, total, page, per_page))
}

fn subjects_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let name = get_required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (&id, &name))
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subjects" })),
        })?;
    Ok(json!({ "subjectId": id, "name": name }))
}

fn subjects_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let subject_id = get_required_str(params, "subjectId")?;
    let existing: Option<String> = conn
        .query_row("SELECT name FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    let Some(cur_name) = existing else {
        return Err(HandlerErr::new("not_found", "subject not found"));
    };
    let name = patch_str(params, "name", cur_name)?;
    conn.execute(
        "UPDATE subjects SET name = ? WHERE id = ?",
        (&name, &subject_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "subjects" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn subjects_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let subject_id = get_required_str(params, "subjectId")?;
    let in_use: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM lessons WHERE subject_id = ? LIMIT 1",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if in_use.is_some() {
        return Err(HandlerErr::new(
            "bad_params",
            "subject still has lessons; delete them first",
        ));
    }
    let n = conn
        .execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subjects" })),
        })?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(with_conn(state, req, subjects_list)),
        "subjects.create" => Some(with_conn(state, req, subjects_create)),
        "subjects.update" => Some(with_conn(state, req, subjects_update)),
        "subjects.delete" => Some(with_conn(state, req, subjects_delete)),
        _ => None,
    }
}
