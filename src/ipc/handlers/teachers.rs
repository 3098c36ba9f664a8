use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_str, list_response, now_rfc3339, page_window, patch_opt_str,
    patch_str, require_admin, run_list, scope_of, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn teachers_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::teacher_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           teachers.id,
           teachers.username,
           teachers.first_name,
           teachers.last_name,
           teachers.email,
           teachers.phone,
           teachers.address,
           (SELECT COUNT(*) FROM lessons l WHERE l.teacher_id = teachers.id),
           (SELECT COUNT(*) FROM classes c WHERE c.supervisor_id = teachers.id)
         FROM teachers",
        "SELECT COUNT(*) FROM teachers",
        "ORDER BY teachers.last_name, teachers.first_name",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "lastName": r.get::<_, String>(3)?,
                "email": r.get::<_, Option<String>>(4)?,
                "phone": r.get::<_, Option<String>>(5)?,
                "address": r.get::<_, Option<String>>(6)?,
                "lessonCount": r.get::<_, i64>(7)?,
                "supervisedClassCount": r.get::<_, i64>(8)?,
            }))
        },
    )?;
    Ok(list_response("teachers", rows, total, page, per_page))
}

fn teachers_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let username = get_required_str(params, "username")?;
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let email = get_opt_str(params, "email");
    let phone = get_opt_str(params, "phone");
    let address = get_opt_str(params, "address");
    // The shell passes the identity-provider subject id when it created one.
    let id = get_opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO teachers(id, username, first_name, last_name, email, phone, address, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &username,
            &first_name,
            &last_name,
            &email,
            &phone,
            &address,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teachers" })),
    })?;
    Ok(json!({ "teacherId": id, "username": username }))
}

fn teachers_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let existing: Option<(String, String, String, Option<String>, Option<String>, Option<String>)> =
        conn.query_row(
            "SELECT username, first_name, last_name, email, phone, address
             FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(db_err)?;
    let Some((cur_username, cur_first, cur_last, cur_email, cur_phone, cur_address)) = existing
    else {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    };

    let username = patch_str(params, "username", cur_username)?;
    let first_name = patch_str(params, "firstName", cur_first)?;
    let last_name = patch_str(params, "lastName", cur_last)?;
    let email = patch_opt_str(params, "email", cur_email)?;
    let phone = patch_opt_str(params, "phone", cur_phone)?;
    let address = patch_opt_str(params, "address", cur_address)?;

    conn.execute(
        "UPDATE teachers SET username = ?, first_name = ?, last_name = ?, email = ?, phone = ?, address = ?
         WHERE id = ?",
        (
            &username,
            &first_name,
            &last_name,
            &email,
            &phone,
            &address,
            &teacher_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teachers" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn teachers_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }
    let teaching: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM lessons WHERE teacher_id = ? LIMIT 1",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if teaching.is_some() {
        return Err(HandlerErr::new(
            "bad_params",
            "teacher still has lessons; reassign them first",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE classes SET supervisor_id = NULL WHERE supervisor_id = ?",
        [&teacher_id],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;
    tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "teachers" })),
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(with_conn(state, req, teachers_list)),
        "teachers.create" => Some(with_conn(state, req, teachers_create)),
        "teachers.update" => Some(with_conn(state, req, teachers_update)),
        "teachers.delete" => Some(with_conn(state, req, teachers_delete)),
        _ => None,
    }
}
