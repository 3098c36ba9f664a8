use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_str, list_response, now_rfc3339, page_window, patch_opt_str,
    patch_str, require_admin, run_list, scope_of, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parents_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::parent_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           parents.id,
           parents.username,
           parents.first_name,
           parents.last_name,
           parents.email,
           parents.phone,
           parents.address,
           (SELECT COUNT(*) FROM students s WHERE s.parent_id = parents.id)
         FROM parents",
        "SELECT COUNT(*) FROM parents",
        "ORDER BY parents.last_name, parents.first_name",
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
                "studentCount": r.get::<_, i64>(7)?,
            }))
        },
    )?;
    Ok(list_response("parents", rows, total, page, per_page))
}

fn parents_create(
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
    let id = get_opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO parents(id, username, first_name, last_name, email, phone, address, created_at)
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
        details: Some(json!({ "table": "parents" })),
    })?;
    Ok(json!({ "parentId": id, "username": username }))
}

fn parents_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let parent_id = get_required_str(params, "parentId")?;

    let existing: Option<(String, String, String, Option<String>, Option<String>, Option<String>)> =
        conn.query_row(
            "SELECT username, first_name, last_name, email, phone, address
             FROM parents WHERE id = ?",
            [&parent_id],
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
        return Err(HandlerErr::new("not_found", "parent not found"));
    };

    let username = patch_str(params, "username", cur_username)?;
    let first_name = patch_str(params, "firstName", cur_first)?;
    let last_name = patch_str(params, "lastName", cur_last)?;
    let email = patch_opt_str(params, "email", cur_email)?;
    let phone = patch_opt_str(params, "phone", cur_phone)?;
    let address = patch_opt_str(params, "address", cur_address)?;

    conn.execute(
        "UPDATE parents SET username = ?, first_name = ?, last_name = ?, email = ?, phone = ?, address = ?
         WHERE id = ?",
        (
            &username,
            &first_name,
            &last_name,
            &email,
            &phone,
            &address,
            &parent_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "parents" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn parents_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let parent_id = get_required_str(params, "parentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM parents WHERE id = ?", [&parent_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "parent not found"));
    }

    // Children stay; they just lose the link.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE students SET parent_id = NULL WHERE parent_id = ?",
        [&parent_id],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    tx.execute("DELETE FROM parents WHERE id = ?", [&parent_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "parents" })),
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "parents.list" => Some(with_conn(state, req, parents_list)),
        "parents.create" => Some(with_conn(state, req, parents_create)),
        "parents.update" => Some(with_conn(state, req, parents_update)),
        "parents.delete" => Some(with_conn(state, req, parents_delete)),
        _ => None,
    }
}
