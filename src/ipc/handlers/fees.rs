use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_f64, get_required_str, list_response, page_window,
    patch_opt_str, patch_str, require_admin, run_list, scope_of, validate_date, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn check_class_ref(conn: &Connection, class_id: &Option<String>) -> Result<(), HandlerErr> {
    if let Some(cid) = class_id {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM classes WHERE id = ?", [cid], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(HandlerErr::new("not_found", "class not found"));
        }
    }
    Ok(())
}

fn fees_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::fee_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           fees.id,
           fees.title,
           fees.amount,
           fees.due_date,
           fees.class_id,
           (SELECT name FROM classes c WHERE c.id = fees.class_id)
         FROM fees",
        "SELECT COUNT(*) FROM fees",
        "ORDER BY fees.due_date, fees.title",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "amount": r.get::<_, f64>(2)?,
                "dueDate": r.get::<_, Option<String>>(3)?,
                "classId": r.get::<_, Option<String>>(4)?,
                "className": r.get::<_, Option<String>>(5)?,
            }))
        },
    )?;
    Ok(list_response("fees", rows, total, page, per_page))
}

fn fees_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let title = get_required_str(params, "title")?;
    let amount = get_required_f64(params, "amount")?;
    if amount < 0.0 {
        return Err(HandlerErr::new("bad_params", "amount must be non-negative"));
    }
    let due_date = get_opt_str(params, "dueDate");
    if let Some(d) = &due_date {
        validate_date(d, "dueDate")?;
    }
    // No class means the fee applies school-wide.
    let class_id = get_opt_str(params, "classId");
    check_class_ref(conn, &class_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fees(id, title, amount, due_date, class_id) VALUES(?, ?, ?, ?, ?)",
        (&id, &title, amount, &due_date, &class_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "fees" })),
    })?;
    Ok(json!({ "feeId": id, "title": title }))
}

fn fees_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let fee_id = get_required_str(params, "feeId")?;

    let existing: Option<(String, f64, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT title, amount, due_date, class_id FROM fees WHERE id = ?",
            [&fee_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((cur_title, cur_amount, cur_due, cur_class)) = existing else {
        return Err(HandlerErr::new("not_found", "fee not found"));
    };

    let title = patch_str(params, "title", cur_title)?;
    let amount = match params.get("amount") {
        None => cur_amount,
        Some(v) => {
            let a = v
                .as_f64()
                .ok_or_else(|| HandlerErr::new("bad_params", "amount must be numeric"))?;
            if a < 0.0 {
                return Err(HandlerErr::new("bad_params", "amount must be non-negative"));
            }
            a
        }
    };
    let due_date = patch_opt_str(params, "dueDate", cur_due)?;
    if let Some(d) = &due_date {
        validate_date(d, "dueDate")?;
    }
    let class_id = patch_opt_str(params, "classId", cur_class)?;
    check_class_ref(conn, &class_id)?;

    conn.execute(
        "UPDATE fees SET title = ?, amount = ?, due_date = ?, class_id = ? WHERE id = ?",
        (&title, amount, &due_date, &class_id, &fee_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "fees" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn fees_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let fee_id = get_required_str(params, "feeId")?;
    let n = conn
        .execute("DELETE FROM fees WHERE id = ?", [&fee_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "fees" })),
        })?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "fee not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.list" => Some(with_conn(state, req, fees_list)),
        "fees.create" => Some(with_conn(state, req, fees_create)),
        "fees.update" => Some(with_conn(state, req, fees_update)),
        "fees.delete" => Some(with_conn(state, req, fees_delete)),
        _ => None,
    }
}
