use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_admin, scope_of, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn settings_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = get_required_str(params, "key")?;
    let value = db::settings_get_json(conn, &key)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "key": key, "value": value }))
}

fn settings_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let key = get_required_str(params, "key")?;
    let Some(value) = params.get("value") else {
        return Err(HandlerErr::new("bad_params", "missing value"));
    };
    db::settings_set_json(conn, &key, value)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(with_conn(state, req, settings_get)),
        "settings.update" => Some(with_conn(state, req, settings_update)),
        _ => None,
    }
}
