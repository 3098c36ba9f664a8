use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

use crate::access::{Actor, Filter, Scope};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

/// Every handler needs an open workspace; this keeps the wrappers flat.
pub fn with_conn<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing numeric {}", key)))
}

pub fn get_opt_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be numeric", key))),
    }
}

pub fn get_opt_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be an integer", key))),
    }
}

pub fn get_opt_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a boolean", key))),
    }
}

/// Resolves the caller's scope from the request's explicit actor context.
pub fn scope_of(params: &serde_json::Value) -> Scope {
    Scope::of(&Actor::from_params(params))
}

pub const DEFAULT_PER_PAGE: i64 = 10;
const MAX_PER_PAGE: i64 = 200;

/// 1-based page plus clamped page size.
pub fn page_window(params: &serde_json::Value) -> (i64, i64) {
    let page = params
        .get("page")
        .and_then(|v| v.as_i64())
        .filter(|p| *p >= 1)
        .unwrap_or(1);
    let per_page = params
        .get("perPage")
        .and_then(|v| v.as_i64())
        .filter(|p| *p >= 1)
        .unwrap_or(DEFAULT_PER_PAGE)
        .min(MAX_PER_PAGE);
    (page, per_page)
}

/// Runs a filtered, paginated list query and the matching COUNT. Both SQL
/// strings end before WHERE; the filter supplies the rest.
pub fn run_list<F>(
    conn: &Connection,
    select_sql: &str,
    count_sql: &str,
    order_sql: &str,
    filter: &Filter,
    page: i64,
    per_page: i64,
    map: F,
) -> Result<(Vec<serde_json::Value>, i64), HandlerErr>
where
    F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value>,
{
    let (where_sql, binds) = filter.where_clause();

    let count_query = format!("{}{}", count_sql, where_sql);
    let total: i64 = conn
        .query_row(&count_query, params_from_iter(binds.iter().cloned()), |r| {
            r.get(0)
        })
        .map_err(db_err)?;

    let query = format!("{}{} {} LIMIT ? OFFSET ?", select_sql, where_sql, order_sql);
    let mut all_binds = binds;
    all_binds.push(Value::Integer(per_page));
    all_binds.push(Value::Integer((page - 1) * per_page));

    let mut stmt = conn.prepare(&query).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(all_binds), |r| map(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok((rows, total))
}

pub fn list_response(
    key: &str,
    rows: Vec<serde_json::Value>,
    total: i64,
    page: i64,
    per_page: i64,
) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(key.to_string(), serde_json::Value::Array(rows));
    obj.insert("total".to_string(), json!(total));
    obj.insert("page".to_string(), json!(page));
    obj.insert("perPage".to_string(), json!(per_page));
    serde_json::Value::Object(obj)
}

pub fn require_admin(scope: &Scope) -> Result<(), HandlerErr> {
    if scope.is_admin() {
        return Ok(());
    }
    Err(HandlerErr::new("forbidden", "admin role required"))
}

/// Admin always; a teacher only for their own lesson.
pub fn require_lesson_manager(
    conn: &Connection,
    scope: &Scope,
    lesson_id: &str,
) -> Result<(), HandlerErr> {
    if scope.is_admin() {
        return Ok(());
    }
    let Some(teacher_id) = scope.teacher_id() else {
        return Err(HandlerErr::new(
            "forbidden",
            "admin or teacher role required",
        ));
    };
    let owner: Option<String> = conn
        .query_row(
            "SELECT teacher_id FROM lessons WHERE id = ?",
            [lesson_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    match owner {
        None => Err(HandlerErr::new("not_found", "lesson not found")),
        Some(owner_id) if owner_id == teacher_id => Ok(()),
        Some(_) => Err(HandlerErr::new("forbidden", "not your lesson")),
    }
}

/// Patch semantics for a required text column: absent keeps the current
/// value, a non-empty string replaces it.
pub fn patch_str(
    params: &serde_json::Value,
    key: &str,
    current: String,
) -> Result<String, HandlerErr> {
    match params.get(key) {
        None => Ok(current),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("{} must be a string", key),
                ));
            };
            let t = s.trim();
            if t.is_empty() {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("{} must not be empty", key),
                ));
            }
            Ok(t.to_string())
        }
    }
}

/// Patch semantics for a nullable text column: absent keeps the current
/// value, JSON null clears it, a string replaces it.
pub fn patch_opt_str(
    params: &serde_json::Value,
    key: &str,
    current: Option<String>,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(current),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("{} must be string or null", key),
                ));
            };
            let t = s.trim();
            if t.is_empty() {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("{} must not be empty", key),
                ));
            }
            Ok(Some(t.to_string()))
        }
    }
}

pub fn validate_date(value: &str, key: &str) -> Result<(), HandlerErr> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| HandlerErr::new("bad_params", format!("{} must be YYYY-MM-DD", key)))
}

pub fn validate_datetime(value: &str, key: &str) -> Result<(), HandlerErr> {
    DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|_| HandlerErr::new("bad_params", format!("{} must be an RFC3339 timestamp", key)))
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
