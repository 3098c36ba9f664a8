//! Announcements and events: class-scoped or school-wide notices.

use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_str, list_response, page_window, patch_opt_str, patch_str,
    require_admin, run_list, scope_of, validate_date, validate_datetime, with_conn, HandlerErr,
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

fn announcements_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::announcement_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           announcements.id,
           announcements.title,
           announcements.description,
           announcements.date,
           announcements.class_id,
           (SELECT name FROM classes c WHERE c.id = announcements.class_id)
         FROM announcements",
        "SELECT COUNT(*) FROM announcements",
        "ORDER BY announcements.date DESC, announcements.title",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "date": r.get::<_, String>(3)?,
                "classId": r.get::<_, Option<String>>(4)?,
                "className": r.get::<_, Option<String>>(5)?,
            }))
        },
    )?;
    Ok(list_response("announcements", rows, total, page, per_page))
}

fn announcements_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let title = get_required_str(params, "title")?;
    let description = get_required_str(params, "description")?;
    let date = get_required_str(params, "date")?;
    validate_date(&date, "date")?;
    let class_id = get_opt_str(params, "classId");
    check_class_ref(conn, &class_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO announcements(id, title, description, date, class_id)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &title, &description, &date, &class_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "announcements" })),
    })?;
    Ok(json!({ "announcementId": id, "title": title }))
}

fn announcements_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let announcement_id = get_required_str(params, "announcementId")?;

    let existing: Option<(String, String, String, Option<String>)> = conn
        .query_row(
            "SELECT title, description, date, class_id FROM announcements WHERE id = ?",
            [&announcement_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((cur_title, cur_desc, cur_date, cur_class)) = existing else {
        return Err(HandlerErr::new("not_found", "announcement not found"));
    };

    let title = patch_str(params, "title", cur_title)?;
    let description = patch_str(params, "description", cur_desc)?;
    let date = patch_str(params, "date", cur_date)?;
    validate_date(&date, "date")?;
    let class_id = patch_opt_str(params, "classId", cur_class)?;
    check_class_ref(conn, &class_id)?;

    conn.execute(
        "UPDATE announcements SET title = ?, description = ?, date = ?, class_id = ?
         WHERE id = ?",
        (&title, &description, &date, &class_id, &announcement_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "announcements" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn announcements_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let announcement_id = get_required_str(params, "announcementId")?;
    let n = conn
        .execute(
            "DELETE FROM announcements WHERE id = ?",
            [&announcement_id],
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "announcements" })),
        })?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "announcement not found"));
    }
    Ok(json!({ "ok": true }))
}

fn events_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::event_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           events.id,
           events.title,
           events.description,
           events.start_time,
           events.end_time,
           events.class_id,
           (SELECT name FROM classes c WHERE c.id = events.class_id)
         FROM events",
        "SELECT COUNT(*) FROM events",
        "ORDER BY events.start_time DESC, events.title",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "startTime": r.get::<_, String>(3)?,
                "endTime": r.get::<_, String>(4)?,
                "classId": r.get::<_, Option<String>>(5)?,
                "className": r.get::<_, Option<String>>(6)?,
            }))
        },
    )?;
    Ok(list_response("events", rows, total, page, per_page))
}

fn events_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let title = get_required_str(params, "title")?;
    let description = get_required_str(params, "description")?;
    let start_time = get_required_str(params, "startTime")?;
    let end_time = get_required_str(params, "endTime")?;
    validate_datetime(&start_time, "startTime")?;
    validate_datetime(&end_time, "endTime")?;
    let class_id = get_opt_str(params, "classId");
    check_class_ref(conn, &class_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO events(id, title, description, start_time, end_time, class_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &title, &description, &start_time, &end_time, &class_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "events" })),
    })?;
    Ok(json!({ "eventId": id, "title": title }))
}

fn events_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let event_id = get_required_str(params, "eventId")?;

    let existing: Option<(String, String, String, String, Option<String>)> = conn
        .query_row(
            "SELECT title, description, start_time, end_time, class_id FROM events WHERE id = ?",
            [&event_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((cur_title, cur_desc, cur_start, cur_end, cur_class)) = existing else {
        return Err(HandlerErr::new("not_found", "event not found"));
    };

    let title = patch_str(params, "title", cur_title)?;
    let description = patch_str(params, "description", cur_desc)?;
    let start_time = patch_str(params, "startTime", cur_start)?;
    let end_time = patch_str(params, "endTime", cur_end)?;
    validate_datetime(&start_time, "startTime")?;
    validate_datetime(&end_time, "endTime")?;
    let class_id = patch_opt_str(params, "classId", cur_class)?;
    check_class_ref(conn, &class_id)?;

    conn.execute(
        "UPDATE events SET title = ?, description = ?, start_time = ?, end_time = ?, class_id = ?
         WHERE id = ?",
        (
            &title,
            &description,
            &start_time,
            &end_time,
            &class_id,
            &event_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "events" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn events_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let event_id = get_required_str(params, "eventId")?;
    let n = conn
        .execute("DELETE FROM events WHERE id = ?", [&event_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "events" })),
        })?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "event not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.list" => Some(with_conn(state, req, announcements_list)),
        "announcements.create" => Some(with_conn(state, req, announcements_create)),
        "announcements.update" => Some(with_conn(state, req, announcements_update)),
        "announcements.delete" => Some(with_conn(state, req, announcements_delete)),
        "events.list" => Some(with_conn(state, req, events_list)),
        "events.create" => Some(with_conn(state, req, events_create)),
        "events.update" => Some(with_conn(state, req, events_update)),
        "events.delete" => Some(with_conn(state, req, events_delete)),
        _ => None,
    }
}
