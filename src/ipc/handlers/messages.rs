use crate::access::{self, Actor, Scope};
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_str, list_response, now_rfc3339, page_window, run_list,
    scope_of, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn messages_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::message_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT id, subject, body, sender_id, recipient_id, sent_at, read_at FROM messages",
        "SELECT COUNT(*) FROM messages",
        "ORDER BY sent_at DESC, id",
        &filter,
        page,
        per_page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subject": r.get::<_, Option<String>>(1)?,
                "body": r.get::<_, String>(2)?,
                "senderId": r.get::<_, String>(3)?,
                "recipientId": r.get::<_, String>(4)?,
                "sentAt": r.get::<_, String>(5)?,
                "readAt": r.get::<_, Option<String>>(6)?,
            }))
        },
    )?;
    Ok(list_response("messages", rows, total, page, per_page))
}

/// Anyone with an identity may write, but only as themselves.
fn messages_send(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = Actor::from_params(params);
    let Some(sender_id) = actor.id else {
        return Err(HandlerErr::new("forbidden", "an actor id is required"));
    };
    if actor.role.is_none() {
        return Err(HandlerErr::new("forbidden", "a recognized role is required"));
    }
    let recipient_id = get_required_str(params, "recipientId")?;
    let body = get_required_str(params, "body")?;
    let subject = get_opt_str(params, "subject");

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO messages(id, subject, body, sender_id, recipient_id, sent_at, read_at)
         VALUES(?, ?, ?, ?, ?, ?, NULL)",
        (&id, &subject, &body, &sender_id, &recipient_id, now_rfc3339()),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "messages" })),
    })?;
    Ok(json!({ "messageId": id }))
}

fn messages_mark_read(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let message_id = get_required_str(params, "messageId")?;

    let recipient: Option<String> = conn
        .query_row(
            "SELECT recipient_id FROM messages WHERE id = ?",
            [&message_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(recipient) = recipient else {
        return Err(HandlerErr::new("not_found", "message not found"));
    };
    let allowed = match &scope {
        Scope::Admin => true,
        _ => scope.actor_id() == Some(recipient.as_str()),
    };
    if !allowed {
        return Err(HandlerErr::new("forbidden", "only the recipient may mark a message read"));
    }

    conn.execute(
        "UPDATE messages SET read_at = ? WHERE id = ? AND read_at IS NULL",
        (now_rfc3339(), &message_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "messages" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn messages_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let message_id = get_required_str(params, "messageId")?;

    let sender: Option<String> = conn
        .query_row(
            "SELECT sender_id FROM messages WHERE id = ?",
            [&message_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(sender) = sender else {
        return Err(HandlerErr::new("not_found", "message not found"));
    };
    let allowed = match &scope {
        Scope::Admin => true,
        _ => scope.actor_id() == Some(sender.as_str()),
    };
    if !allowed {
        return Err(HandlerErr::new("forbidden", "only the sender may delete a message"));
    }

    conn.execute("DELETE FROM messages WHERE id = ?", [&message_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "messages" })),
        })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.list" => Some(with_conn(state, req, messages_list)),
        "messages.send" => Some(with_conn(state, req, messages_send)),
        "messages.markRead" => Some(with_conn(state, req, messages_mark_read)),
        "messages.delete" => Some(with_conn(state, req, messages_delete)),
        _ => None,
    }
}
