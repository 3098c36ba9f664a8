use crate::access;
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_str, list_response, now_rfc3339, page_window, patch_opt_str,
    patch_str, require_admin, run_list, scope_of, validate_date, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::student_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        "SELECT
           students.id,
           students.username,
           students.first_name,
           students.last_name,
           students.email,
           students.phone,
           students.birth_date,
           students.class_id,
           (SELECT name FROM classes c WHERE c.id = students.class_id),
           students.grade_level_id,
           (SELECT level FROM grade_levels g WHERE g.id = students.grade_level_id),
           students.parent_id
         FROM students",
        "SELECT COUNT(*) FROM students",
        "ORDER BY students.last_name, students.first_name",
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
                "birthDate": r.get::<_, Option<String>>(6)?,
                "classId": r.get::<_, String>(7)?,
                "className": r.get::<_, Option<String>>(8)?,
                "gradeLevelId": r.get::<_, String>(9)?,
                "gradeLevel": r.get::<_, Option<i64>>(10)?,
                "parentId": r.get::<_, Option<String>>(11)?,
            }))
        },
    )?;
    Ok(list_response("students", rows, total, page, per_page))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let username = get_required_str(params, "username")?;
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let class_id = get_required_str(params, "classId")?;
    let grade_level_id = get_required_str(params, "gradeLevelId")?;
    let parent_id = get_opt_str(params, "parentId");
    let email = get_opt_str(params, "email");
    let phone = get_opt_str(params, "phone");
    let address = get_opt_str(params, "address");
    let birth_date = get_opt_str(params, "birthDate");
    if let Some(bd) = &birth_date {
        validate_date(bd, "birthDate")?;
    }
    let id = get_opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());

    let class_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if class_exists.is_none() {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    if let Some(pid) = &parent_id {
        let parent_exists: Option<i64> = conn
            .query_row("SELECT 1 FROM parents WHERE id = ?", [pid], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        if parent_exists.is_none() {
            return Err(HandlerErr::new("not_found", "parent not found"));
        }
    }

    conn.execute(
        "INSERT INTO students(id, username, first_name, last_name, email, phone, address,
                              birth_date, class_id, grade_level_id, parent_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &username,
            &first_name,
            &last_name,
            &email,
            &phone,
            &address,
            &birth_date,
            &class_id,
            &grade_level_id,
            &parent_id,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    Ok(json!({ "studentId": id, "username": username }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let student_id = get_required_str(params, "studentId")?;

    #[allow(clippy::type_complexity)]
    let existing: Option<(
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
        String,
        Option<String>,
    )> = conn
        .query_row(
            "SELECT username, first_name, last_name, email, phone, address, birth_date,
                    class_id, grade_level_id, parent_id
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                    r.get(8)?,
                    r.get(9)?,
                ))
            },
        )
        .optional()
        .map_err(db_err)?;
    let Some((
        cur_username,
        cur_first,
        cur_last,
        cur_email,
        cur_phone,
        cur_address,
        cur_birth,
        cur_class,
        cur_grade,
        cur_parent,
    )) = existing
    else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    let username = patch_str(params, "username", cur_username)?;
    let first_name = patch_str(params, "firstName", cur_first)?;
    let last_name = patch_str(params, "lastName", cur_last)?;
    let email = patch_opt_str(params, "email", cur_email)?;
    let phone = patch_opt_str(params, "phone", cur_phone)?;
    let address = patch_opt_str(params, "address", cur_address)?;
    let birth_date = patch_opt_str(params, "birthDate", cur_birth)?;
    if let Some(bd) = &birth_date {
        validate_date(bd, "birthDate")?;
    }
    let class_id = patch_str(params, "classId", cur_class)?;
    let grade_level_id = patch_str(params, "gradeLevelId", cur_grade)?;
    let parent_id = patch_opt_str(params, "parentId", cur_parent)?;

    conn.execute(
        "UPDATE students SET username = ?, first_name = ?, last_name = ?, email = ?, phone = ?,
                address = ?, birth_date = ?, class_id = ?, grade_level_id = ?, parent_id = ?
         WHERE id = ?",
        (
            &username,
            &first_name,
            &last_name,
            &email,
            &phone,
            &address,
            &birth_date,
            &class_id,
            &grade_level_id,
            &parent_id,
            &student_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let student_id = get_required_str(params, "studentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let steps: [(&str, &str); 3] = [
        ("DELETE FROM results WHERE student_id = ?", "results"),
        ("DELETE FROM attendance WHERE student_id = ?", "attendance"),
        ("DELETE FROM students WHERE id = ?", "students"),
    ];
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (sql, table) in steps {
        tx.execute(sql, [&student_id]).map_err(|e| HandlerErr {
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
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
