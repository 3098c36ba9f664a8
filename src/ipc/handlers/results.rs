use crate::access;
use crate::calc::{self, Assessment};
use crate::ipc::helpers::{
    db_err, get_opt_f64, get_opt_str, get_required_f64, get_required_str, list_response,
    page_window, require_lesson_manager, run_list, scope_of, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const LIST_SELECT: &str = "SELECT
   results.id,
   results.score,
   results.student_id,
   students.first_name,
   students.last_name,
   results.exam_id,
   exams.title,
   results.assignment_id,
   assignments.title,
   assignments.total_points
 FROM results
 JOIN students ON students.id = results.student_id
 LEFT JOIN exams ON exams.id = results.exam_id
 LEFT JOIN assignments ON assignments.id = results.assignment_id";

const LIST_COUNT: &str = "SELECT COUNT(*)
 FROM results
 JOIN students ON students.id = results.student_id
 LEFT JOIN exams ON exams.id = results.exam_id
 LEFT JOIN assignments ON assignments.id = results.assignment_id";

fn assessment_from_row(
    result_id: &str,
    exam: (Option<String>, Option<String>),
    assignment: (Option<String>, Option<String>, Option<f64>),
) -> Option<Assessment> {
    match (exam, assignment) {
        ((Some(id), title), _) => Some(Assessment::Exam {
            id,
            title: title.unwrap_or_default(),
        }),
        (_, (Some(id), title, total_points)) => Some(Assessment::Assignment {
            id,
            title: title.unwrap_or_default(),
            total_points,
        }),
        _ => {
            // Pre-CHECK workspaces can hold rows with no assessment link.
            tracing::warn!(result_id, "result references no exam or assignment; skipping");
            None
        }
    }
}

fn results_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::result_conditions(&scope, params);
    let (page, per_page) = page_window(params);
    let (rows, total) = run_list(
        conn,
        LIST_SELECT,
        LIST_COUNT,
        "ORDER BY students.last_name, students.first_name, results.id",
        &filter,
        page,
        per_page,
        |r| {
            let id: String = r.get(0)?;
            let score: f64 = r.get(1)?;
            let student_id: String = r.get(2)?;
            let first: String = r.get(3)?;
            let last: String = r.get(4)?;
            let exam: (Option<String>, Option<String>) = (r.get(5)?, r.get(6)?);
            let assignment: (Option<String>, Option<String>, Option<f64>) =
                (r.get(7)?, r.get(8)?, r.get(9)?);

            let Some(assessment) = assessment_from_row(&id, exam, assignment) else {
                return Ok(serde_json::Value::Null);
            };
            let grade = calc::derive_grade(score, assessment.max_score());
            Ok(json!({
                "id": id,
                "score": score,
                "studentId": student_id,
                "studentName": format!("{}, {}", last, first),
                "assessmentKind": assessment.kind(),
                "assessmentId": assessment.id(),
                "assessmentTitle": assessment.title(),
                "maxScore": assessment.max_score(),
                "percentage": grade.percentage,
                "letterGrade": grade.letter,
                "performance": grade.label,
            }))
        },
    )?;
    let rows: Vec<serde_json::Value> = rows.into_iter().filter(|v| !v.is_null()).collect();
    Ok(list_response("results", rows, total, page, per_page))
}

fn results_class_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let filter = access::result_conditions(&scope, params);
    let (where_sql, binds) = filter.where_clause();

    let query = format!(
        "SELECT results.id, results.score, results.exam_id, results.assignment_id, assignments.total_points
         FROM results
         JOIN students ON students.id = results.student_id
         LEFT JOIN exams ON exams.id = results.exam_id
         LEFT JOIN assignments ON assignments.id = results.assignment_id{}",
        where_sql
    );
    let mut stmt = conn.prepare(&query).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<f64>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut percentages = Vec::with_capacity(rows.len());
    for (id, score, exam_id, assignment_id, total_points) in rows {
        let max = match (exam_id, assignment_id) {
            (Some(_), _) => calc::EXAM_MAX_SCORE,
            (_, Some(_)) => total_points.unwrap_or(calc::DEFAULT_MAX_SCORE),
            _ => {
                tracing::warn!(result_id = %id, "result references no exam or assignment; skipping");
                continue;
            }
        };
        percentages.push(calc::derive_grade(score, max).percentage);
    }

    let stats = calc::result_stats(percentages);
    Ok(serde_json::to_value(stats).unwrap_or_else(|_| json!({})))
}

/// Resolves the lesson behind the referenced assessment. Exactly one of the
/// two ids must be present.
fn assessment_lesson(
    conn: &Connection,
    exam_id: &Option<String>,
    assignment_id: &Option<String>,
) -> Result<String, HandlerErr> {
    match (exam_id, assignment_id) {
        (Some(_), Some(_)) => Err(HandlerErr::new(
            "bad_params",
            "provide examId or assignmentId, not both",
        )),
        (Some(eid), None) => conn
            .query_row("SELECT lesson_id FROM exams WHERE id = ?", [eid], |r| {
                r.get(0)
            })
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| HandlerErr::new("not_found", "exam not found")),
        (None, Some(aid)) => conn
            .query_row(
                "SELECT lesson_id FROM assignments WHERE id = ?",
                [aid],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| HandlerErr::new("not_found", "assignment not found")),
        (None, None) => Err(HandlerErr::new(
            "bad_params",
            "missing examId or assignmentId",
        )),
    }
}

fn results_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let student_id = get_required_str(params, "studentId")?;
    let exam_id = get_opt_str(params, "examId");
    let assignment_id = get_opt_str(params, "assignmentId");
    let score = get_required_f64(params, "score")?;
    if score < 0.0 {
        return Err(HandlerErr::new("bad_params", "score must be non-negative"));
    }

    let lesson_id = assessment_lesson(conn, &exam_id, &assignment_id)?;
    require_lesson_manager(conn, &scope, &lesson_id)?;

    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if student_exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO results(id, score, exam_id, assignment_id, student_id)
         VALUES(?, ?, ?, ?, ?)",
        (&id, score, &exam_id, &assignment_id, &student_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "results" })),
    })?;
    Ok(json!({ "resultId": id }))
}

fn result_row_lesson(conn: &Connection, result_id: &str) -> Result<String, HandlerErr> {
    let row: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT exam_id, assignment_id FROM results WHERE id = ?",
            [result_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((exam_id, assignment_id)) = row else {
        return Err(HandlerErr::new("not_found", "result not found"));
    };
    assessment_lesson(conn, &exam_id, &assignment_id)
}

fn results_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let result_id = get_required_str(params, "resultId")?;
    let lesson_id = result_row_lesson(conn, &result_id)?;
    require_lesson_manager(conn, &scope, &lesson_id)?;

    let Some(score) = get_opt_f64(params, "score")? else {
        return Err(HandlerErr::new("bad_params", "missing score"));
    };
    if score < 0.0 {
        return Err(HandlerErr::new("bad_params", "score must be non-negative"));
    }

    conn.execute(
        "UPDATE results SET score = ? WHERE id = ?",
        (score, &result_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "results" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn results_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = scope_of(params);
    let result_id = get_required_str(params, "resultId")?;
    let lesson_id = result_row_lesson(conn, &result_id)?;
    require_lesson_manager(conn, &scope, &lesson_id)?;

    conn.execute("DELETE FROM results WHERE id = ?", [&result_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "results" })),
        })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.list" => Some(with_conn(state, req, results_list)),
        "results.classStats" => Some(with_conn(state, req, results_class_stats)),
        "results.create" => Some(with_conn(state, req, results_create)),
        "results.update" => Some(with_conn(state, req, results_update)),
        "results.delete" => Some(with_conn(state, req, results_delete)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_with_exam_link_becomes_an_exam_assessment() {
        let a = assessment_from_row(
            "r1",
            (Some("e1".to_string()), Some("Final".to_string())),
            (None, None, None),
        )
        .expect("assessment");
        assert_eq!(a.kind(), "exam");
        assert_eq!(a.max_score(), 100.0);
    }

    #[test]
    fn row_with_assignment_link_carries_total_points() {
        let a = assessment_from_row(
            "r2",
            (None, None),
            (Some("a1".to_string()), Some("Lab".to_string()), Some(50.0)),
        )
        .expect("assessment");
        assert_eq!(a.kind(), "assignment");
        assert_eq!(a.max_score(), 50.0);
    }

    #[test]
    fn row_with_no_assessment_link_is_skipped() {
        assert!(assessment_from_row("r3", (None, None), (None, None, None)).is_none());
    }
}
