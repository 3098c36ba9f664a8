use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn admin() -> serde_json::Value {
    json!({ "id": "ADMIN", "role": "admin" })
}

fn actor(id: &str, role: &str) -> serde_json::Value {
    json!({ "id": id, "role": role })
}

fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let grade = request_ok(
        stdin,
        reader,
        "g",
        "gradeLevels.create",
        json!({ "actor": admin(), "level": 7 }),
    );
    let grade_id = grade["gradeLevelId"].as_str().expect("grade").to_string();
    let subject = request_ok(
        stdin,
        reader,
        "s",
        "subjects.create",
        json!({ "actor": admin(), "name": "History" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subject").to_string();
    for id in ["T1", "T2"] {
        let _ = request_ok(
            stdin,
            reader,
            id,
            "teachers.create",
            json!({
                "actor": admin(),
                "id": id,
                "username": format!("u.{}", id),
                "firstName": "Teach",
                "lastName": id
            }),
        );
    }
    let class = request_ok(
        stdin,
        reader,
        "c",
        "classes.create",
        json!({ "actor": admin(), "name": "7C", "gradeLevelId": grade_id }),
    );
    let class_id = class["classId"].as_str().expect("class").to_string();
    let _ = request_ok(
        stdin,
        reader,
        "st",
        "students.create",
        json!({
            "actor": admin(),
            "id": "S1",
            "username": "s.one",
            "firstName": "Sade",
            "lastName": "One",
            "classId": class_id,
            "gradeLevelId": grade_id
        }),
    );
    let lesson = request_ok(
        stdin,
        reader,
        "l",
        "lessons.create",
        json!({
            "actor": admin(),
            "name": "History 7C",
            "day": "friday",
            "subjectId": subject_id,
            "classId": class_id,
            "teacherId": "T1"
        }),
    );
    lesson["lessonId"].as_str().expect("lesson").to_string()
}

#[test]
fn marking_attendance_upserts_one_row_per_day() {
    let workspace = temp_dir("schoold-attendance-upsert");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let lesson_id = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "actor": actor("T1", "teacher"),
            "studentId": "S1",
            "lessonId": lesson_id,
            "date": "2025-09-15",
            "present": true
        }),
    );
    // Same day again flips the flag instead of adding a second row.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "attendance.mark",
        json!({
            "actor": actor("T1", "teacher"),
            "studentId": "S1",
            "lessonId": lesson_id,
            "date": "2025-09-15",
            "present": false
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l",
        "attendance.list",
        json!({ "actor": admin() }),
    );
    assert_eq!(listed["total"].as_i64(), Some(1));
    assert_eq!(listed["attendance"][0]["present"].as_bool(), Some(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn attendance_writes_require_owning_the_lesson() {
    let workspace = temp_dir("schoold-attendance-auth");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let lesson_id = seed(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "x",
        "attendance.mark",
        json!({
            "actor": actor("T2", "teacher"),
            "studentId": "S1",
            "lessonId": lesson_id,
            "date": "2025-09-15",
            "present": true
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("forbidden"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "bad-date",
        "attendance.mark",
        json!({
            "actor": actor("T1", "teacher"),
            "studentId": "S1",
            "lessonId": lesson_id,
            "date": "15/09/2025",
            "present": true
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn attendance_lists_are_scoped_to_the_caller() {
    let workspace = temp_dir("schoold-attendance-scope");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let lesson_id = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m",
        "attendance.mark",
        json!({
            "actor": actor("T1", "teacher"),
            "studentId": "S1",
            "lessonId": lesson_id,
            "date": "2025-09-16",
            "present": true
        }),
    );

    for (who, expected) in [
        (actor("T1", "teacher"), 1),
        (actor("T2", "teacher"), 0),
        (actor("S1", "student"), 1),
        (json!({ "role": "teacher" }), 0),
    ] {
        let listed = request_ok(
            &mut stdin,
            &mut reader,
            "list",
            "attendance.list",
            json!({ "actor": who }),
        );
        assert_eq!(listed["total"].as_i64(), Some(expected));
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
