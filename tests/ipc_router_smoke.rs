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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn admin() -> serde_json::Value {
    json!({ "id": "ADMIN", "role": "admin" })
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schoold-router-smoke");
    let bundle_out = workspace.join("smoke-backup.schoolbackup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let grade = request(
        &mut stdin,
        &mut reader,
        "3",
        "gradeLevels.create",
        json!({ "actor": admin(), "level": 8 }),
    );
    let grade_id = grade
        .get("result")
        .and_then(|v| v.get("gradeLevelId"))
        .and_then(|v| v.as_str())
        .expect("gradeLevelId")
        .to_string();

    let created = request(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "actor": admin(), "name": "8D", "gradeLevelId": grade_id }),
    );
    let class_id = created
        .get("result")
        .and_then(|v| v.get("classId"))
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "classes.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "gradeLevels.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "teachers.list",
        json!({ "actor": admin() }),
    );
    let created_student = request(
        &mut stdin,
        &mut reader,
        "9",
        "students.create",
        json!({
            "actor": admin(),
            "username": "smoke.student",
            "firstName": "Smoke",
            "lastName": "Student",
            "classId": class_id,
            "gradeLevelId": grade_id
        }),
    );
    let student_id = created_student
        .get("result")
        .and_then(|v| v.get("studentId"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if !student_id.is_empty() {
        let _ = request(
            &mut stdin,
            &mut reader,
            "9b",
            "students.update",
            json!({
                "actor": admin(),
                "studentId": student_id,
                "firstName": "Updated"
            }),
        );
    }
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "students.list",
        json!({ "actor": admin(), "classId": class_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "parents.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "lessons.list",
        json!({ "actor": admin(), "classId": class_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "exams.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "assignments.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "results.list",
        json!({ "actor": admin(), "classId": class_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "results.classStats",
        json!({ "actor": admin(), "classId": class_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "attendance.list",
        json!({ "actor": admin(), "classId": class_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "fees.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "announcements.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "events.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "messages.list",
        json!({ "actor": admin() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "settings.update",
        json!({ "actor": admin(), "key": "school.year", "value": "2025-2026" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "settings.get",
        json!({ "key": "school.year" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "24",
        "backup.exportBundle",
        json!({
            "actor": admin(),
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "25",
        "backup.importBundle",
        json!({
            "actor": admin(),
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "26",
        "classes.delete",
        json!({ "actor": admin(), "classId": class_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
