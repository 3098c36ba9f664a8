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

struct Sidecar {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn start(workspace: &PathBuf) -> Sidecar {
        let (child, stdin, reader) = spawn_sidecar();
        let mut s = Sidecar {
            _child: child,
            stdin,
            reader,
            next_id: 1,
        };
        let _ = s.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        s
    }

    fn raw(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = format!("r{}", self.next_id);
        self.next_id += 1;
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.raw(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.raw(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

fn admin() -> serde_json::Value {
    json!({ "id": "ADMIN", "role": "admin" })
}

fn actor(id: &str, role: &str) -> serde_json::Value {
    json!({ "id": id, "role": role })
}

fn total(result: &serde_json::Value) -> i64 {
    result.get("total").and_then(|v| v.as_i64()).expect("total")
}

/// Two classes, two teachers, one parented student per class, one lesson
/// each, plus class-scoped and school-wide announcements.
fn seed_school(s: &mut Sidecar) -> (String, String) {
    let grade = s.request_ok(
        "gradeLevels.create",
        json!({ "actor": admin(), "level": 8 }),
    );
    let grade_id = grade["gradeLevelId"].as_str().expect("grade id").to_string();

    let subject = s.request_ok(
        "subjects.create",
        json!({ "actor": admin(), "name": "Mathematics" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subject id").to_string();

    for (id, username, last) in [("T1", "t.akintola", "Akintola"), ("T2", "m.reyes", "Reyes")] {
        let _ = s.request_ok(
            "teachers.create",
            json!({
                "actor": admin(),
                "id": id,
                "username": username,
                "firstName": "Teach",
                "lastName": last
            }),
        );
    }

    let c1 = s.request_ok(
        "classes.create",
        json!({ "actor": admin(), "name": "8A", "gradeLevelId": grade_id, "supervisorId": "T1" }),
    );
    let c1_id = c1["classId"].as_str().expect("c1").to_string();
    let c2 = s.request_ok(
        "classes.create",
        json!({ "actor": admin(), "name": "8B", "gradeLevelId": grade_id, "supervisorId": "T2" }),
    );
    let c2_id = c2["classId"].as_str().expect("c2").to_string();

    for (id, username) in [("P1", "parent.one"), ("P2", "parent.two")] {
        let _ = s.request_ok(
            "parents.create",
            json!({
                "actor": admin(),
                "id": id,
                "username": username,
                "firstName": "Pat",
                "lastName": "Parent"
            }),
        );
    }

    let _ = s.request_ok(
        "students.create",
        json!({
            "actor": admin(),
            "id": "S1",
            "username": "s.one",
            "firstName": "Sade",
            "lastName": "One",
            "classId": c1_id,
            "gradeLevelId": grade_id,
            "parentId": "P1"
        }),
    );
    let _ = s.request_ok(
        "students.create",
        json!({
            "actor": admin(),
            "id": "S2",
            "username": "s.two",
            "firstName": "Sam",
            "lastName": "Two",
            "classId": c2_id,
            "gradeLevelId": grade_id
        }),
    );

    let l1 = s.request_ok(
        "lessons.create",
        json!({
            "actor": admin(),
            "name": "Math 8A",
            "day": "monday",
            "subjectId": subject_id,
            "classId": c1_id,
            "teacherId": "T1"
        }),
    );
    let l1_id = l1["lessonId"].as_str().expect("l1").to_string();
    let _ = s.request_ok(
        "lessons.create",
        json!({
            "actor": admin(),
            "name": "Math 8B",
            "day": "tuesday",
            "subjectId": subject_id,
            "classId": c2_id,
            "teacherId": "T2"
        }),
    );

    // A teacher may create an exam on their own lesson.
    let exam = s.request_ok(
        "exams.create",
        json!({
            "actor": actor("T1", "teacher"),
            "title": "Term Test",
            "lessonId": l1_id
        }),
    );
    let exam_id = exam["examId"].as_str().expect("exam").to_string();
    let _ = s.request_ok(
        "results.create",
        json!({
            "actor": actor("T1", "teacher"),
            "studentId": "S1",
            "examId": exam_id,
            "score": 92.0
        }),
    );

    let _ = s.request_ok(
        "announcements.create",
        json!({
            "actor": admin(),
            "title": "8A picnic",
            "description": "Bring lunch",
            "date": "2025-10-01",
            "classId": c1_id
        }),
    );
    let _ = s.request_ok(
        "announcements.create",
        json!({
            "actor": admin(),
            "title": "8B trip",
            "description": "Museum visit",
            "date": "2025-10-02",
            "classId": c2_id
        }),
    );
    let _ = s.request_ok(
        "announcements.create",
        json!({
            "actor": admin(),
            "title": "School closed",
            "description": "Staff day",
            "date": "2025-10-03"
        }),
    );

    (c1_id, c2_id)
}

#[test]
fn non_admin_lists_are_subsets_of_admin() {
    let workspace = temp_dir("schoold-scope-subset");
    let mut s = Sidecar::start(&workspace);
    let _ = seed_school(&mut s);

    let all = total(&s.request_ok("students.list", json!({ "actor": admin() })));
    assert_eq!(all, 2);

    for who in [
        actor("T1", "teacher"),
        actor("S1", "student"),
        actor("P1", "parent"),
    ] {
        let n = total(&s.request_ok("students.list", json!({ "actor": who })));
        assert!(n <= all, "role list exceeded admin list");
        assert_eq!(n, 1);
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn teacher_sees_only_taught_students_and_results() {
    let workspace = temp_dir("schoold-scope-teacher");
    let mut s = Sidecar::start(&workspace);
    let _ = seed_school(&mut s);

    let mine = s.request_ok("students.list", json!({ "actor": actor("T1", "teacher") }));
    assert_eq!(total(&mine), 1);
    let row = &mine["students"][0];
    assert_eq!(row["id"].as_str(), Some("S1"));

    assert_eq!(
        total(&s.request_ok("results.list", json!({ "actor": actor("T1", "teacher") }))),
        1
    );
    assert_eq!(
        total(&s.request_ok("results.list", json!({ "actor": actor("T2", "teacher") }))),
        0
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn url_filter_for_a_foreign_class_narrows_to_zero() {
    let workspace = temp_dir("schoold-scope-narrow");
    let mut s = Sidecar::start(&workspace);
    let (_c1, c2) = seed_school(&mut s);

    // Teacher T1 asking for class 8B: both predicates apply, so nothing
    // comes back, and it is not an error.
    let res = s.request_ok(
        "results.list",
        json!({ "actor": actor("T1", "teacher"), "classId": c2 }),
    );
    assert_eq!(total(&res), 0);

    let students = s.request_ok(
        "students.list",
        json!({ "actor": actor("T1", "teacher"), "classId": c2 }),
    );
    assert_eq!(total(&students), 0);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn missing_or_unknown_identity_is_denied_not_widened() {
    let workspace = temp_dir("schoold-scope-deny");
    let mut s = Sidecar::start(&workspace);
    let _ = seed_school(&mut s);

    // No actor at all.
    assert_eq!(total(&s.request_ok("students.list", json!({}))), 0);
    // Role without an id.
    assert_eq!(
        total(&s.request_ok("students.list", json!({ "actor": { "role": "teacher" } }))),
        0
    );
    // Unknown role with an id.
    assert_eq!(
        total(&s.request_ok(
            "students.list",
            json!({ "actor": { "id": "T1", "role": "principal" } })
        )),
        0
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn announcements_respect_class_and_school_wide_visibility() {
    let workspace = temp_dir("schoold-scope-bulletin");
    let mut s = Sidecar::start(&workspace);
    let _ = seed_school(&mut s);

    assert_eq!(
        total(&s.request_ok("announcements.list", json!({ "actor": admin() }))),
        3
    );

    // Own class plus school-wide.
    let seen = s.request_ok("announcements.list", json!({ "actor": actor("S1", "student") }));
    assert_eq!(total(&seen), 2);
    let titles: Vec<&str> = seen["announcements"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|a| a["title"].as_str())
        .collect();
    assert!(titles.contains(&"8A picnic"));
    assert!(titles.contains(&"School closed"));
    assert!(!titles.contains(&"8B trip"));

    assert_eq!(
        total(&s.request_ok("announcements.list", json!({ "actor": actor("P1", "parent") }))),
        2
    );
    // A parent with no linked children falls back to school-wide only.
    let orphanless = s.request_ok("announcements.list", json!({ "actor": actor("P2", "parent") }));
    assert_eq!(total(&orphanless), 1);
    assert_eq!(
        orphanless["announcements"][0]["title"].as_str(),
        Some("School closed")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn parent_with_no_children_sees_no_students_or_results() {
    let workspace = temp_dir("schoold-scope-orphanless");
    let mut s = Sidecar::start(&workspace);
    let _ = seed_school(&mut s);

    assert_eq!(
        total(&s.request_ok("students.list", json!({ "actor": actor("P2", "parent") }))),
        0
    );
    assert_eq!(
        total(&s.request_ok("results.list", json!({ "actor": actor("P2", "parent") }))),
        0
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn students_and_parents_see_their_own_slice() {
    let workspace = temp_dir("schoold-scope-own");
    let mut s = Sidecar::start(&workspace);
    let _ = seed_school(&mut s);

    let own = s.request_ok("results.list", json!({ "actor": actor("S1", "student") }));
    assert_eq!(total(&own), 1);
    assert_eq!(own["results"][0]["studentId"].as_str(), Some("S1"));

    assert_eq!(
        total(&s.request_ok("results.list", json!({ "actor": actor("S2", "student") }))),
        0
    );
    assert_eq!(
        total(&s.request_ok("results.list", json!({ "actor": actor("P1", "parent") }))),
        1
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn mutations_are_gated_by_role_and_lesson_ownership() {
    let workspace = temp_dir("schoold-scope-mutations");
    let mut s = Sidecar::start(&workspace);
    let _ = seed_school(&mut s);

    let lessons = s.request_ok("lessons.list", json!({ "actor": actor("T1", "teacher") }));
    let l1_id = lessons["lessons"][0]["id"].as_str().expect("l1").to_string();

    // Another teacher cannot write onto T1's lesson.
    let code = s.request_err(
        "exams.create",
        json!({
            "actor": actor("T2", "teacher"),
            "title": "Hijack",
            "lessonId": l1_id
        }),
    );
    assert_eq!(code, "forbidden");

    // Students cannot write results at all.
    let code = s.request_err(
        "results.create",
        json!({
            "actor": actor("S1", "student"),
            "studentId": "S1",
            "examId": "whatever",
            "score": 100.0
        }),
    );
    assert!(code == "forbidden" || code == "not_found");

    // Non-admin cannot create classes.
    let code = s.request_err(
        "classes.create",
        json!({ "actor": actor("T1", "teacher"), "name": "8Z", "gradeLevelId": "nope" }),
    );
    assert_eq!(code, "forbidden");

    let _ = std::fs::remove_dir_all(workspace);
}
