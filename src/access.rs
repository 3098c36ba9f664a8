//! Role-scoped query filtering.
//!
//! Every list operation builds its WHERE clause here before touching the
//! database. Builders are pure: they take the caller's resolved [`Scope`] and
//! the raw request params and return a conjunction of predicates. Relational
//! role restrictions are expressed as correlated subqueries, so a lookup miss
//! (unknown student id, parent with no linked children) matches zero rows
//! instead of widening the query.

use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
}

impl Role {
    /// The session provider hands roles over as free-form strings.
    pub fn parse(raw: &str) -> Option<Role> {
        let t = raw.trim();
        if t.eq_ignore_ascii_case("admin") {
            Some(Role::Admin)
        } else if t.eq_ignore_ascii_case("teacher") {
            Some(Role::Teacher)
        } else if t.eq_ignore_ascii_case("student") {
            Some(Role::Student)
        } else if t.eq_ignore_ascii_case("parent") {
            Some(Role::Parent)
        } else {
            None
        }
    }
}

/// Explicit request context. Decoded from `params.actor`; never read from
/// ambient state.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub id: Option<String>,
    pub role: Option<Role>,
}

impl Actor {
    pub fn from_params(params: &serde_json::Value) -> Actor {
        let Some(actor) = params.get("actor") else {
            return Actor::default();
        };
        let id = actor
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let role = actor
            .get("role")
            .and_then(|v| v.as_str())
            .and_then(Role::parse);
        Actor { id, role }
    }
}

/// What the actor is allowed to see. `Denied` is the fallback for a missing
/// or unknown role, and for any non-admin role without an actor id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Admin,
    Teacher(String),
    Student(String),
    Parent(String),
    Denied,
}

impl Scope {
    pub fn of(actor: &Actor) -> Scope {
        match actor.role {
            Some(Role::Admin) => Scope::Admin,
            Some(Role::Teacher) => match &actor.id {
                Some(id) => Scope::Teacher(id.clone()),
                None => Scope::Denied,
            },
            Some(Role::Student) => match &actor.id {
                Some(id) => Scope::Student(id.clone()),
                None => Scope::Denied,
            },
            Some(Role::Parent) => match &actor.id {
                Some(id) => Scope::Parent(id.clone()),
                None => Scope::Denied,
            },
            None => Scope::Denied,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Scope::Admin)
    }

    pub fn teacher_id(&self) -> Option<&str> {
        match self {
            Scope::Teacher(id) => Some(id),
            _ => None,
        }
    }

    pub fn actor_id(&self) -> Option<&str> {
        match self {
            Scope::Teacher(id) | Scope::Student(id) | Scope::Parent(id) => Some(id),
            Scope::Admin | Scope::Denied => None,
        }
    }
}

/// One predicate. Columns are SQL expressions matching the entity's canonical
/// list query, so builders and handlers must agree on table aliases.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Eq(&'static str, Value),
    /// Case-insensitive substring match; `%`, `_` and `\` in the needle are
    /// escaped before wrapping.
    Like(&'static str, String),
    IsNull(&'static str),
    InSelect(&'static str, &'static str, Vec<Value>),
    /// OR-group. Empty means no alternative matched: renders false.
    Any(Vec<Cond>),
    Never,
}

pub fn eq(col: &'static str, value: &str) -> Cond {
    Cond::Eq(col, Value::Text(value.to_string()))
}

fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for ch in needle.chars() {
        if ch == '%' || ch == '_' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

fn push_cond(cond: &Cond, sql: &mut String, binds: &mut Vec<Value>) {
    match cond {
        Cond::Eq(col, value) => {
            sql.push_str(col);
            sql.push_str(" = ?");
            binds.push(value.clone());
        }
        Cond::Like(col, needle) => {
            sql.push_str(col);
            sql.push_str(" LIKE ? ESCAPE '\\'");
            binds.push(Value::Text(like_pattern(needle)));
        }
        Cond::IsNull(col) => {
            sql.push_str(col);
            sql.push_str(" IS NULL");
        }
        Cond::InSelect(col, subquery, values) => {
            sql.push_str(col);
            sql.push_str(" IN (");
            sql.push_str(subquery);
            sql.push(')');
            binds.extend(values.iter().cloned());
        }
        Cond::Any(alts) => {
            if alts.is_empty() {
                sql.push_str("0 = 1");
                return;
            }
            sql.push('(');
            for (i, alt) in alts.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" OR ");
                }
                push_cond(alt, sql, binds);
            }
            sql.push(')');
        }
        Cond::Never => sql.push_str("0 = 1"),
    }
}

/// Ordered conjunction of predicates.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conds: Vec<Cond>,
}

impl Filter {
    pub fn new() -> Filter {
        Filter::default()
    }

    pub fn push(&mut self, cond: Cond) {
        self.conds.push(cond);
    }

    pub fn push_opt(&mut self, cond: Option<Cond>) {
        if let Some(c) = cond {
            self.conds.push(c);
        }
    }

    /// Renders `" WHERE a AND b"` (leading space) plus the bind values, or an
    /// empty string for an unrestricted query.
    pub fn where_clause(&self) -> (String, Vec<Value>) {
        if self.conds.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut sql = String::from(" WHERE ");
        let mut binds = Vec::new();
        for (i, cond) in self.conds.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            push_cond(cond, &mut sql, &mut binds);
        }
        (sql, binds)
    }
}

/// Trimmed, non-empty string param. Anything else is ignored, never an error.
pub fn param_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn search_any(params: &serde_json::Value, cols: &[&'static str]) -> Option<Cond> {
    let needle = param_str(params, "search")?;
    Some(Cond::Any(
        cols.iter()
            .map(|&c| Cond::Like(c, needle.clone()))
            .collect(),
    ))
}

fn param_eq(filter: &mut Filter, params: &serde_json::Value, key: &str, col: &'static str) {
    if let Some(v) = param_str(params, key) {
        filter.push(eq(col, &v));
    }
}

const LESSON_CLASSES_OF_TEACHER: &str = "SELECT class_id FROM lessons WHERE teacher_id = ?";
const CLASS_OF_STUDENT: &str = "SELECT class_id FROM students WHERE id = ?";
const CLASSES_OF_PARENT: &str = "SELECT class_id FROM students WHERE parent_id = ?";
const LESSONS_OF_TEACHER: &str = "SELECT id FROM lessons WHERE teacher_id = ?";
const CHILDREN_OF_PARENT: &str = "SELECT id FROM students WHERE parent_id = ?";

pub fn student_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "classId", "class_id");
    param_eq(&mut f, params, "gradeLevelId", "grade_level_id");
    param_eq(&mut f, params, "parentId", "parent_id");
    if let Some(teacher_id) = param_str(params, "teacherId") {
        f.push(Cond::InSelect(
            "class_id",
            LESSON_CLASSES_OF_TEACHER,
            vec![Value::Text(teacher_id)],
        ));
    }
    f.push_opt(search_any(
        params,
        &["first_name", "last_name", "username"],
    ));
    match scope {
        Scope::Admin => {}
        Scope::Teacher(t) => f.push(Cond::InSelect(
            "class_id",
            LESSON_CLASSES_OF_TEACHER,
            vec![Value::Text(t.clone())],
        )),
        Scope::Student(s) => f.push(eq("id", s)),
        Scope::Parent(p) => f.push(eq("parent_id", p)),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

pub fn teacher_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    if let Some(class_id) = param_str(params, "classId") {
        f.push(Cond::InSelect(
            "id",
            "SELECT teacher_id FROM lessons WHERE class_id = ?",
            vec![Value::Text(class_id)],
        ));
    }
    if let Some(subject_id) = param_str(params, "subjectId") {
        f.push(Cond::InSelect(
            "id",
            "SELECT teacher_id FROM lessons WHERE subject_id = ?",
            vec![Value::Text(subject_id)],
        ));
    }
    f.push_opt(search_any(
        params,
        &["first_name", "last_name", "username", "email"],
    ));
    match scope {
        Scope::Admin => {}
        // Colleague directory: teachers see each other.
        Scope::Teacher(_) => {}
        Scope::Student(s) => f.push(Cond::InSelect(
            "id",
            "SELECT teacher_id FROM lessons WHERE class_id IN (SELECT class_id FROM students WHERE id = ?)",
            vec![Value::Text(s.clone())],
        )),
        Scope::Parent(p) => f.push(Cond::InSelect(
            "id",
            "SELECT teacher_id FROM lessons WHERE class_id IN (SELECT class_id FROM students WHERE parent_id = ?)",
            vec![Value::Text(p.clone())],
        )),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

pub fn parent_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    if let Some(student_id) = param_str(params, "studentId") {
        f.push(Cond::InSelect(
            "id",
            "SELECT parent_id FROM students WHERE id = ?",
            vec![Value::Text(student_id)],
        ));
    }
    f.push_opt(search_any(
        params,
        &["first_name", "last_name", "username", "email"],
    ));
    match scope {
        Scope::Admin => {}
        Scope::Teacher(t) => f.push(Cond::InSelect(
            "id",
            "SELECT parent_id FROM students WHERE class_id IN (SELECT class_id FROM lessons WHERE teacher_id = ?)",
            vec![Value::Text(t.clone())],
        )),
        Scope::Student(s) => f.push(Cond::InSelect(
            "id",
            "SELECT parent_id FROM students WHERE id = ?",
            vec![Value::Text(s.clone())],
        )),
        Scope::Parent(p) => f.push(eq("id", p)),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

pub fn class_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "gradeLevelId", "grade_level_id");
    param_eq(&mut f, params, "supervisorId", "supervisor_id");
    f.push_opt(search_any(params, &["name"]));
    match scope {
        Scope::Admin => {}
        Scope::Teacher(t) => f.push(Cond::Any(vec![
            eq("supervisor_id", t),
            Cond::InSelect(
                "id",
                LESSON_CLASSES_OF_TEACHER,
                vec![Value::Text(t.clone())],
            ),
        ])),
        Scope::Student(s) => f.push(Cond::InSelect(
            "id",
            CLASS_OF_STUDENT,
            vec![Value::Text(s.clone())],
        )),
        Scope::Parent(p) => f.push(Cond::InSelect(
            "id",
            CLASSES_OF_PARENT,
            vec![Value::Text(p.clone())],
        )),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

pub fn lesson_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "classId", "class_id");
    param_eq(&mut f, params, "teacherId", "teacher_id");
    param_eq(&mut f, params, "subjectId", "subject_id");
    f.push_opt(search_any(params, &["name"]));
    match scope {
        Scope::Admin => {}
        Scope::Teacher(t) => f.push(eq("teacher_id", t)),
        Scope::Student(s) => f.push(Cond::InSelect(
            "class_id",
            CLASS_OF_STUDENT,
            vec![Value::Text(s.clone())],
        )),
        Scope::Parent(p) => f.push(Cond::InSelect(
            "class_id",
            CLASSES_OF_PARENT,
            vec![Value::Text(p.clone())],
        )),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

/// Shared by exams and assignments: both hang off a lesson.
fn assessment_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "lessonId", "lesson_id");
    if let Some(class_id) = param_str(params, "classId") {
        f.push(Cond::InSelect(
            "lesson_id",
            "SELECT id FROM lessons WHERE class_id = ?",
            vec![Value::Text(class_id)],
        ));
    }
    if let Some(teacher_id) = param_str(params, "teacherId") {
        f.push(Cond::InSelect(
            "lesson_id",
            LESSONS_OF_TEACHER,
            vec![Value::Text(teacher_id)],
        ));
    }
    f.push_opt(search_any(params, &["title"]));
    match scope {
        Scope::Admin => {}
        Scope::Teacher(t) => f.push(Cond::InSelect(
            "lesson_id",
            LESSONS_OF_TEACHER,
            vec![Value::Text(t.clone())],
        )),
        Scope::Student(s) => f.push(Cond::InSelect(
            "lesson_id",
            "SELECT id FROM lessons WHERE class_id IN (SELECT class_id FROM students WHERE id = ?)",
            vec![Value::Text(s.clone())],
        )),
        Scope::Parent(p) => f.push(Cond::InSelect(
            "lesson_id",
            "SELECT id FROM lessons WHERE class_id IN (SELECT class_id FROM students WHERE parent_id = ?)",
            vec![Value::Text(p.clone())],
        )),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

pub fn exam_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    assessment_conditions(scope, params)
}

pub fn assignment_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    assessment_conditions(scope, params)
}

/// Columns are qualified: the results list joins students and both
/// assessment tables.
pub fn result_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "studentId", "results.student_id");
    param_eq(&mut f, params, "examId", "results.exam_id");
    param_eq(&mut f, params, "assignmentId", "results.assignment_id");
    if let Some(class_id) = param_str(params, "classId") {
        f.push(Cond::InSelect(
            "results.student_id",
            "SELECT id FROM students WHERE class_id = ?",
            vec![Value::Text(class_id)],
        ));
    }
    f.push_opt(search_any(
        params,
        &[
            "exams.title",
            "assignments.title",
            "students.first_name",
            "students.last_name",
        ],
    ));
    match scope {
        Scope::Admin => {}
        Scope::Teacher(t) => f.push(Cond::Any(vec![
            Cond::InSelect(
                "results.exam_id",
                "SELECT exams.id FROM exams JOIN lessons ON lessons.id = exams.lesson_id WHERE lessons.teacher_id = ?",
                vec![Value::Text(t.clone())],
            ),
            Cond::InSelect(
                "results.assignment_id",
                "SELECT assignments.id FROM assignments JOIN lessons ON lessons.id = assignments.lesson_id WHERE lessons.teacher_id = ?",
                vec![Value::Text(t.clone())],
            ),
        ])),
        Scope::Student(s) => f.push(eq("results.student_id", s)),
        Scope::Parent(p) => f.push(Cond::InSelect(
            "results.student_id",
            CHILDREN_OF_PARENT,
            vec![Value::Text(p.clone())],
        )),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

pub fn attendance_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "studentId", "student_id");
    param_eq(&mut f, params, "lessonId", "lesson_id");
    param_eq(&mut f, params, "date", "date");
    if let Some(class_id) = param_str(params, "classId") {
        f.push(Cond::InSelect(
            "lesson_id",
            "SELECT id FROM lessons WHERE class_id = ?",
            vec![Value::Text(class_id)],
        ));
    }
    match scope {
        Scope::Admin => {}
        Scope::Teacher(t) => f.push(Cond::InSelect(
            "lesson_id",
            LESSONS_OF_TEACHER,
            vec![Value::Text(t.clone())],
        )),
        Scope::Student(s) => f.push(eq("student_id", s)),
        Scope::Parent(p) => f.push(Cond::InSelect(
            "student_id",
            CHILDREN_OF_PARENT,
            vec![Value::Text(p.clone())],
        )),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

/// Visibility for class-or-school-wide records: the actor's classes, plus
/// rows with no class at all. `None` means unrestricted (admin).
fn class_or_school_wide(scope: &Scope) -> Option<Cond> {
    match scope {
        Scope::Admin => None,
        Scope::Teacher(t) => Some(Cond::Any(vec![
            Cond::InSelect(
                "class_id",
                LESSON_CLASSES_OF_TEACHER,
                vec![Value::Text(t.clone())],
            ),
            Cond::IsNull("class_id"),
        ])),
        Scope::Student(s) => Some(Cond::Any(vec![
            Cond::InSelect("class_id", CLASS_OF_STUDENT, vec![Value::Text(s.clone())]),
            Cond::IsNull("class_id"),
        ])),
        Scope::Parent(p) => Some(Cond::Any(vec![
            Cond::InSelect("class_id", CLASSES_OF_PARENT, vec![Value::Text(p.clone())]),
            Cond::IsNull("class_id"),
        ])),
        Scope::Denied => Some(Cond::Never),
    }
}

pub fn announcement_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "classId", "class_id");
    param_eq(&mut f, params, "date", "date");
    f.push_opt(search_any(params, &["title", "description"]));
    f.push_opt(class_or_school_wide(scope));
    f
}

pub fn event_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "classId", "class_id");
    f.push_opt(search_any(params, &["title", "description"]));
    f.push_opt(class_or_school_wide(scope));
    f
}

pub fn fee_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "classId", "class_id");
    f.push_opt(search_any(params, &["title"]));
    f.push_opt(class_or_school_wide(scope));
    f
}

pub fn message_conditions(scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "senderId", "sender_id");
    param_eq(&mut f, params, "recipientId", "recipient_id");
    if param_str(params, "unread").as_deref() == Some("true") {
        f.push(Cond::IsNull("read_at"));
    }
    f.push_opt(search_any(params, &["subject", "body"]));
    match scope {
        Scope::Admin => {}
        Scope::Teacher(id) | Scope::Student(id) | Scope::Parent(id) => f.push(Cond::Any(vec![
            eq("sender_id", id),
            eq("recipient_id", id),
        ])),
        Scope::Denied => f.push(Cond::Never),
    }
    f
}

/// Reference data: label-only rows with no per-role restriction.
pub fn grade_level_conditions(_scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    param_eq(&mut f, params, "level", "level");
    f
}

pub fn subject_conditions(_scope: &Scope, params: &serde_json::Value) -> Filter {
    let mut f = Filter::new();
    f.push_opt(search_any(params, &["name"]));
    f
}
