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
    let exe = env!("CARGO_BIN_EXE_besmartd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn besmartd");
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
    value
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

struct Fixture {
    class_id: String,
    student_id: String,
}

fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        "s2",
        "classes.create",
        json!({ "role": "admin", "name": "Math 4A", "subject": "math" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let student = request_ok(
        stdin,
        reader,
        "s3",
        "students.create",
        json!({
            "role": "teacher",
            "classId": class_id,
            "lastName": "Putri",
            "firstName": "Ayu"
        }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    Fixture {
        class_id,
        student_id,
    }
}

fn create_question(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    class_id: &str,
    extra: serde_json::Value,
) -> String {
    let mut params = json!({
        "role": "teacher",
        "classId": class_id,
        "prompt": "Berapa 1/2 dalam desimal?",
        "correctAnswer": "1/2",
        "maxAttempts": 2
    });
    for (k, v) in extra.as_object().cloned().unwrap_or_default() {
        params[k] = v;
    }
    let created = request_ok(stdin, reader, id, "questions.create", params);
    created
        .get("questionId")
        .and_then(|v| v.as_str())
        .expect("questionId")
        .to_string()
}

#[test]
fn wrong_then_right_answer_consumes_attempts_and_grades_equivalence() {
    let workspace = temp_dir("besmart-grading-flow");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);
    let question_id = create_question(&mut stdin, &mut reader, "q1", &fx.class_id, json!({}));

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "answers.submit",
        json!({
            "role": "student",
            "questionId": question_id,
            "studentId": fx.student_id,
            "selected": "0.3"
        }),
    );
    assert_eq!(first.get("correct"), Some(&json!(false)));
    assert_eq!(first.get("attemptNo"), Some(&json!(1)));
    assert_eq!(first.get("attemptsRemaining"), Some(&json!(1)));

    // "0.5" is not the literal canonical string but is equivalent to 1/2.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "answers.submit",
        json!({
            "role": "student",
            "questionId": question_id,
            "studentId": fx.student_id,
            "selected": "0.5"
        }),
    );
    assert_eq!(second.get("correct"), Some(&json!(true)));
    assert_eq!(second.get("attemptNo"), Some(&json!(2)));
    assert_eq!(second.get("attemptsRemaining"), Some(&json!(0)));

    let third = request(
        &mut stdin,
        &mut reader,
        "3",
        "answers.submit",
        json!({
            "role": "student",
            "questionId": question_id,
            "studentId": fx.student_id,
            "selected": "1/2"
        }),
    );
    assert_eq!(third.get("ok"), Some(&json!(false)));
    assert_eq!(error_code(&third), "attempt_limit_reached");

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "answers.history",
        json!({
            "role": "student",
            "questionId": question_id,
            "studentId": fx.student_id
        }),
    );
    let attempts = history
        .get("attempts")
        .and_then(|v| v.as_array())
        .expect("attempts");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].get("correct"), Some(&json!(false)));
    assert_eq!(attempts[1].get("correct"), Some(&json!(true)));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn premium_question_rejects_free_plan_student() {
    let workspace = temp_dir("besmart-grading-premium");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);
    let question_id = create_question(
        &mut stdin,
        &mut reader,
        "q1",
        &fx.class_id,
        json!({ "premium": true }),
    );

    let denied = request(
        &mut stdin,
        &mut reader,
        "1",
        "answers.submit",
        json!({
            "role": "student",
            "questionId": question_id,
            "studentId": fx.student_id,
            "selected": "0.5"
        }),
    );
    assert_eq!(error_code(&denied), "premium_required");

    // Upgrading the plan unlocks the question.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.update",
        json!({
            "role": "admin",
            "classId": fx.class_id,
            "studentId": fx.student_id,
            "patch": { "plan": "premium" }
        }),
    );
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "answers.submit",
        json!({
            "role": "student",
            "questionId": question_id,
            "studentId": fx.student_id,
            "selected": "½"
        }),
    );
    assert_eq!(graded.get("correct"), Some(&json!(true)));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn manually_graded_question_records_attempt_as_incorrect() {
    let workspace = temp_dir("besmart-grading-manual");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "q1",
        "questions.create",
        json!({
            "role": "teacher",
            "classId": fx.class_id,
            "prompt": "Jelaskan cara kerja fungsi rekursif."
        }),
    );
    let question_id = created
        .get("questionId")
        .and_then(|v| v.as_str())
        .expect("questionId");

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "answers.submit",
        json!({
            "role": "student",
            "questionId": question_id,
            "studentId": fx.student_id,
            "selected": "fungsi yang memanggil dirinya sendiri"
        }),
    );
    assert_eq!(graded.get("correct"), Some(&json!(false)));
    assert_eq!(graded.get("attemptNo"), Some(&json!(1)));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn inactive_student_cannot_submit() {
    let workspace = temp_dir("besmart-grading-inactive");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);
    let question_id = create_question(&mut stdin, &mut reader, "q1", &fx.class_id, json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.update",
        json!({
            "role": "admin",
            "classId": fx.class_id,
            "studentId": fx.student_id,
            "patch": { "active": false }
        }),
    );
    let denied = request(
        &mut stdin,
        &mut reader,
        "2",
        "answers.submit",
        json!({
            "role": "student",
            "questionId": question_id,
            "studentId": fx.student_id,
            "selected": "0.5"
        }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    let _ = std::fs::remove_dir_all(workspace);
}
