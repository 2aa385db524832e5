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

/// The equivalence forms teachers actually author: fractions vs decimals,
/// equations, degree notation, synonym groups, unicode fractions,
/// comparison operators and thousand separators, all graded end to end.
#[test]
fn grading_endpoint_accepts_all_authoring_conventions() {
    let cases: [(&str, &str); 9] = [
        ("0.5", "1/2"),
        ("1/2", "0.5"),
        ("5", "2 + 3 = 5"),
        ("90°", "90 deg"),
        ("titik sudut dan sisi sudut", "titik sudut dan kaki/sisi sudut"),
        ("1/2", "½"),
        ("<", "<"),
        ("1/8", "0.125"),
        ("10000", "10.000"),
    ];

    let workspace = temp_dir("besmart-equivalence");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "role": "admin", "name": "Math 4B" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "role": "teacher",
            "classId": class_id,
            "lastName": "Utami",
            "firstName": "Citra"
        }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    for (i, (selected, canonical)) in cases.iter().enumerate() {
        let question = request_ok(
            &mut stdin,
            &mut reader,
            &format!("q{}", i),
            "questions.create",
            json!({
                "role": "teacher",
                "classId": class_id,
                "prompt": format!("case {}", i),
                "correctAnswer": canonical
            }),
        );
        let question_id = question
            .get("questionId")
            .and_then(|v| v.as_str())
            .expect("questionId");

        let graded = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "answers.submit",
            json!({
                "role": "student",
                "questionId": question_id,
                "studentId": student_id,
                "selected": selected
            }),
        );
        assert_eq!(
            graded.get("correct"),
            Some(&json!(true)),
            "expected {:?} to match {:?}",
            selected,
            canonical
        );
    }

    let _ = std::fs::remove_dir_all(workspace);
}
