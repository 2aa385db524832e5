use crate::answer;
use crate::ipc::helpers::{
    db_query_err, db_write_err, dispatch, get_required_str, require_role, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct QuestionRow {
    correct_answer: Option<String>,
    premium: bool,
    max_attempts: i64,
}

struct StudentRow {
    plan: String,
    active: bool,
}

fn load_question(conn: &Connection, question_id: &str) -> Result<QuestionRow, HandlerErr> {
    conn.query_row(
        "SELECT correct_answer, premium, max_attempts FROM questions WHERE id = ?",
        [question_id],
        |r| {
            Ok(QuestionRow {
                correct_answer: r.get(0)?,
                premium: r.get::<_, i64>(1)? != 0,
                max_attempts: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(db_query_err)?
    .ok_or_else(|| HandlerErr::not_found("question not found"))
}

fn load_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    conn.query_row(
        "SELECT plan, active FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRow {
                plan: r.get(0)?,
                active: r.get::<_, i64>(1)? != 0,
            })
        },
    )
    .optional()
    .map_err(db_query_err)?
    .ok_or_else(|| HandlerErr::not_found("student not found"))
}

/// Grades one submission. Policy checks (premium gating, attempt limits)
/// live here; equivalence itself is the pure `answer` module.
fn answers_submit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher", "student"])?;
    let question_id = get_required_str(params, "questionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let selected = get_required_str(params, "selected")?;

    let question = load_question(conn, &question_id)?;
    let student = load_student(conn, &student_id)?;
    if !student.active {
        return Err(HandlerErr::new("forbidden", "student is not active"));
    }
    if question.premium && student.plan != "premium" {
        return Err(HandlerErr::new(
            "premium_required",
            "question requires a premium plan",
        ));
    }

    // Attempt counting and the insert share one transaction so two racing
    // submits cannot both claim the same attempt_no.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let attempts_so_far: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM answer_attempts WHERE question_id = ? AND student_id = ?",
            (&question_id, &student_id),
            |r| r.get(0),
        )
        .map_err(db_query_err)?;
    if attempts_so_far >= question.max_attempts {
        return Err(HandlerErr {
            code: "attempt_limit_reached",
            message: format!("all {} attempts used", question.max_attempts),
            details: Some(json!({ "maxAttempts": question.max_attempts })),
        });
    }

    let correct =
        answer::is_input_answer_correct(&selected, question.correct_answer.as_deref());
    let attempt_no = attempts_so_far + 1;
    let attempt_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO answer_attempts(id, question_id, student_id, attempt_no, selected, correct, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &attempt_id,
            &question_id,
            &student_id,
            attempt_no,
            &selected,
            correct as i64,
            &now,
        ),
    )
    .map_err(|e| db_write_err(e, "answer_attempts"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "correct": correct,
        "attemptNo": attempt_no,
        "attemptsRemaining": question.max_attempts - attempt_no
    }))
}

fn answers_history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher", "student"])?;
    let question_id = get_required_str(params, "questionId")?;
    let student_id = get_required_str(params, "studentId")?;

    let mut stmt = conn
        .prepare(
            "SELECT attempt_no, selected, correct, created_at
             FROM answer_attempts
             WHERE question_id = ? AND student_id = ?
             ORDER BY attempt_no",
        )
        .map_err(db_query_err)?;
    let attempts = stmt
        .query_map((&question_id, &student_id), |r| {
            Ok(json!({
                "attemptNo": r.get::<_, i64>(0)?,
                "selected": r.get::<_, String>(1)?,
                "correct": r.get::<_, i64>(2)? != 0,
                "createdAt": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;

    Ok(json!({ "attempts": attempts }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "answers.submit" => Some(dispatch(state, req, answers_submit)),
        "answers.history" => Some(dispatch(state, req, answers_history)),
        _ => None,
    }
}
