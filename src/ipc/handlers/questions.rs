use crate::ipc::helpers::{
    class_exists, db_query_err, db_write_err, dispatch, get_optional_i64, get_optional_str,
    get_required_str, require_role, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn questions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let role = require_role(params, &["admin", "teacher", "student"])?;
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    // Students never see the canonical answer; it would leak the key.
    let expose_answer = role != "student";

    let mut stmt = conn
        .prepare(
            "SELECT id, idx, prompt, correct_answer, premium, max_attempts
             FROM questions
             WHERE class_id = ?
             ORDER BY idx",
        )
        .map_err(db_query_err)?;
    let questions = stmt
        .query_map([&class_id], |r| {
            let correct: Option<String> = r.get(3)?;
            let mut row = json!({
                "id": r.get::<_, String>(0)?,
                "idx": r.get::<_, i64>(1)?,
                "prompt": r.get::<_, String>(2)?,
                "premium": r.get::<_, i64>(4)? != 0,
                "maxAttempts": r.get::<_, i64>(5)?
            });
            if expose_answer {
                row["correctAnswer"] = json!(correct);
            }
            Ok(row)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;

    Ok(json!({ "questions": questions }))
}

fn questions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher"])?;
    let class_id = get_required_str(params, "classId")?;
    let prompt = get_required_str(params, "prompt")?;
    if prompt.trim().is_empty() {
        return Err(HandlerErr::bad_params("prompt must not be empty"));
    }
    // None means the question is graded by hand; the checker then always says no.
    let correct_answer = get_optional_str(params, "correctAnswer");
    let premium = params
        .get("premium")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let max_attempts = get_optional_i64(params, "maxAttempts").unwrap_or(3);
    if max_attempts < 1 {
        return Err(HandlerErr::bad_params("maxAttempts must be at least 1"));
    }
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let idx: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(idx) + 1, 0) FROM questions WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(db_query_err)?;

    let question_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO questions(id, class_id, idx, prompt, correct_answer, premium, max_attempts)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &question_id,
            &class_id,
            idx,
            &prompt,
            &correct_answer,
            premium as i64,
            max_attempts,
        ),
    )
    .map_err(|e| db_write_err(e, "questions"))?;

    Ok(json!({ "questionId": question_id, "idx": idx }))
}

fn questions_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher"])?;
    let question_id = get_required_str(params, "questionId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM questions WHERE id = ?", [&question_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_err)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("question not found"));
    }

    let patch = params.get("patch").cloned().unwrap_or(json!({}));

    if let Some(v) = patch.get("prompt").and_then(|v| v.as_str()) {
        if v.trim().is_empty() {
            return Err(HandlerErr::bad_params("prompt must not be empty"));
        }
        conn.execute(
            "UPDATE questions SET prompt = ? WHERE id = ?",
            (v, &question_id),
        )
        .map_err(|e| db_write_err(e, "questions"))?;
    }
    if let Some(v) = patch.get("correctAnswer") {
        // Explicit null clears the canonical answer (question becomes
        // manually graded); absent key leaves it untouched.
        let answer: Option<String> = v.as_str().map(|s| s.to_string());
        if !v.is_null() && answer.is_none() {
            return Err(HandlerErr::bad_params("correctAnswer must be string or null"));
        }
        conn.execute(
            "UPDATE questions SET correct_answer = ? WHERE id = ?",
            (&answer, &question_id),
        )
        .map_err(|e| db_write_err(e, "questions"))?;
    }
    if let Some(v) = patch.get("premium").and_then(|v| v.as_bool()) {
        conn.execute(
            "UPDATE questions SET premium = ? WHERE id = ?",
            (v as i64, &question_id),
        )
        .map_err(|e| db_write_err(e, "questions"))?;
    }
    if let Some(v) = patch.get("maxAttempts").and_then(|v| v.as_i64()) {
        if v < 1 {
            return Err(HandlerErr::bad_params("maxAttempts must be at least 1"));
        }
        conn.execute(
            "UPDATE questions SET max_attempts = ? WHERE id = ?",
            (v, &question_id),
        )
        .map_err(|e| db_write_err(e, "questions"))?;
    }

    Ok(json!({ "ok": true }))
}

fn questions_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher"])?;
    let question_id = get_required_str(params, "questionId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM answer_attempts WHERE question_id = ?",
        [&question_id],
    )
    .map_err(|e| db_write_err(e, "answer_attempts"))?;
    let deleted = tx
        .execute("DELETE FROM questions WHERE id = ?", [&question_id])
        .map_err(|e| db_write_err(e, "questions"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    if deleted == 0 {
        return Err(HandlerErr::not_found("question not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.list" => Some(dispatch(state, req, questions_list)),
        "questions.create" => Some(dispatch(state, req, questions_create)),
        "questions.update" => Some(dispatch(state, req, questions_update)),
        "questions.delete" => Some(dispatch(state, req, questions_delete)),
        _ => None,
    }
}
