use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_role;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const SUBJECTS: [&str; 2] = ["math", "coding"];

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(&req.params, &["admin", "teacher", "student"]) {
        return e.response(&req.id);
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Counts are correlated subqueries so joins can't double-count.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.subject,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM questions q WHERE q.class_id = c.id) AS question_count,
           (SELECT COUNT(*) FROM zoom_sessions z WHERE z.class_id = c.id) AS session_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let subject: String = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let question_count: i64 = row.get(4)?;
            let session_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "subject": subject,
                "studentCount": student_count,
                "questionCount": question_count,
                "sessionCount": session_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_role(&req.params, &["admin"]) {
        return e.response(&req.id);
    }

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .unwrap_or("math")
        .to_string();
    if !SUBJECTS.contains(&subject.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "subject must be math or coding",
            None,
        );
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, subject) VALUES(?, ?, ?)",
        (&class_id, &name, &subject),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(
        &req.id,
        json!({ "classId": class_id, "name": name, "subject": subject }),
    )
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_role(&req.params, &["admin"]) {
        return e.response(&req.id);
    }

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency-ordered deletes; no ON DELETE CASCADE in the schema.
    let steps: [(&str, &str); 8] = [
        (
            "answer_attempts",
            "DELETE FROM answer_attempts
             WHERE question_id IN (SELECT id FROM questions WHERE class_id = ?)",
        ),
        ("questions", "DELETE FROM questions WHERE class_id = ?"),
        (
            "session_attendance",
            "DELETE FROM session_attendance
             WHERE session_id IN (SELECT id FROM zoom_sessions WHERE class_id = ?)",
        ),
        ("zoom_sessions", "DELETE FROM zoom_sessions WHERE class_id = ?"),
        (
            "payments",
            "DELETE FROM payments
             WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        ),
        ("subscriptions", "DELETE FROM subscriptions WHERE class_id = ?"),
        ("students", "DELETE FROM students WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ];

    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&class_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
