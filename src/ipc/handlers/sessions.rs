use crate::ipc::helpers::{
    class_exists, db_query_err, db_write_err, dispatch, get_optional_str, get_required_str,
    require_role, student_in_class, utc_timestamp, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const STATUSES: [&str; 3] = ["present", "absent", "late"];

fn sessions_schedule(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher"])?;
    let class_id = get_required_str(params, "classId")?;
    let topic = get_required_str(params, "topic")?;
    let starts_at = utc_timestamp(params, "startsAt")?;
    let join_url = get_optional_str(params, "joinUrl");

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let session_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO zoom_sessions(id, class_id, topic, starts_at, join_url)
         VALUES(?, ?, ?, ?, ?)",
        (&session_id, &class_id, &topic, &starts_at, &join_url),
    )
    .map_err(|e| db_write_err(e, "zoom_sessions"))?;

    Ok(json!({ "sessionId": session_id }))
}

fn sessions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher", "student"])?;
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT
               z.id, z.topic, z.starts_at, z.join_url,
               (SELECT COUNT(*) FROM session_attendance a
                WHERE a.session_id = z.id AND a.status IN ('present', 'late')) AS attended
             FROM zoom_sessions z
             WHERE z.class_id = ?
             ORDER BY z.starts_at",
        )
        .map_err(db_query_err)?;
    let sessions = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "topic": r.get::<_, String>(1)?,
                "startsAt": r.get::<_, String>(2)?,
                "joinUrl": r.get::<_, Option<String>>(3)?,
                "attendedCount": r.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;

    Ok(json!({ "sessions": sessions }))
}

/// Idempotent attendance upsert. (session, student) is the conflict key, so
/// a webhook retry or a teacher correction overwrites the status instead of
/// adding a second row; quota counting stays exact.
fn attendance_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher"])?;
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status = get_required_str(params, "status")?;
    if !STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params(
            "status must be present, absent or late",
        ));
    }

    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM zoom_sessions WHERE id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_err)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::not_found("session not found"));
    };
    if !student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not enrolled in this class"));
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO session_attendance(session_id, student_id, status, recorded_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(session_id, student_id) DO UPDATE SET
           status = excluded.status,
           recorded_at = excluded.recorded_at",
        (&session_id, &student_id, &status, &now),
    )
    .map_err(|e| db_write_err(e, "session_attendance"))?;

    Ok(json!({ "ok": true }))
}

fn attendance_session_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher", "student"])?;
    let session_id = get_required_str(params, "sessionId")?;

    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM zoom_sessions WHERE id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_err)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::not_found("session not found"));
    };

    let mut by_student: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT student_id, status FROM session_attendance WHERE session_id = ?")
        .map_err(db_query_err)?;
    let recorded = stmt
        .query_map([&session_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;
    for (student_id, status) in recorded {
        by_student.insert(student_id, status);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_query_err)?;
    let rows = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let sort_order: i64 = r.get(3)?;
            Ok((id, format!("{}, {}", last, first), sort_order))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;

    let rows_json: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, display_name, sort_order)| {
            let status = by_student.get(&id).cloned();
            json!({
                "studentId": id,
                "displayName": display_name,
                "sortOrder": sort_order,
                "status": status
            })
        })
        .collect();

    Ok(json!({ "classId": class_id, "rows": rows_json }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.schedule" => Some(dispatch(state, req, sessions_schedule)),
        "sessions.list" => Some(dispatch(state, req, sessions_list)),
        "attendance.record" => Some(dispatch(state, req, attendance_record)),
        "attendance.sessionOpen" => Some(dispatch(state, req, attendance_session_open)),
        _ => None,
    }
}
