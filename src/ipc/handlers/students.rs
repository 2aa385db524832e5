use crate::ipc::helpers::{
    class_exists, db_query_err, db_write_err, dispatch, get_optional_str, get_required_str,
    require_role, student_in_class, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const PLANS: [&str; 2] = ["free", "premium"];

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher", "student"])?;
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, plan, active, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_query_err)?;
    let students = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "plan": r.get::<_, String>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
                "sortOrder": r.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;

    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher"])?;
    let class_id = get_required_str(params, "classId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let plan = get_optional_str(params, "plan").unwrap_or_else(|| "free".to_string());
    if !PLANS.contains(&plan.as_str()) {
        return Err(HandlerErr::bad_params("plan must be free or premium"));
    }
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(db_query_err)?;

    let student_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, plan, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
        (&student_id, &class_id, &last_name, &first_name, &plan, next_sort, &now),
    )
    .map_err(|e| db_write_err(e, "students"))?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher"])?;
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    if !student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let patch = params.get("patch").cloned().unwrap_or(json!({}));
    let mut changed = false;

    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE students SET last_name = ? WHERE id = ?",
            (v, &student_id),
        )
        .map_err(|e| db_write_err(e, "students"))?;
        changed = true;
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE students SET first_name = ? WHERE id = ?",
            (v, &student_id),
        )
        .map_err(|e| db_write_err(e, "students"))?;
        changed = true;
    }
    if let Some(v) = patch.get("plan").and_then(|v| v.as_str()) {
        if !PLANS.contains(&v) {
            return Err(HandlerErr::bad_params("plan must be free or premium"));
        }
        conn.execute("UPDATE students SET plan = ? WHERE id = ?", (v, &student_id))
            .map_err(|e| db_write_err(e, "students"))?;
        changed = true;
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        conn.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (v as i64, &student_id),
        )
        .map_err(|e| db_write_err(e, "students"))?;
        changed = true;
    }

    if changed {
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE students SET updated_at = ? WHERE id = ?",
            (&now, &student_id),
        )
        .map_err(|e| db_write_err(e, "students"))?;
    }

    Ok(json!({ "ok": true, "changed": changed }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin"])?;
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    if !student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (table, sql) in [
        ("answer_attempts", "DELETE FROM answer_attempts WHERE student_id = ?"),
        ("session_attendance", "DELETE FROM session_attendance WHERE student_id = ?"),
        ("payments", "DELETE FROM payments WHERE student_id = ?"),
        ("subscriptions", "DELETE FROM subscriptions WHERE student_id = ?"),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        tx.execute(sql, [&student_id])
            .map_err(|e| db_write_err(e, table))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(dispatch(state, req, students_list)),
        "students.create" => Some(dispatch(state, req, students_create)),
        "students.update" => Some(dispatch(state, req, students_update)),
        "students.delete" => Some(dispatch(state, req, students_delete)),
        _ => None,
    }
}
