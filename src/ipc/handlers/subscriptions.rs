use crate::ipc::helpers::{
    db_query_err, db_write_err, dispatch, get_required_str, require_role, student_in_class,
    utc_timestamp, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Upsert keyed on (class, student, period_start): replaying the same
/// subscription event updates the period end and allowance in place.
fn subscriptions_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin"])?;
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let period_start = utc_timestamp(params, "periodStart")?;
    let period_end = utc_timestamp(params, "periodEnd")?;
    let allowed_sessions = params
        .get("allowedSessions")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing allowedSessions"))?;

    if period_end <= period_start {
        return Err(HandlerErr::bad_params("periodEnd must be after periodStart"));
    }
    if allowed_sessions < 0 {
        return Err(HandlerErr::bad_params("allowedSessions must not be negative"));
    }
    if !student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not enrolled in this class"));
    }

    let subscription_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subscriptions(id, class_id, student_id, period_start, period_end, allowed_sessions)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, student_id, period_start) DO UPDATE SET
           period_end = excluded.period_end,
           allowed_sessions = excluded.allowed_sessions",
        (
            &subscription_id,
            &class_id,
            &student_id,
            &period_start,
            &period_end,
            allowed_sessions,
        ),
    )
    .map_err(|e| db_write_err(e, "subscriptions"))?;

    // The upsert may have kept the original row id; read it back.
    let id: String = conn
        .query_row(
            "SELECT id FROM subscriptions
             WHERE class_id = ? AND student_id = ? AND period_start = ?",
            (&class_id, &student_id, &period_start),
            |r| r.get(0),
        )
        .map_err(db_query_err)?;

    Ok(json!({ "subscriptionId": id }))
}

/// Allowed vs used session counts for one subscription period. `used` is
/// always derived by counting attended sessions inside the period, so a
/// replayed attendance record can never inflate it.
fn subscriptions_quota(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher", "student"])?;
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;

    let row: Option<(String, String, String, i64)> = conn
        .query_row(
            "SELECT id, period_start, period_end, allowed_sessions
             FROM subscriptions
             WHERE class_id = ? AND student_id = ?
             ORDER BY period_start DESC
             LIMIT 1",
            (&class_id, &student_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_query_err)?;
    let Some((subscription_id, period_start, period_end, allowed)) = row else {
        return Err(HandlerErr::not_found("no subscription for this student"));
    };

    let used: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM session_attendance a
             JOIN zoom_sessions z ON z.id = a.session_id
             WHERE a.student_id = ?
               AND z.class_id = ?
               AND a.status IN ('present', 'late')
               AND z.starts_at >= ?
               AND z.starts_at < ?",
            (&student_id, &class_id, &period_start, &period_end),
            |r| r.get(0),
        )
        .map_err(db_query_err)?;

    Ok(json!({
        "subscriptionId": subscription_id,
        "periodStart": period_start,
        "periodEnd": period_end,
        "allowed": allowed,
        "used": used,
        "remaining": (allowed - used).max(0)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subscriptions.upsert" => Some(dispatch(state, req, subscriptions_upsert)),
        "subscriptions.quota" => Some(dispatch(state, req, subscriptions_quota)),
        _ => None,
    }
}
