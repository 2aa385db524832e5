use crate::ipc::helpers::{
    db_query_err, db_write_err, dispatch, get_optional_str, get_required_str, require_role,
    utc_timestamp, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Records a payment. The provider's reference string is the idempotency
/// key: a replayed callback gets the original payment id back instead of a
/// second row.
fn payments_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin"])?;
    let student_id = get_required_str(params, "studentId")?;
    let amount = params
        .get("amount")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("missing amount"))?;
    let currency = get_required_str(params, "currency")?;
    let paid_at = utc_timestamp(params, "paidAt")?;
    let reference = get_optional_str(params, "reference");
    let subscription_id = get_optional_str(params, "subscriptionId");

    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query_err)?;
    if student_exists.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }
    if let Some(sub_id) = &subscription_id {
        let sub_exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM subscriptions WHERE id = ? AND student_id = ?",
                (sub_id, &student_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(db_query_err)?;
        if sub_exists.is_none() {
            return Err(HandlerErr::not_found("subscription not found for student"));
        }
    }

    if let Some(reference) = &reference {
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM payments WHERE reference = ?",
                [reference],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_query_err)?;
        if let Some(payment_id) = existing {
            return Ok(json!({ "paymentId": payment_id, "replayed": true }));
        }
    }

    let payment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO payments(id, student_id, subscription_id, amount, currency, paid_at, reference)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &student_id,
            &subscription_id,
            amount,
            &currency,
            &paid_at,
            &reference,
        ),
    )
    .map_err(|e| db_write_err(e, "payments"))?;

    Ok(json!({ "paymentId": payment_id, "replayed": false }))
}

fn payments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_role(params, &["admin", "teacher"])?;
    let student_id = get_required_str(params, "studentId")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, subscription_id, amount, currency, paid_at, reference
             FROM payments
             WHERE student_id = ?
             ORDER BY paid_at",
        )
        .map_err(db_query_err)?;
    let payments = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subscriptionId": r.get::<_, Option<String>>(1)?,
                "amount": r.get::<_, f64>(2)?,
                "currency": r.get::<_, String>(3)?,
                "paidAt": r.get::<_, String>(4)?,
                "reference": r.get::<_, Option<String>>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;

    Ok(json!({ "payments": payments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.record" => Some(dispatch(state, req, payments_record)),
        "payments.list" => Some(dispatch(state, req, payments_list)),
        _ => None,
    }
}
