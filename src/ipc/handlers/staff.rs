use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{caller, db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::StoredStaff;
use crate::scope::{self, CallerIdentity};
use serde_json::json;

pub fn staff_json(r: &StoredStaff) -> serde_json::Value {
    json!({
        "id": r.id,
        "externalId": r.external_id,
        "name": r.name,
        "unitId": r.unit.as_ref().and_then(|u| u.id()),
        "unitName": r.unit.as_ref().map(|u| u.name()),
        "attributes": r.attributes,
        "isActive": r.is_active,
        "isGenerated": r.is_generated,
        "createdAt": r.created_at,
        "updatedAt": r.updated_at
    })
}

/// Operators only ever see their own unit; administrators see everything.
fn ownership_check(ident: &CallerIdentity, record: &StoredStaff) -> Result<(), HandlerErr> {
    if let Some(key) = scope::read_unit_key(ident, None)? {
        if record.unit_key() != key {
            return Err(HandlerErr {
                code: "forbidden",
                message: "record belongs to another unit".to_string(),
                details: None,
            });
        }
    }
    Ok(())
}

fn handle_staff_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let ident = match caller(conn, req) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let requested = req.params.get("unit").and_then(|v| v.as_str());
    let unit_key = match scope::read_unit_key(&ident, requested) {
        Ok(k) => k,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    let include_inactive = req
        .params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    // Unit filtering happens on normalized keys, so it runs over the
    // hydrated snapshot rather than in SQL.
    let rows = match db::load_staff_rows(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let staff: Vec<serde_json::Value> = rows
        .iter()
        .filter(|r| include_inactive || r.is_active)
        .filter(|r| unit_key.as_deref().map(|k| r.unit_key() == k).unwrap_or(true))
        .map(staff_json)
        .collect();

    ok(&req.id, json!({ "staff": staff }))
}

fn handle_staff_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let ident = match caller(conn, req) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let staff_id = match required_str(req, "staffId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let record = match db::load_staff_by_id(conn, staff_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "staff record not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = ownership_check(&ident, &record) {
        return e.response(&req.id);
    }

    ok(&req.id, json!({ "staff": staff_json(&record) }))
}

fn handle_staff_mark_generated(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let ident = match caller(conn, req) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let staff_id = match required_str(req, "staffId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let record = match db::load_staff_by_id(conn, staff_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "staff record not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = ownership_check(&ident, &record) {
        return e.response(&req.id);
    }

    let res = conn.execute(
        "UPDATE staff SET is_generated = 1, updated_at = ? WHERE id = ?",
        rusqlite::params![db::now_millis().to_string(), staff_id],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staff.list" => Some(handle_staff_list(state, req)),
        "staff.get" => Some(handle_staff_get(state, req)),
        "staff.markGenerated" => Some(handle_staff_mark_generated(state, req)),
        _ => None,
    }
}
