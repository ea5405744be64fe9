use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{caller, db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::require_admin;
use serde_json::json;
use uuid::Uuid;

fn handle_units_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let ident = match caller(conn, req) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_admin(&ident) {
        return HandlerErr::from(e).response(&req.id);
    }
    let name = match required_str(req, "name") {
        Ok(n) => n,
        Err(e) => return e.response(&req.id),
    };
    let external_code = req
        .params
        .get("externalCode")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let unit_id = Uuid::new_v4().to_string();
    let now = db::now_millis().to_string();
    let res = conn.execute(
        "INSERT INTO units(id, name, external_code, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![unit_id, name, external_code, now, now],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "unitId": unit_id })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "name": name })),
        ),
    }
}

fn handle_units_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let ident = match caller(conn, req) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_admin(&ident) {
        return HandlerErr::from(e).response(&req.id);
    }
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let Some(name) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return err(&req.id, "bad_params", "name must be a non-empty string", None);
                };
                sets.push("name = ?");
                values.push(rusqlite::types::Value::from(name.to_string()));
            }
            "externalCode" => {
                if v.is_null() {
                    sets.push("external_code = ?");
                    values.push(rusqlite::types::Value::Null);
                } else if let Some(code) = v.as_str() {
                    sets.push("external_code = ?");
                    values.push(rusqlite::types::Value::from(code.trim().to_string()));
                } else {
                    return err(&req.id, "bad_params", "externalCode must be a string or null", None);
                }
            }
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown unit field: {}", other),
                    None,
                )
            }
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "empty patch", None);
    }

    sets.push("updated_at = ?");
    values.push(rusqlite::types::Value::from(db::now_millis().to_string()));
    values.push(rusqlite::types::Value::from(unit_id.to_string()));

    let sql = format!("UPDATE units SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "unit not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_units_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = caller(conn, req) {
        return e.response(&req.id);
    }

    // Staff headcounts ride along so the admin UI can show a directory view.
    let mut stmt = match conn.prepare(
        "SELECT
           u.id,
           u.name,
           u.external_code,
           (SELECT COUNT(*) FROM staff s WHERE s.unit_id = u.id AND s.is_active = 1) AS active_staff
         FROM units u
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let external_code: Option<String> = row.get(2)?;
            let active_staff: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "externalCode": external_code,
                "activeStaffCount": active_staff
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(units) => ok(&req.id, json!({ "units": units })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "units.create" => Some(handle_units_create(state, req)),
        "units.update" => Some(handle_units_update(state, req)),
        "units.list" => Some(handle_units_list(state, req)),
        _ => None,
    }
}
