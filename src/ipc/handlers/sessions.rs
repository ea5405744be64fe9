use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scope::Role;
use serde_json::json;

// Sessions are installed by the auth collaborator over the local pipe;
// these two methods are the only unauthenticated mutations.

fn handle_sessions_put(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let token = match required_str(req, "token") {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let role_raw = match required_str(req, "role") {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };
    let Some(role) = Role::parse(role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: administrator, operator",
            None,
        );
    };
    let home_unit = req
        .params
        .get("homeUnit")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let res = conn.execute(
        "INSERT INTO sessions(token, role, home_unit, created_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(token) DO UPDATE SET role = excluded.role,
             home_unit = excluded.home_unit, created_at = excluded.created_at",
        rusqlite::params![token, role.as_str(), home_unit, db::now_millis().to_string()],
    );
    if let Err(e) = res {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    // Tokens are secrets; only the role is loggable.
    log::info!("session installed for role {}", role.as_str());
    ok(&req.id, json!({ "ok": true }))
}

fn handle_sessions_revoke(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let token = match required_str(req, "token") {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };

    match conn.execute("DELETE FROM sessions WHERE token = ?", [token]) {
        Ok(n) => ok(&req.id, json!({ "ok": true, "removed": n })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.put" => Some(handle_sessions_put(state, req)),
        "sessions.revoke" => Some(handle_sessions_revoke(state, req)),
        _ => None,
    }
}
