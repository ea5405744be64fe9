use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, CallerIdentity, GuardError};
use rusqlite::Connection;

/// Handler-level failure carried through `?` until it becomes the JSON
/// error envelope.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

impl From<GuardError> for HandlerErr {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Unauthenticated => HandlerErr {
                code: "unauthenticated",
                message: "caller token is missing, unknown or expired".to_string(),
                details: None,
            },
            GuardError::Forbidden(message) => HandlerErr {
                code: "forbidden",
                message,
                details: None,
            },
            GuardError::Store(message) => HandlerErr {
                code: "db_query_failed",
                message,
                details: None,
            },
        }
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Authenticate the request's `callerToken`. A missing token goes through
/// the same unauthenticated path as an unknown one.
pub fn caller(conn: &Connection, req: &Request) -> Result<CallerIdentity, HandlerErr> {
    let token = req
        .params
        .get("callerToken")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let ttl = get_setup_i64(conn, "setup.security", "sessionTtlMinutes", 0);
    Ok(scope::resolve_caller(conn, token, ttl, db::now_millis())?)
}

/// Best-effort setup reads: malformed or missing saved values fall back to
/// the built-in default rather than failing the request.
pub fn get_setup_i64(conn: &Connection, section_key: &str, field: &str, default: i64) -> i64 {
    db::settings_get_json(conn, section_key)
        .ok()
        .flatten()
        .and_then(|v| v.get(field).and_then(|n| n.as_i64()))
        .unwrap_or(default)
}

pub fn get_setup_bool(conn: &Connection, section_key: &str, field: &str, default: bool) -> bool {
    db::settings_get_json(conn, section_key)
        .ok()
        .flatten()
        .and_then(|v| v.get(field).and_then(|b| b.as_bool()))
        .unwrap_or(default)
}
