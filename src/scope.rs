use crate::normalize::match_key;
use crate::reconcile::{UnitDirectory, UnitRef};
use rusqlite::{Connection, OptionalExtension};

/// Caller roles form a closed set. Unknown role strings in the sessions
/// table are treated as unauthenticated, never mapped onto a default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Role {
    Administrator,
    Operator,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administrator" => Some(Self::Administrator),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Operator => "operator",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub role: Role,
    pub home_unit: Option<String>,
}

#[derive(Debug)]
pub enum GuardError {
    Unauthenticated,
    Forbidden(String),
    Store(String),
}

/// Look up the caller behind a token. Missing, unknown, malformed and
/// expired sessions all collapse to `Unauthenticated`.
pub fn resolve_caller(
    conn: &Connection,
    token: &str,
    ttl_minutes: i64,
    now_millis: i64,
) -> Result<CallerIdentity, GuardError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(GuardError::Unauthenticated);
    }

    let row: Option<(String, Option<String>, String)> = conn
        .query_row(
            "SELECT role, home_unit, created_at FROM sessions WHERE token = ?",
            [token],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|e| GuardError::Store(e.to_string()))?;

    let Some((role_raw, home_unit, created_at)) = row else {
        return Err(GuardError::Unauthenticated);
    };
    let Some(role) = Role::parse(&role_raw) else {
        return Err(GuardError::Unauthenticated);
    };

    if ttl_minutes > 0 {
        let created = created_at.parse::<i64>().unwrap_or(0);
        if now_millis - created > ttl_minutes * 60_000 {
            return Err(GuardError::Unauthenticated);
        }
    }

    let home_unit = home_unit
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());

    Ok(CallerIdentity { role, home_unit })
}

pub fn require_admin(caller: &CallerIdentity) -> Result<(), GuardError> {
    if caller.role != Role::Administrator {
        return Err(GuardError::Forbidden(
            "administrator role required".to_string(),
        ));
    }
    Ok(())
}

/// Write boundary for a batch. Administrators may aim rows anywhere (an
/// optional batch-wide override, else each row's declared unit); operator
/// rows always land in the operator's home unit, whatever the row says.
pub enum WriteScope {
    Admin { override_unit: Option<UnitRef> },
    Operator { home: UnitRef },
}

impl WriteScope {
    /// An operator session with no home unit cannot write at all; that is
    /// batch-fatal. An operator-supplied override is discarded silently.
    pub fn for_caller(
        caller: &CallerIdentity,
        override_name: Option<&str>,
        directory: &UnitDirectory,
    ) -> Result<WriteScope, GuardError> {
        match caller.role {
            Role::Administrator => Ok(WriteScope::Admin {
                override_unit: override_name.map(|n| directory.resolve(n)),
            }),
            Role::Operator => {
                let Some(home) = caller.home_unit.as_deref() else {
                    return Err(GuardError::Forbidden(
                        "operator session has no home unit".to_string(),
                    ));
                };
                Ok(WriteScope::Operator {
                    home: directory.resolve(home),
                })
            }
        }
    }

    /// Where a row with the given declared unit will land.
    pub fn effective_unit(
        &self,
        declared: Option<&str>,
        directory: &UnitDirectory,
    ) -> Option<UnitRef> {
        match self {
            WriteScope::Admin { override_unit } => override_unit
                .clone()
                .or_else(|| declared.map(|d| directory.resolve(d))),
            WriteScope::Operator { home } => Some(home.clone()),
        }
    }

    /// Per-row ownership re-check before patching an existing record.
    pub fn may_touch(&self, record_unit_key: &str) -> bool {
        match self {
            WriteScope::Admin { .. } => true,
            WriteScope::Operator { home } => record_unit_key == home.key(),
        }
    }
}

/// Read boundary: operators are always pinned to their home unit; an
/// administrator's `unit` filter is honored as given.
pub fn read_unit_key(
    caller: &CallerIdentity,
    requested: Option<&str>,
) -> Result<Option<String>, GuardError> {
    match caller.role {
        Role::Administrator => Ok(requested.map(match_key)),
        Role::Operator => {
            let Some(home) = caller.home_unit.as_deref() else {
                return Err(GuardError::Forbidden(
                    "operator session has no home unit".to_string(),
                ));
            };
            Ok(Some(match_key(home)))
        }
    }
}
