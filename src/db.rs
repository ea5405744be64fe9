use crate::reconcile::{StoredStaff, UnitRef, UnitRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("roster.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS units(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            external_code TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL,
            name TEXT NOT NULL,
            unit_id TEXT,
            unit_name TEXT,
            attributes TEXT NOT NULL DEFAULT '{}',
            is_active INTEGER NOT NULL DEFAULT 1,
            is_generated INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(unit_id) REFERENCES units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_external ON staff(external_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_unit ON staff(unit_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_active ON staff(is_active)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            home_unit TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before the generated-record marker and the unit
    // registry code shipped need the columns added in place.
    ensure_staff_is_generated(conn)?;
    ensure_units_external_code(conn)?;

    Ok(())
}

fn ensure_staff_is_generated(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "staff", "is_generated")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE staff ADD COLUMN is_generated INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_units_external_code(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "units", "external_code")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE units ADD COLUMN external_code TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

pub fn load_units(conn: &Connection) -> anyhow::Result<Vec<UnitRow>> {
    let mut stmt = conn.prepare("SELECT id, name, external_code FROM units ORDER BY name")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(UnitRow {
                id: row.get(0)?,
                name: row.get(1)?,
                external_code: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const STAFF_SELECT: &str =
    "SELECT s.id, s.external_id, s.name, s.unit_id, u.name, s.unit_name,
            s.attributes, s.is_active, s.is_generated, s.created_at, s.updated_at
     FROM staff s LEFT JOIN units u ON u.id = s.unit_id";

/// Whole-store snapshot ordered oldest-update-first, the order `MatchIndex`
/// relies on for external-id collisions.
pub fn load_staff_rows(conn: &Connection) -> anyhow::Result<Vec<StoredStaff>> {
    let sql = format!(
        "{} ORDER BY CAST(s.updated_at AS INTEGER) ASC, s.id ASC",
        STAFF_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], map_staff_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_staff_by_id(conn: &Connection, staff_id: &str) -> anyhow::Result<Option<StoredStaff>> {
    let sql = format!("{} WHERE s.id = ?", STAFF_SELECT);
    let row = conn.query_row(&sql, [staff_id], map_staff_row).optional()?;
    Ok(row)
}

fn map_staff_row(row: &rusqlite::Row) -> rusqlite::Result<StoredStaff> {
    let unit_id: Option<String> = row.get(3)?;
    let joined_name: Option<String> = row.get(4)?;
    let unit_name: Option<String> = row.get(5)?;
    let unit = match (unit_id, joined_name, unit_name) {
        (Some(id), Some(name), _) => Some(UnitRef::Resolved { id, name }),
        (_, _, Some(name)) if !name.trim().is_empty() => Some(UnitRef::Unresolved(name)),
        _ => None,
    };

    let attributes_text: String = row.get(6)?;
    let attributes =
        serde_json::from_str(&attributes_text).unwrap_or_else(|_| serde_json::json!({}));

    let is_active: i64 = row.get(7)?;
    let is_generated: i64 = row.get(8)?;
    let created_at: Option<String> = row.get(9)?;
    let updated_at: Option<String> = row.get(10)?;

    Ok(StoredStaff {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        unit,
        attributes,
        is_active: is_active != 0,
        is_generated: is_generated != 0,
        created_at: created_at.and_then(|t| t.parse().ok()).unwrap_or(0),
        updated_at: updated_at.and_then(|t| t.parse().ok()).unwrap_or(0),
    })
}
