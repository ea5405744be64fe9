use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{caller, db_conn, get_setup_bool, get_setup_i64, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::normalize::{is_placeholder_id, normalize_row, FieldBag};
use crate::reconcile::{MatchIndex, StoredStaff, UnitDirectory, UnitRef};
use crate::scope::WriteScope;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

fn unit_columns(unit: &Option<UnitRef>) -> (Option<String>, Option<String>) {
    match unit {
        Some(UnitRef::Resolved { id, .. }) => (Some(id.clone()), None),
        Some(UnitRef::Unresolved(name)) => (None, Some(name.clone())),
        None => (None, None),
    }
}

fn insert_staff(conn: &Connection, record: &StoredStaff) -> Result<(), HandlerErr> {
    let (unit_id, unit_name) = unit_columns(&record.unit);
    conn.execute(
        "INSERT INTO staff(id, external_id, name, unit_id, unit_name, attributes,
                           is_active, is_generated, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, 0, ?, ?)",
        rusqlite::params![
            record.id,
            record.external_id,
            record.name,
            unit_id,
            unit_name,
            record.attributes.to_string(),
            record.created_at.to_string(),
            record.updated_at.to_string(),
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(())
}

fn update_staff(conn: &Connection, record: &StoredStaff) -> Result<(), HandlerErr> {
    let (unit_id, unit_name) = unit_columns(&record.unit);
    conn.execute(
        "UPDATE staff SET external_id = ?, name = ?, unit_id = ?, unit_name = ?,
                attributes = ?, is_active = 1, is_generated = 0, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            record.external_id,
            record.name,
            unit_id,
            unit_name,
            record.attributes.to_string(),
            record.updated_at.to_string(),
            record.id,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(())
}

fn handle_import_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let ident = match caller(conn, req) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows[]", None);
    };

    let max_rows = get_setup_i64(conn, "setup.import", "maxRows", 5000).max(1) as usize;
    if rows.len() > max_rows {
        return err(
            &req.id,
            "bad_params",
            format!("batch exceeds max rows: {} > {}", rows.len(), max_rows),
            Some(json!({ "maxRows": max_rows })),
        );
    }
    let full_sync = req
        .params
        .get("fullSync")
        .and_then(|v| v.as_bool())
        .unwrap_or_else(|| get_setup_bool(conn, "setup.import", "defaultFullSync", false));
    let unit_override = req.params.get("unitOverride").and_then(|v| v.as_str());

    let directory = match db::load_units(conn) {
        Ok(u) => UnitDirectory::new(u),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Operator sessions without a home unit fail here, before any row runs.
    let scope = match WriteScope::for_caller(&ident, unit_override, &directory) {
        Ok(s) => s,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };

    // One snapshot per batch; kept current after every write so rows later
    // in the batch match records written earlier in it.
    let mut index = match db::load_staff_rows(conn) {
        Ok(r) => MatchIndex::build(r),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let batch_millis = db::now_millis();
    let mut created: usize = 0;
    let mut updated: usize = 0;
    let mut skipped: usize = 0;
    let mut deactivated: usize = 0;
    let mut errors: Vec<String> = Vec::new();
    // Identifiers actually stored this batch, keyed by the unit the record
    // ended up in. Drives the full-sync sweep.
    let mut seen: HashMap<String, HashSet<String>> = HashMap::new();
    let mut touched_units: HashSet<String> = HashSet::new();

    for (i, row) in rows.iter().enumerate() {
        let row_no = i + 1;
        let Some(obj) = row.as_object() else {
            errors.push(format!("row {}: not an object", row_no));
            skipped += 1;
            continue;
        };

        let bag = FieldBag::from_row(obj);
        let draft = match normalize_row(&bag, batch_millis, i) {
            Ok(d) => d,
            Err(reason) => {
                errors.push(format!("row {}: {}", row_no, reason));
                skipped += 1;
                continue;
            }
        };

        let effective = scope.effective_unit(draft.declared_unit.as_deref(), &directory);
        let unit_key = effective.as_ref().map(|u| u.key()).unwrap_or_default();

        let matched = index.resolve(&draft, &unit_key).cloned();
        let written = match matched {
            Some(existing) => {
                // Ownership is re-checked per row: an exact identifier can
                // match a record parked at another unit.
                if !scope.may_touch(&existing.unit_key()) {
                    errors.push(format!(
                        "row {} ({}): record belongs to another unit",
                        row_no, draft.name
                    ));
                    skipped += 1;
                    continue;
                }

                // A real identifier upgrades a placeholder, never the
                // other way around.
                let external_id = if !is_placeholder_id(&draft.external_id) {
                    draft.external_id.clone()
                } else {
                    existing.external_id.clone()
                };
                let unit = effective.clone().or_else(|| existing.unit.clone());

                let mut attrs = existing.attributes.as_object().cloned().unwrap_or_default();
                for (k, v) in &draft.attributes {
                    attrs.insert(k.clone(), v.to_json());
                }

                let record = StoredStaff {
                    id: existing.id.clone(),
                    external_id,
                    name: draft.name.clone(),
                    unit,
                    attributes: Value::Object(attrs),
                    is_active: true,
                    is_generated: false,
                    created_at: existing.created_at,
                    updated_at: batch_millis,
                };
                match update_staff(conn, &record) {
                    Ok(()) => {
                        updated += 1;
                        record
                    }
                    Err(e) => {
                        errors.push(format!("row {} ({}): {}", row_no, draft.name, e.message));
                        skipped += 1;
                        continue;
                    }
                }
            }
            None => {
                let mut attrs = serde_json::Map::new();
                for (k, v) in &draft.attributes {
                    attrs.insert(k.clone(), v.to_json());
                }
                let record = StoredStaff {
                    id: Uuid::new_v4().to_string(),
                    external_id: draft.external_id.clone(),
                    name: draft.name.clone(),
                    unit: effective.clone(),
                    attributes: Value::Object(attrs),
                    is_active: true,
                    is_generated: false,
                    created_at: batch_millis,
                    updated_at: batch_millis,
                };
                match insert_staff(conn, &record) {
                    Ok(()) => {
                        created += 1;
                        record
                    }
                    Err(e) => {
                        errors.push(format!("row {} ({}): {}", row_no, draft.name, e.message));
                        skipped += 1;
                        continue;
                    }
                }
            }
        };

        // The seen set keys off where the record actually landed, which for
        // an admin patch without a declared unit can differ from unit_key.
        let final_key = written.unit_key();
        if !final_key.is_empty() {
            touched_units.insert(final_key.clone());
        }
        seen.entry(final_key)
            .or_default()
            .insert(written.external_id.clone());
        index.note_written(written);
    }

    if full_sync {
        let empty = HashSet::new();
        let mut stale: Vec<StoredStaff> = Vec::new();
        for key in &touched_units {
            let seen_ids = seen.get(key).unwrap_or(&empty);
            stale.extend(
                index
                    .records()
                    .filter(|r| r.is_active && r.unit_key() == *key)
                    .filter(|r| !seen_ids.contains(&r.external_id))
                    .cloned(),
            );
        }
        for record in stale {
            let res = conn.execute(
                "UPDATE staff SET is_active = 0, updated_at = ? WHERE id = ?",
                rusqlite::params![batch_millis.to_string(), record.id],
            );
            match res {
                Ok(_) => {
                    deactivated += 1;
                    let mut swept = record;
                    swept.is_active = false;
                    swept.updated_at = batch_millis;
                    index.note_written(swept);
                }
                Err(e) => {
                    errors.push(format!("full sync ({}): {}", record.name, e));
                }
            }
        }
    }

    log::info!(
        "import batch: {} created, {} updated, {} skipped, {} deactivated, {} errors",
        created,
        updated,
        skipped,
        deactivated,
        errors.len()
    );

    ok(
        &req.id,
        json!({
            "createdCount": created,
            "updatedCount": updated,
            "skippedCount": skipped,
            "deactivatedCount": deactivated,
            "errors": errors
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staff.importBatch" => Some(handle_import_batch(state, req)),
        _ => None,
    }
}
