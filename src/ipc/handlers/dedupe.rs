use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{caller, db_conn, get_setup_bool, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{pick_survivor, StoredStaff};
use crate::scope::require_admin;
use serde_json::json;
use std::collections::BTreeMap;

fn handle_dedupe(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let dry_run = req
        .params
        .get("dryRun")
        .and_then(|v| v.as_bool())
        .unwrap_or_else(|| get_setup_bool(conn, "setup.dedupe", "defaultDryRun", true));

    let rows = match db::load_staff_rows(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let scanned = rows.len();

    // Group on identity keys alone; external ids are exactly what duplicate
    // rows disagree about. BTreeMap keeps the report order stable.
    let mut groups: BTreeMap<(String, String), Vec<StoredStaff>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.name_key(), row.unit_key()))
            .or_default()
            .push(row);
    }
    let unique_groups = groups.len();

    let mut removed: usize = 0;
    let mut report: Vec<String> = Vec::new();

    for ((name_key, unit_key), group) in &groups {
        if group.len() < 2 {
            continue;
        }
        let (survivor, reason) = pick_survivor(group);
        let losers: Vec<&StoredStaff> = group.iter().filter(|r| r.id != survivor.id).collect();
        report.push(format!(
            "group {}|{}: keeping {} ({}), {} duplicate(s)",
            name_key,
            unit_key,
            survivor.id,
            reason,
            losers.len()
        ));

        for loser in losers {
            if dry_run {
                removed += 1;
                report.push(format!("would remove {} ({})", loser.id, loser.external_id));
                continue;
            }
            match conn.execute("DELETE FROM staff WHERE id = ?", [&loser.id]) {
                Ok(_) => {
                    removed += 1;
                    report.push(format!("removed {} ({})", loser.id, loser.external_id));
                }
                Err(e) => {
                    report.push(format!("failed to remove {}: {}", loser.id, e));
                }
            }
        }
    }

    log::info!(
        "dedupe{}: {} scanned, {} groups, {} removed",
        if dry_run { " (dry run)" } else { "" },
        scanned,
        unique_groups,
        removed
    );

    ok(
        &req.id,
        json!({
            "scanned": scanned,
            "uniqueGroups": unique_groups,
            "duplicatesRemoved": removed,
            "dryRun": dry_run,
            "report": report
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staff.dedupe" => Some(handle_dedupe(state, req)),
        _ => None,
    }
}
