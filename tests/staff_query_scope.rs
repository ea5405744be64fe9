
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

fn boot(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "b1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "b2",
        "sessions.put",
        json!({ "token": "adm", "role": "administrator" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "b3",
        "sessions.put",
        json!({ "token": "op-m", "role": "operator", "homeUnit": "SDN 1 Merdeka" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "b4",
        "staff.importBatch",
        json!({
            "callerToken": "adm",
            "rows": [
                { "name": "Indah Pertiwi", "employeeNo": "M-1", "unit": "SDN 1 Merdeka" },
                { "name": "Joko Susilo", "employeeNo": "P-1", "unit": "SDN 2 Pelita" }
            ]
        }),
    );
}

fn staff_id_of(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    external_id: &str,
) -> String {
    let listed = request_ok(
        stdin,
        reader,
        id,
        "staff.list",
        json!({ "callerToken": "adm", "includeInactive": true }),
    );
    listed["staff"]
        .as_array()
        .and_then(|rows| {
            rows.iter()
                .find(|r| r["externalId"] == external_id)
                .and_then(|r| r["id"].as_str())
                .map(str::to_string)
        })
        .expect("staff id")
}

#[test]
fn operator_listings_are_pinned_to_the_home_unit() {
    let workspace = temp_dir("rosterd-list-pin");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    boot(&mut stdin, &mut reader, &workspace);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "staff.list",
        json!({ "callerToken": "op-m" }),
    );
    let staff = listed["staff"].as_array().cloned().unwrap_or_default();
    assert_eq!(staff.len(), 1);
    assert_eq!(staff[0]["externalId"], "M-1");

    // Asking for another unit does not widen the view.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.list",
        json!({ "callerToken": "op-m", "unit": "SDN 2 Pelita" }),
    );
    let staff = listed["staff"].as_array().cloned().unwrap_or_default();
    assert_eq!(staff.len(), 1);
    assert_eq!(staff[0]["unitName"], "SDN 1 Merdeka");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn admin_unit_filter_is_honored_as_given() {
    let workspace = temp_dir("rosterd-list-filter");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    boot(&mut stdin, &mut reader, &workspace);

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "staff.list",
        json!({ "callerToken": "adm" }),
    );
    assert_eq!(all["staff"].as_array().map(Vec::len), Some(2));

    let pelita = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.list",
        json!({ "callerToken": "adm", "unit": "sdn 2 PELITA" }),
    );
    let staff = pelita["staff"].as_array().cloned().unwrap_or_default();
    assert_eq!(staff.len(), 1);
    assert_eq!(staff[0]["externalId"], "P-1");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn inactive_records_are_hidden_unless_asked_for() {
    let workspace = temp_dir("rosterd-list-inactive");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    boot(&mut stdin, &mut reader, &workspace);

    // Retire M-1 by syncing its unit against an empty-but-for-a-new-hire roster.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "staff.importBatch",
        json!({
            "callerToken": "adm",
            "fullSync": true,
            "rows": [{ "name": "Kartika Dewi", "employeeNo": "M-2", "unit": "SDN 1 Merdeka" }]
        }),
    );

    let visible = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.list",
        json!({ "callerToken": "adm", "unit": "SDN 1 Merdeka" }),
    );
    let staff = visible["staff"].as_array().cloned().unwrap_or_default();
    assert_eq!(staff.len(), 1);
    assert_eq!(staff[0]["externalId"], "M-2");

    let everything = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "staff.list",
        json!({ "callerToken": "adm", "unit": "SDN 1 Merdeka", "includeInactive": true }),
    );
    let staff = everything["staff"].as_array().cloned().unwrap_or_default();
    assert_eq!(staff.len(), 2);
    let retired = staff
        .iter()
        .find(|r| r["externalId"] == "M-1")
        .expect("retired record");
    assert_eq!(retired["isActive"], false);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn cross_unit_reads_are_refused() {
    let workspace = temp_dir("rosterd-get-scope");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    boot(&mut stdin, &mut reader, &workspace);

    let own = staff_id_of(&mut stdin, &mut reader, "1", "M-1");
    let foreign = staff_id_of(&mut stdin, &mut reader, "2", "P-1");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "staff.get",
        json!({ "callerToken": "op-m", "staffId": own }),
    );
    assert_eq!(fetched["staff"]["externalId"], "M-1");

    let refused = request(
        &mut stdin,
        &mut reader,
        "4",
        "staff.get",
        json!({ "callerToken": "op-m", "staffId": foreign }),
    );
    assert_eq!(refused["ok"], false);
    assert_eq!(refused["error"]["code"], "forbidden");

    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "staff.get",
        json!({ "callerToken": "adm", "staffId": "no-such-id" }),
    );
    assert_eq!(missing["ok"], false);
    assert_eq!(missing["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn generated_flag_survives_until_the_next_import_touches_the_record() {
    let workspace = temp_dir("rosterd-generated");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    boot(&mut stdin, &mut reader, &workspace);

    let target = staff_id_of(&mut stdin, &mut reader, "1", "M-1");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.markGenerated",
        json!({ "callerToken": "op-m", "staffId": target }),
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "staff.get",
        json!({ "callerToken": "adm", "staffId": target }),
    );
    assert_eq!(fetched["staff"]["isGenerated"], true);

    // Real data arriving for the person clears the synthetic marker.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "staff.importBatch",
        json!({
            "callerToken": "adm",
            "rows": [{ "name": "Indah Pertiwi", "employeeNo": "M-1", "unit": "SDN 1 Merdeka" }]
        }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "staff.get",
        json!({ "callerToken": "adm", "staffId": target }),
    );
    assert_eq!(fetched["staff"]["isGenerated"], false);
    assert_eq!(fetched["staff"]["isActive"], true);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
