#[path = "../src/backup.rs"]
mod backup;

use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::ZipWriter;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_bundle(path: &Path, manifest: &serde_json::Value, db_bytes: &[u8]) {
    let f = File::create(path).expect("create bundle");
    let mut zip = ZipWriter::new(f);
    let opts = FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    zip.start_file("db/roster.sqlite3", opts)
        .expect("db entry");
    zip.write_all(db_bytes).expect("write db entry");
    zip.finish().expect("finish bundle");
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("rosterd-backup-src");
    let workspace2 = temp_dir("rosterd-backup-dst");
    let out_dir = temp_dir("rosterd-backup-out");

    let db_src = workspace.join("roster.sqlite3");
    let bytes = b"sqlite-test-payload";
    std::fs::write(&db_src, bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.rosterbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256, sha256_hex(bytes));

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/roster.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let restored = std::fs::read(workspace2.join("roster.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_database_entries_are_rejected() {
    let out_dir = temp_dir("rosterd-backup-tamper");
    let workspace = temp_dir("rosterd-backup-tamper-dst");

    let genuine = b"genuine-database-bytes";
    let manifest = json!({
        "format": backup::BUNDLE_FORMAT_V1,
        "version": 1,
        "dbSha256": sha256_hex(genuine),
    });
    let bundle_path = out_dir.join("tampered.zip");
    write_bundle(&bundle_path, &manifest, b"swapped-in-afterwards");

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("tampered bundle must not import");
    assert!(
        err.to_string().contains("digest mismatch"),
        "unexpected error: {}",
        err
    );
    assert!(!workspace.join("roster.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bundles_without_a_digest_are_rejected() {
    let out_dir = temp_dir("rosterd-backup-nodigest");
    let workspace = temp_dir("rosterd-backup-nodigest-dst");

    let manifest = json!({
        "format": backup::BUNDLE_FORMAT_V1,
        "version": 1,
    });
    let bundle_path = out_dir.join("nodigest.zip");
    write_bundle(&bundle_path, &manifest, b"whatever");

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("digest-less bundle must not import");
    assert!(
        err.to_string().contains("missing dbSha256"),
        "unexpected error: {}",
        err
    );

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn foreign_bundle_formats_are_rejected() {
    let out_dir = temp_dir("rosterd-backup-foreign");
    let workspace = temp_dir("rosterd-backup-foreign-dst");

    let bytes = b"foreign-db";
    let manifest = json!({
        "format": "someone-elses-backup-v9",
        "dbSha256": sha256_hex(bytes),
    });
    let bundle_path = out_dir.join("foreign.zip");
    write_bundle(&bundle_path, &manifest, bytes);

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("foreign bundle must not import");
    assert!(
        err.to_string().contains("unsupported bundle format"),
        "unexpected error: {}",
        err
    );

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("rosterd-backup-raw");
    let workspace = temp_dir("rosterd-backup-raw-dst");

    let raw_file = out_dir.join("nightly.sqlite3");
    let bytes = b"raw-sqlite-copy";
    std::fs::write(&raw_file, bytes).expect("write raw sqlite file");

    let import =
        backup::import_workspace_bundle(&raw_file, &workspace).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, "raw-sqlite3");

    let restored = std::fs::read(workspace.join("roster.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn exporting_an_empty_workspace_fails() {
    let workspace = temp_dir("rosterd-backup-empty");
    let out_dir = temp_dir("rosterd-backup-empty-out");

    let err = backup::export_workspace_bundle(&workspace, &out_dir.join("out.zip"))
        .expect_err("nothing to export");
    assert!(
        err.to_string().contains("database not found"),
        "unexpected error: {}",
        err
    );

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
