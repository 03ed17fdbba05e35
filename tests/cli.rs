//! CLI smoke tests: init, export, analyze, execute, resolve through `tw`.

use assert_cmd::Command;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;
use tw::exchange::{decode, encode, EntityKind, ExchangeBundle, ExportKind, ExportScope, Manifest};

fn tw(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tw").unwrap();
    cmd.arg("--db").arg(db).env("TW_ACTOR", "tester").env_remove("TW_TEST_DB");
    cmd
}

fn run_json(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

fn write_archive(path: &Path, kind: EntityKind, records: Vec<Value>) {
    let mut bundle = ExchangeBundle::new(Manifest::now(ExportKind::Full));
    let records = records
        .into_iter()
        .map(|v| match v {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        })
        .collect();
    bundle.collections.insert(kind, records);
    std::fs::write(path, encode(&bundle).unwrap()).unwrap();
}

#[test]
fn version_reports_archive_format() {
    let temp_dir = TempDir::new().unwrap();
    let out = run_json(tw(&temp_dir.path().join("tw.db")).arg("version"));
    assert_eq!(out["archive_format"], 1);
}

#[test]
fn status_without_database_is_not_initialized() {
    let temp_dir = TempDir::new().unwrap();
    tw(&temp_dir.path().join("missing.db"))
        .args(["status", "--json"])
        .assert()
        .code(2);
}

#[test]
fn import_then_reexport_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("tw.db");
    let incoming = temp_dir.path().join("incoming.zip");
    let exported = temp_dir.path().join("exported.zip");

    tw(&db).arg("init").assert().success();
    write_archive(
        &incoming,
        EntityKind::Tag,
        vec![json!({"name": "java"}), json!({"name": "rust"})],
    );

    let analysis = run_json(tw(&db).args(["exchange", "analyze"]).arg(&incoming));
    assert_eq!(analysis["newItems"].as_array().unwrap().len(), 2);

    let executed = run_json(tw(&db).args(["exchange", "execute"]).arg(&incoming));
    assert_eq!(executed["inserted"], 2);

    let status = run_json(tw(&db).arg("status"));
    assert_eq!(status["records"]["tag"], 2);
    assert_eq!(status["recent"].as_array().unwrap().len(), 2);
    assert_eq!(status["recent"][0]["change"], "record_created");

    run_json(tw(&db).args(["exchange", "export", "-o"]).arg(&exported));
    let again = run_json(tw(&db).args(["exchange", "analyze"]).arg(&exported));
    assert!(again["newItems"].as_array().unwrap().is_empty());
    assert!(again["conflicts"].as_array().unwrap().is_empty());
}

#[test]
fn conflict_blocks_execute_until_resolved() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("tw.db");
    let old = temp_dir.path().join("old.zip");
    let new = temp_dir.path().join("new.zip");

    tw(&db).arg("init").assert().success();
    write_archive(&old, EntityKind::Link, vec![json!({"url": "https://x", "title": "Old"})]);
    write_archive(&new, EntityKind::Link, vec![json!({"url": "https://x", "title": "New"})]);
    tw(&db).args(["exchange", "execute"]).arg(&old).assert().success();

    tw(&db)
        .args(["exchange", "execute", "--json"])
        .arg(&new)
        .assert()
        .code(6);

    let analysis = run_json(tw(&db).args(["exchange", "analyze"]).arg(&new));
    let conflict = &analysis["conflicts"][0];
    let data = conflict["incoming"].to_string();
    let fingerprint = conflict["fingerprint"].as_str().unwrap();

    let unguarded = tw(&db)
        .args([
            "exchange",
            "resolve",
            "--json",
            "--entity",
            "link",
            "--key",
            "https://x",
            "--policy",
            "overwrite",
            "--data",
            data.as_str(),
        ])
        .assert()
        .code(4)
        .get_output()
        .stderr
        .clone();
    let err: Value = serde_json::from_slice(&unguarded).unwrap();
    assert_eq!(err["error"]["code"], "INVALID_ARGUMENT");

    let resolved = run_json(tw(&db).args([
        "exchange",
        "resolve",
        "--entity",
        "link",
        "--key",
        "https://x",
        "--policy",
        "overwrite",
        "--data",
        data.as_str(),
        "--expect",
        fingerprint,
    ]));
    assert_eq!(resolved["outcome"], "applied");

    let after = run_json(tw(&db).args(["exchange", "analyze"]).arg(&new));
    assert!(after["conflicts"].as_array().unwrap().is_empty());
}

#[test]
fn malformed_archive_exits_with_exchange_code() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("tw.db");
    let garbage = temp_dir.path().join("garbage.zip");
    std::fs::write(&garbage, b"not a zip").unwrap();

    tw(&db).arg("init").assert().success();
    let output = tw(&db)
        .args(["exchange", "analyze", "--json"])
        .arg(&garbage)
        .assert()
        .code(6)
        .get_output()
        .stderr
        .clone();

    let err: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(err["error"]["code"], "MALFORMED_ARCHIVE");
}

#[test]
fn export_conflicts_writes_reimportable_archive() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("tw.db");
    let items = temp_dir.path().join("pending.json");
    let out = temp_dir.path().join("pending.zip");

    std::fs::write(
        &items,
        json!([{"entity": "link", "key": "https://x", "data": {"title": "Draft"}}]).to_string(),
    )
    .unwrap();

    tw(&db).arg("init").assert().success();
    run_json(
        tw(&db)
            .args(["exchange", "export-conflicts", "--input"])
            .arg(&items)
            .arg("-o")
            .arg(&out),
    );

    let analysis = run_json(tw(&db).args(["exchange", "analyze"]).arg(&out));
    assert_eq!(analysis["newItems"][0]["payload"]["url"], "https://x");
}

#[test]
fn scoped_export_carries_only_its_kinds() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("tw.db");
    let tags = temp_dir.path().join("tags.zip");
    let prompts = temp_dir.path().join("prompts.zip");
    let out = temp_dir.path().join("functional.zip");

    tw(&db).arg("init").assert().success();
    write_archive(&tags, EntityKind::Tag, vec![json!({"name": "rust"})]);
    write_archive(
        &prompts,
        EntityKind::InstructionTemplate,
        vec![json!({"type": "SUMMARY", "content": "Summarize"})],
    );
    tw(&db).args(["exchange", "execute"]).arg(&tags).assert().success();
    tw(&db).args(["exchange", "execute"]).arg(&prompts).assert().success();

    let exported = run_json(
        tw(&db)
            .args(["exchange", "export", "--scope", "functional", "-o"])
            .arg(&out),
    );
    assert_eq!(exported["scope"], "functional");

    let bundle = decode(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(bundle.manifest.scope, ExportScope::Functional);
    assert_eq!(
        bundle.collections.keys().copied().collect::<Vec<_>>(),
        vec![EntityKind::Tag]
    );
}
