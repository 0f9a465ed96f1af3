use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::{TempDir, tempdir};

const CONFIG_KEYS: &[&str] = &[
    "BROLINK_CONFIG_PATH",
    "REGISTRY_BASE_URL",
    "REGISTRY_CREDENTIALS_REF",
    "DATABASE_URL",
    "MAX_ATTEMPTS",
    "SHARD_INDEX",
    "SHARD_COUNT",
];

/// A `brolinkctl` invocation isolated from the caller's environment and
/// working directory.
fn brolinkctl(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("brolinkctl");
    cmd.current_dir(dir.path());
    for key in CONFIG_KEYS {
        cmd.env_remove(key);
    }
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn configured(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = brolinkctl(dir);
    cmd.env("REGISTRY_BASE_URL", "https://registry.invalid/api/")
        .env("REGISTRY_CREDENTIALS_REF", "env:CLITEST")
        .env("CLITEST_TOKEN", "token")
        .env("CLITEST_KVK", "12345678")
        .env(
            "DATABASE_URL",
            format!("sqlite://{}", dir.path().join("brolink.db").display()),
        );
    cmd
}

#[test]
fn help_lists_every_command() {
    let dir = tempdir().unwrap();
    brolinkctl(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("sync-starts")
                .and(predicate::str::contains("sync-additions"))
                .and(predicate::str::contains("check-status"))
                .and(predicate::str::contains("requeue"))
                .and(predicate::str::contains("tick"))
                .and(predicate::str::contains("logs"))
                .and(predicate::str::contains("import"))
                .and(predicate::str::contains("render")),
        );
}

#[test]
fn logs_help_documents_filters() {
    let dir = tempdir().unwrap();
    brolinkctl(&dir)
        .args(["logs", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--dossier")
                .and(predicate::str::contains("--phase"))
                .and(predicate::str::contains("--kind")),
        );
}

#[test]
fn render_construction_is_documented() {
    let dir = tempdir().unwrap();
    brolinkctl(&dir)
        .args(["render", "construction", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--output"));
}

#[test]
fn missing_configuration_exits_with_code_two() {
    let dir = tempdir().unwrap();
    brolinkctl(&dir)
        .arg("tick")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("REGISTRY_BASE_URL"));
}

#[test]
fn guard_rail_violation_exits_with_code_two() {
    let dir = tempdir().unwrap();
    configured(&dir)
        .env("SHARD_INDEX", "3")
        .env("SHARD_COUNT", "2")
        .arg("check-status")
        .assert()
        .code(2);
}

#[test]
fn explicit_config_file_must_exist() {
    let dir = tempdir().unwrap();
    configured(&dir)
        .args(["--config", "missing.toml", "tick"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing.toml"));
}

#[test]
fn tick_on_an_empty_database_is_a_clean_pass() {
    let dir = tempdir().unwrap();
    configured(&dir)
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("submitted=0").and(predicate::str::contains("registry_calls=0")));
}

#[test]
fn import_then_list_logs() {
    let dir = tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.json");
    std::fs::write(&snapshot, "{}").unwrap();

    configured(&dir)
        .arg("import")
        .arg(&snapshot)
        .assert()
        .success();
    configured(&dir)
        .args(["logs", "--phase", "accepted"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn requeue_of_unknown_log_fails() {
    let dir = tempdir().unwrap();
    configured(&dir)
        .args(["requeue", "0191d6c2-0000-7000-8000-000000000000"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn malformed_log_id_is_a_usage_error() {
    let dir = tempdir().unwrap();
    brolinkctl(&dir)
        .args(["requeue", "not-a-uuid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid identifier"));
}
