use assert_cmd::Command;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use scanlog_fs::{WorkspaceLock, resolve_workspace};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn init_creates_workspace_and_doctor_flags_missing_token() {
    let workspace = temp_workspace();
    init_workspace(&workspace.path, "https://script.example.com/exec");

    assert!(workspace.path.join(".scanlog/config.toml").is_file());
    assert!(workspace.path.join(".scanlog/state.db").is_file());

    let doctor = run_failing(&workspace.path, &["doctor", "--json"], 6);
    let report: Value = serde_json::from_str(&doctor.stdout).expect("json stdout");
    assert_eq!(report["ok"], false);
    assert_eq!(report["result"]["healthy"], true);
    assert_eq!(report["result"]["token"]["present"], false);
    assert_eq!(
        report["result"]["endpoint"],
        "https://script.example.com/exec"
    );
}

#[test]
fn records_are_captured_listed_and_fetched() {
    let workspace = temp_workspace();
    init_workspace(&workspace.path, "https://script.example.com/exec");

    let first = run_command(
        &workspace.path,
        &["record", "add", "https://example.com/item", "--label", "Door", "--json"],
    );
    assert_eq!(first["result"]["record"]["category"], "link");
    assert_eq!(first["result"]["record"]["sync_state"], "pending");
    run_command(&workspace.path, &["record", "add", "plain text", "--json"]);

    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["counts"]["pending"], 2);
    let records = listed["result"]["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["payload"], "plain text");

    let synced = run_command(
        &workspace.path,
        &["record", "list", "--state", "synced", "--json"],
    );
    assert_eq!(synced["result"]["records"], json!([]));

    let id = first["result"]["record"]["id"].as_str().expect("id");
    let fetched = run_command(&workspace.path, &["record", "get", id, "--json"]);
    assert_eq!(fetched["result"]["label"], "Door");

    let missing = run_failing(&workspace.path, &["record", "get", "nope", "--json"], 5);
    assert_eq!(missing.error()["kind"], "not_found");
}

#[test]
fn deleting_unsynced_record_requires_confirmation() {
    let workspace = temp_workspace();
    init_workspace(&workspace.path, "https://script.example.com/exec");

    let added = run_command(&workspace.path, &["record", "add", "draft", "--json"]);
    let id = added["result"]["record"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let refused = run_failing(&workspace.path, &["record", "delete", id.as_str(), "--json"], 2);
    assert_eq!(refused.error()["kind"], "usage");

    let deleted = run_command(&workspace.path, &["record", "delete", id.as_str(), "--yes", "--json"]);
    assert_eq!(deleted["result"]["removed"], true);

    let again = run_command(&workspace.path, &["record", "delete", id.as_str(), "--yes", "--json"]);
    assert_eq!(again["result"]["removed"], false);
}

#[test]
fn full_sync_pushes_pending_records_and_merges_the_cloud() {
    let server = MockServer::start();
    let workspace = temp_workspace();
    init_workspace(&workspace.path, &endpoint(&server));
    run_command(&workspace.path, &["auth", "set-token", "tok-1", "--json"]);

    let added = run_command(&workspace.path, &["record", "add", "hello", "--json"]);
    let record = &added["result"]["record"];
    let id = record["id"].as_str().expect("id").to_string();
    let created_at = record["created_at"].clone();

    let push = server.mock(|when, then| {
        when.method(POST)
            .path("/exec")
            .json_body_partial(json!({"token": "tok-1"}).to_string());
        then.status(200).json_body(json!({
            "status": "success",
            "added": 1,
            "updated": 0,
            "totalProcessed": 1
        }));
    });
    let pull = server.mock(|when, then| {
        when.method(GET).path("/exec").query_param("token", "tok-1");
        then.status(200).json_body(json!([
            {
                "id": id,
                "timestamp": created_at,
                "name": "",
                "data": "hello",
                "type": "TEXT"
            },
            {
                "id": "cloud-1",
                "timestamp": 100,
                "name": "Kitchen",
                "data": "https://example.com/kitchen",
                "type": "URL"
            }
        ]));
    });

    let synced = run_command(&workspace.path, &["sync", "full", "--json"]);
    push.assert_hits(1);
    pull.assert_hits(1);
    assert_eq!(synced["ok"], true);
    assert_eq!(synced["result"]["pushed"], 1);
    assert_eq!(synced["result"]["failed"], 0);
    assert_eq!(synced["result"]["added"], 1);
    assert_eq!(synced["result"]["updated"], 0);
    assert_eq!(synced["result"]["reconciled_missing"], 0);

    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["counts"]["synced"], 2);
    assert_eq!(listed["result"]["counts"]["pending"], 0);

    let status = run_command(&workspace.path, &["sync", "status", "--json"]);
    assert_eq!(status["result"]["last_sync_status"], "ok");
    assert_eq!(status["result"]["last_report"]["added"], 1);
    assert_eq!(status["result"]["token_source"], "stored");
}

#[test]
fn rejected_token_marks_the_record_failed_and_exits_with_auth_code() {
    let server = MockServer::start();
    let workspace = temp_workspace();
    init_workspace(&workspace.path, &endpoint(&server));

    server.mock(|when, then| {
        when.method(POST).path("/exec");
        then.status(200)
            .json_body(json!({"status": "error", "message": "Unauthorized"}));
    });

    run_command(&workspace.path, &["record", "add", "hello", "--json"]);

    let mut cmd = base_command(&workspace.path);
    cmd.env("SCANLOG_TOKEN", "stale")
        .args(["sync", "push", "--json"]);
    let output = cmd.assert().code(3).get_output().clone();
    let stderr: Value = serde_json::from_slice(&output.stderr).expect("json stderr");
    assert_eq!(stderr["error"]["kind"], "unauthorized");

    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["counts"]["error"], 1);

    let status = run_command(&workspace.path, &["sync", "status", "--json"]);
    let last = status["result"]["last_sync_status"]
        .as_str()
        .expect("status text");
    assert!(last.starts_with("error:"));
}

#[test]
fn peek_lists_cloud_only_records_and_restore_promotes_one() {
    let server = MockServer::start();
    let workspace = temp_workspace();
    init_workspace(&workspace.path, &endpoint(&server));
    run_command(&workspace.path, &["auth", "set-token", "tok-1", "--json"]);

    server.mock(|when, then| {
        when.method(GET).path("/exec");
        then.status(200).json_body(json!([
            {"id": "cloud-1", "timestamp": 100, "name": "", "data": "older", "type": "TEXT"},
            {"id": "cloud-2", "timestamp": 200, "name": "Shelf", "data": "newer", "type": "TEXT"}
        ]));
    });

    let peeked = run_command(&workspace.path, &["sync", "peek", "--json"]);
    assert_eq!(peeked["result"]["count"], 2);
    assert_eq!(peeked["result"]["records"][0]["id"], "cloud-2");
    assert_eq!(peeked["result"]["records"][0]["origin_flag"], true);

    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["records"], json!([]));

    let restored = run_command(&workspace.path, &["sync", "restore", "cloud-1", "--json"]);
    assert_eq!(restored["result"]["record"]["sync_state"], "synced");
    assert!(restored["result"]["record"].get("origin_flag").is_none());

    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["counts"]["synced"], 1);

    let duplicate = run_failing(
        &workspace.path,
        &["sync", "restore", "cloud-1", "--json"],
        5,
    );
    assert_eq!(duplicate.error()["kind"], "duplicate_id");
}

#[test]
fn full_store_leaves_older_cloud_records_remote_and_refuses_to_restore_them() {
    let server = MockServer::start();
    let workspace = temp_workspace();
    init_workspace(&workspace.path, &endpoint(&server));
    run_command(&workspace.path, &["auth", "set-token", "tok-1", "--json"]);
    run_command(&workspace.path, &["profile", "set", "--capacity", "1", "--json"]);

    server.mock(|when, then| {
        when.method(GET).path("/exec");
        then.status(200).json_body(json!([
            {"id": "cloud-1", "timestamp": 100, "name": "", "data": "older", "type": "TEXT"},
            {"id": "cloud-2", "timestamp": 200, "name": "", "data": "newer", "type": "TEXT"}
        ]));
    });

    for _ in 0..2 {
        let synced = run_command(&workspace.path, &["sync", "full", "--json"]);
        assert_eq!(synced["result"]["left_in_cloud"], 1);
        assert_eq!(synced["result"]["evicted"], 0);
    }
    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["records"][0]["id"], "cloud-2");

    let refused = run_failing(&workspace.path, &["sync", "restore", "cloud-1", "--json"], 2);
    assert_eq!(refused.error()["kind"], "usage");
    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["records"].as_array().map(Vec::len), Some(1));
}

#[test]
fn sync_reports_already_running_while_another_process_holds_the_workspace() {
    let server = MockServer::start();
    let workspace = temp_workspace();
    init_workspace(&workspace.path, &endpoint(&server));
    run_command(&workspace.path, &["auth", "set-token", "tok-1", "--json"]);
    run_command(&workspace.path, &["record", "add", "queued", "--json"]);

    let push = server.mock(|when, then| {
        when.method(POST).path("/exec");
        then.status(200).json_body(json!({"status": "success", "added": 1}));
    });
    let pull = server.mock(|when, then| {
        when.method(GET).path("/exec");
        then.status(200).json_body(json!([]));
    });

    let paths = resolve_workspace(Some(&workspace.path)).expect("workspace");
    let held = WorkspaceLock::acquire(&paths).expect("hold workspace lock");

    for args in [["sync", "full", "--json"], ["sync", "push", "--json"]] {
        let skipped = run_command(&workspace.path, &args);
        assert_eq!(skipped["result"]["status"], "already_running");
    }
    push.assert_hits(0);
    pull.assert_hits(0);

    drop(held);
    let synced = run_command(&workspace.path, &["sync", "full", "--json"]);
    assert_eq!(synced["result"]["pushed"], 1);
    push.assert_hits(1);
}

#[test]
fn record_edits_wait_for_the_workspace_lock() {
    let workspace = temp_workspace();
    init_workspace(&workspace.path, "https://script.example.com/exec");

    let paths = resolve_workspace(Some(&workspace.path)).expect("workspace");
    let held = WorkspaceLock::acquire(&paths).expect("hold workspace lock");

    let mut waiting = std::process::Command::new(env!("CARGO_BIN_EXE_scanlog"))
        .current_dir(&workspace.path)
        .env_remove("SCANLOG_TOKEN")
        .env_remove("SCANLOG_ENV_FILE")
        .env("RUST_LOG", "off")
        .args(["--workspace", workspace.path.to_str().expect("workspace path")])
        .args(["record", "add", "while locked", "--json"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn scanlog");

    std::thread::sleep(Duration::from_millis(500));
    assert!(waiting.try_wait().expect("poll child").is_none());
    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["records"], json!([]));

    drop(held);
    let output = waiting.wait_with_output().expect("wait for scanlog");
    assert!(output.status.success());

    let listed = run_command(&workspace.path, &["record", "list", "--json"]);
    assert_eq!(listed["result"]["records"][0]["payload"], "while locked");
}

#[test]
fn sync_without_endpoint_or_token_fails_with_distinct_codes() {
    let workspace = temp_workspace();
    init_workspace(&workspace.path, "");

    let no_endpoint = run_failing(&workspace.path, &["sync", "push", "--json"], 2);
    assert_eq!(no_endpoint.error()["kind"], "usage");

    run_command(
        &workspace.path,
        &["profile", "set", "--url", "https://script.example.com/exec", "--json"],
    );
    let no_token = run_failing(&workspace.path, &["sync", "push", "--json"], 3);
    assert_eq!(no_token.error()["kind"], "unauthorized");
}

#[test]
fn token_sources_are_reported_by_auth_status() {
    let workspace = temp_workspace();
    init_workspace(&workspace.path, "https://script.example.com/exec");

    let missing = run_failing(&workspace.path, &["auth", "status", "--json"], 3);
    let missing: Value = serde_json::from_str(&missing.stdout).expect("json stdout");
    assert_eq!(missing["result"]["authenticated"], false);

    fs::write(workspace.path.join(".env"), "export SCANLOG_TOKEN=\"from-file\"\n")
        .expect("write env file");
    let from_file = run_command(&workspace.path, &["auth", "status", "--json"]);
    assert_eq!(from_file["result"]["source"], "env_file");

    let mut cmd = base_command(&workspace.path);
    cmd.env("SCANLOG_TOKEN", "from-env")
        .args(["auth", "status", "--json"]);
    let assert = cmd.assert().success();
    let from_env: Value = serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(from_env["result"]["source"], "environment");
}

#[test]
fn profile_set_updates_capacity_and_rejects_zero() {
    let workspace = temp_workspace();
    init_workspace(&workspace.path, "https://script.example.com/exec");

    let updated = run_command(
        &workspace.path,
        &[
            "profile", "set", "--name", "field", "--url", "https://field.example.com/exec",
            "--capacity", "3", "--push-mode", "batch", "--json",
        ],
    );
    assert_eq!(updated["result"]["profile"], "field");
    assert_eq!(updated["result"]["capacity"], 3);
    assert_eq!(updated["result"]["push_mode"], "batch");

    let listed = run_command(&workspace.path, &["profile", "list", "--json"]);
    assert_eq!(listed["result"]["active_profile"], "default");
    assert_eq!(listed["result"]["profiles"].as_array().map(Vec::len), Some(2));

    let rejected = run_failing(
        &workspace.path,
        &["profile", "set", "--capacity", "0", "--json"],
        2,
    );
    assert_eq!(rejected.error()["kind"], "usage");
}

fn endpoint(server: &MockServer) -> String {
    format!("{}/exec", server.base_url())
}

fn init_workspace(workspace: &Path, endpoint: &str) {
    let mut cmd = base_command(workspace);
    cmd.args(["init", "--json"]);
    if !endpoint.is_empty() {
        cmd.args(["--endpoint", endpoint]);
    }

    cmd.assert().success();
}

fn run_command(workspace: &Path, args: &[&str]) -> Value {
    let mut cmd = base_command(workspace);
    cmd.args(args);

    let assert = cmd.assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    serde_json::from_str(&stdout).expect("json stdout")
}

struct Failure {
    stdout: String,
    stderr: String,
}

impl Failure {
    fn error(&self) -> Value {
        let payload: Value = serde_json::from_str(&self.stderr).expect("json stderr");
        payload["error"].clone()
    }
}

fn run_failing(workspace: &Path, args: &[&str], code: i32) -> Failure {
    let mut cmd = base_command(workspace);
    cmd.args(args);

    let assert = cmd.assert().code(code);
    let output = assert.get_output();
    Failure {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

fn base_command(workspace: &Path) -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("scanlog");
    cmd.current_dir(workspace)
        .env_remove("SCANLOG_TOKEN")
        .env_remove("SCANLOG_ENV_FILE")
        .env("RUST_LOG", "off")
        .args(["--workspace", workspace.to_str().expect("workspace path")]);
    cmd
}

#[derive(Debug)]
struct TestWorkspace {
    _temp: TempDir,
    path: PathBuf,
}

fn temp_workspace() -> TestWorkspace {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace_path = temp.path().join("workspace");
    fs::create_dir_all(&workspace_path).expect("create workspace dir");
    TestWorkspace {
        _temp: temp,
        path: workspace_path,
    }
}
