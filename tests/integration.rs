use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn finrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("finrag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("statement.txt"),
        "Checking account statement. Opening balance $2,400. Overdraft fee charged: $35. \
         Closing balance $1,980.",
    )
    .unwrap();
    fs::write(
        files_dir.join("loan.md"),
        "# Auto loan\n\nPrincipal $18,000 at 6.4% APR over 60 months. Monthly payment $351.",
    )
    .unwrap();
    fs::write(files_dir.join("ignored.bin"), [0u8, 1, 2, 3]).unwrap();

    // Hosted disabled, local pointed at a closed port: nothing leaves the machine.
    let config_content = format!(
        r#"[db]
path = "{}/data/finrag.sqlite"

[chunking]
chunk_size = 200
chunk_overlap = 40

[embedding]
provider = "hash"
dims = 128

[backends.hosted]
enabled = false

[backends.local]
url = "http://127.0.0.1:1"
timeout_secs = 2
"#,
        root.display()
    );

    let config_path = config_dir.join("finrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_finrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = finrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run finrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn files_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .display()
        .to_string()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_finrag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_finrag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_and_search() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, stderr, success) = run_finrag(&config_path, &["ingest", &files]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents processed: 2"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) =
        run_finrag(&config_path, &["search", "overdraft fee", "--json", "--top-k", "2"]);
    assert!(success);
    let passages: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let passages = passages.as_array().unwrap();
    assert!(!passages.is_empty() && passages.len() <= 2);
    assert_eq!(passages[0]["label"], "P1");
}

#[test]
fn test_ingest_twice_does_not_duplicate() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    run_finrag(&config_path, &["ingest", &files]);
    let (first, _, _) = run_finrag(&config_path, &["status", "--json"]);
    run_finrag(&config_path, &["ingest", &files]);
    let (second, _, _) = run_finrag(&config_path, &["status", "--json"]);

    let a: serde_json::Value = serde_json::from_str(&first).unwrap();
    let b: serde_json::Value = serde_json::from_str(&second).unwrap();
    assert_eq!(a["index_chunk_count"], b["index_chunk_count"]);
    assert_eq!(b["index_document_count"], 2);
}

#[test]
fn test_status_reports_backends() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_finrag(&config_path, &["status", "--json"]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["index_chunk_count"], 0);
    assert_eq!(status["hosted_backend_status"]["configuration"], "not_configured");
    assert_eq!(status["local_backend_status"]["configuration"], "configured");
    assert_eq!(status["local_backend_status"]["reachability"], "unreachable");
}

#[test]
fn test_ask_with_unreachable_backend_fails_gracefully() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);
    run_finrag(&config_path, &["ingest", &files]);

    let (stdout, stderr, success) = run_finrag(
        &config_path,
        &["ask", "What was the overdraft fee?", "--local", "--json"],
    );
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["status"], "failed");
    assert_eq!(response["backends"][0]["backend"], "local");
    assert_eq!(response["backends"][0]["kind"], "unavailable");
}

#[test]
fn test_ask_empty_index_is_no_context() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_finrag(&config_path, &["ask", "What is my APR?", "--local", "--json"]);
    assert!(success);
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["status"], "no_context");
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[db]\npath = \"x.db\"\n[chunking]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap();

    let (_, stderr, success) = run_finrag(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"));
}
