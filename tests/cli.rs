use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kbi_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kbi");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[store]
provider = "sqlite"
path = "{root}/data/vectors.sqlite"

[embedding]
provider = "disabled"

[documents]
dir = "{root}/data/documents"

[partitions]
start = "2023-01-01"

[pacing]
mode = "none"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kbi.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kbi(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kbi_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbi binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Write a documents file the way the raw steps do.
fn write_documents(root: &Path, pipeline: &str, partition: &str, docs: serde_json::Value) {
    let dir = root.join("data").join("documents").join(pipeline);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(format!("{}.json", partition)),
        serde_json::to_string_pretty(&docs).unwrap(),
    )
    .unwrap();
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbi(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/vectors.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_kbi(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_kbi(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_partitions_lists_most_recent_first() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbi(&config_path, &["partitions", "--limit", "3"]);
    assert!(success, "partitions failed: stdout={}, stderr={}", stdout, stderr);

    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines[0].starts_with("KEY"));
    let keys: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split_whitespace().next().unwrap())
        .collect();
    assert_eq!(keys.len(), 3);
    assert!(keys[0] > keys[1] && keys[1] > keys[2]);
}

#[test]
fn test_partitions_without_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, stderr, success) = run_kbi(&missing, &["partitions", "--limit", "1000"]);
    assert!(success, "partitions failed: stdout={}, stderr={}", stdout, stderr);
    // Default start is 2023-01-01, and that week is long complete.
    assert!(stdout.contains("2023-01-01"));
    assert!(stdout.contains("2023-01-08"));
}

#[test]
fn test_partitions_json() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_kbi(&config_path, &["--json", "partitions", "--limit", "2"]);
    assert!(success);

    let rows: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0]["key"].as_str().unwrap() > rows[1]["key"].as_str().unwrap());
    assert!(rows[0]["start"].as_str().unwrap().contains("T00:00:00"));
}

#[test]
fn test_embed_dry_run_counts_calls() {
    let (tmp, config_path) = setup_test_env();

    let docs: Vec<serde_json::Value> = (1..=45)
        .map(|n| {
            serde_json::json!({
                "text": format!("Discussion {}", n),
                "metadata": {
                    "source": format!("https://github.com/dagster-io/dagster/discussions/{}", n),
                    "type": "discussion",
                    "number": n,
                }
            })
        })
        .collect();
    write_documents(
        tmp.path(),
        "github-discussions",
        "2023-01-01",
        serde_json::Value::Array(docs),
    );

    let (stdout, stderr, success) = run_kbi(
        &config_path,
        &[
            "--json",
            "embed",
            "github-discussions",
            "--partition",
            "2023-01-01",
            "--dry-run",
        ],
    );
    assert!(success, "embed failed: stdout={}, stderr={}", stdout, stderr);

    let report: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(report["step"], "github_discussions_embeddings");
    assert_eq!(report["partition"], "2023-01-01");
    assert_eq!(report["metadata"]["documents"], 45);
    assert_eq!(report["metadata"]["embedding_calls"], 3);
    assert_eq!(report["metadata"]["namespace"], "dagster-github");
}

#[test]
fn test_embed_docs_dry_run_ignores_partition() {
    let (tmp, config_path) = setup_test_env();

    write_documents(
        tmp.path(),
        "docs",
        "all",
        serde_json::json!([
            {"text": "Assets", "metadata": {"source": "https://docs.dagster.io/a", "type": "docs"}},
            {"text": "Jobs", "metadata": {"source": "https://docs.dagster.io/b", "type": "docs"}}
        ]),
    );

    let (stdout, stderr, success) = run_kbi(
        &config_path,
        &["embed", "docs", "--partition", "2023-01-01", "--dry-run"],
    );
    assert!(success, "embed failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("docs_embedding"));
    assert!(stdout.contains("embedding_calls: 1"));
    assert!(stdout.contains("id_policy: source_hash"));
    assert!(!stdout.contains("partition:"));
}

#[test]
fn test_embed_without_documents_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbi(
        &config_path,
        &["embed", "github-issues", "--partition", "2023-01-01"],
    );
    assert!(!success);
    assert!(stderr.contains("kbi ingest github-issues"));
}

#[test]
fn test_embed_with_disabled_provider_fails() {
    let (tmp, config_path) = setup_test_env();

    write_documents(
        tmp.path(),
        "github-issues",
        "2023-01-01",
        serde_json::json!([{"text": "Issue", "metadata": {"source": "https://x.test/1"}}]),
    );

    let (_, stderr, success) = run_kbi(
        &config_path,
        &["embed", "github-issues", "--partition", "2023-01-01"],
    );
    assert!(!success);
    assert!(stderr.contains("dimension"));
}

#[test]
fn test_misaligned_partition_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbi(
        &config_path,
        &["embed", "github-issues", "--partition", "2023-01-03", "--dry-run"],
    );
    assert!(!success);
    assert!(stderr.contains("cannot select a partition"));
}

#[test]
fn test_unknown_pipeline_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_kbi(&config_path, &["embed", "slack", "--dry-run"]);
    assert!(!success);

    let (_, stderr, success) = run_kbi(&config_path, &["run", "slack", "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("Unknown pipeline"));
}

#[test]
fn test_stats_on_fresh_store() {
    let (_tmp, config_path) = setup_test_env();

    run_kbi(&config_path, &["init"]);
    let (stdout, stderr, success) = run_kbi(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("dagster-github"));
    assert!(stdout.contains("dagster-docs"));
    assert!(stdout.contains("missing"));
}

#[test]
fn test_search_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbi(&config_path, &["search", "assets"]);
    assert!(!success);
    assert!(stderr.contains("Search requires embeddings"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[store]\nprovider = \"redis\"\n").unwrap();

    let (_, stderr, success) = run_kbi(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Unknown store provider"));
}
