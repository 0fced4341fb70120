use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn esearch_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_esearch"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(
        data_dir.join("documents.json"),
        r#"{"value": [
  {"ID": "enf-2021-07", "Title": "Penalty notice to Contoso Freight",
   "KeyFacts": "Contoso Freight shipped goods to Cuba.", "DateIssued": "2021-07-19"},
  {"ID": "guid-2022-03", "Title": "Guidance on Iranian-origin banknotes",
   "KeyFacts": "Importation of Iranian-origin banknotes requires authorization.",
   "DateIssued": "2022-03-11"}
]}"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[llm]
provider = "disabled"

[search]
backend = "memory"
documents_path = "{}/data/documents.json"

[orchestrator]
retry_backoff_ms = 10
"#,
        root.display()
    );

    let config_path = config_dir.join("esearch.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_esearch(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = esearch_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run esearch binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_routes_without_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("does-not-exist.toml");

    let (stdout, stderr, success) = run_esearch(&missing, &["routes"]);
    assert!(success, "routes failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Basic Keyword Search with Filters"));
    assert!(stdout.contains("[not yet supported]"));
}

#[test]
fn test_routes_json() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_esearch(&config_path, &["routes", "--json"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let routes: Vec<&str> = parsed
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["route"].as_str().unwrap())
        .collect();
    assert_eq!(routes, vec!["basic_search", "advanced_search", "statistical"]);
}

#[test]
fn test_check_reports_components() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_esearch(&config_path, &["check"]);
    assert!(success, "check failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("llm"));
    assert!(stdout.contains("disabled"));
    assert!(stdout.contains("documents.json"));
    assert!(stdout.contains("Configuration OK."));
}

#[test]
fn test_check_rejects_missing_documents_file() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("esearch.toml");
    fs::write(
        &config_path,
        format!(
            "[llm]\nprovider = \"disabled\"\n\n[search]\nbackend = \"memory\"\ndocuments_path = \"{}/nope.json\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_esearch(&config_path, &["check"]);
    assert!(!success);
    assert!(stderr.contains("nope.json"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_provider_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("esearch.toml");
    fs::write(
        &config_path,
        "[llm]\nprovider = \"mystery\"\n\n[search]\nbackend = \"memory\"\n",
    )
    .unwrap();

    let (_, stderr, success) = run_esearch(&config_path, &["check"]);
    assert!(!success);
    assert!(stderr.contains("Unknown llm provider"), "stderr: {}", stderr);
}

#[test]
fn test_ask_without_llm_fails_with_classification_unavailable() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_esearch(
        &config_path,
        &["ask", "Can Iranian origin banknotes be imported?", "--json"],
    );
    assert!(!success, "ask unexpectedly succeeded: {}", stdout);
    let failure: serde_json::Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {} / {}", e, stdout, stderr));
    assert_eq!(failure["kind"], "classification_unavailable");
    assert_eq!(failure["stage"], "classifying");
    assert_eq!(failure["attempts"], 1);
}

#[test]
fn test_ask_blank_question_is_invalid_input() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_esearch(&config_path, &["ask", "   "]);
    assert!(!success);
    assert!(stderr.contains("invalid input"), "stderr: {}", stderr);
}

#[test]
fn test_classify_without_llm_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_esearch(&config_path, &["classify", "How many violations in 2023?"]);
    assert!(!success);
    assert!(stderr.contains("classification unavailable"), "stderr: {}", stderr);
}
