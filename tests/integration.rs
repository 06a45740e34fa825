use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn storelens_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("storelens");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("2024")).unwrap();
    fs::write(
        files_dir.join("sales.csv"),
        "Store-ID,Date,Revenue\nVM_DL_001,2024-03-01,125000\nVM_MH_002,2024-03-01,98000\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("inventory.csv"),
        "Store-ID,SKU,Stock\nVM_DL_001,00123,40\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("2024/notes.txt"),
        "Delhi stores saw heavy footfall during Holi.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/storelens.sqlite"

[server]
bind = "127.0.0.1:8341"

[llm]
provider = "disabled"

[[lookup.stores]]
id = "VM_DL_001"
name = "Connaught Place"
city = "Delhi"
"#,
        root.display()
    );

    let config_path = config_dir.join("storelens.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_storelens(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = storelens_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run storelens binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn files_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_storelens(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized successfully"));

    let db = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("data/storelens.sqlite");
    assert!(db.exists());
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_storelens(&config_path, &["init"]);
    assert!(success, "first init failed: {}", stderr);
    let (_, stderr, success) = run_storelens(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_paths_add_list_and_remove() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, stderr, success) = run_storelens(
        &config_path,
        &[
            "paths",
            "add",
            "Reports",
            files.to_str().unwrap(),
            "--description",
            "weekly exports",
        ],
    );
    assert!(success, "paths add failed: {}", stderr);
    assert!(stdout.contains("Added path"));
    assert!(stdout.contains("3 files"));

    let (stdout, _, success) = run_storelens(&config_path, &["paths", "list"]);
    assert!(success);
    assert!(stdout.contains("Reports"));
    assert!(stdout.contains("weekly exports"));

    let id = stdout.split_whitespace().next().unwrap().to_string();
    let (stdout, stderr, success) = run_storelens(&config_path, &["paths", "remove", &id]);
    assert!(success, "paths remove failed: {}", stderr);
    assert!(stdout.contains("Removed path Reports"));
    assert!(files.join("sales.csv").exists());

    let (stdout, _, _) = run_storelens(&config_path, &["paths", "list"]);
    assert!(stdout.contains("No configured paths."));
}

#[test]
fn test_nonexistent_path_rejected_and_not_listed() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("does-not-exist");

    let (_, stderr, success) = run_storelens(
        &config_path,
        &["paths", "add", "Ghost", missing.to_str().unwrap()],
    );
    assert!(!success, "adding a missing path should fail");
    assert!(stderr.contains("does not exist"), "stderr: {}", stderr);

    let (stdout, _, success) = run_storelens(&config_path, &["paths", "list"]);
    assert!(success);
    assert!(stdout.contains("No configured paths."));
    assert!(!stdout.contains("Ghost"));
}

#[test]
fn test_paths_validate_does_not_save() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, stderr, success) =
        run_storelens(&config_path, &["paths", "validate", files.to_str().unwrap()]);
    assert!(success, "validate failed: {}", stderr);
    assert!(stdout.contains("exists:    true"));

    let (stdout, _, _) = run_storelens(&config_path, &["paths", "list"]);
    assert!(stdout.contains("No configured paths."));
}

#[test]
fn test_paths_search_finds_content() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (_, stderr, success) = run_storelens(
        &config_path,
        &["paths", "add", "Reports", files.to_str().unwrap()],
    );
    assert!(success, "paths add failed: {}", stderr);

    let (stdout, stderr, success) = run_storelens(&config_path, &["paths", "search", "holi"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("Reports:2024/notes.txt:1"));
}

#[test]
fn test_crossref_sales_and_inventory() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, stderr, success) = run_storelens(
        &config_path,
        &[
            "crossref",
            files.join("sales.csv").to_str().unwrap(),
            files.join("inventory.csv").to_str().unwrap(),
        ],
    );
    assert!(success, "crossref failed: {}", stderr);
    assert!(stdout.contains("## store-id (1)"));
    assert!(stdout.contains("store-id: inventory.csv ↔ sales.csv"));
    assert!(stdout.contains("[VM_DL_001]"));
    assert!(!stdout.contains("VM_MH_002"));
}

#[test]
fn test_crossref_single_file_reports_nothing() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, _, success) = run_storelens(
        &config_path,
        &["crossref", files.join("sales.csv").to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("No cross-references found."));
}

#[test]
fn test_crossref_ignores_neighbouring_numeric_columns() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);
    fs::write(
        files.join("returns.csv"),
        "store,units,returns\nVM_DL_001,12,500\n",
    )
    .unwrap();
    fs::write(files.join("invoice.txt"), "VM_DL_001 invoice total Rs. 12500\n").unwrap();

    let (stdout, stderr, success) = run_storelens(
        &config_path,
        &[
            "crossref",
            files.join("returns.csv").to_str().unwrap(),
            files.join("invoice.txt").to_str().unwrap(),
        ],
    );
    assert!(success, "crossref failed: {}", stderr);
    assert!(stdout.contains("[VM_DL_001]"));
    assert!(!stdout.contains("## amount"), "stdout: {}", stdout);
}

#[test]
fn test_extract_csv_preserves_leading_zeros() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, stderr, success) = run_storelens(
        &config_path,
        &["extract", files.join("inventory.csv").to_str().unwrap()],
    );
    assert!(success, "extract failed: {}", stderr);
    assert!(stdout.contains("== inventory.csv (csv"));
    assert!(stdout.contains("=== RAW DATA"));
    assert!(stdout.contains("00123"));
}

#[test]
fn test_extract_missing_file_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope.csv");

    let (_, stderr, success) =
        run_storelens(&config_path, &["extract", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("nope.csv"));
}

#[test]
fn test_format_inr() {
    let (_tmp, config_path) = setup_test_env();

    for (input, expected) in [
        ("99999", "₹99,999"),
        ("100000", "₹1.00 L"),
        ("9999999", "₹100.00 L"),
        ("10000000", "₹1.00 Cr"),
        ("1,02,00,000", "₹1.02 Cr"),
        ("-2500", "-₹2,500"),
    ] {
        let (stdout, stderr, success) = run_storelens(&config_path, &["format-inr", input]);
        assert!(success, "format-inr {} failed: {}", input, stderr);
        assert_eq!(stdout.trim(), expected);
    }
}

#[test]
fn test_ask_without_model_reports_unavailable() {
    let (_tmp, config_path) = setup_test_env();
    let files = files_dir(&config_path);

    let (stdout, stderr, success) = run_storelens(
        &config_path,
        &[
            "ask",
            "How is VM_DL_001 doing?",
            "--file",
            files.join("sales.csv").to_str().unwrap(),
            "--file",
            files.join("inventory.csv").to_str().unwrap(),
            "--no-paths",
        ],
    );
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("Answer unavailable"));
    assert!(stdout.contains("[UPLOADED FILE] sales.csv"));
    assert!(stdout.contains("[UPLOADED FILE] inventory.csv"));
    assert!(stdout.contains("[EXTERNAL DATA] store directory"));
    assert!(stdout.contains("Cross-references:"));
}

#[test]
fn test_ask_empty_question_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_storelens(&config_path, &["ask", "   "]);
    assert!(!success);
    assert!(stderr.contains("question must not be empty"));
}

#[test]
fn test_missing_config_fails_for_paths() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("absent.toml");

    let (_, stderr, success) = run_storelens(&config_path, &["paths", "list"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
