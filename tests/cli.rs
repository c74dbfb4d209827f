use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ftx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ftx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    let sources = root.join("sources");
    fs::create_dir_all(&sources).unwrap();

    fs::write(sources.join("a.txt"), "alpha full text\n").unwrap();
    fs::write(
        sources.join("b.xml"),
        "<?xml version=\"1.0\"?><article><title>Beta</title><body><p>beta body</p></body></article>",
    )
    .unwrap();

    let config_content = format!(
        r#"[store]
root = "{}/store"

[extraction]
retry_backoff_ms = 1
standard_workers = 2
pdf_workers = 1

[writer]
instances = 2

[logging]
level = "warn"
"#,
        root.display()
    );
    let config_path = root.join("config").join("ftx.toml");
    fs::write(&config_path, config_content).unwrap();

    let links = format!(
        "# bibcode\tpath\tprovider\n2001A&A...1..1A\t{}\taanda\n2002ApJ...2..2B\t{}\taas\tteixml\n",
        sources.join("a.txt").display(),
        sources.join("b.xml").display()
    );
    let links_path = root.join("links.tsv");
    fs::write(&links_path, links).unwrap();

    (tmp, config_path, links_path)
}

fn run_ftx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ftx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_run_then_rerun() {
    let (_tmp, config, links) = setup_test_env();
    let links = links.to_str().unwrap();

    let (stdout, stderr, success) = run_ftx(&config, &["run", links]);
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("NEW: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("written: 2"));
    assert!(stdout.contains("errors: 0"));

    let (stdout, _, success) = run_ftx(&config, &["run", links]);
    assert!(success);
    assert!(stdout.contains("NO_CHANGE: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("written: 0"));
}

#[test]
fn test_check_is_dry_run() {
    let (_tmp, config, links) = setup_test_env();

    let (stdout, stderr, success) = run_ftx(&config, &["check", links.to_str().unwrap()]);
    assert!(success, "check failed: {}", stderr);
    assert!(stdout.contains("would queue Standard: 2"), "stdout: {}", stdout);

    let (stdout, _, success) = run_ftx(&config, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Complete:    0"), "stdout: {}", stdout);
}

#[test]
fn test_show_after_run() {
    let (_tmp, config, links) = setup_test_env();
    let (_, stderr, success) = run_ftx(&config, &["run", links.to_str().unwrap()]);
    assert!(success, "run failed: {}", stderr);

    let (stdout, stderr, success) = run_ftx(&config, &["show", "2002ApJ...2..2B", "--json"]);
    assert!(success, "show failed: {}", stderr);
    let resp: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(resp["provenance"]["provider"], "aas");
    assert!(resp["provenance"]["ft_source"]
        .as_str()
        .unwrap()
        .ends_with("b.xml"));
    assert!(resp["text_bytes"].as_u64().unwrap() > 0);
}

#[test]
fn test_show_unknown_bibcode_fails() {
    let (_tmp, config, _) = setup_test_env();
    let (_, stderr, success) = run_ftx(&config, &["show", "1999Nope....1..1X"]);
    assert!(!success);
    assert!(stderr.contains("no provenance recorded"), "stderr: {}", stderr);
}

#[test]
fn test_stats_and_sweep() {
    let (_tmp, config, links) = setup_test_env();
    let (_, stderr, success) = run_ftx(&config, &["run", links.to_str().unwrap()]);
    assert!(success, "run failed: {}", stderr);

    let (stdout, _, success) = run_ftx(&config, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Complete:    2"), "stdout: {}", stdout);
    assert!(stdout.contains("Incomplete:  0"));

    let (stdout, _, success) = run_ftx(&config, &["sweep"]);
    assert!(success);
    assert!(stdout.contains("removed: 0"));
}

#[test]
fn test_missing_config_fails() {
    let (tmp, _, links) = setup_test_env();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_ftx(&missing, &["run", links.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
