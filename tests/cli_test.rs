use std::fs;
use std::process::Command;

use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cgingest_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cgingest"))
}

/// Create a temp project with a mock-provider `.corpusgraph` config and a
/// couple of markdown files, ready to be ingested by a test.
fn setup_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    fs::write(
        root.join(".corpusgraph"),
        "CGI_EMBEDDING_PROVIDER=mock\nCGI_EMBEDDING_DIMENSIONS=8\nCGI_WATCH=false\n",
    )
    .unwrap();

    fs::write(
        root.join("hello.md"),
        "---\ntitle: Hello World\n---\n\n# Hello\n\nThis is a test document about greetings.\n",
    )
    .unwrap();

    fs::write(
        root.join("rust.md"),
        "---\ntitle: Rust Guide\n---\n\n# Rust\n\nRust is a systems programming language.\n",
    )
    .unwrap();

    dir
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn version_prints_logo_and_exits_ok() {
    let output = cgingest_bin()
        .arg("--version")
        .output()
        .expect("failed to execute cgingest");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("corpus-graph-ingest"));
}

#[test]
fn no_subcommand_prints_hint() {
    let dir = TempDir::new().unwrap();
    let output = cgingest_bin()
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.to_lowercase().contains("cgingest"));
}

#[test]
fn init_writes_dotenv_template() {
    let dir = TempDir::new().unwrap();
    let output = cgingest_bin()
        .arg("init")
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest init");

    assert!(output.status.success());
    let config_path = dir.path().join(".corpusgraph");
    assert!(config_path.exists());
    let contents = fs::read_to_string(&config_path).unwrap();
    assert!(contents.contains("CGI_EMBEDDING_PROVIDER"));
    assert!(contents.contains("CGI_CHUNK_MAX_CHARS"));
}

#[test]
fn config_json_reports_resolved_settings() {
    let dir = setup_project();
    let output = cgingest_bin()
        .args(["config", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest config");

    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["embedding_provider"], "Mock");
    assert_eq!(parsed["embedding_dimensions"], 8);
}

#[test]
fn status_json_on_fresh_project_reports_no_files() {
    let dir = setup_project();
    let output = cgingest_bin()
        .args(["status", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest status");

    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(parsed.as_object().unwrap().is_empty());
}

#[test]
fn ingest_then_status_reports_embedded_files() {
    let dir = setup_project();

    let ingest_output = cgingest_bin()
        .args(["ingest", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest ingest");
    assert!(
        ingest_output.status.success(),
        "ingest should succeed, stderr: {}",
        String::from_utf8_lossy(&ingest_output.stderr)
    );
    let parsed: serde_json::Value = serde_json::from_slice(&ingest_output.stdout).unwrap();
    assert_eq!(parsed["discovered"]["files_parsed"], 2);
    assert_eq!(parsed["linked"]["files_embedded"], 2);

    let status_output = cgingest_bin()
        .args(["status", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest status");
    assert!(status_output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&status_output.stdout).unwrap();
    assert_eq!(stats["embedded"], 2);
}

#[test]
fn reindex_processes_the_named_file_only() {
    let dir = setup_project();

    let output = cgingest_bin()
        .args(["reindex", "hello.md", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest reindex");
    assert!(
        output.status.success(),
        "reindex should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let status_output = cgingest_bin()
        .args(["status", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest status");
    assert!(status_output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&status_output.stdout).unwrap();
    assert_eq!(stats["embedded"], 1);
}

#[test]
fn recover_on_clean_project_is_a_no_op() {
    let dir = setup_project();
    cgingest_bin()
        .arg("ingest")
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest ingest");

    let output = cgingest_bin()
        .args(["recover", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest recover");

    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["files_recovered"], 0);
    assert_eq!(parsed["states_reset"], 0);
}

#[test]
fn doctor_reports_config_loaded() {
    let dir = setup_project();
    let output = cgingest_bin()
        .arg("doctor")
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest doctor");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("configuration loaded and validated"));
}

#[test]
fn doctor_reports_unreachable_entity_service() {
    let dir = setup_project();
    let output = cgingest_bin()
        .arg("doctor")
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest doctor");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("entity service"));
}

#[test]
fn completions_bash_mentions_subcommands() {
    let output = cgingest_bin()
        .args(["completions", "bash"])
        .output()
        .expect("failed to execute cgingest completions");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cgingest"));
    assert!(stdout.contains("ingest"));
}

#[test]
fn completions_zsh_mentions_subcommands() {
    let output = cgingest_bin()
        .args(["completions", "zsh"])
        .output()
        .expect("failed to execute cgingest completions");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("#compdef cgingest"));
}

#[test]
fn unknown_subcommand_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let output = cgingest_bin()
        .arg("not-a-real-command")
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest");

    assert!(!output.status.success());
}

#[test]
fn watch_with_watching_disabled_in_config_errors() {
    let dir = setup_project();
    // CGI_WATCH=false is already set in .corpusgraph by setup_project().
    let output = cgingest_bin()
        .arg("watch")
        .current_dir(dir.path())
        .output()
        .expect("failed to execute cgingest watch");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.to_lowercase().contains("watch"));
}
