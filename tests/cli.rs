use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const MOCK_CONFIG: &str = r#"
source:
  url: https://www.bilibili.com/video/BV1xx411c7mD
download:
  mock_parts: 3
transcribe:
  extract_audio: false
app:
  mock: true
  log_level: warn
"#;

fn write_config(dir: &Path, content: &str) {
    fs_err::write(dir.join("config.yaml"), content).unwrap();
}

fn video2note(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("video2note").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG").env_remove("VIDEO2NOTE_CONFIG");
    cmd
}

fn markdown_files(dir: &Path) -> usize {
    fs_err::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map_or(false, |x| x == "md"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_mock_run_writes_notes() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), MOCK_CONFIG);

    video2note(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Run summary"))
        .stdout(predicate::str::contains("P01 Mock Part 1.md"));

    assert_eq!(markdown_files(&dir.path().join("notes")), 3);
}

#[test]
fn test_second_run_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), MOCK_CONFIG);

    video2note(dir.path()).assert().success();
    video2note(dir.path()).assert().success();

    assert_eq!(markdown_files(&dir.path().join("notes")), 3);
}

#[test]
fn test_summarize_only_run_uses_cached_transcripts() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), MOCK_CONFIG);

    video2note(dir.path())
        .args(["--to", "transcribe"])
        .assert()
        .success();
    assert_eq!(markdown_files(&dir.path().join("notes")), 0);

    video2note(dir.path())
        .args(["--from", "summarize", "--to", "summarize"])
        .assert()
        .success();
    assert_eq!(markdown_files(&dir.path().join("notes")), 3);
}

#[test]
fn test_explicit_config_path() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("custom.yaml");
    fs_err::write(&config, MOCK_CONFIG).unwrap();

    video2note(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["--to", "download"])
        .assert()
        .success();
}

#[test]
fn test_missing_source_url_fails() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "source:\n  url: ''\napp:\n  mock: true\n");

    video2note(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("source.url"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();

    video2note(dir.path())
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn test_transcribe_without_download_names_stage() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), MOCK_CONFIG);

    video2note(dir.path())
        .args(["--from", "transcribe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("transcribe stage failed"));
}
