//! Tests for the validate-config binary

use std::fs;
use std::process::Command;

fn validate_config() -> Command {
    Command::new(env!("CARGO_BIN_EXE_validate-config"))
}

#[test]
fn validates_default_path_without_argument() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("warden");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        "config_version = 1\n\n[command]\nprogram = \"/bin/cat\"\n",
    )
    .unwrap();

    let output = validate_config()
        .env("XDG_CONFIG_HOME", dir.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration is valid"));
    assert!(stdout.contains("Program: /bin/cat"));
}

#[test]
fn missing_default_config_fails() {
    let dir = tempfile::tempdir().unwrap();

    let output = validate_config()
        .env("XDG_CONFIG_HOME", dir.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn invalid_config_is_reported() {
    let file = tempfile::NamedTempFile::new().unwrap();
    fs::write(file.path(), "config_version = 1\n\n[command]\nprogram = \"\"\n").unwrap();

    let output = validate_config().arg(file.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Validation errors"));
}
