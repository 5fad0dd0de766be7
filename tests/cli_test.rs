use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

fn pinalbum() -> Command {
    let mut cmd = Command::cargo_bin("pinalbum").unwrap();
    cmd.env_remove("PINALBUM_API_KEY");
    cmd
}

/// Writes a config whose data file lives inside `dir`
fn write_config(dir: &Path, api_key: &str) -> PathBuf {
    let config_path = dir.join("pinalbum.yaml");
    let data_file = dir.join("data").join("pinalbum.yaml");
    fs::write(
        &config_path,
        format!(
            "api_key: '{api_key}'\napi_url: 'http://127.0.0.1:9/services/rest/'\ndata_file: '{}'\n",
            data_file.display()
        ),
    )
    .unwrap();
    config_path
}

fn setup() -> (TempDir, PathBuf) {
    let temp_dir = tempdir().unwrap();
    let config_path = write_config(temp_dir.path(), "");
    (temp_dir, config_path)
}

#[test]
fn test_init_creates_config() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("nested").join("pinalbum.yaml");

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));

    let yaml = fs::read_to_string(&config_path).unwrap();
    assert!(yaml.contains("api_url"));
    assert!(yaml.contains("per_page: 30"));
}

#[test]
fn test_init_does_not_overwrite_without_force() {
    let (_temp_dir, config_path) = setup();
    let before = fs::read_to_string(&config_path).unwrap();

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
    assert_eq!(fs::read_to_string(&config_path).unwrap(), before);

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .args(["init", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));
    assert_ne!(fs::read_to_string(&config_path).unwrap(), before);
}

#[test]
fn test_missing_config_is_reported() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("missing.yaml");

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"))
        .stderr(predicate::str::contains("pinalbum init"));
}

#[test]
fn test_status_on_empty_cache() {
    let (_temp_dir, config_path) = setup();

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("pinalbum Status"))
        .stdout(predicate::str::contains("API key set: false"))
        .stdout(predicate::str::contains("Pins: 0"))
        .stdout(predicate::str::contains("Photos: 0"));
}

#[test]
fn test_list_on_empty_cache() {
    let (_temp_dir, config_path) = setup();

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 pins"));

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .args(["list", "--lat", "-33.8688", "--lon", "151.2093"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 photos for pin -33.868800_151.209300"));
}

#[test]
fn test_load_requires_api_key() {
    let (_temp_dir, config_path) = setup();

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .args(["load", "--lat", "19.3126", "--lon", "-99.0778"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API key configured"))
        .stderr(predicate::str::contains("PINALBUM_API_KEY"));
}

#[test]
fn test_refresh_unknown_pin() {
    let (_temp_dir, config_path) = setup();

    pinalbum()
        .env("PINALBUM_API_KEY", "from-env")
        .arg("--config")
        .arg(&config_path)
        .args(["refresh", "--lat", "10", "--lon", "20"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No pin at 10.000000_20.000000"));
}

#[test]
fn test_delete_and_remove_on_empty_cache() {
    let (_temp_dir, config_path) = setup();

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .args(["delete", "--lat", "1.5", "--lon", "2.5", "--id", "12345"])
        .assert()
        .success()
        .stdout(predicate::str::contains("was not in the album"));

    pinalbum()
        .arg("--config")
        .arg(&config_path)
        .args(["remove-pin", "--lat", "1.5", "--lon", "2.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No pin at 1.500000_2.500000"));
}
